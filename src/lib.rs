//! # pgp-certd
//!
//! A shared, fingerprint-addressed directory of OpenPGP certificates and
//! secret keys built on [rpgp](https://docs.rs/pgp), with a
//! `pgp.cert.d`-style on-disk layout. Certificate slots match
//! `pgp.cert.d`; the `trust-root` file names the bound fingerprint instead
//! of holding the key.
//!
//! The crate provides:
//!
//! - **Merge engine**: pluggable policies combining incoming and stored
//!   material, with a packet-union `merge` and a replacing override
//! - **Certificate directory**: get/insert/list with per-slot locking,
//!   tag-guarded atomic writes and retry on conflict
//! - **Subkey index**: lookup of stored material by any component key id
//!   (in memory, or SQLite with the `sqlite` feature)
//! - **Special names**: the `trust-root` alias bound to one slot
//!
//! ## Quick Start
//!
//! ```no_run
//! use pgp_certd::*;
//!
//! let dir = CertificateDirectory::open("/tmp/pgp.cert.d").unwrap();
//!
//! // Set up a trust root
//! let root = generate_trust_root(None).unwrap();
//! dir.insert_with_special_name("trust-root", root.bytes(), &override_with_update)
//!     .unwrap();
//!
//! // Store a certificate, merging with what is already there
//! let cert = std::fs::read("alice.pgp").unwrap();
//! let stored = dir.insert(&cert, &merge).unwrap();
//!
//! // Find it again by a subkey id
//! let id = stored.subkey_ids()[0];
//! assert!(dir.find_by_subkey_id(id).unwrap().contains(stored.fingerprint()));
//! ```
//!
//! ## Features
//!
//! - `sqlite` (default): durable subkey index and [`CertificateDirectory::open`]
//!
//! ## Concurrency
//!
//! Writers of the same fingerprint are serialized by a per-slot lock that
//! also covers other processes using the same store. Writers of different
//! fingerprints never contend. Readers never block and never see a partial
//! write.

mod backend;
mod codec;
mod config;
mod directory;
mod error;
mod internal;
mod key;
mod lock;
mod merge;
mod subkey_index;
mod types;

#[cfg(test)]
mod testing;

// Re-export error types
pub use error::{Error, Result};

// Re-export all public types
pub use types::{
    Certificate, Fingerprint, Key, KeyMaterial, MaterialStats, SpecialName, SubkeyId, Tag,
};

pub use codec::{KeyMaterialCodec, PgpCodec};

pub use merge::{diff, merge, override_with_update, MergeDiff, MergePolicy};

pub use backend::{Backend, BackendLock, FsBackend, MemoryBackend, StoredEntry};

pub use subkey_index::{InMemorySubkeyLookup, SubkeyLookup};
#[cfg(feature = "sqlite")]
pub use subkey_index::SqliteSubkeyLookup;

pub use lock::Interrupt;

pub use config::{resolve_base_dir, DirectoryConfig, BASE_DIR_ENV, DEFAULT_DIR_NAME, SUBKEY_DB_NAME};

pub use directory::{CertificateDirectory, ChangeObserver};

pub use key::{generate_key, generate_trust_root, TRUST_ROOT_USER_ID};
