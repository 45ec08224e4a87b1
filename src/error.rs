//! Error types for the certificate directory.
//!
//! The variants follow the directory's failure taxonomy: per-item
//! conditions a batch caller may skip (`BadData`, `NotFound`), conditions
//! that terminate the enclosing operation (`Interrupted`, `NotAStore`), and
//! the degraded-success case where a slot was committed but its subkey
//! index entries could not be updated (`IndexStale`).

use thiserror::Error;

use crate::types::{Fingerprint, KeyMaterial};

/// The main error type for certificate directory operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Input does not decode as a certificate or key
    #[error("Bad data: {0}")]
    BadData(String),

    /// Special name or fingerprint is malformed, unregistered, or bound
    /// to a different identity
    #[error("Bad name: {0}")]
    BadName(String),

    /// No material stored at the requested slot
    #[error("Not found: {0}")]
    NotFound(String),

    /// Merge invoked on material of two different primary keys
    #[error("Identity mismatch: existing {existing} vs update {update}")]
    IdentityMismatch {
        existing: Fingerprint,
        update: Fingerprint,
    },

    /// Stored tag changed under a writer and retries were exhausted
    #[error("Concurrent modification: {0}")]
    Conflict(String),

    /// Waiting for a slot lock was cancelled or timed out
    #[error("Interrupted: {0}")]
    Interrupted(String),

    /// The base directory cannot be used as a store
    #[error("Not a certificate store: {0}")]
    NotAStore(String),

    /// The slot was written but the subkey index could not be updated
    #[error("Stored {fingerprint} but subkey index is stale: {reason}")]
    IndexStale {
        fingerprint: Fingerprint,
        committed: Box<KeyMaterial>,
        reason: String,
    },

    /// Key generation failed
    #[error("Crypto error: {0}")]
    Crypto(String),

    /// File I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Database error (sqlite feature)
    #[cfg(feature = "sqlite")]
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// rpgp OpenPGP error
    #[error("OpenPGP error: {0}")]
    OpenPgp(#[from] pgp::errors::Error),
}

/// A specialized Result type for certificate directory operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Whether this is the expected "nothing stored here" outcome.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }

    /// Material that was committed despite this error.
    ///
    /// Only `IndexStale` carries committed material.
    pub fn committed(&self) -> Option<&KeyMaterial> {
        match self {
            Error::IndexStale { committed, .. } => Some(committed),
            _ => None,
        }
    }

    /// Process exit code for the command-line front end.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::NotFound(_) => 2,
            Error::Io(_) | Error::Conflict(_) => 5,
            #[cfg(feature = "sqlite")]
            Error::Database(_) => 5,
            Error::NotAStore(_) => 30,
            _ => 1,
        }
    }
}
