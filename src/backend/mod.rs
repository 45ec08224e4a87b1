//! Physical storage of slot contents.
//!
//! A [`Backend`] stores encoded bytes per fingerprint, guards writes with
//! the [`Tag`] of the copy the writer read, resolves special names to
//! fingerprints, and optionally provides a cross-process slot lock.
//!
//! Two implementations ship with the crate:
//!
//! - [`MemoryBackend`]: a process-local map, for tests and ephemeral use
//! - [`FsBackend`]: the on-disk `pgp.cert.d` layout with atomic replacement

mod fs;
mod memory;

pub use fs::FsBackend;
pub use memory::MemoryBackend;

use crate::error::Result;
use crate::types::{Fingerprint, SpecialName, Tag};

/// Bytes stored in a slot with their version tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredEntry {
    pub bytes: Vec<u8>,
    pub tag: Tag,
}

/// A held backend lock; dropping it releases the lock.
#[derive(Debug)]
pub struct BackendLock {
    _file: Option<std::fs::File>,
}

impl BackendLock {
    /// A lock that holds nothing (backends relying on in-process locking).
    pub fn none() -> Self {
        Self { _file: None }
    }

    /// A lock held through an open, locked file.
    pub fn file(file: std::fs::File) -> Self {
        Self { _file: Some(file) }
    }
}

/// Storage collaborator of the directory.
pub trait Backend: Send + Sync {
    /// Read a slot. `None` if nothing is stored.
    fn read(&self, fingerprint: &Fingerprint) -> Result<Option<StoredEntry>>;

    /// Atomically replace a slot's bytes.
    ///
    /// `expected` is the tag the caller read (`None` for a slot it found
    /// empty). A mismatch with what is currently stored fails with
    /// `Conflict` and leaves the slot untouched. Returns the new tag.
    fn write(&self, fingerprint: &Fingerprint, bytes: &[u8], expected: Option<&Tag>) -> Result<Tag>;

    /// Fingerprints of all occupied slots, read lazily.
    fn fingerprints(&self) -> Result<Box<dyn Iterator<Item = Result<Fingerprint>> + '_>>;

    /// The fingerprint a special name is bound to, if any.
    fn read_special(&self, name: SpecialName) -> Result<Option<Fingerprint>>;

    /// Bind a special name to a fingerprint.
    fn bind_special(&self, name: SpecialName, fingerprint: &Fingerprint) -> Result<()>;

    /// Try to take the cross-process lock for a slot without blocking.
    ///
    /// `Ok(None)` means another holder has it. The default holds nothing.
    fn try_lock(&self, _slot: &str) -> Result<Option<BackendLock>> {
        Ok(Some(BackendLock::none()))
    }
}
