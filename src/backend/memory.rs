//! In-memory backend.

use std::collections::{BTreeMap, HashMap};

use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::types::{Fingerprint, SpecialName, Tag};

use super::{Backend, StoredEntry};

/// Process-local storage. Tags are content-derived, as on disk.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    slots: Mutex<BTreeMap<Fingerprint, Vec<u8>>>,
    specials: Mutex<HashMap<SpecialName, Fingerprint>>,
}

impl MemoryBackend {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Backend for MemoryBackend {
    fn read(&self, fingerprint: &Fingerprint) -> Result<Option<StoredEntry>> {
        Ok(self.slots.lock().get(fingerprint).map(|bytes| StoredEntry {
            bytes: bytes.clone(),
            tag: Tag::of(bytes),
        }))
    }

    fn write(&self, fingerprint: &Fingerprint, bytes: &[u8], expected: Option<&Tag>) -> Result<Tag> {
        let mut slots = self.slots.lock();
        let current = slots.get(fingerprint).map(|b| Tag::of(b));
        if current.as_ref() != expected {
            return Err(Error::Conflict(format!(
                "{} was modified concurrently",
                fingerprint
            )));
        }

        slots.insert(fingerprint.clone(), bytes.to_vec());
        Ok(Tag::of(bytes))
    }

    fn fingerprints(&self) -> Result<Box<dyn Iterator<Item = Result<Fingerprint>> + '_>> {
        let snapshot: Vec<Fingerprint> = self.slots.lock().keys().cloned().collect();
        Ok(Box::new(snapshot.into_iter().map(Ok)))
    }

    fn read_special(&self, name: SpecialName) -> Result<Option<Fingerprint>> {
        Ok(self.specials.lock().get(&name).cloned())
    }

    fn bind_special(&self, name: SpecialName, fingerprint: &Fingerprint) -> Result<()> {
        self.specials.lock().insert(name, fingerprint.clone());
        Ok(())
    }
}
