use std::collections::{BTreeMap, BTreeSet};

use parking_lot::RwLock;

use crate::error::Result;
use crate::types::{Fingerprint, SubkeyId};

use super::SubkeyLookup;

/// Volatile index, lost when dropped.
#[derive(Debug, Default)]
pub struct InMemorySubkeyLookup {
    map: RwLock<BTreeMap<SubkeyId, BTreeSet<Fingerprint>>>,
}

impl InMemorySubkeyLookup {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SubkeyLookup for InMemorySubkeyLookup {
    fn associate(&self, subkey: SubkeyId, fingerprint: &Fingerprint) -> Result<()> {
        self.map
            .write()
            .entry(subkey)
            .or_default()
            .insert(fingerprint.clone());
        Ok(())
    }

    fn disassociate(&self, subkey: SubkeyId, fingerprint: &Fingerprint) -> Result<()> {
        let mut map = self.map.write();
        if let Some(set) = map.get_mut(&subkey) {
            set.remove(fingerprint);
            if set.is_empty() {
                map.remove(&subkey);
            }
        }
        Ok(())
    }

    fn lookup(&self, subkey: SubkeyId) -> Result<BTreeSet<Fingerprint>> {
        Ok(self.map.read().get(&subkey).cloned().unwrap_or_default())
    }

    fn associated(&self, fingerprint: &Fingerprint) -> Result<BTreeSet<SubkeyId>> {
        Ok(self
            .map
            .read()
            .iter()
            .filter(|(_, fps)| fps.contains(fingerprint))
            .map(|(subkey, _)| *subkey)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fp(seed: u8) -> Fingerprint {
        Fingerprint::from_bytes(&[seed; 20])
    }

    #[test]
    fn test_shared_subkey_id() {
        let index = InMemorySubkeyLookup::new();
        index.associate(SubkeyId(1), &fp(1)).unwrap();
        index.associate(SubkeyId(1), &fp(2)).unwrap();
        index.associate(SubkeyId(1), &fp(2)).unwrap();

        let found = index.lookup(SubkeyId(1)).unwrap();
        assert_eq!(found.len(), 2);

        index.disassociate(SubkeyId(1), &fp(1)).unwrap();
        assert_eq!(index.lookup(SubkeyId(1)).unwrap(), BTreeSet::from([fp(2)]));
    }

    #[test]
    fn test_update_adds_and_removes() {
        let index = InMemorySubkeyLookup::new();
        index.update(&fp(1), &[], &[SubkeyId(1), SubkeyId(2)]).unwrap();
        index.update(&fp(1), &[SubkeyId(1), SubkeyId(2)], &[SubkeyId(2), SubkeyId(3)]).unwrap();

        assert!(index.lookup(SubkeyId(1)).unwrap().is_empty());
        assert!(index.lookup(SubkeyId(2)).unwrap().contains(&fp(1)));
        assert!(index.lookup(SubkeyId(3)).unwrap().contains(&fp(1)));
        assert_eq!(
            index.associated(&fp(1)).unwrap(),
            BTreeSet::from([SubkeyId(2), SubkeyId(3)])
        );
    }
}
