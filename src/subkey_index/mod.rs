//! Subkey id → fingerprint associations.
//!
//! The index is updated once per committed directory write with the slot's
//! previous and new component ids. Lookups return every fingerprint that
//! currently carries the id: unrelated certificates can share a 64-bit id.
//!
//! # Basic Usage
//!
//! ```
//! use pgp_certd::{Fingerprint, InMemorySubkeyLookup, SubkeyId, SubkeyLookup};
//!
//! let index = InMemorySubkeyLookup::new();
//! let fp = Fingerprint::parse("0123456789ABCDEF0123456789ABCDEF01234567").unwrap();
//! index.associate(SubkeyId(42), &fp).unwrap();
//!
//! assert!(index.lookup(SubkeyId(42)).unwrap().contains(&fp));
//! assert!(index.lookup(SubkeyId(7)).unwrap().is_empty());
//! ```

mod memory;
#[cfg(feature = "sqlite")]
mod schema;
#[cfg(feature = "sqlite")]
mod sqlite;

pub use memory::InMemorySubkeyLookup;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteSubkeyLookup;

use std::collections::BTreeSet;

use crate::error::Result;
use crate::types::{Fingerprint, SubkeyId};

/// Persistence of the subkey index.
pub trait SubkeyLookup: Send + Sync {
    /// Record that `fingerprint` carries `subkey`. Idempotent.
    fn associate(&self, subkey: SubkeyId, fingerprint: &Fingerprint) -> Result<()>;

    /// Drop the association, if present.
    fn disassociate(&self, subkey: SubkeyId, fingerprint: &Fingerprint) -> Result<()>;

    /// Fingerprints currently associated with `subkey`; empty if none.
    fn lookup(&self, subkey: SubkeyId) -> Result<BTreeSet<Fingerprint>>;

    /// Subkey ids currently associated with `fingerprint`.
    fn associated(&self, fingerprint: &Fingerprint) -> Result<BTreeSet<SubkeyId>>;

    /// Apply a slot's change of component ids.
    ///
    /// Ids only in `new` are associated, ids only in `previous` are removed.
    /// Implementations with transactions override this to apply it at once.
    fn update(&self, fingerprint: &Fingerprint, previous: &[SubkeyId], new: &[SubkeyId]) -> Result<()> {
        let (added, removed) = changes(previous, new);
        for subkey in added {
            self.associate(subkey, fingerprint)?;
        }
        for subkey in removed {
            self.disassociate(subkey, fingerprint)?;
        }
        Ok(())
    }
}

/// Split a change of id sets into `(added, removed)`.
pub(crate) fn changes(previous: &[SubkeyId], new: &[SubkeyId]) -> (Vec<SubkeyId>, Vec<SubkeyId>) {
    let previous: BTreeSet<SubkeyId> = previous.iter().copied().collect();
    let new: BTreeSet<SubkeyId> = new.iter().copied().collect();

    (
        new.difference(&previous).copied().collect(),
        previous.difference(&new).copied().collect(),
    )
}
