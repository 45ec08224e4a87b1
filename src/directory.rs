//! The certificate directory.
//!
//! [`CertificateDirectory`] ties the collaborators together: the codec
//! classifies incoming bytes, the backend stores one entry per fingerprint,
//! a merge policy combines incoming and stored material, and the subkey
//! index is kept in step with every committed write.
//!
//! # Write path
//!
//! 1. Decode the input. Bad input fails before any lock is taken.
//! 2. Resolve the slot: the material's fingerprint, or the fingerprint a
//!    special name is bound to.
//! 3. Take the slot's exclusive lock (in-process, then backend).
//! 4. Read the stored entry and its tag, apply the policy.
//! 5. Skip the write if nothing changed, otherwise write guarded by the tag
//!    read in step 4. A tag conflict re-reads and re-merges, a bounded
//!    number of times.
//! 6. Update the subkey index with the slot's old and new component ids.
//!
//! # Example
//!
//! ```no_run
//! use pgp_certd::{merge, CertificateDirectory};
//!
//! let dir = CertificateDirectory::open("/tmp/pgp.cert.d").unwrap();
//! let bytes = std::fs::read("alice.pgp").unwrap();
//!
//! let stored = dir.insert(&bytes, &merge).unwrap();
//! println!("stored {}", stored.fingerprint());
//!
//! for fp in dir.fingerprints().unwrap() {
//!     println!("{}", fp.unwrap());
//! }
//! ```

use std::collections::BTreeSet;
#[cfg(feature = "sqlite")]
use std::path::Path;
use std::str::FromStr;
use std::time::Instant;

use crate::backend::{Backend, BackendLock, MemoryBackend};
use crate::codec::{KeyMaterialCodec, PgpCodec};
use crate::config::DirectoryConfig;
use crate::error::{Error, Result};
use crate::lock::{Interrupt, LockWait, SlotGuard, SlotLocks};
use crate::merge::{diff, MergeDiff, MergePolicy};
use crate::subkey_index::{InMemorySubkeyLookup, SubkeyLookup};
use crate::types::{Fingerprint, KeyMaterial, SpecialName, SubkeyId, Tag};

/// Callback receiving a summary of every effective merge.
pub type ChangeObserver = Box<dyn Fn(&MergeDiff) + Send + Sync>;

/// A fingerprint-addressed store of certificates and keys.
///
/// All methods take `&self`; a directory can be shared between threads.
/// Writes to the same slot are serialized, writes to different slots run
/// in parallel. Reads never take the write lock and always observe whole
/// entries.
pub struct CertificateDirectory {
    backend: Box<dyn Backend>,
    codec: Box<dyn KeyMaterialCodec>,
    index: Box<dyn SubkeyLookup>,
    config: DirectoryConfig,
    locks: SlotLocks,
    interrupt: Interrupt,
    observer: Option<ChangeObserver>,
}

/// What a slot read found.
enum Slot {
    Empty,
    Stored(KeyMaterial),
    Misfiled { holds: Fingerprint, tag: Tag },
}

/// Both halves of a held slot lock. Fields drop in declaration order, so
/// the backend lock goes first.
struct SlotLease<'a> {
    _backend: BackendLock,
    _guard: SlotGuard<'a>,
}

impl CertificateDirectory {
    /// Assemble a directory from its collaborators.
    pub fn new(
        backend: impl Backend + 'static,
        codec: impl KeyMaterialCodec + 'static,
        index: impl SubkeyLookup + 'static,
    ) -> Self {
        Self {
            backend: Box::new(backend),
            codec: Box::new(codec),
            index: Box::new(index),
            config: DirectoryConfig::default(),
            locks: SlotLocks::new(),
            interrupt: Interrupt::new(),
            observer: None,
        }
    }

    /// Open the on-disk store at `base_dir`, with its SQLite subkey index.
    ///
    /// Fails with `NotAStore` if `base_dir` is not usable as a store.
    #[cfg(feature = "sqlite")]
    pub fn open(base_dir: impl AsRef<Path>) -> Result<Self> {
        let backend = crate::backend::FsBackend::open(base_dir)?;
        let index_path = backend.root().join(crate::config::SUBKEY_DB_NAME);
        let index = crate::subkey_index::SqliteSubkeyLookup::open(&index_path).map_err(|e| {
            Error::NotAStore(format!("cannot open {}: {}", index_path.display(), e))
        })?;

        tracing::debug!(path = %backend.root().display(), "opened certificate directory");
        Ok(Self::new(backend, PgpCodec::new(), index))
    }

    /// A volatile directory using the rpgp codec.
    pub fn in_memory() -> Self {
        Self::new(MemoryBackend::new(), PgpCodec::new(), InMemorySubkeyLookup::new())
    }

    /// Replace the tuning parameters.
    pub fn with_config(mut self, config: DirectoryConfig) -> Self {
        self.config = config;
        self
    }

    /// Observe lock waits through `interrupt`.
    pub fn with_interrupt(mut self, interrupt: Interrupt) -> Self {
        self.interrupt = interrupt;
        self
    }

    /// Register a callback for merge summaries.
    pub fn with_change_observer(
        mut self,
        observer: impl Fn(&MergeDiff) + Send + Sync + 'static,
    ) -> Self {
        self.observer = Some(Box::new(observer));
        self
    }

    /// Material stored under `fingerprint`.
    ///
    /// `BadName` for a malformed fingerprint, `NotFound` for an empty slot.
    pub fn get(&self, fingerprint: &str) -> Result<KeyMaterial> {
        let fp = Fingerprint::parse(fingerprint)?;
        self.load(&fp)?.ok_or_else(|| Error::NotFound(fp.to_string()))
    }

    /// Material stored under the slot a special name is bound to.
    pub fn get_by_special_name(&self, name: &str) -> Result<KeyMaterial> {
        let special = SpecialName::from_str(name)?;
        let fp = self
            .backend
            .read_special(special)?
            .ok_or_else(|| Error::NotFound(special.to_string()))?;

        self.load(&fp)?
            .ok_or_else(|| Error::NotFound(format!("{} ({})", special, fp)))
    }

    /// Insert `bytes` into the slot of its own fingerprint.
    pub fn insert(&self, bytes: &[u8], policy: &dyn MergePolicy) -> Result<KeyMaterial> {
        let update = self.codec.decode(bytes)?;
        self.insert_material(update, policy)
    }

    /// Insert `bytes` under a special name.
    ///
    /// The first insert binds the name to the material's fingerprint.
    /// Later inserts must carry the same fingerprint, otherwise `BadName`.
    pub fn insert_with_special_name(
        &self,
        name: &str,
        bytes: &[u8],
        policy: &dyn MergePolicy,
    ) -> Result<KeyMaterial> {
        let special = SpecialName::from_str(name)?;
        let update = self.codec.decode(bytes)?;

        let _name_lease = self.lock(special.as_str())?;
        let bound = self.backend.read_special(special)?;
        let fp = match &bound {
            Some(bound) if bound != update.fingerprint() => {
                return Err(Error::BadName(format!(
                    "{} is bound to {}, not {}",
                    special,
                    bound,
                    update.fingerprint()
                )));
            }
            Some(bound) => bound.clone(),
            None => update.fingerprint().clone(),
        };

        let outcome = {
            let _slot_lease = self.lock(fp.as_str())?;
            self.commit(&fp, &update, policy)
        };

        let committed = match &outcome {
            Ok(_) => true,
            Err(e) => e.committed().is_some(),
        };
        if bound.is_none() && committed {
            self.backend.bind_special(special, &fp)?;
            tracing::info!(name = %special, fingerprint = %fp, "bound special name");
        }

        outcome
    }

    /// Like [`insert`](Self::insert), but bad input yields `Ok(None)`.
    pub fn try_insert(&self, bytes: &[u8], policy: &dyn MergePolicy) -> Result<Option<KeyMaterial>> {
        skip_bad_data(self.insert(bytes, policy))
    }

    /// Like [`insert_with_special_name`](Self::insert_with_special_name),
    /// but bad input yields `Ok(None)`.
    pub fn try_insert_with_special_name(
        &self,
        name: &str,
        bytes: &[u8],
        policy: &dyn MergePolicy,
    ) -> Result<Option<KeyMaterial>> {
        skip_bad_data(self.insert_with_special_name(name, bytes, policy))
    }

    /// Insert every item of a stream (for example a keyring).
    ///
    /// Per-item failures are returned in order and do not stop the batch.
    /// `Interrupted` aborts the whole batch.
    pub fn import(&self, data: &[u8], policy: &dyn MergePolicy) -> Result<Vec<Result<KeyMaterial>>> {
        let mut outcomes = Vec::new();

        for item in self.codec.split(data)? {
            let outcome = item.and_then(|material| self.insert_material(material, policy));
            match outcome {
                Err(Error::Interrupted(reason)) => return Err(Error::Interrupted(reason)),
                Err(Error::BadData(reason)) => {
                    tracing::warn!(%reason, "skipping unreadable item");
                    outcomes.push(Err(Error::BadData(reason)));
                }
                other => outcomes.push(other),
            }
        }

        Ok(outcomes)
    }

    /// All stored material, read lazily.
    ///
    /// Each call starts a fresh pass over the slots. Slots bound to special
    /// names are included.
    pub fn items(&self) -> Result<impl Iterator<Item = Result<KeyMaterial>> + '_> {
        let fingerprints = self.backend.fingerprints()?;
        Ok(fingerprints.filter_map(move |fp| match fp {
            Ok(fp) => self.load(&fp).transpose(),
            Err(e) => Some(Err(e)),
        }))
    }

    /// Fingerprints of all occupied slots, read lazily.
    pub fn fingerprints(&self) -> Result<impl Iterator<Item = Result<Fingerprint>> + '_> {
        self.backend.fingerprints()
    }

    /// Fingerprints of all material carrying `subkey` as primary key or
    /// subkey.
    pub fn find_by_subkey_id(&self, subkey: SubkeyId) -> Result<BTreeSet<Fingerprint>> {
        self.index.lookup(subkey)
    }

    /// Recompute the index associations of one slot from its stored
    /// content.
    ///
    /// This is the repair path after an `IndexStale` insert.
    pub fn reindex(&self, fingerprint: &Fingerprint) -> Result<()> {
        let _lease = self.lock(fingerprint.as_str())?;
        let current: Vec<SubkeyId> = match self.load(fingerprint)? {
            Some(material) => material.subkey_ids().to_vec(),
            None => Vec::new(),
        };
        let indexed: Vec<SubkeyId> = self.index.associated(fingerprint)?.into_iter().collect();

        self.index.update(fingerprint, &indexed, &current)?;
        tracing::info!(%fingerprint, "reindexed");
        Ok(())
    }

    fn insert_material(&self, update: KeyMaterial, policy: &dyn MergePolicy) -> Result<KeyMaterial> {
        let fp = update.fingerprint().clone();
        let _lease = self.lock(fp.as_str())?;
        self.commit(&fp, &update, policy)
    }

    /// Stored material of a slot. A slot holding another fingerprint's
    /// material is `BadData`.
    fn load(&self, fingerprint: &Fingerprint) -> Result<Option<KeyMaterial>> {
        match self.read_slot(fingerprint)? {
            Slot::Empty => Ok(None),
            Slot::Stored(material) => Ok(Some(material)),
            Slot::Misfiled { holds, .. } => Err(Error::BadData(format!(
                "slot {} holds {}",
                fingerprint, holds
            ))),
        }
    }

    fn read_slot(&self, fingerprint: &Fingerprint) -> Result<Slot> {
        let Some(entry) = self.backend.read(fingerprint)? else {
            tracing::debug!(%fingerprint, "slot is empty");
            return Ok(Slot::Empty);
        };

        let material = self.codec.decode(&entry.bytes)?;
        if material.fingerprint() != fingerprint {
            return Ok(Slot::Misfiled {
                holds: material.fingerprint().clone(),
                tag: entry.tag,
            });
        }
        Ok(Slot::Stored(material.with_tag(Some(entry.tag))))
    }

    /// Take the in-process lock for `slot`, then the backend's.
    fn lock(&self, slot: &str) -> Result<SlotLease<'_>> {
        let wait = LockWait {
            interrupt: &self.interrupt,
            deadline: Instant::now() + self.config.lock_timeout,
            poll: self.config.lock_poll_interval,
        };

        let guard = self.locks.acquire(slot, &wait)?;
        loop {
            if let Some(backend_lock) = self.backend.try_lock(slot)? {
                return Ok(SlotLease {
                    _backend: backend_lock,
                    _guard: guard,
                });
            }
            wait.check(slot)?;
            std::thread::sleep(wait.poll);
        }
    }

    /// Merge and write under the slot lock, retrying on tag conflicts.
    fn commit(
        &self,
        fp: &Fingerprint,
        update: &KeyMaterial,
        policy: &dyn MergePolicy,
    ) -> Result<KeyMaterial> {
        let mut conflicts = 0;

        loop {
            // Misfiled content is replaced, guarded by its own tag.
            let (existing, misfiled) = match self.read_slot(fp)? {
                Slot::Empty => (None, None),
                Slot::Stored(material) => (Some(material), None),
                Slot::Misfiled { holds, tag } => {
                    tracing::warn!(fingerprint = %fp, %holds, "slot holds other material, replacing");
                    (None, Some(tag))
                }
            };
            let merged = policy
                .merge(self.codec.as_ref(), Some(update), existing.as_ref())?
                .ok_or_else(|| Error::BadData(format!("merge policy produced nothing for {}", fp)))?;

            if merged.fingerprint() != fp {
                return Err(Error::IdentityMismatch {
                    existing: fp.clone(),
                    update: merged.fingerprint().clone(),
                });
            }

            if let Some(existing) = &existing {
                if existing.bytes() == merged.bytes() {
                    tracing::debug!(fingerprint = %fp, "unchanged, skipping write");
                    return Ok(existing.clone());
                }
            }

            let bytes = self.codec.encode(&merged);
            let expected = existing.as_ref().and_then(|e| e.tag()).or(misfiled.as_ref());
            let tag = match self.backend.write(fp, &bytes, expected) {
                Ok(tag) => tag,
                Err(Error::Conflict(reason)) if conflicts < self.config.write_retries => {
                    conflicts += 1;
                    tracing::warn!(fingerprint = %fp, attempt = conflicts, %reason, "write conflict, retrying");
                    continue;
                }
                Err(e) => return Err(e),
            };

            let stored = merged.with_tag(Some(tag));
            tracing::info!(fingerprint = %fp, key = stored.is_key(), "stored");
            self.report(existing.as_ref(), &stored);

            let previous = match &existing {
                Some(existing) => Ok(existing.subkey_ids().to_vec()),
                None if misfiled.is_some() => self.index.associated(fp).map(|ids| ids.into_iter().collect()),
                None => Ok(Vec::new()),
            };
            let indexed = previous.and_then(|previous| self.index.update(fp, &previous, stored.subkey_ids()));
            if let Err(e) = indexed {
                tracing::warn!(fingerprint = %fp, error = %e, "subkey index is stale");
                return Err(Error::IndexStale {
                    fingerprint: fp.clone(),
                    committed: Box::new(stored),
                    reason: e.to_string(),
                });
            }

            return Ok(stored);
        }
    }

    fn report(&self, before: Option<&KeyMaterial>, after: &KeyMaterial) {
        let Some(before) = before else {
            return;
        };

        match diff(self.codec.as_ref(), before, after) {
            Ok(Some(change)) => {
                tracing::info!(
                    fingerprint = %change.fingerprint,
                    new_signatures = change.new_signatures,
                    new_user_ids = change.new_user_ids,
                    "{}",
                    change
                );
                if let Some(observer) = &self.observer {
                    observer(&change);
                }
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(fingerprint = %after.fingerprint(), error = %e, "cannot summarize change"),
        }
    }
}

fn skip_bad_data(outcome: Result<KeyMaterial>) -> Result<Option<KeyMaterial>> {
    match outcome {
        Ok(material) => Ok(Some(material)),
        Err(Error::BadData(reason)) => {
            tracing::debug!(%reason, "ignoring unreadable input");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}
