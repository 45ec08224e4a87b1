//! Merge policies for combining new material with what a slot holds.
//!
//! A policy is a stateless function value taking the incoming material
//! (`update`) and the stored material (`existing`), either of which may be
//! absent. Two policies ship with the crate:
//!
//! - [`merge`]: union of public components, never touching secret material
//! - [`override_with_update`]: the update replaces whatever is stored
//!
//! Policies are pure. They perform no I/O and print nothing; the
//! human-readable summary of a change is computed separately by [`diff`].

use std::fmt;

use crate::codec::KeyMaterialCodec;
use crate::error::{Error, Result};
use crate::types::{Fingerprint, KeyMaterial};

/// A pluggable strategy combining incoming and stored material.
///
/// Implemented for every function or closure with the matching signature,
/// so `&merge` and `&override_with_update` can be passed directly.
pub trait MergePolicy: Send + Sync {
    /// Combine `update` with `existing`. `Ok(None)` means "no material".
    fn merge(
        &self,
        codec: &dyn KeyMaterialCodec,
        update: Option<&KeyMaterial>,
        existing: Option<&KeyMaterial>,
    ) -> Result<Option<KeyMaterial>>;
}

impl<F> MergePolicy for F
where
    F: Fn(&dyn KeyMaterialCodec, Option<&KeyMaterial>, Option<&KeyMaterial>) -> Result<Option<KeyMaterial>>
        + Send
        + Sync,
{
    fn merge(
        &self,
        codec: &dyn KeyMaterialCodec,
        update: Option<&KeyMaterial>,
        existing: Option<&KeyMaterial>,
    ) -> Result<Option<KeyMaterial>> {
        self(codec, update, existing)
    }
}

/// Union-merge `update` into `existing`.
///
/// - An absent side yields the present side unchanged.
/// - Both sides must belong to the same primary key, otherwise
///   `IdentityMismatch`.
/// - Certificate + certificate: packet union.
/// - Certificate + key (either order): the key, with its public
///   components replaced by the union of both public views.
/// - Key + key: divergent secret material is never combined; the stored
///   key is returned unchanged.
///
/// The result keeps `existing`'s tag when its bytes are unchanged and is
/// untagged otherwise.
pub fn merge(
    codec: &dyn KeyMaterialCodec,
    update: Option<&KeyMaterial>,
    existing: Option<&KeyMaterial>,
) -> Result<Option<KeyMaterial>> {
    let (update, existing) = match (update, existing) {
        (None, None) => return Ok(None),
        (Some(update), None) => return Ok(Some(update.clone())),
        (None, Some(existing)) => return Ok(Some(existing.clone())),
        (Some(update), Some(existing)) => (update, existing),
    };

    check_identity(update.fingerprint(), existing.fingerprint())?;

    let merged = match (update, existing) {
        (KeyMaterial::Certificate(update_cert), KeyMaterial::Certificate(existing_cert)) => {
            KeyMaterial::Certificate(codec.join(existing_cert, update_cert)?)
        }
        (KeyMaterial::Key(key), KeyMaterial::Certificate(existing_cert)) => {
            let joined = codec.join(existing_cert, key.certificate())?;
            KeyMaterial::Key(codec.replace_public_keys(key, &joined)?)
        }
        (KeyMaterial::Certificate(update_cert), KeyMaterial::Key(key)) => {
            let joined = codec.join(key.certificate(), update_cert)?;
            KeyMaterial::Key(codec.replace_public_keys(key, &joined)?)
        }
        // Merging secret keys is not supported.
        (KeyMaterial::Key(_), KeyMaterial::Key(_)) => existing.clone(),
    };

    Ok(Some(settle_tag(merged, Some(existing))))
}

/// Replace stored material with the update.
///
/// Returns `update` if present, else `existing`, else nothing.
pub fn override_with_update(
    _codec: &dyn KeyMaterialCodec,
    update: Option<&KeyMaterial>,
    existing: Option<&KeyMaterial>,
) -> Result<Option<KeyMaterial>> {
    Ok(update
        .or(existing)
        .cloned()
        .map(|material| settle_tag(material, existing)))
}

fn check_identity(update: &Fingerprint, existing: &Fingerprint) -> Result<()> {
    if update != existing {
        return Err(Error::IdentityMismatch {
            existing: existing.clone(),
            update: update.clone(),
        });
    }
    Ok(())
}

/// Carry the stored tag over only when the bytes did not change.
fn settle_tag(material: KeyMaterial, existing: Option<&KeyMaterial>) -> KeyMaterial {
    match existing {
        Some(existing) if existing.bytes() == material.bytes() => {
            let tag = existing.tag().cloned();
            material.with_tag(tag)
        }
        _ => material.with_tag(None),
    }
}

/// Summary of what a merge added to stored material.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeDiff {
    /// Identity of the changed material.
    pub fingerprint: Fingerprint,
    /// Signatures after minus signatures before.
    pub new_signatures: i64,
    /// User ids after minus user ids before.
    pub new_user_ids: i64,
}

impl fmt::Display for MergeDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Certificate {} has", self.fingerprint)?;
        if self.new_signatures != 0 {
            write!(f, " {} new signatures", self.new_signatures)?;
        }
        if self.new_user_ids != 0 {
            if self.new_signatures != 0 {
                write!(f, " and")?;
            }
            write!(f, " {} new UIDs", self.new_user_ids)?;
        }
        if self.new_signatures == 0 && self.new_user_ids == 0 {
            write!(f, " changed")?;
        }
        Ok(())
    }
}

/// Compute the change summary between pre- and post-merge material.
///
/// Returns `None` when the encoded bytes are identical.
pub fn diff(
    codec: &dyn KeyMaterialCodec,
    before: &KeyMaterial,
    after: &KeyMaterial,
) -> Result<Option<MergeDiff>> {
    if before.bytes() == after.bytes() {
        return Ok(None);
    }

    let before_stats = codec.stats(before)?;
    let after_stats = codec.stats(after)?;

    Ok(Some(MergeDiff {
        fingerprint: after.fingerprint().clone(),
        new_signatures: after_stats.signatures as i64 - before_stats.signatures as i64,
        new_user_ids: after_stats.user_ids as i64 - before_stats.user_ids as i64,
    }))
}
