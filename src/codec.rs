//! Encoding, decoding and packet-level joining of key material.
//!
//! The directory never looks inside OpenPGP packets itself. Everything it
//! needs from the wire format goes through [`KeyMaterialCodec`]: classify
//! bytes as certificate or key, join two certificates of the same primary
//! key, graft a joined certificate back onto a secret key, and count
//! signatures and user ids for change summaries.
//!
//! [`PgpCodec`] implements the capability set with rpgp.

use pgp::composed::{SignedKeyDetails, SignedPublicKey, SignedSecretKey};
use pgp::ser::Serialize;

use crate::error::{Error, Result};
use crate::internal::{
    dearmor_blocks, fingerprint_of, key_id_of, parse_public_key, parse_secret_key,
    public_key_to_armored, public_key_to_bytes, secret_key_to_armored, secret_key_to_bytes,
    split_packets,
};
use crate::types::{Certificate, Key, KeyMaterial, MaterialStats, SubkeyId};

/// Wire-format capabilities required by the merge engine and directory.
pub trait KeyMaterialCodec: Send + Sync {
    /// Classify and decode bytes. Anything that is neither a certificate
    /// nor a key is `BadData`.
    fn decode(&self, bytes: &[u8]) -> Result<KeyMaterial>;

    /// Encoded form of the material.
    fn encode(&self, material: &KeyMaterial) -> Vec<u8> {
        material.bytes().to_vec()
    }

    /// Union of two certificates of the same primary key.
    ///
    /// Components already in `existing` keep their order; components only
    /// in `update` are appended. Joining a certificate with itself returns
    /// identical bytes.
    fn join(&self, existing: &Certificate, update: &Certificate) -> Result<Certificate>;

    /// Replace the public components of `key` with those of `certificate`,
    /// leaving secret material untouched.
    fn replace_public_keys(&self, key: &Key, certificate: &Certificate) -> Result<Key>;

    /// Signature and user id counts.
    fn stats(&self, material: &KeyMaterial) -> Result<MaterialStats>;

    /// Split a stream holding several items into decoded items.
    ///
    /// The outer error is for an unreadable stream; inner errors are
    /// per item so a batch import can skip them.
    fn split(&self, data: &[u8]) -> Result<Vec<Result<KeyMaterial>>> {
        Ok(vec![self.decode(data)])
    }
}

/// rpgp-backed codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct PgpCodec;

impl PgpCodec {
    /// Create a codec.
    pub fn new() -> Self {
        Self
    }

    /// ASCII-armor stored material (public or private key block).
    pub fn armor(&self, material: &KeyMaterial) -> Result<String> {
        match material {
            KeyMaterial::Certificate(cert) => {
                public_key_to_armored(&parse_public_key(cert.bytes())?)
            }
            KeyMaterial::Key(key) => secret_key_to_armored(&parse_secret_key(key.bytes())?),
        }
    }
}

impl KeyMaterialCodec for PgpCodec {
    fn decode(&self, bytes: &[u8]) -> Result<KeyMaterial> {
        if let Ok(secret_key) = parse_secret_key(bytes) {
            return key_from_secret_key(&secret_key).map(KeyMaterial::Key);
        }

        let public_key = parse_public_key(bytes)
            .map_err(|e| Error::BadData(format!("neither a certificate nor a key: {}", e)))?;
        certificate_from_public_key(&public_key).map(KeyMaterial::Certificate)
    }

    fn join(&self, existing: &Certificate, update: &Certificate) -> Result<Certificate> {
        let existing_key = parse_public_key(existing.bytes())?;
        let update_key = parse_public_key(update.bytes())?;
        let joined = join_public_keys(&existing_key, &update_key)?;
        certificate_from_public_key(&joined)
    }

    fn replace_public_keys(&self, key: &Key, certificate: &Certificate) -> Result<Key> {
        let secret_key = parse_secret_key(key.bytes())?;
        let public_key = parse_public_key(certificate.bytes())?;
        let replaced = replace_public_keys(&secret_key, &public_key)?;
        key_from_secret_key(&replaced)
    }

    fn stats(&self, material: &KeyMaterial) -> Result<MaterialStats> {
        let public_key = match material {
            KeyMaterial::Certificate(cert) => parse_public_key(cert.bytes())?,
            KeyMaterial::Key(key) => parse_secret_key(key.bytes())?.to_public_key(),
        };

        Ok(count_stats(&public_key))
    }

    /// Each transferable key in the stream is decoded on its own, so a
    /// secret key or a damaged item does not hide the items after it.
    fn split(&self, data: &[u8]) -> Result<Vec<Result<KeyMaterial>>> {
        let mut items = Vec::new();
        for block in dearmor_blocks(data) {
            match block {
                Ok(block) => items.extend(
                    split_packets(&block)
                        .into_iter()
                        .map(|item| item.and_then(|bytes| self.decode(bytes))),
                ),
                Err(e) => items.push(Err(e)),
            }
        }

        if items.is_empty() {
            return Err(Error::BadData("no key material in input".to_string()));
        }
        Ok(items)
    }
}

/// Build a [`Certificate`] from a parsed public key, re-encoding it in
/// canonical binary form.
pub(crate) fn certificate_from_public_key(public_key: &SignedPublicKey) -> Result<Certificate> {
    let bytes = public_key_to_bytes(public_key)?;
    let fingerprint = fingerprint_of(&public_key.primary_key);

    let mut subkey_ids: Vec<SubkeyId> = vec![key_id_of(&public_key.primary_key)?];
    for subkey in &public_key.public_subkeys {
        subkey_ids.push(key_id_of(&subkey.key)?);
    }

    Ok(Certificate::new(bytes, fingerprint, subkey_ids))
}

/// Build a [`Key`] from a parsed secret key.
pub(crate) fn key_from_secret_key(secret_key: &SignedSecretKey) -> Result<Key> {
    let bytes = secret_key_to_bytes(secret_key)?;
    let certificate = certificate_from_public_key(&secret_key.to_public_key())?;
    Ok(Key::new(bytes, certificate))
}

fn encoded(packet: &impl Serialize) -> Result<Vec<u8>> {
    Ok(packet.to_bytes()?)
}

/// Append items of `update` whose identity is not yet present in `base`.
fn union_by<T: Clone>(
    base: &[T],
    update: &[T],
    identity: impl Fn(&T) -> Result<Vec<u8>>,
) -> Result<Vec<T>> {
    let mut seen = Vec::with_capacity(base.len() + update.len());
    let mut merged = Vec::with_capacity(base.len() + update.len());

    for item in base.iter().chain(update.iter()) {
        let id = identity(item)?;
        if !seen.contains(&id) {
            seen.push(id);
            merged.push(item.clone());
        }
    }

    Ok(merged)
}

fn union_signatures(
    base: &[pgp::packet::Signature],
    update: &[pgp::packet::Signature],
) -> Result<Vec<pgp::packet::Signature>> {
    union_by(base, update, |sig| encoded(sig))
}

/// Packet-level union of two certificates of the same primary key.
fn join_public_keys(existing: &SignedPublicKey, update: &SignedPublicKey) -> Result<SignedPublicKey> {
    let existing_fp = fingerprint_of(&existing.primary_key);
    let update_fp = fingerprint_of(&update.primary_key);
    if existing_fp != update_fp {
        return Err(Error::IdentityMismatch {
            existing: existing_fp,
            update: update_fp,
        });
    }

    // Users: union by id, then union their signatures.
    let mut users = existing.details.users.clone();
    for new_user in &update.details.users {
        match users.iter_mut().find(|u| u.id.id() == new_user.id.id()) {
            Some(user) => user.signatures = union_signatures(&user.signatures, &new_user.signatures)?,
            None => users.push(new_user.clone()),
        }
    }

    let mut user_attributes = existing.details.user_attributes.clone();
    for new_attr in &update.details.user_attributes {
        let new_id = encoded(&new_attr.attr)?;
        let mut found = false;
        for attr in user_attributes.iter_mut() {
            if encoded(&attr.attr)? == new_id {
                attr.signatures = union_signatures(&attr.signatures, &new_attr.signatures)?;
                found = true;
                break;
            }
        }
        if !found {
            user_attributes.push(new_attr.clone());
        }
    }

    // Subkeys: union by fingerprint, then union their binding signatures.
    let mut public_subkeys = existing.public_subkeys.clone();
    for new_subkey in &update.public_subkeys {
        let new_fp = fingerprint_of(&new_subkey.key);
        match public_subkeys
            .iter_mut()
            .find(|s| fingerprint_of(&s.key) == new_fp)
        {
            Some(subkey) => {
                subkey.signatures = union_signatures(&subkey.signatures, &new_subkey.signatures)?
            }
            None => public_subkeys.push(new_subkey.clone()),
        }
    }

    let details = SignedKeyDetails::new(
        union_signatures(
            &existing.details.revocation_signatures,
            &update.details.revocation_signatures,
        )?,
        union_signatures(
            &existing.details.direct_signatures,
            &update.details.direct_signatures,
        )?,
        users,
        user_attributes,
    );

    Ok(SignedPublicKey {
        primary_key: existing.primary_key.clone(),
        details,
        public_subkeys,
    })
}

/// Graft the public components of `certificate` onto `secret_key`.
///
/// Secret subkeys keep their key material and take the signatures of the
/// matching public subkey; subkeys only known publicly become public
/// subkeys of the result.
fn replace_public_keys(
    secret_key: &SignedSecretKey,
    certificate: &SignedPublicKey,
) -> Result<SignedSecretKey> {
    let key_fp = fingerprint_of(&secret_key.primary_key);
    let cert_fp = fingerprint_of(&certificate.primary_key);
    if key_fp != cert_fp {
        return Err(Error::IdentityMismatch {
            existing: key_fp,
            update: cert_fp,
        });
    }

    let mut secret_subkeys = secret_key.secret_subkeys.clone();
    let mut public_subkeys = Vec::new();

    for subkey in &certificate.public_subkeys {
        let fp = fingerprint_of(&subkey.key);
        match secret_subkeys
            .iter_mut()
            .find(|s| fingerprint_of(&s.key) == fp)
        {
            Some(secret) => secret.signatures = subkey.signatures.clone(),
            None => public_subkeys.push(subkey.clone()),
        }
    }

    Ok(SignedSecretKey::new(
        secret_key.primary_key.clone(),
        certificate.details.clone(),
        public_subkeys,
        secret_subkeys,
    ))
}

fn count_stats(public_key: &SignedPublicKey) -> MaterialStats {
    let details = &public_key.details;
    let signatures = details.revocation_signatures.len()
        + details.direct_signatures.len()
        + details.users.iter().map(|u| u.signatures.len()).sum::<usize>()
        + details
            .user_attributes
            .iter()
            .map(|a| a.signatures.len())
            .sum::<usize>()
        + public_key
            .public_subkeys
            .iter()
            .map(|s| s.signatures.len())
            .sum::<usize>();

    MaterialStats {
        signatures,
        user_ids: details.users.len(),
    }
}
