//! Key generation.
//!
//! The directory itself never creates keys. Generation is needed to set up
//! a trust root, and test suites use it to produce real material.

use pgp::composed::{EncryptionCaps, KeyType, SecretKeyParamsBuilder, SubkeyParamsBuilder};
use pgp::crypto::ecc_curve::ECCCurve;
use rand::thread_rng;
use secrecy::{ExposeSecret, SecretString};

use crate::codec::key_from_secret_key;
use crate::error::{Error, Result};
use crate::types::KeyMaterial;

/// User id carried by generated trust roots.
pub const TRUST_ROOT_USER_ID: &str = "trust-root";

/// Generate a Curve25519 key.
///
/// # Arguments
/// * `user_ids` - User IDs; the first becomes the primary user id
/// * `password` - Optional passphrase protecting the secret material
/// * `with_subkeys` - Add an encryption and a signing subkey
///
/// # Returns
/// The key as stored by the directory (binary, with its certificate
/// projection).
///
/// # Example
/// ```no_run
/// use pgp_certd::generate_key;
///
/// let key = generate_key(&["Alice <alice@example.com>"], None, true).unwrap();
/// assert!(key.is_key());
/// assert_eq!(key.subkey_ids().len(), 3);
/// ```
pub fn generate_key(
    user_ids: &[&str],
    password: Option<&SecretString>,
    with_subkeys: bool,
) -> Result<KeyMaterial> {
    let (primary_uid, additional_uids) = user_ids
        .split_first()
        .ok_or_else(|| Error::Crypto("At least one user ID is required".to_string()))?;
    let passphrase = password.map(|p| p.expose_secret().to_string());

    let mut subkeys = Vec::new();
    if with_subkeys {
        let mut enc_builder = SubkeyParamsBuilder::default();
        enc_builder
            .key_type(KeyType::ECDH(ECCCurve::Curve25519))
            .can_encrypt(EncryptionCaps::All)
            .can_sign(false)
            .can_authenticate(false)
            .passphrase(passphrase.clone());
        subkeys.push(enc_builder.build().map_err(|e| Error::Crypto(e.to_string()))?);

        let mut sign_builder = SubkeyParamsBuilder::default();
        sign_builder
            .key_type(KeyType::Ed25519Legacy)
            .can_encrypt(EncryptionCaps::None)
            .can_sign(true)
            .can_authenticate(false)
            .passphrase(passphrase.clone());
        subkeys.push(sign_builder.build().map_err(|e| Error::Crypto(e.to_string()))?);
    }

    let mut key_params = SecretKeyParamsBuilder::default();
    key_params
        .key_type(KeyType::Ed25519Legacy)
        .can_certify(true)
        .can_sign(false)
        .can_encrypt(EncryptionCaps::None)
        .primary_user_id(primary_uid.to_string())
        .passphrase(passphrase)
        .subkeys(subkeys);

    if !additional_uids.is_empty() {
        key_params.user_ids(additional_uids.iter().map(|s| s.to_string()).collect());
    }

    let secret_key = key_params
        .build()
        .map_err(|e| Error::Crypto(e.to_string()))?
        .generate(&mut thread_rng())
        .map_err(|e| Error::Crypto(e.to_string()))?;

    tracing::debug!(subkeys = secret_key.secret_subkeys.len(), "generated key");
    key_from_secret_key(&secret_key).map(KeyMaterial::Key)
}

/// Generate a certification-only trust root.
pub fn generate_trust_root(password: Option<&SecretString>) -> Result<KeyMaterial> {
    generate_key(&[TRUST_ROOT_USER_ID], password, false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requires_user_id() {
        assert!(matches!(generate_key(&[], None, false), Err(Error::Crypto(_))));
    }

    #[test]
    fn test_trust_root_has_no_subkeys() {
        let root = generate_trust_root(None).unwrap();
        assert!(root.is_key());
        assert_eq!(root.subkey_ids(), &[root.fingerprint().key_id()]);
    }
}
