//! Internal helper functions.

use std::io::Cursor;

use pgp::composed::{Deserializable, SignedPublicKey, SignedSecretKey};
use pgp::ser::Serialize;
use pgp::types::KeyDetails;

use crate::error::{Error, Result};
use crate::types::{Fingerprint, SubkeyId};

/// Parse a secret key from bytes (armored or binary).
pub(crate) fn parse_secret_key(data: &[u8]) -> Result<SignedSecretKey> {
    // Try armored first, then binary
    let cursor = Cursor::new(data);
    match SignedSecretKey::from_armor_single(cursor) {
        Ok((key, _headers)) => Ok(key),
        Err(_) => {
            let cursor = Cursor::new(data);
            SignedSecretKey::from_bytes(cursor).map_err(|e| Error::BadData(e.to_string()))
        }
    }
}

/// Parse a public key from bytes (armored or binary).
///
/// Unlike [`parse_secret_key`] this never falls back to stripping secret
/// material: a secret key is not accepted here.
pub(crate) fn parse_public_key(data: &[u8]) -> Result<SignedPublicKey> {
    let cursor = Cursor::new(data);
    if let Ok((key, _headers)) = SignedPublicKey::from_armor_single(cursor) {
        return Ok(key);
    }

    let cursor = Cursor::new(data);
    SignedPublicKey::from_bytes(cursor).map_err(|e| Error::BadData(e.to_string()))
}

/// Serialize a secret key to binary format.
pub(crate) fn secret_key_to_bytes(key: &SignedSecretKey) -> Result<Vec<u8>> {
    Ok(key.to_bytes()?)
}

/// Serialize a public key to binary format.
pub(crate) fn public_key_to_bytes(key: &SignedPublicKey) -> Result<Vec<u8>> {
    Ok(key.to_bytes()?)
}

/// Serialize a public key to ASCII-armored format.
pub(crate) fn public_key_to_armored(key: &SignedPublicKey) -> Result<String> {
    Ok(key.to_armored_string(None.into())?)
}

/// Serialize a secret key to ASCII-armored format.
pub(crate) fn secret_key_to_armored(key: &SignedSecretKey) -> Result<String> {
    Ok(key.to_armored_string(None.into())?)
}

/// Get the fingerprint in canonical lowercase form.
pub(crate) fn fingerprint_of(key: &impl KeyDetails) -> Fingerprint {
    Fingerprint::from_bytes(key.fingerprint().as_bytes())
}

/// Get the 64-bit key ID.
pub(crate) fn key_id_of(key: &impl KeyDetails) -> Result<SubkeyId> {
    let key_id = key.legacy_key_id();
    SubkeyId::from_bytes(key_id.as_ref())
        .ok_or_else(|| Error::BadData(format!("malformed key id: {}", hex::encode(key_id.as_ref()))))
}
