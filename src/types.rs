//! Public type definitions for the certificate directory.
//!
//! This module contains the identity types used to address stored
//! material (fingerprints, subkey identifiers, special names), the opaque
//! version [`Tag`], and the two-case [`KeyMaterial`] union.

use std::fmt;
use std::str::FromStr;

use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// Canonical lowercase hexadecimal fingerprint of a primary key.
///
/// A fingerprint addresses exactly one slot of the directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Parse a fingerprint from user input.
    ///
    /// Accepts upper or lower case hex, optionally separated by spaces.
    /// V4 (40 digits) and v6 (64 digits) fingerprints are recognized.
    pub fn parse(s: &str) -> Result<Self> {
        let normalized: String = s
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect::<String>()
            .to_lowercase();

        let valid_len = normalized.len() == 40 || normalized.len() == 64;
        if !valid_len || !normalized.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(Error::BadName(format!("not a fingerprint: {}", s)));
        }

        Ok(Self(normalized))
    }

    /// Build a fingerprint from its raw bytes.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self(hex::encode(bytes))
    }

    /// The lowercase hex form.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The 64-bit key identifier derived from this fingerprint.
    ///
    /// V4 key ids are the low 8 bytes of the fingerprint, v6 key ids the
    /// high 8 bytes.
    pub fn key_id(&self) -> SubkeyId {
        // Validated hex of even length, so decoding cannot fail for parsed
        // or byte-built fingerprints.
        let bytes = hex::decode(&self.0).unwrap_or_default();
        let window = if bytes.len() == 32 {
            &bytes[..8]
        } else {
            &bytes[bytes.len().saturating_sub(8)..]
        };
        SubkeyId::from_bytes(window).unwrap_or(SubkeyId(0))
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Fingerprint {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl AsRef<str> for Fingerprint {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// 64-bit identifier of a component key (primary or subkey).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubkeyId(pub u64);

impl SubkeyId {
    /// Build an identifier from exactly 8 big-endian bytes.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let arr: [u8; 8] = bytes.try_into().ok()?;
        Some(Self(u64::from_be_bytes(arr)))
    }

    /// Parse a long key id (16 hex digits).
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.len() != 16 || !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(Error::BadName(format!(
                "a long key id consists of 16 hexadecimal characters, got: {}",
                s
            )));
        }
        u64::from_str_radix(s, 16)
            .map(Self)
            .map_err(|e| Error::BadName(e.to_string()))
    }

    /// The raw identifier value.
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubkeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016X}", self.0)
    }
}

/// Opaque version token of stored bytes.
///
/// Backends derive the tag from the stored content, so it changes exactly
/// when the bytes change. It is only ever compared for equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Tag(String);

impl Tag {
    /// Wrap a backend-specific token.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Content-derived tag (truncated SHA-256).
    pub fn of(bytes: &[u8]) -> Self {
        let digest = Sha256::digest(bytes);
        Self(hex::encode(&digest[..16]))
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Reserved aliases that resolve to a single fingerprint-addressed slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpecialName {
    /// The local trust anchor.
    TrustRoot,
}

impl SpecialName {
    /// Every registered special name.
    pub const ALL: [SpecialName; 1] = [SpecialName::TrustRoot];

    /// The reserved string form.
    pub fn as_str(&self) -> &'static str {
        match self {
            SpecialName::TrustRoot => "trust-root",
        }
    }

    /// Look up a special name, returning `None` for unregistered names.
    pub fn lookup(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|n| n.as_str() == name)
    }
}

impl FromStr for SpecialName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::lookup(s).ok_or_else(|| Error::BadName(format!("unknown special name: {}", s)))
    }
}

impl fmt::Display for SpecialName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Public-only OpenPGP material.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Certificate {
    bytes: Vec<u8>,
    fingerprint: Fingerprint,
    subkey_ids: Vec<SubkeyId>,
    tag: Option<Tag>,
}

impl Certificate {
    /// Create an untagged certificate. Duplicate subkey ids are dropped,
    /// keeping first-seen order.
    pub fn new(bytes: Vec<u8>, fingerprint: Fingerprint, subkey_ids: Vec<SubkeyId>) -> Self {
        let mut ordered: Vec<SubkeyId> = Vec::with_capacity(subkey_ids.len());
        for id in subkey_ids {
            if !ordered.contains(&id) {
                ordered.push(id);
            }
        }

        Self {
            bytes,
            fingerprint,
            subkey_ids: ordered,
            tag: None,
        }
    }

    /// Encoded bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Primary key fingerprint.
    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    /// Identifiers of the primary key and all subkeys.
    pub fn subkey_ids(&self) -> &[SubkeyId] {
        &self.subkey_ids
    }

    /// Version tag of the stored copy, if this value was read from a store.
    pub fn tag(&self) -> Option<&Tag> {
        self.tag.as_ref()
    }

    /// Attach or clear the version tag.
    pub fn with_tag(mut self, tag: Option<Tag>) -> Self {
        self.tag = tag;
        self
    }
}

/// Secret-key-bearing OpenPGP material.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Key {
    bytes: Vec<u8>,
    certificate: Certificate,
    tag: Option<Tag>,
}

impl Key {
    /// Create an untagged key from its encoding and public projection.
    pub fn new(bytes: Vec<u8>, certificate: Certificate) -> Self {
        Self {
            bytes,
            certificate: certificate.with_tag(None),
            tag: None,
        }
    }

    /// Encoded bytes, including secret material.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// The public-only view of this key.
    pub fn certificate(&self) -> &Certificate {
        &self.certificate
    }

    /// Primary key fingerprint (same as the projection's).
    pub fn fingerprint(&self) -> &Fingerprint {
        self.certificate.fingerprint()
    }

    /// Component identifiers (same as the projection's).
    pub fn subkey_ids(&self) -> &[SubkeyId] {
        self.certificate.subkey_ids()
    }

    /// Version tag of the stored copy.
    pub fn tag(&self) -> Option<&Tag> {
        self.tag.as_ref()
    }

    /// Attach or clear the version tag.
    pub fn with_tag(mut self, tag: Option<Tag>) -> Self {
        self.tag = tag;
        self
    }
}

/// Material stored in a directory slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyMaterial {
    /// Public-only certificate.
    Certificate(Certificate),
    /// Secret key with its derivable certificate.
    Key(Key),
}

impl KeyMaterial {
    /// Encoded bytes as stored.
    pub fn bytes(&self) -> &[u8] {
        match self {
            KeyMaterial::Certificate(cert) => cert.bytes(),
            KeyMaterial::Key(key) => key.bytes(),
        }
    }

    /// Primary key fingerprint.
    pub fn fingerprint(&self) -> &Fingerprint {
        match self {
            KeyMaterial::Certificate(cert) => cert.fingerprint(),
            KeyMaterial::Key(key) => key.fingerprint(),
        }
    }

    /// Component identifiers.
    pub fn subkey_ids(&self) -> &[SubkeyId] {
        match self {
            KeyMaterial::Certificate(cert) => cert.subkey_ids(),
            KeyMaterial::Key(key) => key.subkey_ids(),
        }
    }

    /// Version tag, if read from a store.
    pub fn tag(&self) -> Option<&Tag> {
        match self {
            KeyMaterial::Certificate(cert) => cert.tag(),
            KeyMaterial::Key(key) => key.tag(),
        }
    }

    /// Attach or clear the version tag.
    pub fn with_tag(self, tag: Option<Tag>) -> Self {
        match self {
            KeyMaterial::Certificate(cert) => KeyMaterial::Certificate(cert.with_tag(tag)),
            KeyMaterial::Key(key) => KeyMaterial::Key(key.with_tag(tag)),
        }
    }

    /// The public-only view: the certificate itself, or a key's projection.
    pub fn certificate(&self) -> &Certificate {
        match self {
            KeyMaterial::Certificate(cert) => cert,
            KeyMaterial::Key(key) => key.certificate(),
        }
    }

    /// Whether this material carries secret keys.
    pub fn is_key(&self) -> bool {
        matches!(self, KeyMaterial::Key(_))
    }
}

impl From<Certificate> for KeyMaterial {
    fn from(cert: Certificate) -> Self {
        KeyMaterial::Certificate(cert)
    }
}

impl From<Key> for KeyMaterial {
    fn from(key: Key) -> Self {
        KeyMaterial::Key(key)
    }
}

/// Counts used to summarize the effect of a merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MaterialStats {
    /// Signatures over all component keys, user ids and attributes.
    pub signatures: usize,
    /// User ids on the primary key.
    pub user_ids: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_parse_normalizes() {
        let fp = Fingerprint::parse("F4F3 88BB B194 925A E301  F844 C52B 4217 5ED7 7E12").unwrap();
        assert_eq!(fp.as_str(), "f4f388bbb194925ae301f844c52b42175ed77e12");
        assert_eq!(fp.key_id(), SubkeyId(0xC52B_4217_5ED7_7E12));
    }

    #[test]
    fn test_fingerprint_rejects_garbage() {
        assert!(matches!(Fingerprint::parse("trust-root"), Err(Error::BadName(_))));
        assert!(Fingerprint::parse("abcd").is_err());
        assert!(Fingerprint::parse(&"z".repeat(40)).is_err());
    }

    #[test]
    fn test_v6_key_id_uses_leading_bytes() {
        let fp = Fingerprint::from_bytes(&[0xAB; 32]);
        assert_eq!(fp.key_id(), SubkeyId(0xABAB_ABAB_ABAB_ABAB));
    }

    #[test]
    fn test_subkey_id_display_and_parse() {
        let id = SubkeyId::parse("c52b42175ed77e12").unwrap();
        assert_eq!(id.to_string(), "C52B42175ED77E12");
        assert!(SubkeyId::parse("c52b4217").is_err());
    }

    #[test]
    fn test_tag_tracks_content() {
        assert_eq!(Tag::of(b"abc"), Tag::of(b"abc"));
        assert_ne!(Tag::of(b"abc"), Tag::of(b"abd"));
    }

    #[test]
    fn test_special_names() {
        assert_eq!(SpecialName::lookup("trust-root"), Some(SpecialName::TrustRoot));
        assert!(SpecialName::lookup("trust-anchor").is_none());
        assert!(matches!("nope".parse::<SpecialName>(), Err(Error::BadName(_))));
    }

    #[test]
    fn test_certificate_dedupes_subkey_ids() {
        let fp = Fingerprint::from_bytes(&[1; 20]);
        let cert = Certificate::new(vec![1], fp, vec![SubkeyId(1), SubkeyId(2), SubkeyId(1)]);
        assert_eq!(cert.subkey_ids(), &[SubkeyId(1), SubkeyId(2)]);
    }

    #[test]
    fn test_key_projection_shares_identity() {
        let fp = Fingerprint::from_bytes(&[7; 20]);
        let cert = Certificate::new(vec![1], fp.clone(), vec![SubkeyId(9)]);
        let key = KeyMaterial::from(Key::new(vec![1, 2], cert));
        assert!(key.is_key());
        assert_eq!(key.fingerprint(), &fp);
        assert_eq!(key.subkey_ids(), &[SubkeyId(9)]);
        assert_eq!(key.certificate().bytes(), &[1]);
        assert!(key.tag().is_none());
    }
}
