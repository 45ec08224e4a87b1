//! Line-oriented stand-in codec for unit tests.
//!
//! Material is plain text, one component per line:
//!
//! ```text
//! certificate <fingerprint>     (or: key <fingerprint>)
//! subkey <16 hex digits>
//! uid <token>
//! sig <token>
//! secret <token>                (keys only)
//! ```
//!
//! The primary key id is derived from the fingerprint, as for real keys.

use crate::codec::KeyMaterialCodec;
use crate::error::{Error, Result};
use crate::types::{Certificate, Fingerprint, Key, KeyMaterial, MaterialStats, SubkeyId};

#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct TextCodec;

pub(crate) fn fingerprint(seed: u8) -> Fingerprint {
    Fingerprint::from_bytes(&[seed; 20])
}

pub(crate) fn cert_bytes(seed: u8, body: &[&str]) -> Vec<u8> {
    render("certificate", &fingerprint(seed), body.iter().copied())
}

pub(crate) fn key_bytes(seed: u8, body: &[&str]) -> Vec<u8> {
    render("key", &fingerprint(seed), body.iter().copied())
}

pub(crate) fn cert(seed: u8, body: &[&str]) -> KeyMaterial {
    TextCodec.decode(&cert_bytes(seed, body)).unwrap()
}

pub(crate) fn key(seed: u8, body: &[&str]) -> KeyMaterial {
    TextCodec.decode(&key_bytes(seed, body)).unwrap()
}

/// Component lines (everything after the header) of some material.
pub(crate) fn lines(material: &KeyMaterial) -> Vec<String> {
    String::from_utf8_lossy(material.bytes())
        .lines()
        .skip(1)
        .map(str::to_string)
        .collect()
}

fn render<'a>(kind: &str, fp: &Fingerprint, body: impl Iterator<Item = &'a str>) -> Vec<u8> {
    let mut out = format!("{} {}", kind, fp);
    for line in body {
        out.push('\n');
        out.push_str(line);
    }
    out.into_bytes()
}

fn parse(bytes: &[u8]) -> Result<(String, Fingerprint, Vec<String>)> {
    let text = std::str::from_utf8(bytes).map_err(|e| Error::BadData(e.to_string()))?;
    let mut lines = text.lines();
    let header = lines.next().ok_or_else(|| Error::BadData("empty".into()))?;
    let (kind, fp) = header
        .split_once(' ')
        .ok_or_else(|| Error::BadData(format!("bad header: {}", header)))?;
    if kind != "certificate" && kind != "key" {
        return Err(Error::BadData(format!("unknown kind: {}", kind)));
    }
    let fp = Fingerprint::parse(fp).map_err(|e| Error::BadData(e.to_string()))?;

    let body: Vec<String> = lines.map(str::to_string).collect();
    for line in &body {
        let known = ["subkey ", "uid ", "sig ", "secret "]
            .iter()
            .any(|prefix| line.starts_with(prefix));
        if !known || (kind == "certificate" && line.starts_with("secret ")) {
            return Err(Error::BadData(format!("bad line: {}", line)));
        }
    }

    Ok((kind.to_string(), fp, body))
}

fn public_certificate(fp: &Fingerprint, body: &[String]) -> Result<Certificate> {
    let public: Vec<&str> = body
        .iter()
        .map(String::as_str)
        .filter(|l| !l.starts_with("secret "))
        .collect();

    let mut ids = vec![fp.key_id()];
    for line in &public {
        if let Some(hex) = line.strip_prefix("subkey ") {
            ids.push(SubkeyId::parse(hex).map_err(|e| Error::BadData(e.to_string()))?);
        }
    }

    Ok(Certificate::new(
        render("certificate", fp, public.into_iter()),
        fp.clone(),
        ids,
    ))
}

impl KeyMaterialCodec for TextCodec {
    fn decode(&self, bytes: &[u8]) -> Result<KeyMaterial> {
        let (kind, fp, body) = parse(bytes)?;
        let certificate = public_certificate(&fp, &body)?;
        if kind == "key" {
            Ok(Key::new(bytes.to_vec(), certificate).into())
        } else {
            Ok(certificate.into())
        }
    }

    fn join(&self, existing: &Certificate, update: &Certificate) -> Result<Certificate> {
        if existing.fingerprint() != update.fingerprint() {
            return Err(Error::IdentityMismatch {
                existing: existing.fingerprint().clone(),
                update: update.fingerprint().clone(),
            });
        }
        let (_, fp, mut body) = parse(existing.bytes())?;
        let (_, _, extra) = parse(update.bytes())?;
        for line in extra {
            if !body.contains(&line) {
                body.push(line);
            }
        }
        public_certificate(&fp, &body)
    }

    fn replace_public_keys(&self, key: &Key, certificate: &Certificate) -> Result<Key> {
        let (_, fp, key_body) = parse(key.bytes())?;
        let (_, _, mut body) = parse(certificate.bytes())?;
        body.extend(key_body.into_iter().filter(|l| l.starts_with("secret ")));
        let bytes = render("key", &fp, body.iter().map(String::as_str));
        Ok(Key::new(bytes, public_certificate(&fp, &body)?))
    }

    fn stats(&self, material: &KeyMaterial) -> Result<MaterialStats> {
        let (_, _, body) = parse(material.bytes())?;
        Ok(MaterialStats {
            signatures: body.iter().filter(|l| l.starts_with("sig ")).count(),
            user_ids: body.iter().filter(|l| l.starts_with("uid ")).count(),
        })
    }
}
