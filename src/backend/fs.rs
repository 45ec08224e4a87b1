//! Filesystem backend using a `pgp.cert.d`-style layout.
//!
//! ```text
//! base/
//! ├── ab/
//! │   └── cdef0123...          ← certificate or key, binary
//! ├── trust-root               ← fingerprint the special name is bound to
//! ├── _locks/
//! │   └── {slot}.lock          ← per-slot advisory lock files
//! └── _subkey_map.db           ← subkey index (see `subkey_index`)
//! ```
//!
//! Slots match `pgp.cert.d`, but `trust-root` holds the fingerprint of the
//! bound slot rather than a copy of the key. A `trust-root` file written
//! by another `pgp.cert.d` implementation reads as a malformed binding.
//!
//! Every write goes to a temporary file in the target directory that is
//! renamed over the slot, so readers see the old or the new bytes and
//! never a partial write.

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;

use crate::error::{Error, Result};
use crate::types::{Fingerprint, SpecialName, Tag};

use super::{Backend, BackendLock, StoredEntry};

const LOCK_DIR: &str = "_locks";

/// On-disk store rooted at a base directory.
#[derive(Debug, Clone)]
pub struct FsBackend {
    root: PathBuf,
}

impl FsBackend {
    /// Open the store at `root`, creating the directory if missing.
    ///
    /// Fails with `NotAStore` if `root` exists but is not a directory or
    /// cannot be created.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();

        if root.exists() && !root.is_dir() {
            return Err(Error::NotAStore(format!(
                "{} exists and is not a directory",
                root.display()
            )));
        }

        fs::create_dir_all(root.join(LOCK_DIR)).map_err(|e| {
            Error::NotAStore(format!("cannot create store at {}: {}", root.display(), e))
        })?;

        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    /// The base directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn slot_path(&self, fingerprint: &Fingerprint) -> PathBuf {
        let (prefix, rest) = fingerprint.as_str().split_at(2);
        self.root.join(prefix).join(rest)
    }

    fn special_path(&self, name: SpecialName) -> PathBuf {
        self.root.join(name.as_str())
    }

    fn lock_path(&self, slot: &str) -> PathBuf {
        self.root.join(LOCK_DIR).join(format!("{}.lock", slot))
    }
}

fn read_optional(path: &Path) -> Result<Option<Vec<u8>>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Write `bytes` to a temp file next to `path` and rename it into place.
fn atomic_write(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| Error::Io(std::io::Error::new(ErrorKind::InvalidInput, "slot has no parent")))?;
    fs::create_dir_all(parent)?;

    let mut temp = tempfile::NamedTempFile::new_in(parent)?;
    temp.write_all(bytes)?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| Error::Io(e.error))?;
    Ok(())
}

fn is_prefix_dir(name: &str) -> bool {
    name.len() == 2 && name.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase())
}

impl Backend for FsBackend {
    fn read(&self, fingerprint: &Fingerprint) -> Result<Option<StoredEntry>> {
        Ok(read_optional(&self.slot_path(fingerprint))?.map(|bytes| {
            let tag = Tag::of(&bytes);
            StoredEntry { bytes, tag }
        }))
    }

    fn write(&self, fingerprint: &Fingerprint, bytes: &[u8], expected: Option<&Tag>) -> Result<Tag> {
        let path = self.slot_path(fingerprint);
        let current = read_optional(&path)?.map(|b| Tag::of(&b));
        if current.as_ref() != expected {
            return Err(Error::Conflict(format!(
                "{} was modified concurrently",
                fingerprint
            )));
        }

        atomic_write(&path, bytes)?;
        Ok(Tag::of(bytes))
    }

    fn fingerprints(&self) -> Result<Box<dyn Iterator<Item = Result<Fingerprint>> + '_>> {
        let prefixes = fs::read_dir(&self.root)
            .map_err(|e| Error::NotAStore(format!("{}: {}", self.root.display(), e)))?;

        let iter = prefixes
            .filter_map(|entry| {
                let entry = entry.ok()?;
                let name = entry.file_name().into_string().ok()?;
                let path = entry.path();
                (is_prefix_dir(&name) && path.is_dir()).then_some((name, path))
            })
            .flat_map(|(prefix, dir)| -> Box<dyn Iterator<Item = Result<Fingerprint>>> {
                match fs::read_dir(&dir) {
                    Ok(entries) => Box::new(entries.filter_map(move |entry| match entry {
                        Err(e) => Some(Err(e.into())),
                        Ok(entry) => {
                            let name = entry.file_name().into_string().ok()?;
                            // Temp files and stray entries do not parse.
                            Fingerprint::parse(&format!("{}{}", prefix, name)).ok().map(Ok)
                        }
                    })),
                    Err(e) => Box::new(std::iter::once(Err(e.into()))),
                }
            });

        Ok(Box::new(iter))
    }

    fn read_special(&self, name: SpecialName) -> Result<Option<Fingerprint>> {
        match read_optional(&self.special_path(name))? {
            None => Ok(None),
            Some(bytes) => {
                let text = String::from_utf8_lossy(&bytes);
                Fingerprint::parse(text.trim()).map(Some).map_err(|_| {
                    Error::BadName(format!("{} is bound to a malformed fingerprint", name))
                })
            }
        }
    }

    fn bind_special(&self, name: SpecialName, fingerprint: &Fingerprint) -> Result<()> {
        atomic_write(&self.special_path(name), fingerprint.as_str().as_bytes())
    }

    fn try_lock(&self, slot: &str) -> Result<Option<BackendLock>> {
        let lock_file: File = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(self.lock_path(slot))?;

        match FileExt::try_lock_exclusive(&lock_file) {
            Ok(()) => Ok(Some(BackendLock::file(lock_file))),
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn fp(seed: u8) -> Fingerprint {
        Fingerprint::from_bytes(&[seed; 20])
    }

    #[test]
    fn test_open_rejects_file() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("not-a-dir");
        std::fs::write(&file, b"x").unwrap();
        assert!(matches!(FsBackend::open(&file), Err(Error::NotAStore(_))));
    }

    #[test]
    fn test_layout_and_roundtrip() {
        let dir = tempdir().unwrap();
        let backend = FsBackend::open(dir.path()).unwrap();
        let fingerprint = fp(0xab);

        assert!(backend.read(&fingerprint).unwrap().is_none());
        let tag = backend.write(&fingerprint, b"cert", None).unwrap();

        let on_disk = dir.path().join("ab").join(&fingerprint.as_str()[2..]);
        assert_eq!(std::fs::read(on_disk).unwrap(), b"cert");

        let entry = backend.read(&fingerprint).unwrap().unwrap();
        assert_eq!(entry.tag, tag);
    }

    #[test]
    fn test_stale_tag_conflicts() {
        let dir = tempdir().unwrap();
        let backend = FsBackend::open(dir.path()).unwrap();
        let first = backend.write(&fp(1), b"one", None).unwrap();
        backend.write(&fp(1), b"two", Some(&first)).unwrap();

        let err = backend.write(&fp(1), b"three", Some(&first)).unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
        assert_eq!(backend.read(&fp(1)).unwrap().unwrap().bytes, b"two");
    }

    #[test]
    fn test_fingerprints_skip_foreign_entries() {
        let dir = tempdir().unwrap();
        let backend = FsBackend::open(dir.path()).unwrap();
        backend.write(&fp(1), b"a", None).unwrap();
        backend.write(&fp(2), b"b", None).unwrap();
        backend.bind_special(SpecialName::TrustRoot, &fp(1)).unwrap();
        std::fs::write(dir.path().join("01").join(".tmpXYZ"), b"junk").unwrap();

        let mut listed: Vec<_> = backend.fingerprints().unwrap().map(|f| f.unwrap()).collect();
        listed.sort();
        assert_eq!(listed, vec![fp(1), fp(2)]);
    }

    #[test]
    fn test_special_binding_persists() {
        let dir = tempdir().unwrap();
        {
            let backend = FsBackend::open(dir.path()).unwrap();
            backend.bind_special(SpecialName::TrustRoot, &fp(9)).unwrap();
        }
        let backend = FsBackend::open(dir.path()).unwrap();
        assert_eq!(backend.read_special(SpecialName::TrustRoot).unwrap(), Some(fp(9)));
        assert_eq!(
            std::fs::read_to_string(dir.path().join("trust-root")).unwrap(),
            fp(9).as_str()
        );
    }

    #[test]
    fn test_trust_root_holding_a_key_is_malformed_binding() {
        let dir = tempdir().unwrap();
        let backend = FsBackend::open(dir.path()).unwrap();
        std::fs::write(dir.path().join("trust-root"), [0xc5, 0x01, 0x04]).unwrap();

        let err = backend.read_special(SpecialName::TrustRoot).unwrap_err();
        assert!(matches!(err, Error::BadName(_)));
    }

    #[test]
    fn test_slot_lock_is_exclusive() {
        let dir = tempdir().unwrap();
        let backend = FsBackend::open(dir.path()).unwrap();

        let held = backend.try_lock("slot").unwrap();
        assert!(held.is_some());
        assert!(backend.try_lock("slot").unwrap().is_none());
        assert!(backend.try_lock("other").unwrap().is_some());

        drop(held);
        assert!(backend.try_lock("slot").unwrap().is_some());
    }
}
