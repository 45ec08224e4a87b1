//! SQLite-backed subkey index.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use rusqlite::{params, Connection};

use crate::error::Result;
use crate::types::{Fingerprint, SubkeyId};

use super::schema::init_schema;
use super::{changes, SubkeyLookup};

/// Durable subkey index stored in a SQLite database.
///
/// By convention the database lives next to the slots, in
/// `<base>/_subkey_map.db`. The connection is guarded by a mutex, so one
/// instance can be shared between threads. Several processes may open the
/// same file; SQLite serializes their writes.
pub struct SqliteSubkeyLookup {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl SqliteSubkeyLookup {
    /// Open or create the index at the given path.
    ///
    /// Parent directories must already exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)?;
        conn.busy_timeout(std::time::Duration::from_secs(10))?;
        init_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
            path: Some(path.to_path_buf()),
        })
    }

    /// Create an in-memory index.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        init_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
            path: None,
        })
    }

    /// Path of the database file (None for in-memory).
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

// SQLite INTEGER is signed; the full u64 range round-trips through a bit cast.
fn to_sql(subkey: SubkeyId) -> i64 {
    subkey.value() as i64
}

impl SubkeyLookup for SqliteSubkeyLookup {
    fn associate(&self, subkey: SubkeyId, fingerprint: &Fingerprint) -> Result<()> {
        self.conn.lock().execute(
            "INSERT OR IGNORE INTO subkey_map (subkey_id, fingerprint) VALUES (?1, ?2)",
            params![to_sql(subkey), fingerprint.as_str()],
        )?;
        Ok(())
    }

    fn disassociate(&self, subkey: SubkeyId, fingerprint: &Fingerprint) -> Result<()> {
        self.conn.lock().execute(
            "DELETE FROM subkey_map WHERE subkey_id = ?1 AND fingerprint = ?2",
            params![to_sql(subkey), fingerprint.as_str()],
        )?;
        Ok(())
    }

    fn lookup(&self, subkey: SubkeyId) -> Result<BTreeSet<Fingerprint>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT fingerprint FROM subkey_map WHERE subkey_id = ?1")?;
        let rows = stmt.query_map([to_sql(subkey)], |row| row.get::<_, String>(0))?;

        let mut found = BTreeSet::new();
        for row in rows {
            let text = row?;
            match Fingerprint::parse(&text) {
                Ok(fp) => {
                    found.insert(fp);
                }
                Err(_) => tracing::warn!(fingerprint = %text, "ignoring malformed index row"),
            }
        }
        Ok(found)
    }

    fn associated(&self, fingerprint: &Fingerprint) -> Result<BTreeSet<SubkeyId>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT subkey_id FROM subkey_map WHERE fingerprint = ?1")?;
        let rows = stmt.query_map([fingerprint.as_str()], |row| row.get::<_, i64>(0))?;

        let mut found = BTreeSet::new();
        for row in rows {
            found.insert(SubkeyId(row? as u64));
        }
        Ok(found)
    }

    fn update(&self, fingerprint: &Fingerprint, previous: &[SubkeyId], new: &[SubkeyId]) -> Result<()> {
        let (added, removed) = changes(previous, new);
        if added.is_empty() && removed.is_empty() {
            return Ok(());
        }

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        for subkey in added {
            tx.execute(
                "INSERT OR IGNORE INTO subkey_map (subkey_id, fingerprint) VALUES (?1, ?2)",
                params![to_sql(subkey), fingerprint.as_str()],
            )?;
        }
        for subkey in removed {
            tx.execute(
                "DELETE FROM subkey_map WHERE subkey_id = ?1 AND fingerprint = ?2",
                params![to_sql(subkey), fingerprint.as_str()],
            )?;
        }
        tx.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fp(seed: u8) -> Fingerprint {
        Fingerprint::from_bytes(&[seed; 20])
    }

    #[test]
    fn test_high_bit_subkey_ids() {
        let index = SqliteSubkeyLookup::open_in_memory().unwrap();
        let id = SubkeyId(0xFEDC_BA98_7654_3210);
        index.associate(id, &fp(1)).unwrap();
        assert_eq!(index.lookup(id).unwrap(), BTreeSet::from([fp(1)]));
        assert!(index.lookup(SubkeyId(0x7EDC_BA98_7654_3210)).unwrap().is_empty());
        assert_eq!(index.associated(&fp(1)).unwrap(), BTreeSet::from([id]));
    }

    #[test]
    fn test_update_is_applied() {
        let index = SqliteSubkeyLookup::open_in_memory().unwrap();
        index.update(&fp(1), &[], &[SubkeyId(1), SubkeyId(2)]).unwrap();
        index.update(&fp(2), &[], &[SubkeyId(2)]).unwrap();
        index.update(&fp(1), &[SubkeyId(1), SubkeyId(2)], &[SubkeyId(2)]).unwrap();

        assert!(index.lookup(SubkeyId(1)).unwrap().is_empty());
        assert_eq!(index.lookup(SubkeyId(2)).unwrap(), BTreeSet::from([fp(1), fp(2)]));
        assert_eq!(index.associated(&fp(1)).unwrap(), BTreeSet::from([SubkeyId(2)]));
    }

    #[test]
    fn test_persistence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("_subkey_map.db");
        {
            let index = SqliteSubkeyLookup::open(&path).unwrap();
            index.associate(SubkeyId(9), &fp(3)).unwrap();
            assert_eq!(index.path(), Some(path.as_path()));
        }
        let index = SqliteSubkeyLookup::open(&path).unwrap();
        assert!(index.lookup(SubkeyId(9)).unwrap().contains(&fp(3)));
    }
}
