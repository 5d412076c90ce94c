//! The persistent rep cache: a small sqlite database mapping content
//! SHA-1s to committed representations.

use crate::errors::{FsError, Result};
use crate::node::rep::Representation;
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, params};
use std::path::PathBuf;

/// Lazily opened handle on `db/rep-cache.db`.
pub struct RepCache {
    path: PathBuf,
    conn: Mutex<Option<Connection>>,
}

impl RepCache {
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self { path, conn: Mutex::new(None) }
    }

    fn with_conn<R>(&self, f: impl FnOnce(&Connection) -> Result<R>) -> Result<R> {
        let mut guard = self.conn.lock();
        if guard.is_none() {
            let conn = Connection::open(&self.path)?;
            conn.busy_timeout(std::time::Duration::from_secs(10))?;
            conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS rep_cache (
                   hash TEXT NOT NULL PRIMARY KEY,
                   revision INTEGER NOT NULL,
                   item_index INTEGER NOT NULL,
                   size INTEGER NOT NULL,
                   expanded_size INTEGER NOT NULL
                 )",
            )?;
            *guard = Some(conn);
        }
        f(guard.as_ref().expect("connection just opened"))
    }

    /// Look up a committed rep by content SHA-1.
    ///
    /// # Errors
    /// `RepCache` on database errors.
    pub fn get(&self, sha1: &[u8; 20]) -> Result<Option<Representation>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT revision, item_index, size, expanded_size
                     FROM rep_cache WHERE hash = ?1",
                    params![hex::encode(sha1)],
                    |row| {
                        Ok((
                            row.get::<_, u64>(0)?,
                            row.get::<_, u64>(1)?,
                            row.get::<_, u64>(2)?,
                            row.get::<_, u64>(3)?,
                        ))
                    },
                )
                .optional()?;
            Ok(row.map(|(revision, item_index, size, expanded_size)| Representation {
                revision: Some(revision),
                item_index,
                size,
                expanded_size,
                md5: None,
                sha1: Some(*sha1),
                uniquifier: None,
                txn_id: None,
            }))
        })
    }

    /// Every cached rep, for verification passes. The SHA-1 key is
    /// carried in the returned rep.
    ///
    /// # Errors
    /// `RepCache` on database errors.
    pub fn entries(&self) -> Result<Vec<Representation>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT hash, revision, item_index, size, expanded_size
                 FROM rep_cache ORDER BY revision, item_index",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, u64>(1)?,
                    row.get::<_, u64>(2)?,
                    row.get::<_, u64>(3)?,
                    row.get::<_, u64>(4)?,
                ))
            })?;
            let mut reps = Vec::new();
            for row in rows {
                let (hash, revision, item_index, size, expanded_size) = row?;
                let sha1: Option<[u8; 20]> =
                    hex::decode(&hash).ok().and_then(|v| v.try_into().ok());
                let sha1 = sha1.ok_or_else(|| {
                    FsError::Corrupt(format!("rep cache row has malformed hash '{hash}'"))
                })?;
                reps.push(Representation {
                    revision: Some(revision),
                    item_index,
                    size,
                    expanded_size,
                    md5: None,
                    sha1: Some(sha1),
                    uniquifier: None,
                    txn_id: None,
                });
            }
            Ok(reps)
        })
    }

    /// Insert freshly committed reps inside one sqlite transaction.
    /// Collisions with parallel commits are tolerated (`INSERT OR
    /// IGNORE`): whoever got there first wins.
    ///
    /// # Errors
    /// `RepCache` on database errors.
    pub fn insert_many(&self, reps: &[Representation]) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute_batch("BEGIN")?;
            let result = (|| -> Result<()> {
                for rep in reps {
                    let (Some(sha1), Some(revision)) = (rep.sha1, rep.revision) else {
                        continue;
                    };
                    conn.execute(
                        "INSERT OR IGNORE INTO rep_cache
                           (hash, revision, item_index, size, expanded_size)
                         VALUES (?1, ?2, ?3, ?4, ?5)",
                        params![
                            hex::encode(sha1),
                            revision,
                            rep.item_index,
                            rep.size,
                            rep.expanded_size
                        ],
                    )?;
                }
                Ok(())
            })();
            match result {
                Ok(()) => {
                    conn.execute_batch("COMMIT")?;
                    Ok(())
                }
                Err(e) => {
                    let _ = conn.execute_batch("ROLLBACK");
                    Err(e)
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_rep() {
        let dir = tempfile::tempdir().unwrap();
        let cache = RepCache::new(dir.path().join("rep-cache.db"));
        let sha1 = [7u8; 20];
        let rep = Representation {
            revision: Some(2),
            item_index: 3,
            size: 10,
            expanded_size: 40,
            md5: None,
            sha1: Some(sha1),
            uniquifier: None,
            txn_id: None,
        };
        cache.insert_many(&[rep]).unwrap();

        let found = cache.get(&sha1).unwrap().unwrap();
        assert_eq!(found.revision, Some(2));
        assert_eq!(found.item_index, 3);
        assert_eq!(found.expanded_size, 40);
        assert!(cache.get(&[8u8; 20]).unwrap().is_none());
    }

    #[test]
    fn duplicate_inserts_keep_the_first_row() {
        let dir = tempfile::tempdir().unwrap();
        let cache = RepCache::new(dir.path().join("rep-cache.db"));
        let sha1 = [9u8; 20];
        let first = Representation {
            revision: Some(1),
            item_index: 4,
            size: 5,
            expanded_size: 6,
            md5: None,
            sha1: Some(sha1),
            uniquifier: None,
            txn_id: None,
        };
        let mut second = first;
        second.revision = Some(2);
        cache.insert_many(&[first]).unwrap();
        cache.insert_many(&[second]).unwrap();
        assert_eq!(cache.get(&sha1).unwrap().unwrap().revision, Some(1));
    }
}
