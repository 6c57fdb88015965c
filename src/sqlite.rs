use std::fs;
use std::io::ErrorKind;
use std::rc::Rc;

use log::debug;
use rusqlite::{params, Connection, OptionalExtension};

use crate::{Error, OpenMode, ScanIter, StorageEngine, StoreConfig, Transaction};

pub const DEFAULT_PATH: &str = "sqlite.db";

const DEFAULT_CACHE_PAGES: u64 = 10_000;

#[derive(Debug)]
pub struct Store {
    // Shared with open transaction handles; the harness is single threaded.
    conn: Rc<Connection>,
}

impl StorageEngine for Store {
    type Txn = SqliteTxn;

    fn open(config: &StoreConfig) -> Result<Self, Error> {
        let open_err = |e: rusqlite::Error| Error::Open(e.to_string());

        match config.mode {
            OpenMode::CreateNew => match fs::remove_file(&config.path) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(Error::Open(format!(
                        "cannot remove stale {}: {}",
                        config.path.display(),
                        e
                    )))
                }
            },
            OpenMode::OpenExisting => {
                // Connection::open would silently create an empty file.
                if !config.path.exists() {
                    return Err(Error::Open(format!(
                        "no database at {}",
                        config.path.display()
                    )));
                }
            }
        }

        let conn = Connection::open(&config.path).map_err(open_err)?;

        let cache_pages = if config.cache_size == 0 {
            DEFAULT_CACHE_PAGES
        } else {
            config.cache_size
        };
        conn.execute_batch(&format!("PRAGMA cache_size = {};", cache_pages))
            .map_err(open_err)?;

        if config.mode == OpenMode::CreateNew {
            conn.execute_batch("CREATE TABLE tbl (key INTEGER PRIMARY KEY, value BLOB NOT NULL);")
                .map_err(open_err)?;
        }

        debug!(
            "opened sqlite at {} ({} cache pages)",
            config.path.display(),
            cache_pages
        );
        Ok(Self {
            conn: Rc::new(conn),
        })
    }

    fn put(&self, key: u64, value: &[u8]) -> Result<(), Error> {
        insert(&self.conn, key, value)
    }

    fn get(&self, key: u64) -> Result<Option<Vec<u8>>, Error> {
        self.conn
            .query_row(
                "SELECT value FROM tbl WHERE key = ?1",
                params![key as i64],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| Error::Read(e.to_string()))
    }

    fn scan(&self) -> Result<ScanIter<'_>, Error> {
        let read_err = |e: rusqlite::Error| Error::Read(e.to_string());
        let mut stmt = self
            .conn
            .prepare("SELECT key, value FROM tbl ORDER BY key")
            .map_err(read_err)?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, i64>(0)? as u64, row.get::<_, Vec<u8>>(1)?))
            })
            .map_err(read_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(read_err)?;
        Ok(Box::new(rows.into_iter().map(Ok)))
    }

    fn begin(&self) -> Result<Self::Txn, Error> {
        self.conn
            .execute_batch("BEGIN")
            .map_err(|e| Error::Write(e.to_string()))?;
        Ok(SqliteTxn {
            conn: Rc::clone(&self.conn),
        })
    }
}

pub struct SqliteTxn {
    conn: Rc<Connection>,
}

impl Transaction for SqliteTxn {
    fn put(&mut self, key: u64, value: &[u8]) -> Result<(), Error> {
        insert(&self.conn, key, value)
    }

    fn commit(self) -> Result<(), Error> {
        self.conn
            .execute_batch("COMMIT")
            .map_err(|e| Error::Write(e.to_string()))
    }
}

fn insert(conn: &Connection, key: u64, value: &[u8]) -> Result<(), Error> {
    let write_err = |e: rusqlite::Error| Error::Write(e.to_string());
    let mut stmt = conn
        .prepare_cached("INSERT OR REPLACE INTO tbl (key, value) VALUES (?1, ?2)")
        .map_err(write_err)?;
    stmt.execute(params![key as i64, value]).map_err(write_err)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ConnectionParams;
    use std::path::Path;
    use tempfile;

    fn config(path: &Path, mode: OpenMode) -> StoreConfig {
        StoreConfig {
            path: path.to_path_buf(),
            mode,
            cache_size: 0,
            page_size: 0,
            connection: ConnectionParams::default(),
        }
    }

    #[test]
    fn put_and_get() {
        let tmp_dir = tempfile::Builder::new()
            .prefix("put_and_get")
            .tempdir()
            .unwrap();
        let store =
            Store::open(&config(&tmp_dir.path().join("bench.db"), OpenMode::CreateNew)).unwrap();
        store.put(1, b"one\0").unwrap();
        store.put(2, b"two\0").unwrap();

        assert_eq!(Some(b"one\0".to_vec()), store.get(1).unwrap());
        assert_eq!(Some(b"two\0".to_vec()), store.get(2).unwrap());
        assert_eq!(None, store.get(3).unwrap());
    }

    #[test]
    fn put_overwrites_an_existing_record() {
        let tmp_dir = tempfile::Builder::new()
            .prefix("overwrite")
            .tempdir()
            .unwrap();
        let store =
            Store::open(&config(&tmp_dir.path().join("bench.db"), OpenMode::CreateNew)).unwrap();
        store.put(1, b"old\0").unwrap();
        store.put(1, b"new\0").unwrap();
        assert_eq!(Some(b"new\0".to_vec()), store.get(1).unwrap());
    }

    #[test]
    fn batched_writes_land_on_commit() {
        let tmp_dir = tempfile::Builder::new()
            .prefix("batched_writes")
            .tempdir()
            .unwrap();
        let store =
            Store::open(&config(&tmp_dir.path().join("bench.db"), OpenMode::CreateNew)).unwrap();

        let mut txn = store.begin().unwrap();
        txn.put(1, b"a\0").unwrap();
        txn.put(2, b"b\0").unwrap();
        txn.commit().unwrap();

        assert_eq!(Some(b"a\0".to_vec()), store.get(1).unwrap());
        assert_eq!(Some(b"b\0".to_vec()), store.get(2).unwrap());
    }

    #[test]
    fn consecutive_batches_commit_independently() {
        let tmp_dir = tempfile::Builder::new()
            .prefix("consecutive")
            .tempdir()
            .unwrap();
        let store =
            Store::open(&config(&tmp_dir.path().join("bench.db"), OpenMode::CreateNew)).unwrap();

        for (start, end) in [(1u64, 3u64), (3, 5)] {
            let mut txn = store.begin().unwrap();
            for key in start..end {
                txn.put(key, b"v\0").unwrap();
            }
            txn.commit().unwrap();
        }
        for key in 1..5 {
            assert_eq!(Some(b"v\0".to_vec()), store.get(key).unwrap());
        }
    }

    #[test]
    fn scan_is_ordered_by_numeric_key() {
        let tmp_dir = tempfile::Builder::new()
            .prefix("ordered_scan")
            .tempdir()
            .unwrap();
        let store =
            Store::open(&config(&tmp_dir.path().join("bench.db"), OpenMode::CreateNew)).unwrap();

        for key in [256u64, 1, 700, 2, 255] {
            store.put(key, b"x\0").unwrap();
        }

        let keys: Vec<u64> = store
            .scan()
            .unwrap()
            .map(|entry| entry.unwrap().0)
            .collect();
        assert_eq!(vec![1, 2, 255, 256, 700], keys);
    }

    #[test]
    fn reopen_existing_sees_previous_records() {
        let tmp_dir = tempfile::Builder::new()
            .prefix("reopen")
            .tempdir()
            .unwrap();
        let path = tmp_dir.path().join("bench.db");

        let store = Store::open(&config(&path, OpenMode::CreateNew)).unwrap();
        store.put(7, b"seven\0").unwrap();
        drop(store);

        let store = Store::open(&config(&path, OpenMode::OpenExisting)).unwrap();
        assert_eq!(Some(b"seven\0".to_vec()), store.get(7).unwrap());
    }

    #[test]
    fn create_new_wipes_previous_state() {
        let tmp_dir = tempfile::Builder::new()
            .prefix("wipe")
            .tempdir()
            .unwrap();
        let path = tmp_dir.path().join("bench.db");

        let store = Store::open(&config(&path, OpenMode::CreateNew)).unwrap();
        store.put(7, b"seven\0").unwrap();
        drop(store);

        let store = Store::open(&config(&path, OpenMode::CreateNew)).unwrap();
        assert_eq!(None, store.get(7).unwrap());
    }

    #[test]
    fn open_existing_without_state_fails() {
        let tmp_dir = tempfile::Builder::new()
            .prefix("absent")
            .tempdir()
            .unwrap();
        let err = Store::open(&config(&tmp_dir.path().join("absent.db"), OpenMode::OpenExisting))
            .unwrap_err();
        assert!(matches!(err, Error::Open(_)));
    }
}
