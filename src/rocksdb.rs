use std::sync::Arc;

use log::debug;
use rocksdb::{BlockBasedOptions, Cache, IteratorMode, Options, WriteBatch, DB};

use crate::{Error, OpenMode, ScanIter, StorageEngine, StoreConfig, Transaction};

pub const DEFAULT_PATH: &str = "rocksdb.db";

const DEFAULT_CACHE_MB: u64 = 4;
const DEFAULT_BLOCK_SIZE: u64 = 4096;

#[derive(Debug)]
pub struct Store {
    db: Arc<DB>,
}

// Keys go in big-endian so the default iterator yields ascending
// numeric key order.
fn encode_key(key: u64) -> [u8; 8] {
    key.to_be_bytes()
}

fn decode_key(raw: &[u8]) -> Result<u64, Error> {
    raw.try_into()
        .map(u64::from_be_bytes)
        .map_err(|_| Error::Read(format!("malformed {}-byte key in store", raw.len())))
}

impl StorageEngine for Store {
    type Txn = RocksdbTxn;

    fn open(config: &StoreConfig) -> Result<Self, Error> {
        let cache_mb = if config.cache_size == 0 {
            DEFAULT_CACHE_MB
        } else {
            config.cache_size
        };
        let block_size = if config.page_size == 0 {
            DEFAULT_BLOCK_SIZE
        } else {
            config.page_size
        };

        let mut block_opts = BlockBasedOptions::default();
        block_opts.set_block_size(block_size as usize);
        block_opts.set_block_cache(&Cache::new_lru_cache((cache_mb * 1024 * 1024) as usize));

        let mut opts = Options::default();
        opts.set_block_based_table_factory(&block_opts);

        match config.mode {
            OpenMode::CreateNew => {
                // A populate run starts from empty state.
                let _ = DB::destroy(&Options::default(), &config.path);
                opts.create_if_missing(true);
            }
            OpenMode::OpenExisting => {
                opts.create_if_missing(false);
            }
        }

        debug!(
            "opening rocksdb at {} ({} MB cache, {} byte blocks)",
            config.path.display(),
            cache_mb,
            block_size
        );
        let db = DB::open(&opts, &config.path).map_err(|e| Error::Open(e.to_string()))?;
        Ok(Self { db: Arc::new(db) })
    }

    fn put(&self, key: u64, value: &[u8]) -> Result<(), Error> {
        self.db
            .put(encode_key(key), value)
            .map_err(|e| Error::Write(e.to_string()))
    }

    fn get(&self, key: u64) -> Result<Option<Vec<u8>>, Error> {
        self.db
            .get(encode_key(key))
            .map_err(|e| Error::Read(e.to_string()))
    }

    fn scan(&self) -> Result<ScanIter<'_>, Error> {
        let iter = self.db.iterator(IteratorMode::Start);
        Ok(Box::new(iter.map(|entry| {
            let (key, value) = entry.map_err(|e| Error::Read(e.to_string()))?;
            Ok((decode_key(&key)?, value.into_vec()))
        })))
    }

    fn begin(&self) -> Result<Self::Txn, Error> {
        Ok(RocksdbTxn {
            db: Arc::clone(&self.db),
            wb: WriteBatch::default(),
        })
    }
}

pub struct RocksdbTxn {
    db: Arc<DB>,
    wb: WriteBatch,
}

impl Transaction for RocksdbTxn {
    fn put(&mut self, key: u64, value: &[u8]) -> Result<(), Error> {
        self.wb.put(encode_key(key), value);
        Ok(())
    }

    fn commit(self) -> Result<(), Error> {
        self.db
            .write(self.wb)
            .map_err(|e| Error::Write(e.to_string()))
    }
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
        let store = Store::open(&config(&tmp_dir.path().join("db"), OpenMode::CreateNew)).unwrap();
        store.put(1, b"one\0").unwrap();
        store.put(2, b"two\0").unwrap();

        assert_eq!(Some(b"one\0".to_vec()), store.get(1).unwrap());
        assert_eq!(Some(b"two\0".to_vec()), store.get(2).unwrap());
        assert_eq!(None, store.get(3).unwrap());
    }

    #[test]
    fn batched_writes_land_on_commit() {
        let tmp_dir = tempfile::Builder::new()
            .prefix("batched_writes")
            .tempdir()
            .unwrap();
        let store = Store::open(&config(&tmp_dir.path().join("db"), OpenMode::CreateNew)).unwrap();

        let mut txn = store.begin().unwrap();
        txn.put(1, b"a\0").unwrap();
        txn.put(2, b"b\0").unwrap();
        txn.commit().unwrap();

        assert_eq!(Some(b"a\0".to_vec()), store.get(1).unwrap());
        assert_eq!(Some(b"b\0".to_vec()), store.get(2).unwrap());
    }

    #[test]
    fn scan_is_ordered_by_numeric_key() {
        let tmp_dir = tempfile::Builder::new()
            .prefix("ordered_scan")
            .tempdir()
            .unwrap();
        let store = Store::open(&config(&tmp_dir.path().join("db"), OpenMode::CreateNew)).unwrap();

        // Keys straddling a byte boundary would come back misordered if
        // the encoding were little-endian.
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
        let path = tmp_dir.path().join("db");

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
        let path = tmp_dir.path().join("db");

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
        let err =
            Store::open(&config(&tmp_dir.path().join("absent"), OpenMode::OpenExisting)).unwrap_err();
        assert!(matches!(err, Error::Open(_)));
    }
}
