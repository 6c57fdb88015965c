pub mod generator;
pub mod postgres;
pub mod rocksdb;
pub mod sqlite;
pub mod workload;

use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot open backend storage: {0}")]
    Open(String),
    #[error("write failed: {0}")]
    Write(String),
    #[error("read failed: {0}")]
    Read(String),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("cannot emit record: {0}")]
    Output(#[from] io::Error),
}

/// How `open` treats state left behind by a previous run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Wipe any previous state and start from an empty store.
    CreateNew,
    /// Open state produced by an earlier populate run; fail if absent.
    OpenExisting,
}

#[derive(Debug, Clone, Default)]
pub struct ConnectionParams {
    pub host: String,
    pub user: String,
    pub password: String,
    pub database: String,
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// On-disk location for the embedded engines.
    pub path: PathBuf,
    pub mode: OpenMode,
    /// 0 keeps the backend default. RocksDB counts megabytes, SQLite pages.
    pub cache_size: u64,
    /// RocksDB block size in bytes; 0 keeps the default. Others ignore it.
    pub page_size: u64,
    /// Server coordinates, used by the postgres backend only.
    pub connection: ConnectionParams,
}

pub type ScanIter<'a> = Box<dyn Iterator<Item = Result<(u64, Vec<u8>), Error>> + 'a>;

pub trait StorageEngine: Sized {
    type Txn: Transaction;

    fn open(config: &StoreConfig) -> Result<Self, Error>;

    /// Insert or overwrite one record as its own implicit commit unit.
    fn put(&self, key: u64, value: &[u8]) -> Result<(), Error>;

    /// Exact-key lookup; an absent key is `None`, not an error.
    fn get(&self, key: u64) -> Result<Option<Vec<u8>>, Error>;

    /// All records in ascending key order; exhaustion is the normal end.
    fn scan(&self) -> Result<ScanIter<'_>, Error>;

    fn begin(&self) -> Result<Self::Txn, Error>;
}

pub trait Transaction {
    /// Stage a write; nothing is durable until `commit`.
    fn put(&mut self, key: u64, value: &[u8]) -> Result<(), Error>;

    fn commit(self) -> Result<(), Error>;
}
