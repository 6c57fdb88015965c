use std::cell::RefCell;
use std::rc::Rc;

use log::debug;
use postgres::{Client, NoTls};

use crate::{Error, OpenMode, ScanIter, StorageEngine, StoreConfig, Transaction};

pub struct Store {
    // One blocking client per run, shared with open transaction handles.
    client: Rc<RefCell<Client>>,
}

impl StorageEngine for Store {
    type Txn = PostgresTxn;

    fn open(config: &StoreConfig) -> Result<Self, Error> {
        let open_err = |e: postgres::Error| Error::Open(e.to_string());
        let params = &config.connection;

        let mut pg = postgres::Config::new();
        pg.host(&params.host)
            .user(&params.user)
            .password(&params.password)
            .dbname(&params.database);
        let mut client = pg.connect(NoTls).map_err(open_err)?;

        match config.mode {
            OpenMode::CreateNew => {
                client
                    .batch_execute(
                        "DROP TABLE IF EXISTS tbl;
                         CREATE TABLE tbl (key BIGINT PRIMARY KEY, value BYTEA NOT NULL);",
                    )
                    .map_err(open_err)?;
            }
            OpenMode::OpenExisting => {
                // Surface a missing table now rather than on the first read.
                client
                    .batch_execute("SELECT 1 FROM tbl LIMIT 1;")
                    .map_err(open_err)?;
            }
        }

        debug!(
            "connected to postgres at {} (database {})",
            params.host, params.database
        );
        Ok(Self {
            client: Rc::new(RefCell::new(client)),
        })
    }

    fn put(&self, key: u64, value: &[u8]) -> Result<(), Error> {
        upsert(&mut self.client.borrow_mut(), key, value)
    }

    fn get(&self, key: u64) -> Result<Option<Vec<u8>>, Error> {
        let read_err = |e: postgres::Error| Error::Read(e.to_string());
        let row = self
            .client
            .borrow_mut()
            .query_opt("SELECT value FROM tbl WHERE key = $1", &[&(key as i64)])
            .map_err(read_err)?;
        row.map(|row| row.try_get(0).map_err(read_err)).transpose()
    }

    fn scan(&self) -> Result<ScanIter<'_>, Error> {
        let read_err = |e: postgres::Error| Error::Read(e.to_string());
        // One round trip; the rows come back materialized client side.
        let rows = self
            .client
            .borrow_mut()
            .query("SELECT key, value FROM tbl ORDER BY key", &[])
            .map_err(read_err)?;
        Ok(Box::new(rows.into_iter().map(move |row| {
            let key: i64 = row.try_get(0).map_err(read_err)?;
            let value: Vec<u8> = row.try_get(1).map_err(read_err)?;
            Ok((key as u64, value))
        })))
    }

    fn begin(&self) -> Result<Self::Txn, Error> {
        self.client
            .borrow_mut()
            .batch_execute("BEGIN")
            .map_err(|e| Error::Write(e.to_string()))?;
        Ok(PostgresTxn {
            client: Rc::clone(&self.client),
        })
    }
}

pub struct PostgresTxn {
    client: Rc<RefCell<Client>>,
}

impl Transaction for PostgresTxn {
    fn put(&mut self, key: u64, value: &[u8]) -> Result<(), Error> {
        upsert(&mut self.client.borrow_mut(), key, value)
    }

    fn commit(self) -> Result<(), Error> {
        self.client
            .borrow_mut()
            .batch_execute("COMMIT")
            .map_err(|e| Error::Write(e.to_string()))
    }
}

fn upsert(client: &mut Client, key: u64, value: &[u8]) -> Result<(), Error> {
    client
        .execute(
            "INSERT INTO tbl (key, value) VALUES ($1, $2)
             ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value",
            &[&(key as i64), &value],
        )
        .map(|_| ())
        .map_err(|e| Error::Write(e.to_string()))
}
