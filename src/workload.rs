use std::io::Write;

use log::{debug, info};
use rand::Rng;

use crate::generator::{generate, printable};
use crate::{Error, StorageEngine, Transaction};

#[derive(Debug, Clone)]
pub struct WorkloadConfig {
    /// Run size N; keys 1..N exclusive are stored, so N-1 records.
    pub record_count: u64,
    /// Writes per transaction; 0 or 1 makes every write its own unit.
    pub txn_size: u64,
    /// Vary value length from 1 to 255 bytes instead of the fixed 14.
    pub randomize: bool,
    /// Write fetched records to the output sink.
    pub emit_output: bool,
}

impl WorkloadConfig {
    fn validate(&self) -> Result<(), Error> {
        if self.record_count < 2 {
            return Err(Error::Config(format!(
                "record count {} leaves nothing to store",
                self.record_count
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PopulateStats {
    pub records: u64,
    /// Commit units issued, counting each unbatched write as its own.
    pub commits: u64,
}

/// Inserts keys 1..N in ascending order, grouping writes into
/// transactions of `txn_size` keys. The final batch is committed with
/// whatever remainder it holds.
pub fn populate<S: StorageEngine, R: Rng>(
    store: &S,
    config: &WorkloadConfig,
    rng: &mut R,
) -> Result<PopulateStats, Error> {
    config.validate()?;
    let n = config.record_count;
    info!("populating keys 1..{} (txn size {})", n, config.txn_size);

    if config.txn_size <= 1 {
        for key in 1..n {
            store.put(key, &generate(key, config.randomize, rng))?;
        }
        return Ok(PopulateStats {
            records: n - 1,
            commits: n - 1,
        });
    }

    let mut commits = 0;
    let mut staged = 0;
    let mut txn = store.begin()?;
    for key in 1..n {
        txn.put(key, &generate(key, config.randomize, rng))?;
        staged += 1;
        // The batch that ends on the last key is committed after the
        // loop, never as an empty trailing transaction.
        if staged == config.txn_size && key != n - 1 {
            txn.commit()?;
            commits += 1;
            txn = store.begin()?;
            staged = 0;
        }
    }
    txn.commit()?;
    commits += 1;
    debug!("issued {} commits", commits);

    Ok(PopulateStats {
        records: n - 1,
        commits,
    })
}

/// Fetches every key in 1..N directly, in two interleaved passes: all
/// odd keys ascending, then all even keys ascending. The split defeats
/// plain sequential prefetch in the engine under test. Every key must
/// exist; a miss is a read error.
pub fn point_get<S: StorageEngine>(
    store: &S,
    config: &WorkloadConfig,
    out: &mut dyn Write,
) -> Result<u64, Error> {
    config.validate()?;
    let n = config.record_count;
    info!("fetching keys 1..{} one by one, odd pass then even pass", n);

    let mut records = 0;
    for key in (1..n).step_by(2).chain((2..n).step_by(2)) {
        let value = store
            .get(key)?
            .ok_or_else(|| Error::Read(format!("key {} not found", key)))?;
        if config.emit_output {
            emit(out, key, &value)?;
        }
        records += 1;
    }
    Ok(records)
}

/// Walks one full scan from the first record to the last. Running out of
/// records is the normal terminal condition.
pub fn dump<S: StorageEngine>(
    store: &S,
    config: &WorkloadConfig,
    out: &mut dyn Write,
) -> Result<u64, Error> {
    info!("scanning all records in key order");

    let mut records = 0;
    for entry in store.scan()? {
        let (key, value) = entry?;
        if config.emit_output {
            emit(out, key, &value)?;
        }
        records += 1;
    }
    Ok(records)
}

fn emit(out: &mut dyn Write, key: u64, value: &[u8]) -> Result<(), Error> {
    writeln!(out, "{}: {}", key, String::from_utf8_lossy(printable(value)))?;
    Ok(())
}
