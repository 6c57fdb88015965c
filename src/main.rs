use std::io::{stdout, Write};
use std::path::PathBuf;
use std::process;
use std::time::Instant;

use clap::{App, Arg, ArgMatches, SubCommand};
use log::info;
use rand::thread_rng;
use serde::Serialize;

use rust_storage_bench::postgres::Store as Postgres;
use rust_storage_bench::rocksdb::Store as Rocksdb;
use rust_storage_bench::sqlite::Store as Sqlite;
use rust_storage_bench::workload::{self, WorkloadConfig};
use rust_storage_bench::{ConnectionParams, Error, OpenMode, StorageEngine, StoreConfig};

const BACKENDS: [&str; 3] = ["rocksdb", "sqlite", "postgres"];

#[derive(Debug, Clone, Copy)]
enum Operation {
    Populate,
    Get,
    Dump,
}

impl Operation {
    fn name(self) -> &'static str {
        match self {
            Operation::Populate => "populate",
            Operation::Get => "get",
            Operation::Dump => "dump",
        }
    }
}

#[derive(Debug, Serialize)]
struct RunReport {
    backend: String,
    operation: &'static str,
    records: u64,
    elapsed_ms: f64,
}

fn main() {
    env_logger::init();

    let matches = App::new("Rust Storage Engine Benchmark")
        .version("0.1.0")
        .subcommand(benchmark_args(
            SubCommand::with_name("populate").about("Fill the store with generated records"),
        ))
        .subcommand(benchmark_args(
            SubCommand::with_name("get").about("Fetch every record one key at a time"),
        ))
        .subcommand(benchmark_args(
            SubCommand::with_name("dump").about("Scan the store from first record to last"),
        ))
        .get_matches();

    let (operation, matches) = match matches.subcommand() {
        ("populate", Some(matches)) => (Operation::Populate, matches),
        ("get", Some(matches)) => (Operation::Get, matches),
        ("dump", Some(matches)) => (Operation::Dump, matches),
        _ => {
            eprintln!("no operation given; see --help");
            process::exit(1);
        }
    };

    if let Err(err) = execute(operation, matches) {
        eprintln!("{} failed: {}", operation.name(), err);
        process::exit(2);
    }
}

fn benchmark_args<'a, 'b>(cmd: App<'a, 'b>) -> App<'a, 'b> {
    cmd.arg(
        Arg::with_name("backend")
            .required(true)
            .possible_values(&BACKENDS)
            .help("Storage engine under test"),
    )
    .arg(
        Arg::with_name("path")
            .long("path")
            .takes_value(true)
            .help("On-disk location for the embedded engines"),
    )
    .arg(
        Arg::with_name("records")
            .short("n")
            .long("records")
            .takes_value(true)
            .default_value("100000")
            .help("Run size; keys 1..n-1 are stored"),
    )
    .arg(
        Arg::with_name("txn-size")
            .short("t")
            .long("txn-size")
            .takes_value(true)
            .default_value("0")
            .help("Writes per transaction; 0 or 1 commits every write on its own"),
    )
    .arg(
        Arg::with_name("random")
            .short("r")
            .long("random")
            .help("Vary value length from 1 to 255 bytes instead of fixed 14"),
    )
    .arg(
        Arg::with_name("output")
            .short("o")
            .long("output")
            .help("Write fetched records to stdout"),
    )
    .arg(
        Arg::with_name("cache-size")
            .short("c")
            .long("cache-size")
            .takes_value(true)
            .default_value("0")
            .help("Cache size: megabytes for rocksdb, pages for sqlite; 0 keeps the default"),
    )
    .arg(
        Arg::with_name("page-size")
            .short("p")
            .long("page-size")
            .takes_value(true)
            .default_value("0")
            .help("rocksdb block size in bytes; 0 keeps the default"),
    )
    .arg(
        Arg::with_name("host")
            .long("host")
            .takes_value(true)
            .default_value("localhost")
            .help("postgres server host"),
    )
    .arg(
        Arg::with_name("user")
            .long("user")
            .takes_value(true)
            .default_value("postgres")
            .help("postgres user"),
    )
    .arg(
        Arg::with_name("password")
            .long("password")
            .takes_value(true)
            .default_value("")
            .help("postgres password"),
    )
    .arg(
        Arg::with_name("database")
            .long("database")
            .takes_value(true)
            .default_value("postgres")
            .help("postgres database name"),
    )
}

fn execute(operation: Operation, matches: &ArgMatches) -> Result<(), Error> {
    let backend = matches.value_of("backend").unwrap_or_default();

    let workload_config = WorkloadConfig {
        record_count: parse_num(matches, "records")?,
        txn_size: parse_num(matches, "txn-size")?,
        randomize: matches.is_present("random"),
        emit_output: matches.is_present("output"),
    };

    // Populate always starts from scratch; the read benchmarks run
    // against whatever an earlier populate left behind.
    let mode = match operation {
        Operation::Populate => OpenMode::CreateNew,
        Operation::Get | Operation::Dump => OpenMode::OpenExisting,
    };

    let store_config = StoreConfig {
        path: matches
            .value_of("path")
            .map(PathBuf::from)
            .unwrap_or_else(|| default_path(backend)),
        mode,
        cache_size: parse_num(matches, "cache-size")?,
        page_size: parse_num(matches, "page-size")?,
        connection: ConnectionParams {
            host: matches.value_of("host").unwrap_or_default().to_string(),
            user: matches.value_of("user").unwrap_or_default().to_string(),
            password: matches.value_of("password").unwrap_or_default().to_string(),
            database: matches.value_of("database").unwrap_or_default().to_string(),
        },
    };

    match backend {
        "rocksdb" => run::<Rocksdb>(operation, backend, &store_config, &workload_config),
        "sqlite" => run::<Sqlite>(operation, backend, &store_config, &workload_config),
        "postgres" => run::<Postgres>(operation, backend, &store_config, &workload_config),
        other => Err(Error::Config(format!("unknown backend {:?}", other))),
    }
}

fn default_path(backend: &str) -> PathBuf {
    match backend {
        "sqlite" => PathBuf::from(rust_storage_bench::sqlite::DEFAULT_PATH),
        _ => PathBuf::from(rust_storage_bench::rocksdb::DEFAULT_PATH),
    }
}

fn parse_num(matches: &ArgMatches, name: &str) -> Result<u64, Error> {
    let raw = matches.value_of(name).unwrap_or_default();
    raw.parse()
        .map_err(|_| Error::Config(format!("--{} expects a number, got {:?}", name, raw)))
}

fn run<S: StorageEngine>(
    operation: Operation,
    backend: &str,
    store_config: &StoreConfig,
    workload_config: &WorkloadConfig,
) -> Result<(), Error> {
    info!(
        "running {} {} benchmark: {} records, txn size {}",
        backend,
        operation.name(),
        workload_config.record_count,
        workload_config.txn_size
    );
    let store = S::open(store_config)?;

    let mut out = stdout().lock();
    let started = Instant::now();
    let records = match operation {
        Operation::Populate => {
            workload::populate(&store, workload_config, &mut thread_rng())?.records
        }
        Operation::Get => workload::point_get(&store, workload_config, &mut out)?,
        Operation::Dump => workload::dump(&store, workload_config, &mut out)?,
    };
    let elapsed = started.elapsed();

    let report = RunReport {
        backend: backend.to_string(),
        operation: operation.name(),
        records,
        elapsed_ms: elapsed.as_secs_f64() * 1000.0,
    };
    serde_json::to_writer_pretty(&mut out, &report).expect("failed to write report");
    writeln!(&mut out)?;
    Ok(())
}
