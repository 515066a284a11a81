//! heapdb - command-line front end for the heap-file storage engine

use anyhow::{Context, Result};
use clap::{Parser as ClapParser, Subcommand};
use heapdb::access::{DataType, TupleDesc, Value};
use heapdb::config::{StorageConfig, DEFAULT_PAGE_SIZE, DEFAULT_POOL_PAGES};
use heapdb::database::{Database, TABLE_FILE_EXTENSION};
use std::path::{Path, PathBuf};

/// heapdb - page-cached heap tables with two-phase locking and a write-ahead log
#[derive(ClapParser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Data directory
    #[arg(short = 'D', long, default_value = "./heapdb_data")]
    data_dir: PathBuf,

    /// Page size in bytes
    #[arg(long, default_value_t = DEFAULT_PAGE_SIZE)]
    page_size: usize,

    /// Number of pages the buffer pool caches
    #[arg(long, default_value_t = DEFAULT_POOL_PAGES)]
    pool_pages: usize,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Insert `count` generated rows into a table
    Insert { table: String, count: u32 },
    /// Print every row of a table
    Scan { table: String },
    /// Delete every row of a table
    Delete { table: String },
    /// Replay the write-ahead log into all tables in the data directory
    Recover,
}

/// Schema of every table the CLI manages.
fn demo_schema() -> TupleDesc {
    TupleDesc::new(vec![("id", DataType::Int32), ("label", DataType::Varchar(24))])
}

fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    let config = StorageConfig::default()
        .with_page_size(args.page_size)
        .with_pool_capacity(args.pool_pages);
    let db = Database::open(&args.data_dir, config)
        .with_context(|| format!("Failed to open database at {}", args.data_dir.display()))?;

    for name in existing_tables(&args.data_dir)? {
        db.register_table(&name, demo_schema())
            .with_context(|| format!("Failed to register table '{}'", name))?;
    }
    if let Command::Insert { table, .. } | Command::Scan { table } | Command::Delete { table } =
        &args.command
    {
        db.register_table(table, demo_schema())
            .with_context(|| format!("Failed to register table '{}'", table))?;
    }

    let stats = db.recover().context("Recovery failed")?;

    match args.command {
        Command::Insert { table, count } => {
            let txn = db.begin();
            let first = txn
                .scan(&table)?
                .iter()
                .filter_map(|t| match t.value(0) {
                    Some(Value::Int32(id)) => Some(*id + 1),
                    _ => None,
                })
                .max()
                .unwrap_or(0);
            for id in first..first + count as i32 {
                txn.insert(
                    &table,
                    vec![Value::Int32(id), Value::String(format!("row-{}", id))],
                )?;
            }
            txn.commit().context("Commit failed")?;
            println!("Inserted {} rows into '{}'", count, table);
        }
        Command::Scan { table } => {
            let txn = db.begin();
            let rows = txn.scan(&table)?;
            for row in &rows {
                let fields: Vec<String> = row.values().iter().map(|v| v.to_string()).collect();
                println!("{}", fields.join("\t"));
            }
            txn.commit()?;
            println!("({} rows)", rows.len());
        }
        Command::Delete { table } => {
            let txn = db.begin();
            let rows = txn.scan(&table)?;
            for row in &rows {
                txn.delete(row)?;
            }
            txn.commit().context("Commit failed")?;
            println!("Deleted {} rows from '{}'", rows.len(), table);
        }
        Command::Recover => {
            println!(
                "Recovered {} log records: {} redone, {} undone, {} rolled-back transactions",
                stats.records_analyzed,
                stats.records_redone,
                stats.records_undone,
                stats.losers.len()
            );
        }
    }

    Ok(())
}

/// Names of the table files already in `data_dir`.
fn existing_tables(data_dir: &Path) -> Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in std::fs::read_dir(data_dir).context("Failed to list data directory")? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) == Some(TABLE_FILE_EXTENSION) {
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                names.push(stem.to_string());
            }
        }
    }
    names.sort();
    Ok(names)
}
