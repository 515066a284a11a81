use heapdb::access::{DataType, Tuple, TupleDesc, Value};
use heapdb::config::StorageConfig;
use heapdb::database::Database;
use heapdb::storage::error::{AbortReason, StorageError};
use heapdb::storage::page::PageId;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Barrier;
use std::thread;
use std::time::{Duration, Instant};
use tempfile::tempdir;

/// Two INT32 columns in 24-byte pages: two tuples per page.
fn small_config() -> StorageConfig {
    StorageConfig::default()
        .with_page_size(24)
        .with_pool_capacity(2)
        .with_wal_sync(false)
}

fn pair_desc() -> TupleDesc {
    TupleDesc::from_types(&[DataType::Int32, DataType::Int32])
}

fn pair(a: i32, b: i32) -> Vec<Value> {
    vec![Value::Int32(a), Value::Int32(b)]
}

fn first_column(rows: &[Tuple]) -> Vec<i32> {
    let mut ids: Vec<i32> = rows
        .iter()
        .filter_map(|t| match t.value(0) {
            Some(Value::Int32(v)) => Some(*v),
            _ => None,
        })
        .collect();
    ids.sort();
    ids
}

#[test]
fn test_inserts_fill_pages_in_order() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let db = Database::open(dir.path(), small_config())?;
    let table_id = db.register_table("pairs", pair_desc())?;

    let txn = db.begin();
    for i in 0..5 {
        txn.insert("pairs", pair(i, i * 10))?;
    }
    txn.commit()?;

    let file = db.catalog().get_database_file(table_id)?;
    assert_eq!(file.num_pages()?, 3);
    assert_eq!(file.read_page(PageId::new(table_id, 0))?.num_empty_slots(), 0);
    assert_eq!(file.read_page(PageId::new(table_id, 1))?.num_empty_slots(), 0);
    assert_eq!(file.read_page(PageId::new(table_id, 2))?.num_empty_slots(), 1);

    let txn = db.begin();
    let rows = txn.scan("pairs")?;
    assert_eq!(first_column(&rows), vec![0, 1, 2, 3, 4]);
    assert!(db.buffer_pool().resident_pages().len() <= 2);
    Ok(())
}

#[test]
fn test_shared_lock_blocks_writer_until_commit() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let db = Database::open(dir.path(), StorageConfig::default().with_wal_sync(false))?;
    db.register_table("pairs", pair_desc())?;

    let setup = db.begin();
    setup.insert("pairs", pair(1, 1))?;
    setup.commit()?;

    let reader = db.begin();
    assert_eq!(reader.scan("pairs")?.len(), 1);

    let inserted = AtomicBool::new(false);
    thread::scope(|s| -> anyhow::Result<()> {
        let writer = s.spawn(|| -> anyhow::Result<()> {
            let txn = db.begin();
            txn.insert("pairs", pair(2, 2))?;
            inserted.store(true, Ordering::SeqCst);
            txn.commit()?;
            Ok(())
        });

        thread::sleep(Duration::from_millis(100));
        assert!(!inserted.load(Ordering::SeqCst));

        reader.commit()?;
        writer.join().unwrap()?;
        assert!(inserted.load(Ordering::SeqCst));
        Ok(())
    })?;

    let txn = db.begin();
    assert_eq!(first_column(&txn.scan("pairs")?), vec![1, 2]);
    Ok(())
}

#[test]
fn test_reader_inserts_while_writer_waits() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let db = Database::open(dir.path(), StorageConfig::default().with_wal_sync(false))?;
    db.register_table("pairs", pair_desc())?;

    let setup = db.begin();
    setup.insert("pairs", pair(1, 1))?;
    setup.commit()?;

    let reader = db.begin();
    assert_eq!(reader.scan("pairs")?.len(), 1);

    let writer = db.begin();
    let writer_id = writer.id();
    thread::scope(|s| -> anyhow::Result<()> {
        let handle = s.spawn(move || -> Result<(), StorageError> {
            writer.insert("pairs", pair(3, 3))?;
            writer.commit()
        });

        let deadline = Instant::now() + Duration::from_secs(5);
        while db.buffer_pool().lock_manager().waiting_on(writer_id).is_none() {
            assert!(Instant::now() < deadline, "writer never blocked");
            thread::sleep(Duration::from_millis(1));
        }

        // The waiting writer holds no lock, so the reader's upgrade succeeds.
        reader.insert("pairs", pair(2, 2))?;
        reader.commit()?;
        handle.join().unwrap()?;
        Ok(())
    })?;

    let txn = db.begin();
    assert_eq!(first_column(&txn.scan("pairs")?), vec![1, 2, 3]);
    Ok(())
}

#[test]
fn test_deadlock_aborts_one_transaction() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let db = Database::open(dir.path(), StorageConfig::default().with_wal_sync(false))?;
    db.register_table("left", pair_desc())?;
    db.register_table("right", pair_desc())?;

    let setup = db.begin();
    setup.insert("left", pair(0, 0))?;
    setup.insert("right", pair(0, 0))?;
    setup.commit()?;

    let barrier = Barrier::new(2);
    let outcomes: Vec<Result<(), StorageError>> = thread::scope(|s| {
        let run = |read: &'static str, write: &'static str| {
            let db = &db;
            let barrier = &barrier;
            s.spawn(move || -> Result<(), StorageError> {
                let txn = db.begin();
                txn.scan(read)?;
                barrier.wait();
                match txn.insert(write, pair(1, 1)) {
                    Ok(_) => txn.commit(),
                    Err(e) => {
                        txn.abort()?;
                        Err(e)
                    }
                }
            })
        };
        let first = run("left", "right");
        let second = run("right", "left");
        vec![first.join().unwrap(), second.join().unwrap()]
    });

    let aborted: Vec<&StorageError> = outcomes.iter().filter_map(|r| r.as_ref().err()).collect();
    assert_eq!(aborted.len(), 1);
    assert!(matches!(
        aborted[0],
        StorageError::TransactionAborted {
            reason: AbortReason::Deadlock,
            ..
        }
    ));

    let txn = db.begin();
    let total = txn.scan("left")?.len() + txn.scan("right")?.len();
    assert_eq!(total, 3);
    Ok(())
}

#[test]
fn test_concurrent_inserters_with_retry() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let config = small_config().with_pool_capacity(8);
    let db = Database::open(dir.path(), config)?;
    db.register_table("pairs", pair_desc())?;

    thread::scope(|s| {
        for worker in 0..4 {
            let db = &db;
            s.spawn(move || {
                for i in 0..5 {
                    let id = worker * 100 + i;
                    loop {
                        let txn = db.begin();
                        match txn.insert("pairs", pair(id, worker)) {
                            Ok(_) => {
                                txn.commit().unwrap();
                                break;
                            }
                            Err(e) if e.is_abort() => txn.abort().unwrap(),
                            Err(e) => panic!("insert failed: {}", e),
                        }
                    }
                }
            });
        }
    });

    let txn = db.begin();
    let rows = txn.scan("pairs")?;
    assert_eq!(rows.len(), 20);
    let record_ids: HashSet<_> = rows.iter().filter_map(|t| t.record_id()).collect();
    assert_eq!(record_ids.len(), 20);
    Ok(())
}

#[test]
fn test_abort_after_eviction_restores_disk() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let db = Database::open(dir.path(), small_config())?;
    let table_id = db.register_table("pairs", pair_desc())?;

    let setup = db.begin();
    setup.insert("pairs", pair(1, 1))?;
    setup.commit()?;

    let txn = db.begin();
    for i in 2..8 {
        txn.insert("pairs", pair(i, i))?;
    }
    // Four pages through a two-page pool: some were written before the abort.
    let file = db.catalog().get_database_file(table_id)?;
    assert!(file.num_pages()? >= 3);
    txn.abort()?;

    let txn = db.begin();
    assert_eq!(first_column(&txn.scan("pairs")?), vec![1]);
    txn.commit()?;

    for page_no in 0..file.num_pages()? {
        let page = file.read_page(PageId::new(table_id, page_no))?;
        let expected = if page_no == 0 { 1 } else { 0 };
        assert_eq!(page.tuples()?.len(), expected);
    }
    Ok(())
}

#[test]
fn test_committed_data_survives_restart() -> anyhow::Result<()> {
    let dir = tempdir()?;
    {
        let db = Database::open(dir.path(), small_config())?;
        db.register_table("pairs", pair_desc())?;
        let txn = db.begin();
        for i in 0..5 {
            txn.insert("pairs", pair(i, i))?;
        }
        txn.commit()?;
    }

    let db = Database::open(dir.path(), small_config())?;
    db.register_table("pairs", pair_desc())?;
    db.recover()?;
    let txn = db.begin();
    assert_eq!(first_column(&txn.scan("pairs")?), vec![0, 1, 2, 3, 4]);
    Ok(())
}

#[test]
fn test_recovery_after_crash_mid_commit() -> anyhow::Result<()> {
    let dir = tempdir()?;
    {
        let db = Database::open(dir.path(), StorageConfig::default())?;
        db.register_table("pairs", pair_desc())?;

        let txn = db.begin();
        txn.insert("pairs", pair(1, 1))?;
        txn.commit()?;

        heapdb::failpoint::enable(heapdb::storage::buffer::COMMIT_AFTER_LOG_FORCE);
        let txn = db.begin();
        txn.insert("pairs", pair(2, 2))?;
        assert!(txn.commit().is_err());
        heapdb::failpoint::clear();

        // Uncommitted work that reached disk through a flush, then a crash.
        let loser = db.begin();
        loser.insert("pairs", pair(3, 3))?;
        db.buffer_pool().flush_all_pages()?;
        std::mem::forget(loser);
    }

    let db = Database::open(dir.path(), StorageConfig::default())?;
    db.register_table("pairs", pair_desc())?;
    let stats = db.recover()?;
    assert_eq!(stats.losers.len(), 1);
    // The log was truncated; a second recovery has nothing to do.
    assert_eq!(db.recover()?.records_analyzed, 0);

    let txn = db.begin();
    assert_eq!(first_column(&txn.scan("pairs")?), vec![1, 2]);
    txn.commit()?;
    Ok(())
}

#[test]
fn test_recovery_waits_for_unregistered_table() -> anyhow::Result<()> {
    let dir = tempdir()?;
    {
        let db = Database::open(dir.path(), StorageConfig::default())?;
        db.register_table("a", pair_desc())?;
        db.register_table("b", pair_desc())?;

        heapdb::failpoint::enable(heapdb::storage::buffer::COMMIT_AFTER_LOG_FORCE);
        let txn = db.begin();
        txn.insert("a", pair(1, 1))?;
        assert!(txn.commit().is_err());
        heapdb::failpoint::clear();
    }

    {
        let db = Database::open(dir.path(), StorageConfig::default())?;
        db.register_table("b", pair_desc())?;
        assert!(matches!(db.recover(), Err(StorageError::UnknownTable(_))));
    }

    let db = Database::open(dir.path(), StorageConfig::default())?;
    db.register_table("a", pair_desc())?;
    db.register_table("b", pair_desc())?;
    let stats = db.recover()?;
    assert_eq!(stats.committed, 1);

    let txn = db.begin();
    assert_eq!(first_column(&txn.scan("a")?), vec![1]);
    Ok(())
}

#[test]
fn test_delete_frees_slot_for_reuse() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let db = Database::open(dir.path(), small_config())?;
    let table_id = db.register_table("pairs", pair_desc())?;

    let txn = db.begin();
    let first = txn.insert("pairs", pair(1, 1))?;
    txn.insert("pairs", pair(2, 2))?;
    txn.commit()?;

    let txn = db.begin();
    txn.delete(&first)?;
    let reused = txn.insert("pairs", pair(3, 3))?;
    txn.commit()?;

    assert_eq!(reused.record_id(), first.record_id());
    let file = db.catalog().get_database_file(table_id)?;
    assert_eq!(file.num_pages()?, 1);

    let txn = db.begin();
    assert_eq!(first_column(&txn.scan("pairs")?), vec![2, 3]);
    Ok(())
}
