use crate::access::{HeapFileIterator, Tuple, TupleDesc, TupleIterator, Value};
use crate::catalog::Catalog;
use crate::config::StorageConfig;
use crate::recovery::{RecoveryManager, RecoveryStats};
use crate::storage::buffer::BufferPool;
use crate::storage::error::StorageResult;
use crate::storage::page::TableId;
use crate::storage::wal::{WalManager, WAL_FILE_NAME};
use crate::transaction::{TransactionId, TransactionIdGenerator};
use log::{info, warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Extension of table files inside the data directory.
pub const TABLE_FILE_EXTENSION: &str = "dat";

/// High-level database interface that integrates all layers
pub struct Database {
    data_dir: PathBuf,
    config: StorageConfig,
    catalog: Arc<Catalog>,
    pool: BufferPool,
    txn_ids: TransactionIdGenerator,
}

impl Database {
    /// Open the database in `data_dir`, creating the directory and the log
    /// if needed. Tables must be registered, and [`recover`](Self::recover)
    /// run, before the first transaction.
    pub fn open(data_dir: impl AsRef<Path>, config: StorageConfig) -> StorageResult<Self> {
        let data_dir = data_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&data_dir)?;

        let wal = Arc::new(WalManager::open(data_dir.join(WAL_FILE_NAME), config.wal_sync)?);
        // Ids of transactions still in the log must not be reused before
        // recovery has dealt with them.
        let first_id = wal
            .read_records()?
            .iter()
            .map(|record| record.txn.value() + 1)
            .max()
            .unwrap_or(1);

        let catalog = Arc::new(Catalog::new(config.page_size));
        let pool = BufferPool::new(&config, Arc::clone(&catalog), wal);
        info!(
            "Opened database at {} (page size {}, {} pool pages)",
            data_dir.display(),
            config.page_size,
            config.pool_capacity
        );

        Ok(Self {
            data_dir,
            config,
            catalog,
            pool,
            txn_ids: TransactionIdGenerator::starting_at(first_id),
        })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub fn buffer_pool(&self) -> &BufferPool {
        &self.pool
    }

    /// Register table `name`, stored in `<data_dir>/<name>.dat`.
    pub fn register_table(&self, name: &str, desc: TupleDesc) -> StorageResult<TableId> {
        self.config.validate_for(desc.tuple_size())?;
        let path = self
            .data_dir
            .join(format!("{}.{}", name, TABLE_FILE_EXTENSION));
        self.catalog.add_table(name, &path, desc)
    }

    /// Replay the log into the registered tables. Resident pages are
    /// dropped first since the files under them are about to change.
    pub fn recover(&self) -> StorageResult<RecoveryStats> {
        for page_id in self.pool.resident_pages() {
            self.pool.discard_page(page_id);
        }
        RecoveryManager::new(self.pool.wal(), &self.catalog).recover()
    }

    pub fn begin(&self) -> Transaction<'_> {
        Transaction {
            db: self,
            id: self.txn_ids.next(),
            finished: false,
        }
    }
}

/// A running transaction. Dropping it without calling
/// [`commit`](Self::commit) or [`abort`](Self::abort) aborts it.
///
/// Any error for which [`StorageError::is_abort`](crate::storage::error::StorageError::is_abort)
/// holds means the transaction can make no further progress and should be
/// aborted.
pub struct Transaction<'a> {
    db: &'a Database,
    id: TransactionId,
    finished: bool,
}

impl<'a> Transaction<'a> {
    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// Insert a row into `table`. Returns the stored tuple with its record id.
    pub fn insert(&self, table: &str, values: Vec<Value>) -> StorageResult<Tuple> {
        let table_id = self.db.catalog.table_id(table)?;
        let mut tuple = Tuple::new(values);
        self.db.pool.insert_tuple(self.id, table_id, &mut tuple)?;
        Ok(tuple)
    }

    /// Delete a tuple previously returned by a scan or insert.
    pub fn delete(&self, tuple: &Tuple) -> StorageResult<()> {
        self.db.pool.delete_tuple(self.id, tuple)
    }

    /// An unopened iterator over `table`.
    pub fn iter(&self, table: &str) -> StorageResult<HeapFileIterator<'a>> {
        let table_id = self.db.catalog.table_id(table)?;
        let file = self.db.catalog.get_database_file(table_id)?;
        Ok(file.iter(self.id, &self.db.pool))
    }

    /// Every tuple of `table`, in page and slot order.
    pub fn scan(&self, table: &str) -> StorageResult<Vec<Tuple>> {
        let mut iter = self.iter(table)?;
        iter.open()?;
        let tuples = iter.collect_remaining()?;
        iter.close();
        Ok(tuples)
    }

    pub fn commit(mut self) -> StorageResult<()> {
        // A failed commit has either been rolled back by the pool or is
        // already durable in the log; neither needs an abort here.
        self.finished = true;
        self.db.pool.commit(self.id)
    }

    pub fn abort(mut self) -> StorageResult<()> {
        self.finished = true;
        self.db.pool.abort(self.id)
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if !self.finished {
            if let Err(e) = self.db.pool.abort(self.id) {
                warn!("Abort of dropped {} failed: {}", self.id, e);
            }
        }
    }
}
