pub mod lru;
pub mod random;
pub mod replacer;

use crate::access::Tuple;
use crate::catalog::Catalog;
use crate::concurrency::LockManager;
use crate::config::{EvictionPolicy, StorageConfig};
use crate::failpoint;
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::page::{HeapPage, PageId, Permission, TableId};
use crate::storage::wal::WalManager;
use crate::transaction::TransactionId;
use log::{debug, warn};
use parking_lot::{Mutex, RwLock};
use replacer::{FrameId, Replacer};
use std::collections::HashMap;
use std::sync::Arc;

/// Fires after the commit record is durable and before any page is written.
pub const COMMIT_AFTER_LOG_FORCE: &str = "buffer_pool::commit_after_log_force";
/// Fires after a single page's update record is durable and before the page
/// is written.
pub const FLUSH_AFTER_LOG_FORCE: &str = "buffer_pool::flush_after_log_force";

/// Shared handle to a cached page. The page stays pinned, and therefore
/// resident, while any handle is alive.
///
/// Page guards must be dropped before calling back into the pool.
pub type PageRef = Arc<RwLock<HeapPage>>;

/// Pre-transaction images of pages written to disk before their dirtier
/// committed, keyed by dirtier.
type StolenPages = HashMap<TransactionId, HashMap<PageId, Vec<u8>>>;

struct PoolState {
    frames: Vec<Option<PageRef>>,
    page_table: HashMap<PageId, FrameId>,
    free_frames: Vec<FrameId>,
    replacer: Box<dyn Replacer>,
    stolen: StolenPages,
}

impl PoolState {
    fn cached(&self, page_id: PageId) -> Option<PageRef> {
        self.page_table
            .get(&page_id)
            .and_then(|&frame_id| self.frames[frame_id].clone())
    }

    fn pages(&self) -> impl Iterator<Item = &PageRef> {
        self.frames.iter().flatten()
    }

    fn dirtied_by(&self, txn: TransactionId) -> Vec<PageRef> {
        self.pages()
            .filter(|page| page.read().dirtier() == Some(txn))
            .cloned()
            .collect()
    }

    fn install(&mut self, frame_id: FrameId, page_id: PageId, page: PageRef) {
        self.frames[frame_id] = Some(page);
        self.page_table.insert(page_id, frame_id);
        self.replacer.record_access(frame_id);
    }

    fn release_frame(&mut self, page_id: PageId, frame_id: FrameId) {
        self.frames[frame_id] = None;
        self.page_table.remove(&page_id);
        self.replacer.remove(frame_id);
        self.free_frames.push(frame_id);
    }
}

/// The page cache. Every page access goes through [`fetch`](Self::fetch),
/// which takes the page lock for the transaction before touching the cache.
///
/// All cache bookkeeping (lookup, eviction, insertion) happens under a single
/// mutex, so at most one copy of any page is ever resident. Page contents are
/// guarded separately by each page's `RwLock`, always taken after the cache
/// mutex when both are needed.
pub struct BufferPool {
    state: Mutex<PoolState>,
    capacity: usize,
    catalog: Arc<Catalog>,
    lock_manager: LockManager,
    wal: Arc<WalManager>,
}

impl BufferPool {
    pub fn new(config: &StorageConfig, catalog: Arc<Catalog>, wal: Arc<WalManager>) -> Self {
        let capacity = config.pool_capacity;
        let replacer: Box<dyn Replacer> = match config.eviction {
            EvictionPolicy::Random => Box::new(random::RandomReplacer::new()),
            EvictionPolicy::Lru => Box::new(lru::LruReplacer::new(capacity)),
        };

        Self {
            state: Mutex::new(PoolState {
                frames: vec![None; capacity],
                page_table: HashMap::with_capacity(capacity),
                free_frames: (0..capacity).rev().collect(),
                replacer,
                stolen: HashMap::new(),
            }),
            capacity,
            catalog,
            lock_manager: LockManager::new(config.lock_poll_interval, config.lock_timeout),
            wal,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub fn lock_manager(&self) -> &LockManager {
        &self.lock_manager
    }

    pub fn wal(&self) -> &Arc<WalManager> {
        &self.wal
    }

    /// Lock `page_id` for `txn` in the mode `perm` asks for, then return the
    /// cached page, loading it (and evicting another page if the pool is
    /// full) if it is not resident.
    ///
    /// May block on the page lock. Fails with
    /// [`StorageError::TransactionAborted`] if the wait is abandoned; the
    /// caller must then abort `txn`.
    pub fn fetch(&self, txn: TransactionId, page_id: PageId, perm: Permission) -> StorageResult<PageRef> {
        self.lock_manager.acquire(txn, page_id, perm.lock_mode())?;

        let mut state = self.state.lock();
        if let Some(&frame_id) = state.page_table.get(&page_id) {
            if let Some(page) = state.frames[frame_id].clone() {
                state.replacer.record_access(frame_id);
                return Ok(page);
            }
        }

        let file = self.catalog.get_database_file(page_id.table_id)?;
        let page = Arc::new(RwLock::new(file.read_page(page_id)?));
        let frame_id = self.allocate_frame(&mut state)?;
        state.install(frame_id, page_id, Arc::clone(&page));
        debug!("Loaded page {} into frame {}", page_id, frame_id);
        Ok(page)
    }

    /// Insert `tuple` into table `table_id` on behalf of `txn`. On success
    /// the tuple carries its new record id.
    pub fn insert_tuple(&self, txn: TransactionId, table_id: TableId, tuple: &mut Tuple) -> StorageResult<()> {
        let file = self.catalog.get_database_file(table_id)?;
        let pages = file.insert_tuple(txn, tuple, self)?;
        self.mark_dirtied(txn, pages)
    }

    /// Delete `tuple`, located by its record id, on behalf of `txn`.
    pub fn delete_tuple(&self, txn: TransactionId, tuple: &Tuple) -> StorageResult<()> {
        let record_id = tuple.record_id().ok_or(StorageError::MissingRecordId)?;
        let file = self.catalog.get_database_file(record_id.page_id.table_id)?;
        let pages = file.delete_tuple(txn, tuple, self)?;
        self.mark_dirtied(txn, pages)
    }

    /// Mark `pages` dirty by `txn` and make sure each one is the resident
    /// copy of its page.
    fn mark_dirtied(&self, txn: TransactionId, pages: Vec<PageRef>) -> StorageResult<()> {
        for page in pages {
            let page_id = {
                let mut guard = page.write();
                guard.mark_dirty(txn);
                guard.id()
            };

            let mut state = self.state.lock();
            match state.page_table.get(&page_id).copied() {
                Some(frame_id) => {
                    let same = state.frames[frame_id]
                        .as_ref()
                        .map(|cached| Arc::ptr_eq(cached, &page))
                        .unwrap_or(false);
                    if !same {
                        state.frames[frame_id] = Some(page);
                    }
                    state.replacer.record_access(frame_id);
                }
                None => {
                    let frame_id = self.allocate_frame(&mut state)?;
                    state.install(frame_id, page_id, page);
                }
            }
        }
        Ok(())
    }

    /// Release one page lock before the transaction ends.
    ///
    /// This breaks strict two-phase locking: other transactions may see or
    /// overwrite what `txn` did to the page. Only for callers that know the
    /// page was not modified.
    pub fn release_lock(&self, txn: TransactionId, page_id: PageId) {
        self.lock_manager.release(txn, page_id);
    }

    pub fn holds_lock(&self, txn: TransactionId, page_id: PageId) -> bool {
        self.lock_manager.holds_lock(txn, page_id)
    }

    /// Make `txn`'s changes durable and release its locks.
    ///
    /// Update records for every page `txn` dirtied are logged together with
    /// the commit record and forced once; only then are the pages written.
    /// If the log cannot be forced the transaction is aborted instead.
    pub fn commit(&self, txn: TransactionId) -> StorageResult<()> {
        let mut state = self.state.lock();
        let dirty = state.dirtied_by(txn);

        if let Err(e) = self.log_commit(txn, &dirty) {
            drop(state);
            warn!("Commit of {} failed before it was durable: {}", txn, e);
            self.abort(txn)?;
            return Err(e);
        }

        // The commit is decided; locks go even if a page write fails, since
        // recovery redoes the page from the log.
        state.stolen.remove(&txn);
        let result = self.write_committed(&dirty);
        drop(state);
        self.lock_manager.release_all(txn);

        debug!("Committed {} ({} pages)", txn, dirty.len());
        result
    }

    fn log_commit(&self, txn: TransactionId, dirty: &[PageRef]) -> StorageResult<()> {
        for page in dirty {
            let page = page.read();
            self.wal.log_write(
                txn,
                page.id(),
                page.before_image().to_vec(),
                page.page_data().to_vec(),
            )?;
        }
        self.wal.log_commit(txn)?;
        self.wal.force()?;
        Ok(())
    }

    fn write_committed(&self, dirty: &[PageRef]) -> StorageResult<()> {
        let mut result = failpoint::maybe_fail(COMMIT_AFTER_LOG_FORCE).map_err(StorageError::from);
        for page in dirty {
            let mut page = page.write();
            if result.is_ok() {
                result = self
                    .catalog
                    .get_database_file(page.id().table_id)
                    .and_then(|file| file.write_page(&page));
                if result.is_ok() {
                    page.mark_clean();
                }
            }
            // Committed contents are the rollback target for later writers,
            // written or not. Unwritten pages stay dirty.
            page.set_before_image();
        }
        result
    }

    /// Undo everything `txn` did and release its locks.
    ///
    /// Resident pages go back to their before-images. Pages that were
    /// written to disk before the abort get their pre-transaction image
    /// written back, preceded by a compensation record in the log.
    pub fn abort(&self, txn: TransactionId) -> StorageResult<()> {
        let result = self.rollback(txn);
        self.lock_manager.release_all(txn);
        if let Err(e) = &result {
            warn!("Rollback of {} failed: {}", txn, e);
        } else {
            debug!("Aborted {}", txn);
        }
        result
    }

    fn rollback(&self, txn: TransactionId) -> StorageResult<()> {
        let mut state = self.state.lock();
        for page in state.dirtied_by(txn) {
            page.write().restore_before_image();
        }

        let stolen = state.stolen.remove(&txn).unwrap_or_default();
        if !stolen.is_empty() {
            let mut writes = Vec::with_capacity(stolen.len());
            for (page_id, original) in stolen {
                let file = self.catalog.get_database_file(page_id.table_id)?;
                let on_disk = file.read_page_data(page_id)?;
                self.wal
                    .log_compensation(txn, page_id, on_disk, original.clone())?;
                writes.push((file, page_id, original));
            }
            self.wal.force()?;

            for (file, page_id, original) in writes {
                file.write_page_data(page_id, &original)?;
                if let Some(page) = state.cached(page_id) {
                    page.write().reset_to(&original);
                }
                debug!("Restored stolen page {} for {}", page_id, txn);
            }
        }

        self.wal.log_abort(txn)?;
        self.wal.force()?;
        Ok(())
    }

    /// Write one page to disk if it is resident and dirty. The page stays
    /// dirty-by-nobody afterwards; its dirtier can still abort, which
    /// restores the image from before its changes.
    pub fn flush_page(&self, page_id: PageId) -> StorageResult<()> {
        let mut state = self.state.lock();
        if let Some(page) = state.cached(page_id) {
            let mut guard = page.write();
            self.write_back(&mut state.stolen, &mut guard)?;
        }
        Ok(())
    }

    /// Write every resident page `txn` dirtied, without committing.
    pub fn flush_pages(&self, txn: TransactionId) -> StorageResult<()> {
        let mut state = self.state.lock();
        for page in state.dirtied_by(txn) {
            let mut guard = page.write();
            self.write_back(&mut state.stolen, &mut guard)?;
        }
        Ok(())
    }

    /// Write every dirty resident page. Uncommitted changes reach disk too;
    /// they stay undoable through the log and abort.
    pub fn flush_all_pages(&self) -> StorageResult<()> {
        let mut state = self.state.lock();
        let pages: Vec<PageRef> = state.pages().cloned().collect();
        for page in pages {
            let mut guard = page.write();
            self.write_back(&mut state.stolen, &mut guard)?;
        }
        Ok(())
    }

    /// Drop a page from the cache without writing it.
    pub fn discard_page(&self, page_id: PageId) {
        let mut state = self.state.lock();
        if let Some(frame_id) = state.page_table.get(&page_id).copied() {
            state.release_frame(page_id, frame_id);
            debug!("Discarded page {}", page_id);
        }
    }

    pub fn is_cached(&self, page_id: PageId) -> bool {
        self.state.lock().page_table.contains_key(&page_id)
    }

    /// Ids of all resident pages, sorted.
    pub fn resident_pages(&self) -> Vec<PageId> {
        let state = self.state.lock();
        let mut ids: Vec<PageId> = state.page_table.keys().copied().collect();
        ids.sort();
        ids
    }

    /// Log, force, then write a dirty page; clean pages are left alone.
    fn write_back(&self, stolen: &mut StolenPages, page: &mut HeapPage) -> StorageResult<()> {
        let Some(dirtier) = page.dirtier() else {
            return Ok(());
        };
        let page_id = page.id();
        let file = self.catalog.get_database_file(page_id.table_id)?;

        self.wal.log_write(
            dirtier,
            page_id,
            page.before_image().to_vec(),
            page.page_data().to_vec(),
        )?;
        self.wal.force()?;
        failpoint::maybe_fail(FLUSH_AFTER_LOG_FORCE)?;
        file.write_page(page)?;

        // A running dirtier still holds its exclusive lock. A dirtier that has
        // committed (with the page write failing) has nothing left to undo.
        if self.lock_manager.holds_lock(dirtier, page_id) {
            stolen
                .entry(dirtier)
                .or_default()
                .entry(page_id)
                .or_insert_with(|| page.before_image().to_vec());
        }
        page.set_before_image();
        page.mark_clean();
        debug!("Flushed page {} dirtied by {}", page_id, dirtier);
        Ok(())
    }

    /// A free frame, evicting a resident page if there is none.
    fn allocate_frame(&self, state: &mut PoolState) -> StorageResult<FrameId> {
        if let Some(frame_id) = state.free_frames.pop() {
            return Ok(frame_id);
        }

        let mut clean = Vec::new();
        let mut dirty = Vec::new();
        for (frame_id, slot) in state.frames.iter().enumerate() {
            if let Some(page) = slot {
                // Only the pool holds it: nobody is using the page.
                if Arc::strong_count(page) == 1 {
                    if page.read().is_dirty() {
                        dirty.push(frame_id);
                    } else {
                        clean.push(frame_id);
                    }
                }
            }
        }

        let victim = match state.replacer.victim(&clean) {
            Some(frame_id) => frame_id,
            None => state
                .replacer
                .victim(&dirty)
                .ok_or(StorageError::BufferPoolFull {
                    capacity: self.capacity,
                })?,
        };

        if let Some(page) = state.frames[victim].clone() {
            let page_id = {
                let mut guard = page.write();
                self.write_back(&mut state.stolen, &mut guard)?;
                guard.id()
            };
            state.release_frame(page_id, victim);
            debug!("Evicted page {} from frame {}", page_id, victim);
        }
        state
            .free_frames
            .pop()
            .ok_or(StorageError::BufferPoolFull {
                capacity: self.capacity,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::{DataType, TupleDesc, Value};
    use crate::concurrency::LockMode;
    use crate::storage::wal::{WalRecordPayload, WAL_FILE_NAME};
    use std::thread;
    use tempfile::{tempdir, TempDir};

    /// Two INT32 columns in 24-byte pages: two tuples per page.
    const PAGE_SIZE: usize = 24;

    const T1: TransactionId = TransactionId(1);
    const T2: TransactionId = TransactionId(2);

    struct Fixture {
        pool: BufferPool,
        table_id: TableId,
        _dir: TempDir,
    }

    fn create_test_buffer_pool(capacity: usize) -> anyhow::Result<Fixture> {
        let dir = tempdir()?;
        let config = StorageConfig::default()
            .with_page_size(PAGE_SIZE)
            .with_pool_capacity(capacity);
        let catalog = Arc::new(Catalog::new(PAGE_SIZE));
        let table_id = catalog.add_table(
            "t",
            &dir.path().join("t.dat"),
            TupleDesc::from_types(&[DataType::Int32, DataType::Int32]),
        )?;
        let wal = Arc::new(WalManager::open(dir.path().join(WAL_FILE_NAME), false)?);
        Ok(Fixture {
            pool: BufferPool::new(&config, catalog, wal),
            table_id,
            _dir: dir,
        })
    }

    fn row(a: i32, b: i32) -> Tuple {
        Tuple::new(vec![Value::Int32(a), Value::Int32(b)])
    }

    impl Fixture {
        fn page(&self, page_no: u32) -> PageId {
            PageId::new(self.table_id, page_no)
        }

        fn allocate_pages(&self, n: u32) -> anyhow::Result<()> {
            let file = self.pool.catalog().get_database_file(self.table_id)?;
            for _ in 0..n {
                file.allocate_page()?;
            }
            Ok(())
        }

        fn disk_page(&self, page_no: u32) -> anyhow::Result<HeapPage> {
            let file = self.pool.catalog().get_database_file(self.table_id)?;
            Ok(file.read_page(self.page(page_no))?)
        }
    }

    #[test]
    fn test_fetch_returns_resident_copy() -> anyhow::Result<()> {
        let fx = create_test_buffer_pool(4)?;
        fx.allocate_pages(1)?;

        let first = fx.pool.fetch(T1, fx.page(0), Permission::ReadOnly)?;
        let second = fx.pool.fetch(T2, fx.page(0), Permission::ReadOnly)?;
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(fx.pool.resident_pages(), vec![fx.page(0)]);
        assert!(fx.pool.holds_lock(T1, fx.page(0)));
        assert!(fx.pool.holds_lock(T2, fx.page(0)));
        Ok(())
    }

    #[test]
    fn test_concurrent_fetch_single_copy() -> anyhow::Result<()> {
        let fx = create_test_buffer_pool(4)?;
        fx.allocate_pages(1)?;
        let page_id = fx.page(0);

        let pages: Vec<PageRef> = thread::scope(|s| {
            let handles: Vec<_> = (1..=8u64)
                .map(|n| {
                    let pool = &fx.pool;
                    s.spawn(move || pool.fetch(TransactionId(n), page_id, Permission::ReadOnly))
                })
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap())
                .collect::<StorageResult<Vec<_>>>()
        })?;

        for page in &pages[1..] {
            assert!(Arc::ptr_eq(&pages[0], page));
        }
        assert_eq!(fx.pool.resident_pages().len(), 1);
        Ok(())
    }

    #[test]
    fn test_insert_marks_page_dirty() -> anyhow::Result<()> {
        let fx = create_test_buffer_pool(4)?;
        let mut tuple = row(1, 2);
        fx.pool.insert_tuple(T1, fx.table_id, &mut tuple)?;

        let rid = tuple.record_id().unwrap();
        assert_eq!(rid.page_id, fx.page(0));
        assert_eq!(rid.slot, 0);
        assert_eq!(
            fx.pool.lock_manager().lock_mode(T1, fx.page(0)),
            Some(LockMode::Exclusive)
        );

        let page = fx.pool.fetch(T1, fx.page(0), Permission::ReadOnly)?;
        assert_eq!(page.read().dirtier(), Some(T1));
        // Nothing reaches disk before commit.
        assert_eq!(fx.disk_page(0)?.num_empty_slots(), 2);
        Ok(())
    }

    #[test]
    fn test_commit_logs_then_writes() -> anyhow::Result<()> {
        let fx = create_test_buffer_pool(4)?;
        fx.pool.insert_tuple(T1, fx.table_id, &mut row(1, 2))?;
        fx.pool.commit(T1)?;

        assert_eq!(fx.disk_page(0)?.num_empty_slots(), 1);
        assert!(fx.pool.lock_manager().held_pages(T1).is_empty());

        let records = fx.pool.wal().read_records()?;
        assert_eq!(records.len(), 2);
        assert!(matches!(records[0].payload, WalRecordPayload::Update { .. }));
        assert_eq!(records[1].payload, WalRecordPayload::Commit);

        let page = fx.pool.fetch(T2, fx.page(0), Permission::ReadOnly)?;
        let page = page.read();
        assert!(!page.is_dirty());
        assert_eq!(page.before_image(), page.page_data());
        Ok(())
    }

    #[test]
    fn test_abort_restores_cached_page() -> anyhow::Result<()> {
        let fx = create_test_buffer_pool(4)?;
        fx.pool.insert_tuple(T1, fx.table_id, &mut row(1, 1))?;
        fx.pool.commit(T1)?;

        let original = fx
            .pool
            .fetch(T2, fx.page(0), Permission::ReadOnly)?
            .read()
            .page_data()
            .to_vec();
        let mut tuple = row(2, 2);
        fx.pool.insert_tuple(T2, fx.table_id, &mut tuple)?;
        fx.pool.abort(T2)?;

        let page = fx.pool.fetch(TransactionId(3), fx.page(0), Permission::ReadOnly)?;
        assert_eq!(page.read().page_data(), &original[..]);
        assert!(!page.read().is_dirty());
        assert!(!fx.pool.holds_lock(T2, fx.page(0)));
        Ok(())
    }

    #[test]
    fn test_eviction_prefers_clean_pages() -> anyhow::Result<()> {
        let fx = create_test_buffer_pool(2)?;
        fx.allocate_pages(3)?;

        fx.pool.insert_tuple(T1, fx.table_id, &mut row(1, 1))?;
        drop(fx.pool.fetch(T1, fx.page(1), Permission::ReadOnly)?);

        drop(fx.pool.fetch(T1, fx.page(2), Permission::ReadOnly)?);
        assert!(fx.pool.is_cached(fx.page(0)));
        assert!(!fx.pool.is_cached(fx.page(1)));
        // The dirty page stayed, unwritten.
        assert_eq!(fx.disk_page(0)?.num_empty_slots(), 2);
        Ok(())
    }

    #[test]
    fn test_eviction_flushes_dirty_page() -> anyhow::Result<()> {
        let fx = create_test_buffer_pool(1)?;
        fx.allocate_pages(2)?;

        fx.pool.insert_tuple(T1, fx.table_id, &mut row(7, 7))?;
        drop(fx.pool.fetch(T1, fx.page(1), Permission::ReadOnly)?);

        assert!(!fx.pool.is_cached(fx.page(0)));
        let on_disk = fx.disk_page(0)?;
        assert_eq!(on_disk.tuples()?[0].values(), row(7, 7).values());

        let records = fx.pool.wal().read_records()?;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].page_id(), Some(fx.page(0)));
        Ok(())
    }

    #[test]
    fn test_abort_after_steal() -> anyhow::Result<()> {
        let fx = create_test_buffer_pool(1)?;
        fx.allocate_pages(2)?;

        fx.pool.insert_tuple(T1, fx.table_id, &mut row(7, 7))?;
        // Evicts page 0 and writes T1's insert to disk.
        drop(fx.pool.fetch(T1, fx.page(1), Permission::ReadOnly)?);
        assert_eq!(fx.disk_page(0)?.num_empty_slots(), 1);

        fx.pool.abort(T1)?;
        assert_eq!(fx.disk_page(0)?.num_empty_slots(), 2);

        let records = fx.pool.wal().read_records()?;
        assert!(records
            .iter()
            .any(|r| matches!(r.payload, WalRecordPayload::Compensation { .. })));
        assert_eq!(
            records.last().map(|r| r.payload.clone()),
            Some(WalRecordPayload::Abort)
        );
        Ok(())
    }

    #[test]
    fn test_flush_pages_writes_only_that_transaction() -> anyhow::Result<()> {
        let fx = create_test_buffer_pool(4)?;
        fx.allocate_pages(2)?;

        fx.pool.insert_tuple(T1, fx.table_id, &mut row(1, 1))?;
        let other = fx.pool.fetch(T2, fx.page(1), Permission::ReadWrite)?;
        other.write().insert_tuple(&mut row(2, 2))?;
        fx.pool.mark_dirtied(T2, vec![other])?;

        fx.pool.flush_pages(T1)?;
        assert_eq!(fx.disk_page(0)?.num_empty_slots(), 1);
        assert_eq!(fx.disk_page(1)?.num_empty_slots(), 2);
        assert!(fx.pool.state.lock().stolen[&T1].contains_key(&fx.page(0)));
        assert!(!fx.pool.state.lock().stolen.contains_key(&T2));

        let page = fx.pool.fetch(T1, fx.page(0), Permission::ReadOnly)?;
        assert!(!page.read().is_dirty());
        drop(page);

        // The written page is still undoable.
        fx.pool.abort(T1)?;
        assert_eq!(fx.disk_page(0)?.num_empty_slots(), 2);
        fx.pool.commit(T2)?;
        assert_eq!(fx.disk_page(1)?.num_empty_slots(), 1);
        Ok(())
    }

    #[test]
    fn test_failed_commit_write_is_not_stolen() -> anyhow::Result<()> {
        let fx = create_test_buffer_pool(1)?;
        fx.allocate_pages(2)?;
        fx.pool.insert_tuple(T1, fx.table_id, &mut row(8, 8))?;

        failpoint::enable(COMMIT_AFTER_LOG_FORCE);
        let result = fx.pool.commit(T1);
        failpoint::clear();
        assert!(result.is_err());
        assert!(fx.pool.lock_manager().held_pages(T1).is_empty());

        // Evicting the unwritten committed page writes it without
        // remembering an undo image for the finished transaction.
        drop(fx.pool.fetch(T2, fx.page(1), Permission::ReadOnly)?);
        assert!(!fx.pool.is_cached(fx.page(0)));
        assert_eq!(fx.disk_page(0)?.num_empty_slots(), 1);
        assert!(fx.pool.state.lock().stolen.is_empty());
        Ok(())
    }

    #[test]
    fn test_release_lock_lets_writer_in() -> anyhow::Result<()> {
        let fx = create_test_buffer_pool(4)?;
        fx.allocate_pages(1)?;

        drop(fx.pool.fetch(T1, fx.page(0), Permission::ReadOnly)?);
        fx.pool.release_lock(T1, fx.page(0));
        assert!(!fx.pool.holds_lock(T1, fx.page(0)));

        drop(fx.pool.fetch(T2, fx.page(0), Permission::ReadWrite)?);
        assert_eq!(
            fx.pool.lock_manager().lock_mode(T2, fx.page(0)),
            Some(LockMode::Exclusive)
        );
        Ok(())
    }

    #[test]
    fn test_pool_full_when_all_pinned() -> anyhow::Result<()> {
        let fx = create_test_buffer_pool(1)?;
        fx.allocate_pages(2)?;

        let _pinned = fx.pool.fetch(T1, fx.page(0), Permission::ReadOnly)?;
        let result = fx.pool.fetch(T1, fx.page(1), Permission::ReadOnly);
        assert!(matches!(
            result,
            Err(StorageError::BufferPoolFull { capacity: 1 })
        ));
        assert!(fx.pool.is_cached(fx.page(0)));
        Ok(())
    }

    #[test]
    fn test_zero_capacity() -> anyhow::Result<()> {
        let fx = create_test_buffer_pool(0)?;
        fx.allocate_pages(1)?;
        let result = fx.pool.fetch(T1, fx.page(0), Permission::ReadOnly);
        assert!(matches!(
            result,
            Err(StorageError::BufferPoolFull { capacity: 0 })
        ));
        Ok(())
    }

    #[test]
    fn test_flush_page_and_discard() -> anyhow::Result<()> {
        let fx = create_test_buffer_pool(4)?;
        fx.pool.insert_tuple(T1, fx.table_id, &mut row(3, 4))?;

        fx.pool.flush_page(fx.page(0))?;
        assert_eq!(fx.disk_page(0)?.num_empty_slots(), 1);
        // Flushing a clean or absent page is a no-op.
        fx.pool.flush_page(fx.page(0))?;
        fx.pool.flush_page(fx.page(9))?;
        assert_eq!(fx.pool.wal().read_records()?.len(), 1);

        fx.pool.discard_page(fx.page(0));
        assert!(!fx.pool.is_cached(fx.page(0)));
        assert!(fx.pool.resident_pages().is_empty());
        Ok(())
    }

    #[test]
    fn test_flush_all_pages() -> anyhow::Result<()> {
        let fx = create_test_buffer_pool(4)?;
        for i in 0..3 {
            fx.pool.insert_tuple(T1, fx.table_id, &mut row(i, i))?;
        }
        fx.pool.flush_all_pages()?;

        assert_eq!(fx.disk_page(0)?.num_empty_slots(), 0);
        assert_eq!(fx.disk_page(1)?.num_empty_slots(), 1);
        for page_id in fx.pool.resident_pages() {
            let page = fx.pool.fetch(T1, page_id, Permission::ReadOnly)?;
            assert!(!page.read().is_dirty());
        }
        Ok(())
    }

    #[test]
    fn test_delete_tuple() -> anyhow::Result<()> {
        let fx = create_test_buffer_pool(4)?;
        let mut tuple = row(5, 6);
        fx.pool.insert_tuple(T1, fx.table_id, &mut tuple)?;
        fx.pool.commit(T1)?;

        fx.pool.delete_tuple(T2, &tuple)?;
        assert!(matches!(
            fx.pool.delete_tuple(T2, &tuple),
            Err(StorageError::SlotEmpty { .. })
        ));
        fx.pool.commit(T2)?;
        assert_eq!(fx.disk_page(0)?.num_empty_slots(), 2);

        assert!(matches!(
            fx.pool.delete_tuple(T2, &row(0, 0)),
            Err(StorageError::MissingRecordId)
        ));
        Ok(())
    }
}
