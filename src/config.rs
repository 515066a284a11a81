//! Process-wide storage settings, fixed when a [`Database`](crate::database::Database)
//! is opened.

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::page::HeapPage;
use std::time::Duration;

/// Default bytes per page, including the slot bitmap.
pub const DEFAULT_PAGE_SIZE: usize = 4096;

/// Default number of pages the buffer pool caches.
pub const DEFAULT_POOL_PAGES: usize = 50;

/// Default slice a lock waiter sleeps before re-checking the waits-for graph.
pub const DEFAULT_LOCK_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// How the buffer pool picks a victim among equally eligible pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EvictionPolicy {
    /// Uniformly random choice.
    #[default]
    Random,
    /// Least recently fetched first.
    Lru,
}

/// Storage engine configuration.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Size of every page on disk and in memory.
    pub page_size: usize,
    /// Maximum number of resident pages.
    pub pool_capacity: usize,
    /// Wait slice between deadlock checks while blocked on a lock.
    pub lock_poll_interval: Duration,
    /// Upper bound on a single lock wait; `None` relies on cycle detection alone.
    pub lock_timeout: Option<Duration>,
    /// Victim selection among evictable pages.
    pub eviction: EvictionPolicy,
    /// Whether forcing the log also syncs it to stable storage.
    pub wal_sync: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            page_size: DEFAULT_PAGE_SIZE,
            pool_capacity: DEFAULT_POOL_PAGES,
            lock_poll_interval: DEFAULT_LOCK_POLL_INTERVAL,
            lock_timeout: None,
            eviction: EvictionPolicy::default(),
            wal_sync: true,
        }
    }
}

impl StorageConfig {
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_pool_capacity(mut self, pool_capacity: usize) -> Self {
        self.pool_capacity = pool_capacity;
        self
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = Some(timeout);
        self
    }

    pub fn with_eviction(mut self, eviction: EvictionPolicy) -> Self {
        self.eviction = eviction;
        self
    }

    pub fn with_wal_sync(mut self, wal_sync: bool) -> Self {
        self.wal_sync = wal_sync;
        self
    }

    /// Check that a page can hold at least one tuple of `tuple_size` bytes.
    pub fn validate_for(&self, tuple_size: usize) -> StorageResult<()> {
        if HeapPage::slots_per_page(self.page_size, tuple_size) == 0 {
            return Err(StorageError::InvalidPageSize {
                page_size: self.page_size,
                tuple_size,
            });
        }
        Ok(())
    }
}
