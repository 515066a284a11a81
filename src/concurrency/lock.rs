//! Page-level two-phase locking.
//!
//! Every page has at most one exclusive holder or any number of shared
//! holders, never both. A reverse index from transaction to held pages is
//! kept in the same critical section so that commit and abort can release a
//! transaction's locks in one pass.
//!
//! Blocked requests sleep on a per-page condition variable that is notified
//! on release. Waiters also wake every `poll_interval` to re-run deadlock
//! detection, because the set of holders they wait for may have changed
//! without a release on their own page.

use crate::storage::error::{AbortReason, StorageError, StorageResult};
use crate::storage::page::PageId;
use crate::transaction::TransactionId;
use log::{debug, warn};
use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Lock modes supported by the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockMode {
    /// Shared lock for read operations.
    Shared,
    /// Exclusive lock for write operations.
    Exclusive,
}

impl LockMode {
    /// Checks if this lock mode is compatible with another.
    pub fn is_compatible_with(&self, other: &LockMode) -> bool {
        matches!((self, other), (LockMode::Shared, LockMode::Shared))
    }
}

/// Lock state of a single page.
#[derive(Debug)]
struct PageLock {
    shared: HashSet<TransactionId>,
    exclusive: Option<TransactionId>,
    /// Threads currently blocked on this page.
    waiters: usize,
    cv: Arc<Condvar>,
}

impl PageLock {
    fn new() -> Self {
        Self {
            shared: HashSet::new(),
            exclusive: None,
            waiters: 0,
            cv: Arc::new(Condvar::new()),
        }
    }

    fn is_unused(&self) -> bool {
        self.shared.is_empty() && self.exclusive.is_none() && self.waiters == 0
    }

    fn mode_of(&self, txn: TransactionId) -> Option<LockMode> {
        if self.exclusive == Some(txn) {
            Some(LockMode::Exclusive)
        } else if self.shared.contains(&txn) {
            Some(LockMode::Shared)
        } else {
            None
        }
    }

    /// Grantable when every other holder's mode is compatible with `mode`.
    /// The requester's own lock never conflicts, which covers upgrades by
    /// the sole shared holder.
    fn can_grant(&self, txn: TransactionId, mode: LockMode) -> bool {
        let others_exclusive = self
            .exclusive
            .filter(|&holder| holder != txn)
            .map(|_| LockMode::Exclusive);
        let others_shared = self
            .shared
            .iter()
            .filter(|&&holder| holder != txn)
            .map(|_| LockMode::Shared);
        others_exclusive
            .into_iter()
            .chain(others_shared)
            .all(|held| mode.is_compatible_with(&held))
    }

    fn grant(&mut self, txn: TransactionId, mode: LockMode) {
        match mode {
            LockMode::Shared => {
                // An exclusive holder already covers reads.
                if self.exclusive != Some(txn) {
                    self.shared.insert(txn);
                }
            }
            LockMode::Exclusive => {
                self.shared.remove(&txn);
                self.exclusive = Some(txn);
            }
        }
    }

    /// Holders whose locks stop `txn` from getting `mode`.
    fn conflicting_holders(&self, txn: TransactionId, mode: LockMode) -> HashSet<TransactionId> {
        let mut holders = HashSet::new();
        if let Some(holder) = self.exclusive {
            if holder != txn {
                holders.insert(holder);
            }
        }
        if mode == LockMode::Exclusive {
            holders.extend(self.shared.iter().copied().filter(|&t| t != txn));
        }
        holders
    }

    fn remove(&mut self, txn: TransactionId) -> bool {
        let was_shared = self.shared.remove(&txn);
        let was_exclusive = if self.exclusive == Some(txn) {
            self.exclusive = None;
            true
        } else {
            false
        };
        was_shared || was_exclusive
    }
}

/// Waits-for graph among blocked transactions.
#[derive(Debug, Default)]
struct DeadlockDetector {
    /// Wait-for graph: txn -> set of txns it's waiting for.
    wait_for: HashMap<TransactionId, HashSet<TransactionId>>,
}

impl DeadlockDetector {
    /// Replaces the outgoing edges of `waiter`.
    fn set_edges(&mut self, waiter: TransactionId, holders: HashSet<TransactionId>) {
        if holders.is_empty() {
            self.wait_for.remove(&waiter);
        } else {
            self.wait_for.insert(waiter, holders);
        }
    }

    fn remove_transaction(&mut self, txn: TransactionId) {
        self.wait_for.remove(&txn);
    }

    /// True if `txn` can reach itself through the graph.
    fn is_in_cycle(&self, txn: TransactionId) -> bool {
        let mut visited = HashSet::new();
        let mut queue: VecDeque<TransactionId> = self
            .wait_for
            .get(&txn)
            .map(|holders| holders.iter().copied().collect())
            .unwrap_or_default();

        while let Some(current) = queue.pop_front() {
            if current == txn {
                return true;
            }
            if visited.insert(current) {
                if let Some(waiting_for) = self.wait_for.get(&current) {
                    queue.extend(waiting_for.iter().copied());
                }
            }
        }

        false
    }
}

/// Everything guarded by the lock manager's single mutex.
#[derive(Debug, Default)]
struct LockTable {
    pages: HashMap<PageId, PageLock>,
    /// Reverse index: txn -> pages it holds in any mode.
    held: HashMap<TransactionId, HashSet<PageId>>,
    detector: DeadlockDetector,
    /// Page each blocked transaction is waiting on.
    waiting: HashMap<TransactionId, PageId>,
    /// Blocked transactions whose wait was cancelled by an abort.
    cancelled: HashSet<TransactionId>,
}

impl LockTable {
    fn try_grant(&mut self, txn: TransactionId, page_id: PageId, mode: LockMode) -> bool {
        let entry = self.pages.entry(page_id).or_insert_with(PageLock::new);
        if !entry.can_grant(txn, mode) {
            return false;
        }
        entry.grant(txn, mode);
        self.held.entry(txn).or_default().insert(page_id);
        true
    }

    /// Drops `txn` from the page's holders and wakes waiters on that page.
    fn release_page(&mut self, txn: TransactionId, page_id: PageId) {
        let unused = match self.pages.get_mut(&page_id) {
            Some(entry) => {
                if entry.remove(txn) {
                    entry.cv.notify_all();
                }
                entry.is_unused()
            }
            None => false,
        };
        if unused {
            self.pages.remove(&page_id);
        }
    }

    fn finish_wait(&mut self, txn: TransactionId, page_id: PageId) {
        self.detector.remove_transaction(txn);
        self.waiting.remove(&txn);
        self.cancelled.remove(&txn);
        let unused = match self.pages.get_mut(&page_id) {
            Some(entry) => {
                entry.waiters -= 1;
                entry.is_unused()
            }
            None => false,
        };
        if unused {
            self.pages.remove(&page_id);
        }
    }
}

/// Grants and releases page locks on behalf of transactions.
pub struct LockManager {
    table: Mutex<LockTable>,
    poll_interval: Duration,
    timeout: Option<Duration>,
}

impl LockManager {
    /// Creates a lock manager that re-checks for deadlock every
    /// `poll_interval` and optionally gives up after `timeout`.
    pub fn new(poll_interval: Duration, timeout: Option<Duration>) -> Self {
        Self {
            table: Mutex::new(LockTable::default()),
            poll_interval,
            timeout,
        }
    }

    /// Blocks until `txn` holds `page_id` in `mode`.
    ///
    /// Fails with [`StorageError::TransactionAborted`] if `txn` is chosen as
    /// a deadlock victim, the wait times out, or the transaction is aborted
    /// while waiting.
    pub fn acquire(&self, txn: TransactionId, page_id: PageId, mode: LockMode) -> StorageResult<()> {
        let mut table = self.table.lock();
        if table.try_grant(txn, page_id, mode) {
            return Ok(());
        }

        let start = Instant::now();
        let cv = {
            let entry = table.pages.entry(page_id).or_insert_with(PageLock::new);
            entry.waiters += 1;
            Arc::clone(&entry.cv)
        };
        table.waiting.insert(txn, page_id);
        debug!("{} waiting for {:?} lock on page {}", txn, mode, page_id);

        let outcome = loop {
            if table.cancelled.contains(&txn) {
                break Err(AbortReason::Cancelled);
            }
            if table.try_grant(txn, page_id, mode) {
                break Ok(());
            }

            let holders = table
                .pages
                .get(&page_id)
                .map(|entry| entry.conflicting_holders(txn, mode))
                .unwrap_or_default();
            table.detector.set_edges(txn, holders);
            if table.detector.is_in_cycle(txn) {
                break Err(AbortReason::Deadlock);
            }

            let slice = match self.timeout {
                Some(timeout) => {
                    let elapsed = start.elapsed();
                    if elapsed >= timeout {
                        break Err(AbortReason::LockTimeout);
                    }
                    self.poll_interval.min(timeout - elapsed)
                }
                None => self.poll_interval,
            };
            cv.wait_for(&mut table, slice);
        };

        table.finish_wait(txn, page_id);
        match outcome {
            Ok(()) => {
                debug!(
                    "{} granted {:?} lock on page {} after {:?}",
                    txn,
                    mode,
                    page_id,
                    start.elapsed()
                );
                Ok(())
            }
            Err(reason) => {
                warn!("{} gave up waiting for page {}: {}", txn, page_id, reason);
                Err(StorageError::TransactionAborted { txn, reason })
            }
        }
    }

    /// Releases whatever lock `txn` holds on `page_id`.
    pub fn release(&self, txn: TransactionId, page_id: PageId) {
        let mut table = self.table.lock();
        let now_empty = match table.held.get_mut(&txn) {
            Some(pages) => {
                pages.remove(&page_id);
                pages.is_empty()
            }
            None => false,
        };
        if now_empty {
            table.held.remove(&txn);
        }
        table.release_page(txn, page_id);
    }

    /// Releases every lock held by `txn`. If `txn` is blocked in
    /// [`acquire`](Self::acquire), that wait is cancelled.
    pub fn release_all(&self, txn: TransactionId) {
        let mut table = self.table.lock();
        if let Some(pages) = table.held.remove(&txn) {
            for page_id in pages {
                table.release_page(txn, page_id);
            }
        }

        if let Some(page_id) = table.waiting.get(&txn).copied() {
            table.cancelled.insert(txn);
            if let Some(entry) = table.pages.get(&page_id) {
                entry.cv.notify_all();
            }
        }
    }

    /// Return true if `txn` holds a lock of any mode on `page_id`.
    pub fn holds_lock(&self, txn: TransactionId, page_id: PageId) -> bool {
        let table = self.table.lock();
        table
            .held
            .get(&txn)
            .map(|pages| pages.contains(&page_id))
            .unwrap_or(false)
    }

    /// The mode in which `txn` holds `page_id`, if any.
    pub fn lock_mode(&self, txn: TransactionId, page_id: PageId) -> Option<LockMode> {
        let table = self.table.lock();
        table.pages.get(&page_id).and_then(|entry| entry.mode_of(txn))
    }

    /// Pages currently locked by `txn`.
    pub fn held_pages(&self, txn: TransactionId) -> Vec<PageId> {
        let table = self.table.lock();
        table
            .held
            .get(&txn)
            .map(|pages| pages.iter().copied().collect())
            .unwrap_or_default()
    }

    /// The page `txn` is blocked on, if it is waiting.
    pub fn waiting_on(&self, txn: TransactionId) -> Option<PageId> {
        self.table.lock().waiting.get(&txn).copied()
    }
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_LOCK_POLL_INTERVAL, None)
    }
}
