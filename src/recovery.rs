//! Crash recovery from the write-ahead log.
//!
//! Recovery repeats history and then rolls back losers:
//!
//! 1. **Analysis**: every transaction with a commit or abort record is
//!    complete; the rest were in flight at the crash (losers).
//! 2. **Redo**: the after-image of every update and compensation record is
//!    written, in log order.
//! 3. **Undo**: the before-images of the losers' updates are written, in
//!    reverse log order.
//!
//! Images are whole pages, so every step is idempotent and a crash during
//! recovery is handled by simply running it again. Once the heap files are
//! synced the log is truncated. A log naming a table that is not registered
//! is left untouched and recovery fails.

use crate::catalog::Catalog;
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::page::PageId;
use crate::storage::wal::{Lsn, WalManager, WalRecord, WalRecordPayload};
use crate::transaction::TransactionId;
use log::{debug, info};
use std::collections::{BTreeSet, HashSet};

/// Recovery statistics.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RecoveryStats {
    /// Number of records analyzed.
    pub records_analyzed: usize,
    /// Number of page images redone.
    pub records_redone: usize,
    /// Number of page images undone.
    pub records_undone: usize,
    /// Transactions that committed.
    pub committed: usize,
    /// Transactions without an outcome record, in id order.
    pub losers: Vec<TransactionId>,
    /// LSN of the last record replayed.
    pub end_lsn: Lsn,
}

pub struct RecoveryManager<'a> {
    wal: &'a WalManager,
    catalog: &'a Catalog,
}

impl<'a> RecoveryManager<'a> {
    pub fn new(wal: &'a WalManager, catalog: &'a Catalog) -> Self {
        Self { wal, catalog }
    }

    /// Bring every registered table to the state the log describes.
    ///
    /// Tables must be registered before this runs. If any record names an
    /// unregistered table, fails with [`StorageError::UnknownTable`] before
    /// touching a file, and the log is kept for a later attempt.
    pub fn recover(&self) -> StorageResult<RecoveryStats> {
        let records = self.wal.read_records()?;
        let mut stats = RecoveryStats {
            records_analyzed: records.len(),
            end_lsn: records.last().map(|r| r.lsn).unwrap_or_default(),
            ..Default::default()
        };
        if records.is_empty() {
            return Ok(stats);
        }

        self.check_tables(&records)?;
        let losers = self.analysis_phase(&records, &mut stats);
        self.redo_phase(&records, &mut stats)?;
        self.undo_phase(&records, &losers, &mut stats)?;

        for file in self.catalog.files() {
            file.sync()?;
        }
        self.wal.truncate()?;

        info!(
            "Recovery replayed {} records: {} redone, {} undone, {} committed, {} losers",
            stats.records_analyzed,
            stats.records_redone,
            stats.records_undone,
            stats.committed,
            stats.losers.len()
        );
        Ok(stats)
    }

    fn check_tables(&self, records: &[WalRecord]) -> StorageResult<()> {
        let unknown = records
            .iter()
            .filter_map(|record| record.page_id())
            .find(|page_id| self.catalog.get_database_file(page_id.table_id).is_err());
        match unknown {
            Some(page_id) => Err(StorageError::UnknownTable(format!(
                "id {} (named in the log; register it before recovery)",
                page_id.table_id
            ))),
            None => Ok(()),
        }
    }

    fn analysis_phase(&self, records: &[WalRecord], stats: &mut RecoveryStats) -> HashSet<TransactionId> {
        let mut seen = BTreeSet::new();
        let mut complete = HashSet::new();
        for record in records {
            seen.insert(record.txn);
            match record.payload {
                WalRecordPayload::Commit => {
                    stats.committed += 1;
                    complete.insert(record.txn);
                }
                WalRecordPayload::Abort => {
                    complete.insert(record.txn);
                }
                _ => {}
            }
        }

        stats.losers = seen
            .into_iter()
            .filter(|txn| !complete.contains(txn))
            .collect();
        stats.losers.iter().copied().collect()
    }

    fn redo_phase(&self, records: &[WalRecord], stats: &mut RecoveryStats) -> StorageResult<()> {
        for record in records {
            match &record.payload {
                WalRecordPayload::Update { page_id, after, .. }
                | WalRecordPayload::Compensation { page_id, after, .. } => {
                    self.apply(*page_id, after)?;
                    stats.records_redone += 1;
                }
                WalRecordPayload::Commit | WalRecordPayload::Abort => {}
            }
        }
        Ok(())
    }

    fn undo_phase(
        &self,
        records: &[WalRecord],
        losers: &HashSet<TransactionId>,
        stats: &mut RecoveryStats,
    ) -> StorageResult<()> {
        for record in records.iter().rev() {
            if !losers.contains(&record.txn) {
                continue;
            }
            if let WalRecordPayload::Update {
                page_id, before, ..
            } = &record.payload
            {
                debug!("Undoing {} of {} on page {}", record.lsn, record.txn, page_id);
                self.apply(*page_id, before)?;
                stats.records_undone += 1;
            }
        }
        Ok(())
    }

    /// Write `image` as the contents of `page_id`.
    fn apply(&self, page_id: PageId, image: &[u8]) -> StorageResult<()> {
        let file = self.catalog.get_database_file(page_id.table_id)?;
        file.write_page_data(page_id, image)
    }
}
