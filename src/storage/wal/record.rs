//! WAL record types.
//!
//! Records carry whole-page images: an update logs the page as it was when
//! the transaction first touched it and as it is now. Physical images make
//! redo and undo idempotent, so recovery may replay them any number of times.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::storage::error::StorageResult;
use crate::storage::page::PageId;
use crate::transaction::TransactionId;

/// Log Sequence Number - a unique identifier for WAL records.
/// LSNs are monotonically increasing and used to order log records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Lsn(pub u64);

impl Lsn {
    /// The LSN before any record has been written.
    pub const ZERO: Lsn = Lsn(0);

    pub fn next(&self) -> Self {
        Lsn(self.0 + 1)
    }
}

impl fmt::Display for Lsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LSN({})", self.0)
    }
}

/// What a record describes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WalRecordPayload {
    /// A transaction changed a page.
    Update {
        page_id: PageId,
        before: Vec<u8>,
        after: Vec<u8>,
    },
    /// An abort wrote a page back to its pre-transaction contents.
    /// Redo reapplies `after`; it is never undone.
    Compensation {
        page_id: PageId,
        before: Vec<u8>,
        after: Vec<u8>,
    },
    Commit,
    Abort,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalRecord {
    pub lsn: Lsn,
    pub txn: TransactionId,
    pub payload: WalRecordPayload,
}

impl WalRecord {
    pub fn new(lsn: Lsn, txn: TransactionId, payload: WalRecordPayload) -> Self {
        Self { lsn, txn, payload }
    }

    /// Page touched by this record, if any.
    pub fn page_id(&self) -> Option<PageId> {
        match &self.payload {
            WalRecordPayload::Update { page_id, .. }
            | WalRecordPayload::Compensation { page_id, .. } => Some(*page_id),
            WalRecordPayload::Commit | WalRecordPayload::Abort => None,
        }
    }

    /// True for records that end a transaction.
    pub fn is_outcome(&self) -> bool {
        matches!(
            self.payload,
            WalRecordPayload::Commit | WalRecordPayload::Abort
        )
    }

    pub fn serialize(&self) -> StorageResult<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn deserialize(data: &[u8]) -> StorageResult<Self> {
        Ok(bincode::deserialize(data)?)
    }
}
