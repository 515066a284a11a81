//! Storage layer error types.

use crate::access::DataType;
use crate::storage::page::{PageId, TableId};
use crate::transaction::TransactionId;
use thiserror::Error;

/// Why a transaction was told to unwind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    /// The transaction closed a cycle in the waits-for graph.
    Deadlock,
    /// A lock wait exceeded the configured timeout.
    LockTimeout,
    /// The transaction was aborted while it was waiting for a lock.
    Cancelled,
}

impl std::fmt::Display for AbortReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AbortReason::Deadlock => write!(f, "deadlock"),
            AbortReason::LockTimeout => write!(f, "lock wait timed out"),
            AbortReason::Cancelled => write!(f, "cancelled while waiting"),
        }
    }
}

/// Errors that can occur in the storage layer.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Transaction {txn} aborted: {reason}")]
    TransactionAborted {
        txn: TransactionId,
        reason: AbortReason,
    },

    #[error("Page {page_id} is out of range (file has {num_pages} pages)")]
    PageOutOfRange { page_id: PageId, num_pages: u32 },

    #[error("Page {page_id} does not belong to table {table_id}")]
    TableMismatch { page_id: PageId, table_id: TableId },

    #[error("Unknown table: {0}")]
    UnknownTable(String),

    #[error("Table '{name}' hashes to id {table_id}, already used by '{existing}'")]
    TableIdCollision {
        name: String,
        existing: String,
        table_id: TableId,
    },

    #[error("Slot {slot} on page {page_id} is already empty")]
    SlotEmpty { page_id: PageId, slot: usize },

    #[error("Invalid slot {slot} on page {page_id} (max: {max_slot})")]
    SlotOutOfRange {
        page_id: PageId,
        slot: usize,
        max_slot: usize,
    },

    #[error("Tuple belongs to page {actual}, not page {expected}")]
    WrongPage { expected: PageId, actual: PageId },

    #[error("Page {0} has no free slot")]
    PageFull(PageId),

    #[error("Tuple does not match table schema: {0}")]
    SchemaMismatch(String),

    #[error("Value of type {actual} cannot be stored as {expected:?}")]
    TypeMismatch {
        expected: DataType,
        actual: &'static str,
    },

    #[error("Tuple has no record id")]
    MissingRecordId,

    #[error("Page size {page_size} cannot hold a single tuple of {tuple_size} bytes")]
    InvalidPageSize { page_size: usize, tuple_size: usize },

    #[error("Buffer pool is full: no evictable page among {capacity} frames")]
    BufferPoolFull { capacity: usize },

    #[error("Short read of page {page_id}: got {read} of {expected} bytes")]
    ShortRead {
        page_id: PageId,
        read: usize,
        expected: usize,
    },

    #[error("Page {page_id} has {len} bytes, expected {expected}")]
    ShortWrite {
        page_id: PageId,
        len: usize,
        expected: usize,
    },

    #[error("Iterator has not been opened")]
    IteratorNotOpen,

    #[error("No more tuples")]
    NoSuchElement,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl StorageError {
    /// True for the transaction-abort signal, which callers answer by
    /// aborting the transaction rather than failing the process.
    pub fn is_abort(&self) -> bool {
        matches!(self, StorageError::TransactionAborted { .. })
    }
}

impl From<bincode::Error> for StorageError {
    fn from(err: bincode::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;
