//! Storage layer for heapdb.
//!
//! - **HeapPage**: fixed-size page holding a slot bitmap and fixed-width tuples
//! - **HeapFile**: one table stored as a sequence of pages on disk
//! - **BufferPool**: bounded page cache that takes page locks on behalf of
//!   transactions and enforces the write-ahead rule on every page write
//! - **WalManager**: append-only log of page images and transaction outcomes

pub mod buffer;
pub mod disk;
pub mod error;
pub mod page;
pub mod wal;

pub use buffer::{BufferPool, PageRef};
pub use disk::HeapFile;
pub use error::{StorageError, StorageResult};
pub use page::{HeapPage, PageId, Permission, TableId};
pub use wal::{Lsn, WalManager, WalRecord, WalRecordPayload};
