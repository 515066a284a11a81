//! Write-ahead logging.
//!
//! Every page image that reaches a heap file is preceded by a forced log
//! record describing it, so that after a crash committed work can be redone
//! and uncommitted work undone.

pub mod manager;
pub mod record;

pub use manager::{WalManager, WAL_FILE_NAME};
pub use record::{Lsn, WalRecord, WalRecordPayload};
