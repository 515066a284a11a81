//! Transaction identity.
//!
//! The storage layer treats a transaction as an opaque token: it only needs
//! equality and hashing to key lock tables and dirty-page ownership.

pub mod id;

pub use id::{TransactionId, TransactionIdGenerator};
