//! Concurrency control.
//!
//! Transactions are isolated by strict two-phase locking at page
//! granularity: locks are taken as pages are fetched and held until the
//! transaction commits or aborts. Deadlocks are detected on a waits-for
//! graph and resolved by aborting the requester that closes the cycle.

pub mod lock;

pub use lock::{LockManager, LockMode};
