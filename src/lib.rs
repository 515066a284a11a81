pub mod access;
pub mod catalog;
pub mod concurrency;
pub mod config;
pub mod database;
pub mod failpoint;
pub mod recovery;
pub mod storage;
pub mod transaction;
