//! WAL manager implementation.
//!
//! The log is a single append-only file of length-prefixed bincode records.
//! Appends go through a buffered writer; nothing is durable until
//! [`WalManager::force`] returns.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use log::{debug, warn};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use super::record::{Lsn, WalRecord, WalRecordPayload};
use crate::storage::error::StorageResult;
use crate::storage::page::PageId;
use crate::transaction::TransactionId;

/// File name of the log inside a data directory.
pub const WAL_FILE_NAME: &str = "heapdb.wal";

/// Size of the length prefix in front of every record.
const RECORD_HEADER_SIZE: u64 = 4;

struct WalState {
    writer: BufWriter<File>,
    /// LSN of the last appended record.
    last_lsn: Lsn,
    /// All records up to this LSN are on stable storage.
    flushed_lsn: Lsn,
}

/// Appends, forces and replays log records.
pub struct WalManager {
    path: PathBuf,
    sync: bool,
    state: Mutex<WalState>,
}

impl WalManager {
    /// Opens the log at `path`, creating it if missing. LSNs continue from
    /// the last complete record. A torn record at the tail, left by a crash
    /// in the middle of an append, is cut off.
    ///
    /// With `sync` set, [`force`](Self::force) also syncs file data to disk.
    pub fn open(path: impl AsRef<Path>, sync: bool) -> StorageResult<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        let file_len = file.metadata()?.len();
        let (records, valid_len) = read_log(BufReader::new(&file), file_len)?;
        if valid_len < file_len {
            warn!(
                "Discarding {} bytes of torn log tail in {}",
                file_len - valid_len,
                path.display()
            );
            file.set_len(valid_len)?;
        }
        file.seek(SeekFrom::Start(valid_len))?;

        let last_lsn = records.last().map(|r| r.lsn).unwrap_or(Lsn::ZERO);
        debug!(
            "Opened log {} with {} records, last {}",
            path.display(),
            records.len(),
            last_lsn
        );

        Ok(WalManager {
            path,
            sync,
            state: Mutex::new(WalState {
                writer: BufWriter::new(file),
                last_lsn,
                flushed_lsn: last_lsn,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&self, txn: TransactionId, payload: WalRecordPayload) -> StorageResult<Lsn> {
        let mut state = self.state.lock();
        let lsn = state.last_lsn.next();
        let record = WalRecord::new(lsn, txn, payload);
        let bytes = record.serialize()?;

        state.writer.write_u32::<LittleEndian>(bytes.len() as u32)?;
        state.writer.write_all(&bytes)?;
        state.last_lsn = lsn;
        Ok(lsn)
    }

    /// Logs that `txn` changed `page_id` from `before` to `after`.
    pub fn log_write(
        &self,
        txn: TransactionId,
        page_id: PageId,
        before: Vec<u8>,
        after: Vec<u8>,
    ) -> StorageResult<Lsn> {
        self.append(
            txn,
            WalRecordPayload::Update {
                page_id,
                before,
                after,
            },
        )
    }

    /// Logs that an abort of `txn` restores `page_id` from `before` (what
    /// is on disk) to `after` (the pre-transaction image).
    pub fn log_compensation(
        &self,
        txn: TransactionId,
        page_id: PageId,
        before: Vec<u8>,
        after: Vec<u8>,
    ) -> StorageResult<Lsn> {
        self.append(
            txn,
            WalRecordPayload::Compensation {
                page_id,
                before,
                after,
            },
        )
    }

    pub fn log_commit(&self, txn: TransactionId) -> StorageResult<Lsn> {
        self.append(txn, WalRecordPayload::Commit)
    }

    pub fn log_abort(&self, txn: TransactionId) -> StorageResult<Lsn> {
        self.append(txn, WalRecordPayload::Abort)
    }

    /// Makes every appended record durable and returns the last LSN forced.
    pub fn force(&self) -> StorageResult<Lsn> {
        let mut state = self.state.lock();
        state.writer.flush()?;
        if self.sync {
            state.writer.get_ref().sync_data()?;
        }
        state.flushed_lsn = state.last_lsn;
        Ok(state.flushed_lsn)
    }

    pub fn flushed_lsn(&self) -> Lsn {
        self.state.lock().flushed_lsn
    }

    pub fn last_lsn(&self) -> Lsn {
        self.state.lock().last_lsn
    }

    /// Reads every complete record currently in the log, in LSN order.
    pub fn read_records(&self) -> StorageResult<Vec<WalRecord>> {
        let mut state = self.state.lock();
        state.writer.flush()?;
        let file = File::open(&self.path)?;
        let file_len = file.metadata()?.len();
        let (records, _) = read_log(BufReader::new(file), file_len)?;
        Ok(records)
    }

    /// Empties the log. LSNs keep increasing across truncation.
    pub fn truncate(&self) -> StorageResult<()> {
        let mut state = self.state.lock();
        state.writer.flush()?;
        state.writer.get_ref().set_len(0)?;
        state.writer.seek(SeekFrom::Start(0))?;
        if self.sync {
            state.writer.get_ref().sync_data()?;
        }
        state.flushed_lsn = state.last_lsn;
        debug!("Truncated log {}", self.path.display());
        Ok(())
    }
}

/// Reads records from a log of `log_len` bytes until its end or the first
/// incomplete or undecodable one. Returns the records and the byte length
/// they span.
fn read_log<R: Read>(mut reader: R, log_len: u64) -> StorageResult<(Vec<WalRecord>, u64)> {
    let mut records = Vec::new();
    let mut valid_len = 0u64;

    loop {
        let size = match reader.read_u32::<LittleEndian>() {
            Ok(size) => size as usize,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        };
        // A torn prefix may promise more than the file holds.
        let remaining = log_len.saturating_sub(valid_len + RECORD_HEADER_SIZE);
        if size as u64 > remaining {
            break;
        }

        let mut data = vec![0u8; size];
        match reader.read_exact(&mut data) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        }

        match WalRecord::deserialize(&data) {
            Ok(record) => records.push(record),
            Err(e) => {
                warn!("Stopping log replay at undecodable record: {}", e);
                break;
            }
        }
        valid_len += RECORD_HEADER_SIZE + size as u64;
    }

    Ok((records, valid_len))
}
