//! Sequential scans over heap files.

use crate::access::tuple::Tuple;
use crate::storage::buffer::BufferPool;
use crate::storage::disk::HeapFile;
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::page::{PageId, Permission};
use crate::transaction::TransactionId;
use std::collections::VecDeque;
use std::sync::Arc;

/// Pull-based tuple stream consumed by query operators.
///
/// `open` must be called before `has_next` or `next`; both fail with
/// [`StorageError::IteratorNotOpen`] otherwise.
pub trait TupleIterator {
    fn open(&mut self) -> StorageResult<()>;

    fn has_next(&mut self) -> StorageResult<bool>;

    /// The next tuple, or [`StorageError::NoSuchElement`] past the end.
    fn next(&mut self) -> StorageResult<Tuple>;

    /// Start over from the first tuple.
    fn rewind(&mut self) -> StorageResult<()>;

    fn close(&mut self);

    /// Drain the remaining tuples.
    fn collect_remaining(&mut self) -> StorageResult<Vec<Tuple>> {
        let mut tuples = Vec::new();
        while self.has_next()? {
            tuples.push(self.next()?);
        }
        Ok(tuples)
    }
}

struct ScanPosition {
    next_page: u32,
    buffered: VecDeque<Tuple>,
}

/// Scans a heap file page by page in page order, and in slot order within a
/// page. Each page is fetched with read permission only when the scan
/// reaches it.
pub struct HeapFileIterator<'a> {
    file: Arc<HeapFile>,
    pool: &'a BufferPool,
    txn: TransactionId,
    position: Option<ScanPosition>,
}

impl<'a> HeapFileIterator<'a> {
    pub fn new(file: Arc<HeapFile>, txn: TransactionId, pool: &'a BufferPool) -> Self {
        Self {
            file,
            pool,
            txn,
            position: None,
        }
    }
}

impl TupleIterator for HeapFileIterator<'_> {
    fn open(&mut self) -> StorageResult<()> {
        self.position = Some(ScanPosition {
            next_page: 0,
            buffered: VecDeque::new(),
        });
        Ok(())
    }

    fn has_next(&mut self) -> StorageResult<bool> {
        let position = self.position.as_mut().ok_or(StorageError::IteratorNotOpen)?;
        while position.buffered.is_empty() {
            if position.next_page >= self.file.num_pages()? {
                return Ok(false);
            }
            let page_id = PageId::new(self.file.table_id(), position.next_page);
            let page = self.pool.fetch(self.txn, page_id, Permission::ReadOnly)?;
            position.buffered = page.read().tuples()?.into();
            position.next_page += 1;
        }
        Ok(true)
    }

    fn next(&mut self) -> StorageResult<Tuple> {
        if !self.has_next()? {
            return Err(StorageError::NoSuchElement);
        }
        self.position
            .as_mut()
            .and_then(|position| position.buffered.pop_front())
            .ok_or(StorageError::NoSuchElement)
    }

    fn rewind(&mut self) -> StorageResult<()> {
        self.close();
        self.open()
    }

    fn close(&mut self) {
        self.position = None;
    }
}
