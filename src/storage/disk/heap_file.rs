use crate::access::{HeapFileIterator, Tuple, TupleDesc};
use crate::storage::buffer::{BufferPool, PageRef};
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::page::{HeapPage, PageId, Permission, TableId};
use crate::transaction::TransactionId;
use log::debug;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// The pages of one table, stored back to back in a single file with no
/// header. Page `n` starts at byte `n * page_size`.
pub struct HeapFile {
    /// Seek and read/write happen as one step under this lock, and so does
    /// appending a page.
    file: Mutex<File>,
    path: PathBuf,
    table_id: TableId,
    desc: Arc<TupleDesc>,
    page_size: usize,
}

impl HeapFile {
    /// Open the table file at `path`, creating an empty one if it is missing.
    pub fn open(
        path: &Path,
        table_id: TableId,
        desc: TupleDesc,
        page_size: usize,
    ) -> StorageResult<Self> {
        if HeapPage::slots_per_page(page_size, desc.tuple_size()) == 0 {
            return Err(StorageError::InvalidPageSize {
                page_size,
                tuple_size: desc.tuple_size(),
            });
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        Ok(Self {
            file: Mutex::new(file),
            path: path.to_path_buf(),
            table_id,
            desc: Arc::new(desc),
            page_size,
        })
    }

    pub fn table_id(&self) -> TableId {
        self.table_id
    }

    pub fn desc(&self) -> &Arc<TupleDesc> {
        &self.desc
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Pages in the file: `ceil(len / page_size)`.
    pub fn num_pages(&self) -> StorageResult<u32> {
        let len = self.file.lock().metadata()?.len();
        Ok(len.div_ceil(self.page_size as u64) as u32)
    }

    fn check_page(&self, page_id: PageId) -> StorageResult<()> {
        if page_id.table_id != self.table_id {
            return Err(StorageError::TableMismatch {
                page_id,
                table_id: self.table_id,
            });
        }
        Ok(())
    }

    fn page_offset(&self, page_id: PageId) -> u64 {
        page_id.page_no as u64 * self.page_size as u64
    }

    /// Raw bytes of a page exactly as they are on disk.
    pub fn read_page_data(&self, page_id: PageId) -> StorageResult<Vec<u8>> {
        self.check_page(page_id)?;
        let mut file = self.file.lock();
        let num_pages = file.metadata()?.len().div_ceil(self.page_size as u64) as u32;
        if page_id.page_no >= num_pages {
            return Err(StorageError::PageOutOfRange { page_id, num_pages });
        }

        let mut data = vec![0u8; self.page_size];
        file.seek(SeekFrom::Start(self.page_offset(page_id)))?;
        let mut read = 0;
        while read < data.len() {
            match file.read(&mut data[read..])? {
                0 => break,
                n => read += n,
            }
        }
        if read != self.page_size {
            return Err(StorageError::ShortRead {
                page_id,
                read,
                expected: self.page_size,
            });
        }
        Ok(data)
    }

    pub fn read_page(&self, page_id: PageId) -> StorageResult<HeapPage> {
        let data = self.read_page_data(page_id)?;
        HeapPage::new(page_id, data, Arc::clone(&self.desc))
    }

    /// Overwrite exactly one page at its offset. Writing past the end grows
    /// the file by whole pages.
    pub fn write_page_data(&self, page_id: PageId, data: &[u8]) -> StorageResult<()> {
        self.check_page(page_id)?;
        if data.len() != self.page_size {
            return Err(StorageError::ShortWrite {
                page_id,
                len: data.len(),
                expected: self.page_size,
            });
        }

        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(self.page_offset(page_id)))?;
        file.write_all(data)?;
        Ok(())
    }

    pub fn write_page(&self, page: &HeapPage) -> StorageResult<()> {
        self.write_page_data(page.id(), page.page_data())
    }

    /// Append one zero-filled page, which reads back as a page with every
    /// slot free. Concurrent callers get distinct page numbers.
    pub fn allocate_page(&self) -> StorageResult<PageId> {
        let file = self.file.lock();
        let len = file.metadata()?.len();
        let page_no = len.div_ceil(self.page_size as u64) as u32;
        file.set_len((page_no as u64 + 1) * self.page_size as u64)?;

        let page_id = PageId::new(self.table_id, page_no);
        debug!("Allocated page {} in {}", page_id, self.path.display());
        Ok(page_id)
    }

    /// Flush file contents to stable storage.
    pub fn sync(&self) -> StorageResult<()> {
        self.file.lock().sync_data()?;
        Ok(())
    }

    /// Store `tuple` in the first page with a free slot, appending a page if
    /// every page is full. Every page visited is fetched with write
    /// permission, so its exclusive lock is held until `txn` ends. On return
    /// `tuple` carries its record id.
    ///
    /// Returns the pages that were modified.
    pub fn insert_tuple(
        &self,
        txn: TransactionId,
        tuple: &mut Tuple,
        pool: &BufferPool,
    ) -> StorageResult<Vec<PageRef>> {
        tuple.conforms_to(&self.desc)?;

        let mut page_no = 0;
        loop {
            if page_no >= self.num_pages()? {
                self.allocate_page()?;
            }
            let page_id = PageId::new(self.table_id, page_no);
            page_no += 1;

            let page = pool.fetch(txn, page_id, Permission::ReadWrite)?;
            let inserted = {
                let mut guard = page.write();
                if guard.num_empty_slots() > 0 {
                    guard.insert_tuple(tuple)?;
                    true
                } else {
                    false
                }
            };
            if inserted {
                return Ok(vec![page]);
            }
        }
    }

    /// Clear the slot named by the tuple's record id.
    pub fn delete_tuple(
        &self,
        txn: TransactionId,
        tuple: &Tuple,
        pool: &BufferPool,
    ) -> StorageResult<Vec<PageRef>> {
        let record_id = tuple.record_id().ok_or(StorageError::MissingRecordId)?;
        self.check_page(record_id.page_id)?;

        let page = pool.fetch(txn, record_id.page_id, Permission::ReadWrite)?;
        page.write().delete_tuple(tuple)?;
        Ok(vec![page])
    }

    /// Lazy page-by-page scan of this file on behalf of `txn`.
    pub fn iter<'a>(self: &Arc<Self>, txn: TransactionId, pool: &'a BufferPool) -> HeapFileIterator<'a> {
        HeapFileIterator::new(Arc::clone(self), txn, pool)
    }
}

impl std::fmt::Debug for HeapFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeapFile")
            .field("path", &self.path)
            .field("table_id", &self.table_id)
            .field("page_size", &self.page_size)
            .finish()
    }
}
