//! Fixed-slot heap page.
//!
//! Layout: a slot-occupancy bitmap of `ceil(num_slots / 8)` bytes followed by
//! `num_slots` tuple slots of `desc.tuple_size()` bytes each. Bit `i` lives in
//! byte `i / 8` at position `i % 8` (least significant bit first). Any bytes
//! left over at the end of the page are unused.

use crate::access::{RecordId, Tuple, TupleDesc};
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::page::PageId;
use crate::transaction::TransactionId;
use std::sync::Arc;

pub struct HeapPage {
    id: PageId,
    desc: Arc<TupleDesc>,
    data: Vec<u8>,
    num_slots: usize,
    dirtier: Option<TransactionId>,
    before_image: Vec<u8>,
}

impl HeapPage {
    /// Number of tuple slots a page of `page_size` bytes holds: each tuple
    /// costs `tuple_size` bytes plus one header bit.
    pub fn slots_per_page(page_size: usize, tuple_size: usize) -> usize {
        (page_size * 8) / (tuple_size * 8 + 1)
    }

    pub fn header_size(num_slots: usize) -> usize {
        num_slots.div_ceil(8)
    }

    /// Wrap raw page bytes read from disk. The before-image is captured from
    /// the bytes as given.
    pub fn new(id: PageId, data: Vec<u8>, desc: Arc<TupleDesc>) -> StorageResult<Self> {
        let tuple_size = desc.tuple_size();
        let num_slots = Self::slots_per_page(data.len(), tuple_size);
        if num_slots == 0 {
            return Err(StorageError::InvalidPageSize {
                page_size: data.len(),
                tuple_size,
            });
        }

        let before_image = data.clone();
        Ok(Self {
            id,
            desc,
            data,
            num_slots,
            dirtier: None,
            before_image,
        })
    }

    /// A zero-filled page with every slot free.
    #[cfg(test)]
    pub fn empty(id: PageId, page_size: usize, desc: Arc<TupleDesc>) -> StorageResult<Self> {
        Self::new(id, vec![0u8; page_size], desc)
    }

    pub fn id(&self) -> PageId {
        self.id
    }

    pub fn desc(&self) -> &Arc<TupleDesc> {
        &self.desc
    }

    /// Current page bytes, as they would be written to disk.
    pub fn page_data(&self) -> &[u8] {
        &self.data
    }

    pub fn num_slots(&self) -> usize {
        self.num_slots
    }

    pub fn num_empty_slots(&self) -> usize {
        (0..self.num_slots).filter(|&i| !self.is_slot_used(i)).count()
    }

    pub fn is_slot_used(&self, slot: usize) -> bool {
        slot < self.num_slots && self.data[slot / 8] & (1 << (slot % 8)) != 0
    }

    fn set_slot_used(&mut self, slot: usize, used: bool) {
        let mask = 1u8 << (slot % 8);
        if used {
            self.data[slot / 8] |= mask;
        } else {
            self.data[slot / 8] &= !mask;
        }
    }

    fn slot_range(&self, slot: usize) -> std::ops::Range<usize> {
        let tuple_size = self.desc.tuple_size();
        let start = Self::header_size(self.num_slots) + slot * tuple_size;
        start..start + tuple_size
    }

    /// Store `tuple` in the lowest free slot and stamp its record id.
    pub fn insert_tuple(&mut self, tuple: &mut Tuple) -> StorageResult<usize> {
        tuple.conforms_to(&self.desc)?;

        let slot = (0..self.num_slots)
            .find(|&i| !self.is_slot_used(i))
            .ok_or(StorageError::PageFull(self.id))?;

        let range = self.slot_range(slot);
        let desc = Arc::clone(&self.desc);
        tuple.encode(&desc, &mut self.data[range])?;
        self.set_slot_used(slot, true);
        tuple.set_record_id(Some(RecordId::new(self.id, slot)));

        Ok(slot)
    }

    /// Free the slot recorded in `tuple`'s record id. Deleting from an
    /// already empty slot is an error.
    pub fn delete_tuple(&mut self, tuple: &Tuple) -> StorageResult<()> {
        let rid = tuple.record_id().ok_or(StorageError::MissingRecordId)?;
        if rid.page_id != self.id {
            return Err(StorageError::WrongPage {
                expected: self.id,
                actual: rid.page_id,
            });
        }
        if rid.slot >= self.num_slots {
            return Err(StorageError::SlotOutOfRange {
                page_id: self.id,
                slot: rid.slot,
                max_slot: self.num_slots - 1,
            });
        }
        if !self.is_slot_used(rid.slot) {
            return Err(StorageError::SlotEmpty {
                page_id: self.id,
                slot: rid.slot,
            });
        }

        self.set_slot_used(rid.slot, false);
        let range = self.slot_range(rid.slot);
        self.data[range].fill(0);
        Ok(())
    }

    /// The tuple stored in `slot`, or `None` if the slot is free.
    pub fn tuple(&self, slot: usize) -> StorageResult<Option<Tuple>> {
        if slot >= self.num_slots {
            return Err(StorageError::SlotOutOfRange {
                page_id: self.id,
                slot,
                max_slot: self.num_slots - 1,
            });
        }
        if !self.is_slot_used(slot) {
            return Ok(None);
        }
        let range = self.slot_range(slot);
        Tuple::decode(&self.desc, &self.data[range], RecordId::new(self.id, slot)).map(Some)
    }

    /// All live tuples in slot order.
    pub fn tuples(&self) -> StorageResult<Vec<Tuple>> {
        let mut tuples = Vec::with_capacity(self.num_slots - self.num_empty_slots());
        for slot in 0..self.num_slots {
            if let Some(tuple) = self.tuple(slot)? {
                tuples.push(tuple);
            }
        }
        Ok(tuples)
    }

    pub fn mark_dirty(&mut self, txn: TransactionId) {
        self.dirtier = Some(txn);
    }

    pub fn mark_clean(&mut self) {
        self.dirtier = None;
    }

    /// The transaction that last dirtied this page, if it is dirty.
    pub fn dirtier(&self) -> Option<TransactionId> {
        self.dirtier
    }

    pub fn is_dirty(&self) -> bool {
        self.dirtier.is_some()
    }

    pub fn before_image(&self) -> &[u8] {
        &self.before_image
    }

    /// Take a fresh snapshot of the current contents as the rollback target.
    pub fn set_before_image(&mut self) {
        self.before_image.clear();
        self.before_image.extend_from_slice(&self.data);
    }

    /// Undo every change since the last snapshot and mark the page clean.
    pub fn restore_before_image(&mut self) {
        self.data.clear();
        self.data.extend_from_slice(&self.before_image);
        self.dirtier = None;
    }

    /// Replace the contents with `image`, which becomes the new snapshot.
    /// The page is clean afterwards.
    pub fn reset_to(&mut self, image: &[u8]) {
        debug_assert_eq!(image.len(), self.data.len());
        self.data.clear();
        self.data.extend_from_slice(image);
        self.set_before_image();
        self.dirtier = None;
    }
}

impl std::fmt::Debug for HeapPage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeapPage")
            .field("id", &self.id)
            .field("num_slots", &self.num_slots)
            .field("empty_slots", &self.num_empty_slots())
            .field("dirtier", &self.dirtier)
            .finish()
    }
}
