use std::sync::Arc;

use super::error::{StorageError, StorageResult};
use super::page_id::{PageId, RecordId, SlotId};
use crate::transaction::TransactionId;
use crate::tuple::{Tuple, TupleDesc};

/// In-memory image of one heap file page.
///
/// Layout: `[occupancy bitmap: ceil(num_slots / 8) bytes][num_slots fixed-size slots]`.
/// Bit `i % 8` of byte `i / 8` is set iff slot `i` holds a tuple. There is no
/// other header, so free-slot counts are always derived from the bitmap.
///
/// Besides the bytes, a cached page carries its dirty state (the transaction
/// that last modified it) and the before-image taken when it last went from
/// clean to dirty.
#[derive(Debug)]
pub struct HeapPage {
    pid: PageId,
    desc: Arc<TupleDesc>,
    data: Box<[u8]>,
    num_slots: usize,
    dirtier: Option<TransactionId>,
    before_image: Box<[u8]>,
}

impl HeapPage {
    /// Number of tuple slots on a page: each slot costs `tuple_size` bytes
    /// plus one bitmap bit, so `floor(8 * page_size / (8 * tuple_size + 1))`.
    pub fn slot_count(page_size: usize, tuple_size: usize) -> usize {
        if tuple_size == 0 {
            return 0;
        }
        (page_size * 8) / (tuple_size * 8 + 1)
    }

    /// Bytes used by the occupancy bitmap for `num_slots` slots
    pub fn header_size(num_slots: usize) -> usize {
        num_slots.div_ceil(8)
    }

    /// Bytes of a freshly allocated page: no slot occupied
    pub fn create_empty_page_data(page_size: usize) -> Vec<u8> {
        vec![0u8; page_size]
    }

    /// Wrap page bytes read from disk. The page size is `data.len()`.
    pub fn new(pid: PageId, desc: Arc<TupleDesc>, data: Vec<u8>) -> StorageResult<Self> {
        let page_size = data.len();
        let num_slots = Self::slot_count(page_size, desc.tuple_size());
        if num_slots == 0 {
            return Err(StorageError::TupleTooLarge {
                tuple_size: desc.tuple_size(),
                page_size,
            });
        }

        let data = data.into_boxed_slice();
        let before_image = data.clone();
        Ok(Self {
            pid,
            desc,
            data,
            num_slots,
            dirtier: None,
            before_image,
        })
    }

    /// A page with every slot free
    pub fn empty(pid: PageId, desc: Arc<TupleDesc>, page_size: usize) -> StorageResult<Self> {
        Self::new(pid, desc, Self::create_empty_page_data(page_size))
    }

    pub fn id(&self) -> PageId {
        self.pid
    }

    pub fn tuple_desc(&self) -> &Arc<TupleDesc> {
        &self.desc
    }

    pub fn page_size(&self) -> usize {
        self.data.len()
    }

    pub fn num_slots(&self) -> usize {
        self.num_slots
    }

    /// Raw page bytes, exactly as they are written to disk
    pub fn page_data(&self) -> &[u8] {
        &self.data
    }

    fn slot_range(&self, slot: SlotId) -> std::ops::Range<usize> {
        let tuple_size = self.desc.tuple_size();
        let start = Self::header_size(self.num_slots) + slot * tuple_size;
        start..start + tuple_size
    }

    pub fn is_slot_used(&self, slot: SlotId) -> bool {
        slot < self.num_slots && self.data[slot / 8] & (1 << (slot % 8)) != 0
    }

    fn set_slot_used(&mut self, slot: SlotId, used: bool) {
        if used {
            self.data[slot / 8] |= 1 << (slot % 8);
        } else {
            self.data[slot / 8] &= !(1 << (slot % 8));
        }
    }

    pub fn num_empty_slots(&self) -> usize {
        (0..self.num_slots).filter(|&s| !self.is_slot_used(s)).count()
    }

    pub fn has_free_slots(&self) -> bool {
        self.first_free_slot().is_some()
    }

    /// Whether no slot holds a tuple
    pub fn is_empty(&self) -> bool {
        (0..self.num_slots).all(|s| !self.is_slot_used(s))
    }

    fn first_free_slot(&self) -> Option<SlotId> {
        (0..self.num_slots).find(|&s| !self.is_slot_used(s))
    }

    /// Store `tuple` in the lowest-numbered free slot and tag it with its new
    /// record id
    pub fn insert_tuple(&mut self, tuple: &mut Tuple) -> StorageResult<RecordId> {
        let slot = self
            .first_free_slot()
            .ok_or(StorageError::PageFull(self.pid))?;

        let range = self.slot_range(slot);
        tuple.serialize_into(&self.desc, &mut self.data[range])?;
        self.set_slot_used(slot, true);

        let rid = RecordId::new(self.pid, slot);
        tuple.set_record_id(Some(rid));
        Ok(rid)
    }

    /// Free the slot at `rid`; other slots keep their positions
    pub fn delete_tuple(&mut self, rid: RecordId) -> StorageResult<()> {
        if rid.page_id != self.pid || !self.is_slot_used(rid.slot) {
            return Err(StorageError::InvalidSlot(rid));
        }

        self.set_slot_used(rid.slot, false);
        let range = self.slot_range(rid.slot);
        self.data[range].fill(0);
        Ok(())
    }

    /// Read the tuple stored in `slot`
    pub fn tuple(&self, slot: SlotId) -> StorageResult<Tuple> {
        let rid = RecordId::new(self.pid, slot);
        if !self.is_slot_used(slot) {
            return Err(StorageError::InvalidSlot(rid));
        }

        let mut tuple = Tuple::deserialize(&self.data[self.slot_range(slot)], &self.desc)?;
        tuple.set_record_id(Some(rid));
        Ok(tuple)
    }

    /// Every stored tuple in slot order
    pub fn tuples(&self) -> impl Iterator<Item = StorageResult<Tuple>> + '_ {
        (0..self.num_slots)
            .filter(|&s| self.is_slot_used(s))
            .map(|s| self.tuple(s))
    }

    /// Transaction that dirtied this page, or `None` if it is clean
    pub fn is_dirty(&self) -> Option<TransactionId> {
        self.dirtier
    }

    /// Set or clear the dirty flag. On the clean-to-dirty transition the
    /// current bytes are kept as the before-image, so this must be called
    /// before the first mutation of a dirty episode.
    pub fn mark_dirty(&mut self, dirty: bool, txn: TransactionId) {
        if dirty {
            if self.dirtier.is_none() {
                self.before_image.copy_from_slice(&self.data);
            }
            self.dirtier = Some(txn);
        } else {
            self.dirtier = None;
        }
    }

    /// Page bytes as they were before the current dirty episode
    pub fn before_image(&self) -> &[u8] {
        &self.before_image
    }

    /// Re-baseline the before-image to the current bytes
    pub fn set_before_image(&mut self) {
        self.before_image.copy_from_slice(&self.data);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{DEFAULT_PAGE_SIZE, TableId};
    use crate::tuple::{Field, FieldDesc, FieldType};

    // 1 bitmap byte + 4 + 15 = 20 bytes per tuple
    fn desc20() -> Arc<TupleDesc> {
        Arc::new(TupleDesc::new(vec![
            FieldDesc::new("id", FieldType::Int),
            FieldDesc::new("name", FieldType::Char(15)),
        ]))
    }

    fn pid() -> PageId {
        PageId::new(TableId(1), 0)
    }

    fn row(i: i32) -> Tuple {
        Tuple::new(vec![Field::Int(i), Field::Str(format!("row{}", i))])
    }

    #[test]
    fn test_slot_count() {
        assert_eq!(HeapPage::slot_count(4096, 20), 203);
        assert_eq!(HeapPage::header_size(203), 26);
        assert_eq!(HeapPage::slot_count(4096, 0), 0);
        // bitmap + slots always fit
        let slots = HeapPage::slot_count(4096, 20);
        assert!(HeapPage::header_size(slots) + slots * 20 <= 4096);
    }

    #[test]
    fn test_tuple_larger_than_page() {
        let desc = Arc::new(TupleDesc::new(vec![FieldDesc::new(
            "blob",
            FieldType::Char(100),
        )]));
        let result = HeapPage::empty(pid(), desc, 64);
        assert!(matches!(result, Err(StorageError::TupleTooLarge { .. })));
    }

    #[test]
    fn test_empty_page() {
        let page = HeapPage::empty(pid(), desc20(), DEFAULT_PAGE_SIZE).unwrap();
        assert_eq!(page.num_slots(), 203);
        assert_eq!(page.num_empty_slots(), 203);
        assert!(page.has_free_slots());
        assert!(page.is_empty());
        assert_eq!(page.is_dirty(), None);
    }

    #[test]
    fn test_insert_fills_lowest_free_slot() {
        let mut page = HeapPage::empty(pid(), desc20(), DEFAULT_PAGE_SIZE).unwrap();
        let mut a = row(1);
        let mut b = row(2);
        let mut c = row(3);
        assert_eq!(page.insert_tuple(&mut a).unwrap().slot, 0);
        assert_eq!(page.insert_tuple(&mut b).unwrap().slot, 1);
        assert_eq!(a.record_id(), Some(RecordId::new(pid(), 0)));

        page.delete_tuple(RecordId::new(pid(), 0)).unwrap();
        assert!(!page.is_slot_used(0));
        assert!(page.is_slot_used(1));

        // reuses the hole, slot 1 does not move
        assert_eq!(page.insert_tuple(&mut c).unwrap().slot, 0);
        assert_eq!(page.tuple(1).unwrap().fields(), b.fields());
        assert_eq!(page.num_empty_slots(), 201);
    }

    #[test]
    fn test_bitmap_matches_occupancy() {
        let mut page = HeapPage::empty(pid(), desc20(), DEFAULT_PAGE_SIZE).unwrap();
        for i in 0..10 {
            page.insert_tuple(&mut row(i)).unwrap();
        }
        page.delete_tuple(RecordId::new(pid(), 3)).unwrap();
        page.delete_tuple(RecordId::new(pid(), 8)).unwrap();

        // slots 0..=7 minus 3 live in byte 0, slot 9 in byte 1
        assert_eq!(page.page_data()[0], 0b1111_0111);
        assert_eq!(page.page_data()[1], 0b0000_0010);
        let slots: Vec<_> = page
            .tuples()
            .map(|t| t.unwrap().record_id().unwrap().slot)
            .collect();
        assert_eq!(slots, vec![0, 1, 2, 4, 5, 6, 7, 9]);
    }

    #[test]
    fn test_fill_page() {
        let mut page = HeapPage::empty(pid(), desc20(), DEFAULT_PAGE_SIZE).unwrap();
        for i in 0..203 {
            page.insert_tuple(&mut row(i)).unwrap();
        }
        assert!(!page.has_free_slots());
        assert_eq!(page.num_empty_slots(), 0);
        assert!(matches!(
            page.insert_tuple(&mut row(203)),
            Err(StorageError::PageFull(_))
        ));
    }

    #[test]
    fn test_delete_invalid_slot() {
        let mut page = HeapPage::empty(pid(), desc20(), DEFAULT_PAGE_SIZE).unwrap();
        assert!(matches!(
            page.delete_tuple(RecordId::new(pid(), 0)),
            Err(StorageError::InvalidSlot(_))
        ));
        assert!(matches!(
            page.delete_tuple(RecordId::new(pid(), 10_000)),
            Err(StorageError::InvalidSlot(_))
        ));

        let other = PageId::new(TableId(1), 7);
        page.insert_tuple(&mut row(1)).unwrap();
        assert!(matches!(
            page.delete_tuple(RecordId::new(other, 0)),
            Err(StorageError::InvalidSlot(_))
        ));
    }

    #[test]
    fn test_reload_from_bytes() {
        let mut page = HeapPage::empty(pid(), desc20(), DEFAULT_PAGE_SIZE).unwrap();
        page.insert_tuple(&mut row(5)).unwrap();
        page.insert_tuple(&mut row(6)).unwrap();

        let reloaded = HeapPage::new(pid(), desc20(), page.page_data().to_vec()).unwrap();
        let tuples: Vec<_> = reloaded.tuples().map(|t| t.unwrap()).collect();
        assert_eq!(tuples.len(), 2);
        assert_eq!(tuples[1].fields(), row(6).fields());
    }

    #[test]
    fn test_before_image_captured_once_per_dirty_episode() {
        let txn = TransactionId::next();
        let mut page = HeapPage::empty(pid(), desc20(), DEFAULT_PAGE_SIZE).unwrap();
        let pristine = page.page_data().to_vec();

        page.mark_dirty(true, txn);
        page.insert_tuple(&mut row(1)).unwrap();
        assert_eq!(page.before_image(), &pristine[..]);

        // still dirty: further marks must not overwrite the snapshot
        page.mark_dirty(true, txn);
        page.insert_tuple(&mut row(2)).unwrap();
        assert_eq!(page.before_image(), &pristine[..]);
        assert_eq!(page.is_dirty(), Some(txn));

        // flushed; the next episode snapshots the flushed bytes
        page.mark_dirty(false, txn);
        assert_eq!(page.is_dirty(), None);
        let flushed = page.page_data().to_vec();
        page.mark_dirty(true, txn);
        page.insert_tuple(&mut row(3)).unwrap();
        assert_eq!(page.before_image(), &flushed[..]);
        assert_ne!(page.before_image(), page.page_data());
    }

    #[test]
    fn test_set_before_image() {
        let txn = TransactionId::next();
        let mut page = HeapPage::empty(pid(), desc20(), DEFAULT_PAGE_SIZE).unwrap();
        page.mark_dirty(true, txn);
        page.insert_tuple(&mut row(1)).unwrap();
        page.set_before_image();
        assert_eq!(page.before_image(), page.page_data());
    }
}
