use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, trace};

use super::buffer_pool::BufferPool;
use super::error::{StorageError, StorageResult};
use super::heap_page::HeapPage;
use super::page_id::{PageId, SlotId, TableId};
use super::PageRef;
use crate::transaction::{Permissions, TransactionId};
use crate::tuple::{Tuple, TupleDesc};

/// A table stored as an unordered sequence of fixed-size pages.
///
/// Page `i` occupies bytes `[i * page_size, (i + 1) * page_size)`; there is no
/// file header. Alongside the file, a free-slot directory records for every
/// page whether it has at least one free slot, so inserts never have to scan
/// pages to find room.
#[derive(Debug)]
pub struct HeapFile {
    table_id: TableId,
    path: PathBuf,
    desc: Arc<TupleDesc>,
    page_size: usize,
    slots_per_page: usize,
    file: Mutex<File>,
    /// page number -> page has a free slot
    free_slots: Mutex<BTreeMap<u32, bool>>,
    /// Serializes inserts into this file
    insert_lock: Mutex<()>,
}

impl HeapFile {
    /// Open the heap file at `path`, creating it if missing
    pub fn open<P: AsRef<Path>>(
        path: P,
        table_id: TableId,
        desc: Arc<TupleDesc>,
        page_size: usize,
    ) -> StorageResult<Self> {
        let slots_per_page = HeapPage::slot_count(page_size, desc.tuple_size());
        if slots_per_page == 0 {
            return Err(StorageError::TupleTooLarge {
                tuple_size: desc.tuple_size(),
                page_size,
            });
        }

        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        let heap_file = Self {
            table_id,
            path,
            desc,
            page_size,
            slots_per_page,
            file: Mutex::new(file),
            free_slots: Mutex::new(BTreeMap::new()),
            insert_lock: Mutex::new(()),
        };
        heap_file.rebuild_directory()?;
        Ok(heap_file)
    }

    /// Recompute the free-slot directory from the page bitmaps on disk
    fn rebuild_directory(&self) -> StorageResult<()> {
        let mut directory = BTreeMap::new();
        for page_number in 0..self.num_pages()? {
            let page = self.read_page(PageId::new(self.table_id, page_number))?;
            directory.insert(page_number, page.has_free_slots());
        }

        debug!(table = %self.table_id, pages = directory.len(), "free-slot directory built");
        *self.free_slots.lock() = directory;
        Ok(())
    }

    pub fn table_id(&self) -> TableId {
        self.table_id
    }

    pub fn tuple_desc(&self) -> &Arc<TupleDesc> {
        &self.desc
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn slots_per_page(&self) -> usize {
        self.slots_per_page
    }

    /// Directory entry for `page_number`, `None` if the page does not exist
    pub fn has_free_slots(&self, page_number: u32) -> Option<bool> {
        self.free_slots.lock().get(&page_number).copied()
    }

    /// Snapshot of the whole free-slot directory in page order
    pub fn free_slot_directory(&self) -> Vec<(u32, bool)> {
        self.free_slots
            .lock()
            .iter()
            .map(|(&page, &free)| (page, free))
            .collect()
    }

    fn set_free(&self, page_number: u32, free: bool) {
        trace!(table = %self.table_id, page_number, free, "directory update");
        self.free_slots.lock().insert(page_number, free);
    }

    fn first_free_page(&self) -> Option<u32> {
        self.free_slots
            .lock()
            .iter()
            .find(|(_, free)| **free)
            .map(|(&page, _)| page)
    }

    fn pages_in(file: &File, page_size: usize) -> StorageResult<u32> {
        page_count(file.metadata()?.len(), page_size)
    }

    /// Number of pages in the file, counting a trailing partial page
    pub fn num_pages(&self) -> StorageResult<u32> {
        Self::pages_in(&self.file.lock(), self.page_size)
    }

    /// Read one page straight from disk, bypassing the buffer pool
    pub fn read_page(&self, pid: PageId) -> StorageResult<HeapPage> {
        if pid.table_id() != self.table_id {
            return Err(StorageError::WrongTable {
                page_id: pid,
                table_id: self.table_id,
            });
        }

        let mut data = Vec::with_capacity(self.page_size);
        {
            let mut file = self.file.lock();
            let num_pages = Self::pages_in(&file, self.page_size)?;
            if pid.page_number() >= num_pages {
                return Err(StorageError::PageOutOfRange {
                    page_id: pid,
                    num_pages,
                });
            }

            file.seek(SeekFrom::Start(pid.offset(self.page_size)))?;
            Read::by_ref(&mut *file)
                .take(self.page_size as u64)
                .read_to_end(&mut data)?;
        }
        // a torn last page reads as zeros past the end of file
        data.resize(self.page_size, 0);

        HeapPage::new(pid, self.desc.clone(), data)
    }

    /// Write `page` at its offset, extending the file if needed
    pub fn write_page(&self, page: &HeapPage) -> StorageResult<()> {
        let pid = page.id();
        if pid.table_id() != self.table_id {
            return Err(StorageError::WrongTable {
                page_id: pid,
                table_id: self.table_id,
            });
        }
        if page.page_size() != self.page_size {
            return Err(StorageError::InvalidPageSize {
                expected: self.page_size,
                actual: page.page_size(),
            });
        }

        let pages_before = {
            let mut file = self.file.lock();
            let pages_before = Self::pages_in(&file, self.page_size)?;
            file.seek(SeekFrom::Start(pid.offset(self.page_size)))?;
            file.write_all(page.page_data())?;
            pages_before
        };

        let mut directory = self.free_slots.lock();
        // pages skipped over by a write past the end are all zeros
        for gap in pages_before..pid.page_number() {
            directory.entry(gap).or_insert(true);
        }
        directory.insert(pid.page_number(), page.has_free_slots());
        trace!(%pid, free = page.has_free_slots(), "page written");
        Ok(())
    }

    /// Append an empty page to the file and return its number
    fn allocate_page(&self) -> StorageResult<u32> {
        let page_number = self.num_pages()?;
        let pid = PageId::new(self.table_id, page_number);
        let page = HeapPage::empty(pid, self.desc.clone(), self.page_size)?;
        self.write_page(&page)?;

        debug!(%pid, "allocated page");
        Ok(page_number)
    }

    /// Insert `tuple` into the lowest-numbered page with room, allocating a
    /// page at the end of the file when every page is full. The page is
    /// fetched through `pool` and marked dirty for `txn`; it is returned as the
    /// only modified page.
    pub fn insert_tuple(
        &self,
        pool: &BufferPool,
        txn: TransactionId,
        tuple: &mut Tuple,
    ) -> StorageResult<Vec<PageRef>> {
        let _insert_guard = self.insert_lock.lock();
        self.desc.validate(tuple.fields())?;

        let page_number = match self.first_free_page() {
            Some(page_number) => page_number,
            None => self.allocate_page()?,
        };
        let pid = PageId::new(self.table_id, page_number);
        let page = pool.get_page(txn, pid, Permissions::ReadWrite)?;

        {
            let mut guard = page.write();
            if !guard.has_free_slots() {
                // directory was stale; fix it so the next insert moves on
                self.set_free(page_number, false);
                return Err(StorageError::PageFull(pid));
            }

            guard.mark_dirty(true, txn);
            guard.insert_tuple(tuple)?;
            self.set_free(page_number, guard.has_free_slots());
        }

        Ok(vec![page])
    }

    /// Remove `tuple` from the page its record id points at
    pub fn delete_tuple(
        &self,
        pool: &BufferPool,
        txn: TransactionId,
        tuple: &Tuple,
    ) -> StorageResult<Vec<PageRef>> {
        let rid = tuple.record_id().ok_or(StorageError::MissingRecordId)?;
        if rid.page_id.table_id() != self.table_id {
            return Err(StorageError::WrongTable {
                page_id: rid.page_id,
                table_id: self.table_id,
            });
        }

        let page = pool.get_page(txn, rid.page_id, Permissions::ReadWrite)?;
        {
            let mut guard = page.write();
            if !guard.is_slot_used(rid.slot) {
                return Err(StorageError::InvalidSlot(rid));
            }

            guard.mark_dirty(true, txn);
            guard.delete_tuple(rid)?;
            self.set_free(rid.page_id.page_number(), true);
        }

        Ok(vec![page])
    }

    /// Iterate over every tuple in the file, page by page through `pool`
    pub fn iter<'a>(&'a self, pool: &'a BufferPool, txn: TransactionId) -> HeapFileIter<'a> {
        HeapFileIter {
            file: self,
            pool,
            txn,
            next_page: 0,
            cursor: None,
        }
    }
}

/// Restartable scan over a [`HeapFile`]. Pages are fetched read-only through
/// the buffer pool one at a time; pages holding no tuples yield nothing.
pub struct HeapFileIter<'a> {
    file: &'a HeapFile,
    pool: &'a BufferPool,
    txn: TransactionId,
    next_page: u32,
    /// Page being read and the next slot to look at
    cursor: Option<(PageRef, SlotId)>,
}

impl HeapFileIter<'_> {
    /// Drop the current page and start over before page 0
    pub fn rewind(&mut self) {
        self.cursor = None;
        self.next_page = 0;
    }
}

impl Iterator for HeapFileIter<'_> {
    type Item = StorageResult<Tuple>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some((page, slot)) = &mut self.cursor {
                let guard = page.read();
                while *slot < guard.num_slots() {
                    let current = *slot;
                    *slot += 1;
                    if guard.is_slot_used(current) {
                        return Some(guard.tuple(current));
                    }
                }
                drop(guard);
                self.cursor = None;
            }

            let num_pages = match self.file.num_pages() {
                Ok(num_pages) => num_pages,
                Err(e) => return Some(Err(e)),
            };
            if self.next_page >= num_pages {
                return None;
            }

            let pid = PageId::new(self.file.table_id, self.next_page);
            self.next_page += 1;
            match self.pool.get_page(self.txn, pid, Permissions::ReadOnly) {
                Ok(page) => self.cursor = Some((page, 0)),
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

/// Pages spanned by `len` bytes, counting a trailing partial page
fn page_count(len: u64, page_size: usize) -> StorageResult<u32> {
    let pages = len.div_ceil(page_size as u64);
    u32::try_from(pages).map_err(|_| StorageError::FileTooLarge { pages })
}
