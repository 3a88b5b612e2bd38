use ahash::{AHashMap, AHashSet, RandomState};
use lru::LruCache;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tracing::{debug, trace, warn};

use super::error::{StorageError, StorageResult};
use super::page_id::{PageId, TableId};
use super::{DEFAULT_POOL_PAGES, PageRef};
use crate::catalog::Catalog;
use crate::lock::{ConcurrencyControl, NoLocking};
use crate::transaction::{Permissions, TransactionId};
use crate::tuple::Tuple;
use crate::wal::WriteAheadLog;

type PageCache = LruCache<PageId, PageRef, RandomState>;

/// Fixed-capacity cache of heap pages shared by every request thread.
///
/// Each cached page has exactly one [`PageRef`]; repeated `get_page` calls for
/// the same page return clones of the same `Arc` while it stays cached.
///
/// Dirty pages are never evicted, nor are pages a caller still holds a
/// handle to. Flushing a dirty page first logs its
/// before/after images to the write-ahead log and forces the log, and only
/// then writes the page to its heap file.
///
/// Victims are chosen in admission order: cache hits use `peek`, so the cache
/// order is never touched after a page is pushed.
pub struct BufferPool {
    capacity: usize,
    catalog: Arc<Catalog>,
    wal: Arc<dyn WriteAheadLog>,
    locks: Arc<dyn ConcurrencyControl>,
    /// Page identity map; hits take the read lock, admission/eviction/flush
    /// take the write lock
    pages: RwLock<PageCache>,
    /// Pages each transaction has dirtied and that are not yet flushed
    dirtied: Mutex<AHashMap<TransactionId, AHashSet<PageId>>>,
}

impl BufferPool {
    /// Create a buffer pool holding up to [`DEFAULT_POOL_PAGES`] pages
    pub fn new(catalog: Arc<Catalog>, wal: Arc<dyn WriteAheadLog>) -> Self {
        Self::with_capacity(catalog, wal, DEFAULT_POOL_PAGES)
    }

    pub fn with_capacity(catalog: Arc<Catalog>, wal: Arc<dyn WriteAheadLog>, capacity: usize) -> Self {
        assert!(capacity > 0, "buffer pool capacity must be positive");
        Self {
            capacity,
            catalog,
            wal,
            locks: Arc::new(NoLocking),
            pages: RwLock::new(LruCache::unbounded_with_hasher(RandomState::new())),
            dirtied: Mutex::new(AHashMap::new()),
        }
    }

    /// Replace the default [`NoLocking`] concurrency control
    pub fn with_concurrency_control(mut self, locks: Arc<dyn ConcurrencyControl>) -> Self {
        self.locks = locks;
        self
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of pages currently cached
    pub fn len(&self) -> usize {
        self.pages.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.read().is_empty()
    }

    pub fn is_cached(&self, pid: PageId) -> bool {
        self.pages.read().contains(&pid)
    }

    /// Cached page ids, next eviction candidate first
    pub fn cached_pages(&self) -> Vec<PageId> {
        self.pages.read().iter().rev().map(|(pid, _)| *pid).collect()
    }

    /// Pages `txn` has dirtied that have not been flushed since
    pub fn dirty_pages(&self, txn: TransactionId) -> Vec<PageId> {
        let mut pids: Vec<PageId> = self
            .dirtied
            .lock()
            .get(&txn)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        pids.sort();
        pids
    }

    /// Fetch a page on behalf of `txn`, loading it from its heap file on a
    /// miss. A full cache evicts one clean, unheld page first; if there is
    /// none this fails with `BufferPoolFull`.
    pub fn get_page(
        &self,
        txn: TransactionId,
        pid: PageId,
        perm: Permissions,
    ) -> StorageResult<PageRef> {
        self.locks.acquire(txn, pid, perm)?;

        if let Some(page) = self.pages.read().peek(&pid) {
            trace!(%pid, "cache hit");
            return Ok(Arc::clone(page));
        }

        let mut pages = self.pages.write();
        // another thread may have admitted it while we waited
        if let Some(page) = pages.peek(&pid) {
            trace!(%pid, "cache hit");
            return Ok(Arc::clone(page));
        }

        let file = self.catalog.database_file(pid.table_id())?;
        let page = Arc::new(RwLock::new(file.read_page(pid)?));

        if pages.len() >= self.capacity {
            self.evict_locked(&mut pages)?;
        }
        pages.push(pid, Arc::clone(&page));
        debug!(%pid, %txn, cached = pages.len(), "cache miss, page admitted");
        Ok(page)
    }

    /// Insert `tuple` into `table_id` on behalf of `txn`. The pages the heap
    /// file modified are marked dirty and recorded against `txn`; the tuple
    /// carries its new record id afterwards.
    pub fn insert_tuple(
        &self,
        txn: TransactionId,
        table_id: TableId,
        tuple: &mut Tuple,
    ) -> StorageResult<()> {
        let file = self.catalog.database_file(table_id)?;
        let modified = file.insert_tuple(self, txn, tuple)?;
        self.mark_modified(txn, &modified);
        Ok(())
    }

    /// Delete `tuple` (located by its record id) on behalf of `txn`
    pub fn delete_tuple(&self, txn: TransactionId, tuple: &Tuple) -> StorageResult<()> {
        let rid = tuple.record_id().ok_or(StorageError::MissingRecordId)?;
        let file = self.catalog.database_file(rid.page_id.table_id())?;
        let modified = file.delete_tuple(self, txn, tuple)?;
        self.mark_modified(txn, &modified);
        Ok(())
    }

    /// Record pages the heap file already marked dirty in `txn`'s dirty set.
    /// A page flushed in the meantime is clean again and is left out.
    pub(super) fn mark_modified(&self, txn: TransactionId, pages: &[PageRef]) {
        for page in pages {
            let guard = page.read();
            if guard.is_dirty() == Some(txn) {
                self.dirtied.lock().entry(txn).or_default().insert(guard.id());
            }
        }
    }

    /// Write `pid` to disk if it is cached and dirty
    pub fn flush_page(&self, pid: PageId) -> StorageResult<()> {
        let pages = self.pages.write();
        match pages.peek(&pid) {
            Some(page) => self.write_back(page),
            None => Ok(()),
        }
    }

    /// Write every dirty cached page to disk.
    ///
    /// This pushes uncommitted changes to the heap files, so it is only fit
    /// for bulk loads, tests and shutdown.
    pub fn flush_all_pages(&self) -> StorageResult<()> {
        let pages = self.pages.write();
        for (_, page) in pages.iter() {
            self.write_back(page)?;
        }
        Ok(())
    }

    /// Write every page `txn` has dirtied
    pub fn flush_pages(&self, txn: TransactionId) -> StorageResult<()> {
        let pids = self.dirty_pages(txn);
        let pages = self.pages.write();
        for pid in pids {
            if let Some(page) = pages.peek(&pid) {
                self.write_back(page)?;
            }
        }
        Ok(())
    }

    /// Log and write a dirty page, then mark it clean. Caller holds the cache
    /// lock.
    fn write_back(&self, page: &PageRef) -> StorageResult<()> {
        let mut guard = page.write();
        let Some(txn) = guard.is_dirty() else {
            return Ok(());
        };
        let pid = guard.id();

        self.wal
            .log_write(txn, pid, guard.before_image(), guard.page_data())?;
        self.wal.force()?;
        self.catalog.database_file(pid.table_id())?.write_page(&guard)?;
        guard.mark_dirty(false, txn);
        // still under the latch so a concurrent re-dirty is not forgotten
        self.forget_dirty(pid);
        drop(guard);

        debug!(%pid, %txn, "flushed page");
        Ok(())
    }

    fn forget_dirty(&self, pid: PageId) {
        self.dirtied.lock().retain(|_, pids| {
            pids.remove(&pid);
            !pids.is_empty()
        });
    }

    /// Evict one clean page and return its id
    pub fn evict_page(&self) -> StorageResult<PageId> {
        let mut pages = self.pages.write();
        self.evict_locked(&mut pages)
    }

    fn evict_locked(&self, pages: &mut PageCache) -> StorageResult<PageId> {
        // Oldest first. A page is pinned while any handle besides the cache's
        // own is alive; no new handle can appear while we hold the cache lock.
        let victim = pages
            .iter()
            .rev()
            .find(|(_, page)| {
                Arc::strong_count(page) == 1
                    && page
                        .try_read()
                        .is_some_and(|guard| guard.is_dirty().is_none())
            })
            .map(|(pid, _)| *pid);

        let Some(pid) = victim else {
            warn!(
                capacity = self.capacity,
                cached = pages.len(),
                "no clean unpinned page to evict"
            );
            return Err(StorageError::BufferPoolFull {
                capacity: self.capacity,
            });
        };

        pages.pop(&pid);
        debug!(%pid, "evicted page");
        Ok(pid)
    }

    /// Drop `pid` from the cache without writing it back
    pub fn discard_page(&self, pid: PageId) {
        if self.pages.write().pop(&pid).is_some() {
            debug!(%pid, "discarded page");
        }
        self.forget_dirty(pid);
    }

    pub fn release_page(&self, txn: TransactionId, pid: PageId) {
        self.locks.release(txn, pid);
    }

    pub fn holds_lock(&self, txn: TransactionId, pid: PageId) -> bool {
        self.locks.holds(txn, pid)
    }

    /// Finish `txn`, releasing its locks. Dirty pages stay cached until they
    /// are flushed or discarded.
    pub fn transaction_complete(&self, txn: TransactionId, commit: bool) -> StorageResult<()> {
        debug!(%txn, commit, "transaction complete");
        self.locks.commit_or_abort(txn, commit)
    }
}
