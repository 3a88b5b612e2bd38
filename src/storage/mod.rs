mod buffer_pool;
mod error;
mod heap_file;
mod heap_page;
mod page_id;


use parking_lot::RwLock;
use std::sync::Arc;

pub use buffer_pool::BufferPool;
pub use error::{StorageError, StorageResult};
pub use heap_file::{HeapFile, HeapFileIter};
pub use heap_page::HeapPage;
pub use page_id::{PageId, RecordId, SlotId, TableId};

/// Size of a page in bytes unless configured otherwise
pub const DEFAULT_PAGE_SIZE: usize = 4096;

/// Number of pages the buffer pool caches unless configured otherwise
pub const DEFAULT_POOL_PAGES: usize = 50;

/// Shared handle to the single cached instance of a page. The `RwLock` is the
/// page latch.
pub type PageRef = Arc<RwLock<HeapPage>>;
