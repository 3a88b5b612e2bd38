pub mod catalog;
pub mod config;
pub mod lock;
pub mod storage;
pub mod transaction;
pub mod tuple;
pub mod wal;

pub use catalog::{Catalog, CatalogError, CatalogResult};
pub use config::{ConfigError, ConfigResult, StorageConfig};
pub use lock::{ConcurrencyControl, NoLocking};
pub use storage::{
    BufferPool, DEFAULT_PAGE_SIZE, DEFAULT_POOL_PAGES, HeapFile, HeapFileIter, HeapPage, PageId,
    PageRef, RecordId, SlotId, StorageError, StorageResult, TableId,
};
pub use transaction::{Permissions, TransactionId};
pub use tuple::{Field, FieldDesc, FieldType, Tuple, TupleDesc, TupleError, TupleResult};
pub use wal::{LogFile, LogRecord, WriteAheadLog};
