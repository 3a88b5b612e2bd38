use std::io;
use thiserror::Error;

use super::page_id::{PageId, RecordId, TableId};
use crate::transaction::TransactionId;
use crate::tuple::TupleError;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Buffer pool is full: no clean page to evict among {capacity} cached pages")]
    BufferPoolFull { capacity: usize },

    #[error("Tuple does not fit the table layout: {0}")]
    Tuple(#[from] TupleError),

    #[error("Transaction {0} aborted")]
    TransactionAborted(TransactionId),

    #[error("Table not found: {0}")]
    TableNotFound(TableId),

    #[error("Page {page_id} is beyond the end of the file ({num_pages} pages)")]
    PageOutOfRange { page_id: PageId, num_pages: u32 },

    #[error("Page {page_id} does not belong to {table_id}")]
    WrongTable { page_id: PageId, table_id: TableId },

    #[error("File spans {pages} pages, more than a page number can address")]
    FileTooLarge { pages: u64 },

    #[error("Page full: {0}")]
    PageFull(PageId),

    #[error("Invalid slot: {0}")]
    InvalidSlot(RecordId),

    #[error("Tuple has no record id")]
    MissingRecordId,

    #[error("Tuple of {tuple_size} bytes does not fit a {page_size}-byte page")]
    TupleTooLarge { tuple_size: usize, page_size: usize },

    #[error("Invalid page size: expected {expected}, got {actual}")]
    InvalidPageSize { expected: usize, actual: usize },

    #[error("Corrupt log record at offset {0}")]
    CorruptLog(u64),
}

pub type StorageResult<T> = Result<T, StorageError>;
