//! Write-ahead log hook used by the buffer pool.
//!
//! The buffer pool only needs two things from a log: accept a page's
//! before/after images for a transaction, and make everything accepted so far
//! durable. [`LogFile`] is a minimal append-only implementation of that
//! contract; recovery itself lives elsewhere.

use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::trace;

use crate::storage::{PageId, StorageError, StorageResult, TableId};
use crate::transaction::TransactionId;

/// Sink for page images written ahead of the data page itself
pub trait WriteAheadLog: Send + Sync {
    /// Append an update record holding `before` and `after` images of `page_id`
    fn log_write(
        &self,
        txn: TransactionId,
        page_id: PageId,
        before: &[u8],
        after: &[u8],
    ) -> StorageResult<()>;

    /// Make every record appended so far durable
    fn force(&self) -> StorageResult<()>;
}

/// One update record read back from a [`LogFile`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub txn: TransactionId,
    pub page_id: PageId,
    pub before: Vec<u8>,
    pub after: Vec<u8>,
}

// txn (8) + table (4) + page (4) + image length (4)
const RECORD_HEADER_SIZE: usize = 20;

impl LogRecord {
    fn encode(txn: TransactionId, page_id: PageId, before: &[u8], after: &[u8]) -> Vec<u8> {
        let mut buf = Vec::with_capacity(RECORD_HEADER_SIZE + before.len() + after.len());
        buf.extend_from_slice(&txn.as_u64().to_le_bytes());
        buf.extend_from_slice(&page_id.table_id().0.to_le_bytes());
        buf.extend_from_slice(&page_id.page_number().to_le_bytes());
        buf.extend_from_slice(&(before.len() as u32).to_le_bytes());
        buf.extend_from_slice(before);
        buf.extend_from_slice(after);
        buf
    }

    /// Decode the record at the start of `bytes`, returning it and its length
    fn decode(bytes: &[u8]) -> Option<(Self, usize)> {
        let header = bytes.get(..RECORD_HEADER_SIZE)?;
        let txn = u64::from_le_bytes(header[0..8].try_into().ok()?);
        let table = u32::from_le_bytes(header[8..12].try_into().ok()?);
        let page = u32::from_le_bytes(header[12..16].try_into().ok()?);
        let image_len = u32::from_le_bytes(header[16..20].try_into().ok()?) as usize;

        let total = RECORD_HEADER_SIZE + 2 * image_len;
        let body = bytes.get(RECORD_HEADER_SIZE..total)?;
        let (before, after) = body.split_at(image_len);
        let record = Self {
            txn: TransactionId::from_raw(txn),
            page_id: PageId::new(TableId(table), page),
            before: before.to_vec(),
            after: after.to_vec(),
        };
        Some((record, total))
    }
}

/// Append-only log file of page update records
pub struct LogFile {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
}

impl LogFile {
    /// Open (or create) the log at `path`; new records are appended
    pub fn open<P: AsRef<Path>>(path: P) -> StorageResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&path)?;

        Ok(Self {
            path,
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read back every complete record in the log
    pub fn records(&self) -> StorageResult<Vec<LogRecord>> {
        let mut bytes = Vec::new();
        {
            let mut writer = self.writer.lock();
            writer.flush()?;
            let file = writer.get_mut();
            file.seek(SeekFrom::Start(0))?;
            file.read_to_end(&mut bytes)?;
        }

        let mut records = Vec::new();
        let mut offset = 0;
        while offset < bytes.len() {
            let (record, len) = LogRecord::decode(&bytes[offset..])
                .ok_or(StorageError::CorruptLog(offset as u64))?;
            records.push(record);
            offset += len;
        }
        Ok(records)
    }
}

impl WriteAheadLog for LogFile {
    fn log_write(
        &self,
        txn: TransactionId,
        page_id: PageId,
        before: &[u8],
        after: &[u8],
    ) -> StorageResult<()> {
        if before.len() != after.len() {
            return Err(StorageError::InvalidPageSize {
                expected: before.len(),
                actual: after.len(),
            });
        }

        trace!(%txn, %page_id, "append update record");
        let record = LogRecord::encode(txn, page_id, before, after);
        self.writer.lock().write_all(&record)?;
        Ok(())
    }

    fn force(&self) -> StorageResult<()> {
        let mut writer = self.writer.lock();
        writer.flush()?;
        writer.get_ref().sync_data()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup_log() -> (TempDir, LogFile) {
        let temp_dir = tempfile::tempdir().unwrap();
        let log = LogFile::open(temp_dir.path().join("wal.log")).unwrap();
        (temp_dir, log)
    }

    #[test]
    fn test_append_and_read_back() {
        let (_temp_dir, log) = setup_log();
        let txn = TransactionId::from_raw(9);
        let pid = PageId::new(TableId(3), 4);

        log.log_write(txn, pid, &[0, 0, 0], &[1, 2, 3]).unwrap();
        log.log_write(txn, pid, &[1, 2, 3], &[4, 5, 6]).unwrap();
        log.force().unwrap();

        let records = log.records().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].txn, txn);
        assert_eq!(records[0].page_id, pid);
        assert_eq!(records[0].before, vec![0, 0, 0]);
        assert_eq!(records[1].after, vec![4, 5, 6]);
    }

    #[test]
    fn test_reopen_appends() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("wal.log");
        let pid = PageId::new(TableId(1), 0);
        {
            let log = LogFile::open(&path).unwrap();
            log.log_write(TransactionId::from_raw(1), pid, &[0], &[1])
                .unwrap();
            log.force().unwrap();
        }

        let log = LogFile::open(&path).unwrap();
        log.log_write(TransactionId::from_raw(2), pid, &[1], &[2])
            .unwrap();
        let records = log.records().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].txn, TransactionId::from_raw(2));
    }

    #[test]
    fn test_mismatched_images_rejected() {
        let (_temp_dir, log) = setup_log();
        let result = log.log_write(
            TransactionId::from_raw(1),
            PageId::new(TableId(1), 0),
            &[0, 0],
            &[1],
        );
        assert!(matches!(result, Err(StorageError::InvalidPageSize { .. })));
    }

    #[test]
    fn test_truncated_log_is_corrupt() {
        let (_temp_dir, log) = setup_log();
        log.log_write(
            TransactionId::from_raw(1),
            PageId::new(TableId(1), 0),
            &[0; 8],
            &[1; 8],
        )
        .unwrap();
        log.force().unwrap();

        let file = OpenOptions::new().write(true).open(log.path()).unwrap();
        file.set_len((RECORD_HEADER_SIZE + 4) as u64).unwrap();
        assert!(matches!(log.records(), Err(StorageError::CorruptLog(0))));
    }
}
