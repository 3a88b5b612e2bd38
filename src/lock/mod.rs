//! Transactional page locking seam.
//!
//! The buffer pool asks a [`ConcurrencyControl`] for permission before handing
//! out a page and tells it when a transaction finishes. [`NoLocking`] grants
//! everything and is what the pool uses unless another manager is plugged in.

use crate::storage::{PageId, StorageResult};
use crate::transaction::{Permissions, TransactionId};

pub trait ConcurrencyControl: Send + Sync {
    /// Acquire `perm` on `pid` for `txn`, blocking or aborting as the policy
    /// dictates. An abort is reported as `StorageError::TransactionAborted`.
    fn acquire(&self, txn: TransactionId, pid: PageId, perm: Permissions) -> StorageResult<()>;

    /// Release whatever `txn` holds on `pid`
    fn release(&self, txn: TransactionId, pid: PageId);

    fn holds(&self, txn: TransactionId, pid: PageId) -> bool;

    /// Release every lock held by `txn` once it commits or aborts
    fn commit_or_abort(&self, txn: TransactionId, commit: bool) -> StorageResult<()>;
}

/// Grants every request and never holds anything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoLocking;

impl ConcurrencyControl for NoLocking {
    fn acquire(&self, _txn: TransactionId, _pid: PageId, _perm: Permissions) -> StorageResult<()> {
        Ok(())
    }

    fn release(&self, _txn: TransactionId, _pid: PageId) {}

    fn holds(&self, _txn: TransactionId, _pid: PageId) -> bool {
        false
    }

    fn commit_or_abort(&self, _txn: TransactionId, _commit: bool) -> StorageResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::TableId;

    #[test]
    fn test_no_locking_grants_everything() {
        let locks = NoLocking;
        let txn = TransactionId::next();
        let pid = PageId::new(TableId(1), 0);

        assert!(locks.acquire(txn, pid, Permissions::ReadWrite).is_ok());
        assert!(!locks.holds(txn, pid));
        locks.release(txn, pid);
        assert!(locks.commit_or_abort(txn, false).is_ok());
    }
}
