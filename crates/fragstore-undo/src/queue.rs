//! Per-page pending UNDO queue: a hash keyed by `(file_no,
//! page_no)`, each bucket an ordered FIFO of records awaiting their
//! page's fetch.

use std::collections::{HashMap, VecDeque};

use fragstore_common::{LocalKey, StorageError, StorageResult, UndoRecord};

/// Strict upper bound on records awaiting application across all
/// buckets; queue overflow aborts replay.
pub const MAX_PENDING_UNDO_RECORDS: usize = 4096;

#[derive(Default)]
pub struct PendingUndoQueue {
    buckets: HashMap<LocalKey, VecDeque<UndoRecord>>,
    total: usize,
}

impl PendingUndoQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_bucket(&self, key: LocalKey) -> bool {
        self.buckets.contains_key(&key)
    }

    pub fn push(&mut self, record: UndoRecord) -> StorageResult<()> {
        if self.total >= MAX_PENDING_UNDO_RECORDS {
            return Err(StorageError::ResourceExhausted("UNDO replay pending queue"));
        }
        self.buckets.entry(record.page).or_default().push_back(record);
        self.total += 1;
        Ok(())
    }

    /// Removes and returns a page's bucket in arrival order, ready for
    /// `disk_restart_undo_callback` to drain.
    pub fn take_bucket(&mut self, key: LocalKey) -> VecDeque<UndoRecord> {
        let bucket = self.buckets.remove(&key).unwrap_or_default();
        self.total -= bucket.len();
        bucket
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    pub fn len(&self) -> usize {
        self.total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fragstore_common::UndoRecordType;

    fn record(page: LocalKey) -> UndoRecord {
        UndoRecord {
            record_type: UndoRecordType::TupAlloc,
            lsn: 1,
            page,
            page_idx: 0,
            offset: 0,
            image: Vec::new(),
            table_id: 1,
            fragment_id: 1,
            lcp_id: 0,
            local_lcp_id: 0,
        }
    }

    #[test]
    fn bucket_preserves_fifo_order_and_take_empties_it() {
        let key = LocalKey::new(1, 1);
        let mut queue = PendingUndoQueue::new();
        queue.push(record(key)).unwrap();
        queue.push(record(key)).unwrap();
        assert_eq!(queue.len(), 2);
        let bucket = queue.take_bucket(key);
        assert_eq!(bucket.len(), 2);
        assert!(queue.is_empty());
        assert!(!queue.has_bucket(key));
    }

    #[test]
    fn overflow_past_the_bound_fails() {
        let mut queue = PendingUndoQueue::new();
        for i in 0..MAX_PENDING_UNDO_RECORDS {
            queue.push(record(LocalKey::new(1, i as u32))).unwrap();
        }
        assert!(queue.push(record(LocalKey::new(1, 999_999))).is_err());
    }
}
