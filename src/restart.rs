//! Restart-time UNDO replay driver: on restart, log records are read
//! backwards, each referenced page is fetched via the pager, and
//! compensating edits are applied in LSN order per page. This module is
//! the thin caller-facing loop around [`fragstore_undo::UndoReplay`]
//! that a restart driver runs once per log segment.

use fragstore_common::{LocalKey, Page, StorageResult, UndoRecord};
use fragstore_disk::{Pager, TablespaceManager};
use fragstore_undo::UndoReplay;

/// Drives one restart's worth of UNDO log records through `replay`,
/// fetching and patching each referenced page via `pager`/`tablespace`
/// as records are dispatched.
pub async fn run_restart_undo(
    replay: &mut UndoReplay,
    pager: &dyn Pager,
    tablespace: &dyn TablespaceManager,
    records: impl IntoIterator<Item = UndoRecord>,
) -> StorageResult<()> {
    for record in records {
        replay.disk_restart_undo(pager, tablespace, record).await?;
    }
    Ok(())
}

/// Applies a page's already-drained pending queue once its fetch
/// callback fires out of band from `run_restart_undo`'s loop: either the
/// callback executes immediately, or the record was enqueued to await
/// it.
pub fn apply_page_callback(replay: &mut UndoReplay, key: LocalKey, page: &mut Page, tablespace: &dyn TablespaceManager) {
    replay.disk_restart_undo_callback(key, page, tablespace);
}

#[cfg(test)]
mod tests {
    use super::*;
    use fragstore_common::{LocalKey, Lsn, PageType, StorageError, UndoRecordType};
    use fragstore_disk::{FixedSlotLayout, GetPageRequest};

    struct FakePager;

    #[async_trait::async_trait]
    impl Pager for FakePager {
        async fn get_page(&self, request: GetPageRequest) -> StorageResult<Page> {
            Ok(Page::new_empty(request.key))
        }
        fn update_lsn(&self, _key: LocalKey, _lsn: Lsn) {}
        fn set_lsn(&self, _key: LocalKey, _lsn: Lsn) {}
        fn init_page_entry(&self, _request: GetPageRequest) {}
        fn unmap_page_callback(&self, _when_after: bool, _key: LocalKey, _dirty_count: u32) {}
    }

    struct FakeTablespace;

    impl TablespaceManager for FakeTablespace {
        fn alloc_extent(&self, _table_id: u32, _fragment_id: u32) -> StorageResult<(LocalKey, u32, u32)> {
            Err(StorageError::ResourceExhausted("not used in this test"))
        }
        fn alloc_page_from_extent(&self, extent_key: LocalKey, _class: usize) -> StorageResult<LocalKey> {
            Ok(extent_key)
        }
        fn get_page_free_bits(&self, _key: LocalKey) -> usize {
            0
        }
        fn update_page_free_bits(&self, _key: LocalKey, _class: usize) {}
        fn unmap_page(&self, _key: LocalKey) {}
        fn restart_undo_page_free_bits(&self, _key: LocalKey, _class: usize) {}
    }

    fn block_on<F: std::future::Future>(mut fut: F) -> F::Output {
        use std::pin::Pin;
        use std::task::{Context, Poll, RawWaker, RawWakerVTable, Waker};
        fn noop_clone(_: *const ()) -> RawWaker {
            RawWaker::new(std::ptr::null(), &VTABLE)
        }
        fn noop(_: *const ()) {}
        static VTABLE: RawWakerVTable = RawWakerVTable::new(noop_clone, noop, noop, noop);
        let waker = unsafe { Waker::from_raw(RawWaker::new(std::ptr::null(), &VTABLE)) };
        let mut cx = Context::from_waker(&waker);
        let mut fut = unsafe { Pin::new_unchecked(&mut fut) };
        loop {
            if let Poll::Ready(out) = fut.as_mut().poll(&mut cx) {
                return out;
            }
        }
    }

    #[test]
    fn restart_driver_applies_a_single_page_alloc_undo() {
        let layout = FixedSlotLayout { fix_header_size_words: 16 };
        let mut replay = UndoReplay::new(layout);
        // A real restore target the fragment hasn't reached yet, so its
        // marker still applies pending edits; `RNIL` would mean "no LCP
        // to restore to" and skip replay entirely.
        replay.disk_restart_lcp_id(1, 1, 5, 2);

        let key = LocalKey::new(1, 100);
        let mut page = Page::new_empty(key);
        page.header.page_type = PageType::Tup;
        layout.write_row(&mut page, 0, &[9u32; 16]);
        page.header.page_lsn = Lsn(5);

        let record = UndoRecord {
            record_type: UndoRecordType::TupAlloc,
            lsn: 6,
            page: key,
            page_idx: 0,
            offset: 0,
            image: Vec::new(),
            table_id: 1,
            fragment_id: 1,
            lcp_id: 0,
            local_lcp_id: 0,
        };

        let pager = FakePager;
        let tablespace = FakeTablespace;
        block_on(run_restart_undo(&mut replay, &pager, &tablespace, vec![record])).unwrap();
        apply_page_callback(&mut replay, key, &mut page, &tablespace);

        assert!(layout.read_row(&page, 0).iter().all(|&w| w == 0));
    }
}
