//! Disk Page Allocator.

use std::collections::HashMap;

use fragstore_common::error::{ErrorContext, StorageError, StorageResult};
use fragstore_common::{LocalKey, Lsn, Page, UndoRecord, UndoRecordType};
use fragstore_extent::{ExtentId, FragmentExtents};

use crate::slot::{FixedSlotLayout, RowSlotAllocator};
use crate::traits::{GetPageRequest, Pager, PageRequestFlags, TablespaceManager};

pub type PageSlotId = u32;

/// Which per-class list a [`PageSlot`] currently lives in: resident pages
/// writers can use right away, versus pages whose fetch is still in
/// flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotList {
    Dirty,
    Requested,
}

#[derive(Debug, Clone)]
pub struct PageSlot {
    pub key: LocalKey,
    list: SlotList,
    class: usize,
    pub free_space: u32,
    pub uncommitted_used_space: u32,
    pub extent_info_ptr: ExtentId,
    pub restart_seq: u32,
    pub rows: RowSlotAllocator,
}

impl PageSlot {
    fn class(&self) -> usize {
        self.class
    }
}

pub struct DiskPageAllocator {
    pub table_id: u32,
    pub fragment_id: u32,
    pub extents: FragmentExtents,
    slots: Vec<PageSlot>,
    key_to_slot: HashMap<LocalKey, PageSlotId>,
    dirty_pages: [Vec<PageSlotId>; 4],
    page_requests: [Vec<PageSlotId>; 4],
    unmap_pages: Vec<PageSlotId>,
    layout: FixedSlotLayout,
    restart_seq: u32,
    latest_log_group_lsn: Lsn,
}

impl DiskPageAllocator {
    pub fn new(table_id: u32, fragment_id: u32, extents: FragmentExtents, layout: FixedSlotLayout, restart_seq: u32) -> Self {
        Self {
            table_id,
            fragment_id,
            extents,
            slots: Vec::new(),
            key_to_slot: HashMap::new(),
            dirty_pages: Default::default(),
            page_requests: Default::default(),
            unmap_pages: Vec::new(),
            layout,
            restart_seq,
            latest_log_group_lsn: Lsn::ZERO,
        }
    }

    pub fn slot(&self, id: PageSlotId) -> &PageSlot {
        &self.slots[id as usize]
    }

    fn move_to_class(&mut self, id: PageSlotId, class: usize) {
        let old_class = self.slots[id as usize].class();
        if self.slots[id as usize].list == SlotList::Dirty {
            self.dirty_pages[old_class].retain(|&x| x != id);
        }
        self.dirty_pages[class].push(id);
        self.slots[id as usize].list = SlotList::Dirty;
        self.slots[id as usize].class = class;
    }

    /// Translates `sz` to a free-class index, one step lower for
    /// variable-sized rows.
    fn class_for_size(&self, sz: u32, variable_sized: bool) -> usize {
        let base = self.extents.calc_page_free_bits(sz.saturating_sub(1));
        if variable_sized {
            base.saturating_sub(1)
        } else {
            base
        }
    }

    /// Whether the current insertion extent still has a free page of
    /// class `idx` or better (i.e. as least as much free space as
    /// requested), without going through the free matrix.
    fn extent_can_serve(&self, extent_id: ExtentId, idx: usize) -> bool {
        match self.extents.get(extent_id).free_page_count.iter().position(|&n| n > 0) {
            Some(pos) => pos <= idx,
            None => false,
        }
    }

    /// Finds or fetches a page with enough free space for a new row of
    /// size `sz` and charges `sz` to its `uncommitted_used_space`.
    pub async fn disk_page_prealloc(
        &mut self,
        pager: &dyn Pager,
        tablespace: &dyn TablespaceManager,
        sz: u32,
        variable_sized: bool,
    ) -> StorageResult<PageSlotId> {
        let idx = self.class_for_size(sz, variable_sized);

        // Step 2: a page already resident and writable.
        for class in 0..=idx {
            if let Some(&slot_id) = self.dirty_pages[class].first() {
                self.charge_uncommitted(slot_id, sz);
                return Ok(slot_id);
            }
        }

        // Step 3: a page whose fetch is already in flight.
        for class in 0..=idx {
            if let Some(&slot_id) = self.page_requests[class].first() {
                self.charge_uncommitted(slot_id, sz);
                return Ok(slot_id);
            }
        }

        // Step 4: allocate from the current insertion extent if it still
        // has room, else place it back in the free matrix and rotate to a
        // replacement (or a brand new extent on a matrix miss).
        let extent_id = match self.extents.current_extent() {
            Some(id) if self.extent_can_serve(id, idx) => id,
            _ => match self.extents.find_extent_for_size(sz, variable_sized) {
                Some(found) => {
                    self.extents.make_current(found);
                    found
                }
                None => {
                    let (key, extent_no, page_count) = tablespace.alloc_extent(self.table_id, self.fragment_id)?;
                    let new_id = self.extents.create_extent(key, extent_no, page_count);
                    self.extents.make_current(new_id);
                    new_id
                }
            },
        };
        let extent_key = self.extents.get(extent_id).key;
        let page_key = tablespace.alloc_page_from_extent(extent_key, idx)?;

        // Reserve the slot and track it as a request in flight before
        // awaiting the fetch, so a second caller wanting the same size
        // class lands in step 3 above instead of racing a duplicate
        // extent/page lookup.
        let slot = PageSlot {
            key: page_key,
            list: SlotList::Requested,
            class: idx,
            free_space: self.extents.page_free_bits_map()[0],
            uncommitted_used_space: sz,
            extent_info_ptr: extent_id,
            restart_seq: self.restart_seq,
            rows: RowSlotAllocator::default(),
        };
        let slot_id = self.slots.len() as PageSlotId;
        self.slots.push(slot);
        self.key_to_slot.insert(page_key, slot_id);
        self.page_requests[idx].push(slot_id);

        // Step 5: fetch (or zero-initialise) the page.
        let request = GetPageRequest {
            key: page_key,
            table_id: self.table_id,
            fragment_id: self.fragment_id,
            flags: PageRequestFlags::ALLOC_REQ | PageRequestFlags::EMPTY_PAGE,
        };
        let mut page = pager.get_page(request).await?;
        self.disk_page_prealloc_initial_callback(&mut page, extent_id, self.restart_seq);
        self.disk_page_prealloc_callback(slot_id, self.extents.page_free_bits_map()[0]);

        Ok(slot_id)
    }

    fn charge_uncommitted(&mut self, slot_id: PageSlotId, sz: u32) {
        let slot = &mut self.slots[slot_id as usize];
        slot.uncommitted_used_space += sz;
        let new_class = self.extents.calc_page_free_bits(slot.free_space.saturating_sub(slot.uncommitted_used_space));
        if new_class != slot.class() as usize {
            self.move_to_class(slot_id, new_class);
        }
    }

    /// `disk_page_prealloc_initial_callback`: zero the header
    /// and stamp identity fields on a freshly empty page.
    fn disk_page_prealloc_initial_callback(&self, page: &mut Page, extent_info_ptr: ExtentId, restart_seq: u32) {
        let key = page.header.key();
        page.words.fill(0);
        page.header = fragstore_common::PageHeader {
            page_lsn: self.latest_log_group_lsn,
            page_type: fragstore_common::PageType::Tup,
            file_no: key.file_no,
            page_no: key.page_no,
            table_id: self.table_id,
            fragment_id: self.fragment_id,
            extent_no: self.extents.get(extent_info_ptr).extent_no,
            extent_info_ptr,
            restart_seq,
            create_table_version: 0,
            ndb_version: 1,
        };
    }

    /// `disk_page_prealloc_callback`: reconciles a
    /// previously-outstanding page's actual free space against the
    /// estimate used when it was requested, and moves it into the dirty
    /// list.
    pub fn disk_page_prealloc_callback(&mut self, slot_id: PageSlotId, actual_free_space: u32) {
        let slot = &mut self.slots[slot_id as usize];
        let old_class = slot.class();
        slot.free_space = actual_free_space;
        let new_class = self.extents.calc_page_free_bits(actual_free_space.saturating_sub(slot.uncommitted_used_space));
        self.page_requests[old_class].retain(|&x| x != slot_id);
        self.dirty_pages[new_class].push(slot_id);
        let slot = &mut self.slots[slot_id as usize];
        slot.list = SlotList::Dirty;
        slot.class = new_class;
    }

    /// `disk_page_alloc`: carves a fixed-size row out of a
    /// prealloc'd page and produces the corresponding `Alloc` UNDO record.
    pub fn disk_page_alloc(&mut self, slot_id: PageSlotId, page: &mut Page, row: &[u32]) -> StorageResult<(u16, UndoRecord)> {
        let sz = row.len() as u32;
        {
            let slot = &mut self.slots[slot_id as usize];
            if slot.free_space < slot.uncommitted_used_space {
                return Err(StorageError::InvariantViolation {
                    reason: "free_space < uncommitted_used_space before alloc",
                    ctx: ErrorContext::new().with_page(slot.key.file_no, slot.key.page_no),
                });
            }
            slot.uncommitted_used_space = slot.uncommitted_used_space.saturating_sub(sz);
        }

        let idx = self.slots[slot_id as usize].rows.alloc();
        self.layout.write_row(page, idx, row);

        let lsn = page.header.page_lsn;
        page.header.page_lsn = Lsn(lsn.0 + 1);

        let old_class = self.slots[slot_id as usize].class();
        let old_free = self.slots[slot_id as usize].free_space;
        let new_free = old_free.saturating_sub(sz);
        self.slots[slot_id as usize].free_space = new_free;
        let new_class = self.extents.calc_page_free_bits(new_free);
        if new_class != old_class {
            self.extents
                .apply_page_class_change(self.slots[slot_id as usize].extent_info_ptr, old_class, new_class, new_free);
            self.move_to_class(slot_id, new_class);
        }

        let key = self.slots[slot_id as usize].key;
        Ok((
            idx,
            UndoRecord {
                record_type: UndoRecordType::TupAlloc,
                lsn: page.header.page_lsn.0,
                page: key,
                page_idx: idx,
                offset: 0,
                image: Vec::new(),
                table_id: self.table_id,
                fragment_id: self.fragment_id,
                lcp_id: 0,
                local_lcp_id: 0,
            },
        ))
    }

    /// `disk_page_free`: releases a row, carrying the full row
    /// image in the UNDO record so replay can restore it.
    pub fn disk_page_free(&mut self, slot_id: PageSlotId, page: &mut Page, idx: u16) -> StorageResult<UndoRecord> {
        let image = self.layout.read_row(page, idx);
        self.layout.clear_row(page, idx);
        self.slots[slot_id as usize].rows.free(idx);

        let row_words = self.layout.fix_header_size_words as u32;
        let old_class = self.slots[slot_id as usize].class();
        let old_free = self.slots[slot_id as usize].free_space;
        let new_free = old_free + row_words;
        self.slots[slot_id as usize].free_space = new_free;
        let new_class = self.extents.calc_page_free_bits(new_free);
        if new_class != old_class {
            self.extents
                .apply_page_class_change(self.slots[slot_id as usize].extent_info_ptr, old_class, new_class, new_free);
            self.move_to_class(slot_id, new_class);
        }

        let lsn = page.header.page_lsn;
        page.header.page_lsn = Lsn(lsn.0 + 1);

        let key = self.slots[slot_id as usize].key;
        Ok(UndoRecord {
            record_type: UndoRecordType::TupFree,
            lsn: page.header.page_lsn.0,
            page: key,
            page_idx: idx,
            offset: 0,
            image,
            table_id: self.table_id,
            fragment_id: self.fragment_id,
            lcp_id: 0,
            local_lcp_id: 0,
        })
    }

    /// `disk_page_abort_prealloc`: gives back reserved
    /// uncommitted space.
    pub fn disk_page_abort_prealloc(&mut self, slot_id: PageSlotId, sz: u32) {
        let slot = &mut self.slots[slot_id as usize];
        slot.uncommitted_used_space = slot.uncommitted_used_space.saturating_sub(sz);
        let new_class = self.extents.calc_page_free_bits(slot.free_space.saturating_sub(slot.uncommitted_used_space));
        if new_class != slot.class() {
            self.move_to_class(slot_id, new_class);
        }
    }

    /// `restart_setup_page`: first access to a page in a new
    /// process lifetime binds it back to its extent and reconciles
    /// committed/uncommitted free bits.
    pub fn restart_setup_page(&mut self, slot_id: PageSlotId, tablespace: &dyn TablespaceManager, current_restart_seq: u32) {
        let slot = &mut self.slots[slot_id as usize];
        if slot.restart_seq == current_restart_seq {
            return;
        }
        let committed_class = tablespace.get_page_free_bits(slot.key);
        let estimated_class = slot.class();
        if committed_class != estimated_class {
            log::warn!(
                target: "fragstore::disk_alloc",
                "restart_setup_page: committed class {committed_class} != estimated {estimated_class} for {}",
                slot.key
            );
        }
        slot.restart_seq = current_restart_seq;
    }

    pub fn lookup(&self, key: LocalKey) -> Option<PageSlotId> {
        self.key_to_slot.get(&key).copied()
    }

    /// Drops a page once it has no more rows and isn't worth keeping
    /// resident, notifying the pager and tablespace manager so both can
    /// release their own bookkeeping for it.
    pub fn unmap_page(&mut self, slot_id: PageSlotId, pager: &dyn Pager, tablespace: &dyn TablespaceManager) {
        let slot = &self.slots[slot_id as usize];
        let class = slot.class();
        let key = slot.key;
        self.dirty_pages[class].retain(|&x| x != slot_id);
        self.page_requests[class].retain(|&x| x != slot_id);
        self.key_to_slot.remove(&key);
        self.unmap_pages.push(slot_id);

        pager.unmap_page_callback(false, key, self.unmap_pages.len() as u32);
        tablespace.unmap_page(key);
        pager.unmap_page_callback(true, key, self.unmap_pages.len() as u32);
    }
}

#[cfg(test)]
mod tests {
    use std::future::Future;
    use std::pin::Pin;
    use std::task::{Context, Poll, RawWaker, RawWakerVTable, Waker};

    use super::*;
    use fragstore_common::LocalKey;
    use fragstore_extent::FragmentExtents;

    /// `get_page` in these tests never actually awaits anything, so a
    /// busy-poll executor is enough to drive it without pulling in an
    /// async runtime crate the rest of this workspace has no other use
    /// for.
    fn block_on<F: Future>(mut fut: F) -> F::Output {
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
            Ok((LocalKey::new(1, 100), 0, 32))
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

    fn new_allocator() -> DiskPageAllocator {
        let extents = FragmentExtents::new([u32::MAX, 6000, 3000, 1000, 0], [8191, 4096, 1365, 0]);
        DiskPageAllocator::new(7, 3, extents, FixedSlotLayout { fix_header_size_words: 16 }, 1)
    }

    /// Hands out a fresh extent key on every call, so rotation tests can
    /// tell which extent a page actually came from.
    struct CountingTablespace {
        next_page_no: std::cell::Cell<u32>,
    }

    impl TablespaceManager for CountingTablespace {
        fn alloc_extent(&self, _table_id: u32, _fragment_id: u32) -> StorageResult<(LocalKey, u32, u32)> {
            let page_no = self.next_page_no.get();
            self.next_page_no.set(page_no + 1);
            Ok((LocalKey::new(1, page_no), page_no, 32))
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

    #[test]
    fn alloc_then_free_round_trip_restores_free_space() {
        let mut alloc = new_allocator();
        let pager = FakePager;
        let tablespace = FakeTablespace;

        let slot_id = block_on(alloc.disk_page_prealloc(&pager, &tablespace, 16, false)).unwrap();
        let mut page = Page::new_empty(alloc.slot(slot_id).key);

        let row = vec![42u32; 16];
        let (idx, _undo) = alloc.disk_page_alloc(slot_id, &mut page, &row).unwrap();
        assert_eq!(idx, 0);

        let free_before = alloc.slot(slot_id).free_space;
        let _free_undo = alloc.disk_page_free(slot_id, &mut page, idx).unwrap();
        let free_after = alloc.slot(slot_id).free_space;
        assert_eq!(free_after, free_before + 16);
        assert!(page.words[0..16].iter().all(|&w| w == 0));
    }

    #[test]
    fn prealloc_rotates_off_a_saturated_current_extent() {
        let mut alloc = new_allocator();
        let pager = FakePager;
        let tablespace = CountingTablespace { next_page_no: std::cell::Cell::new(0) };

        let first_slot = block_on(alloc.disk_page_prealloc(&pager, &tablespace, 8191, false)).unwrap();
        let first_extent = alloc.slot(first_slot).extent_info_ptr;

        // Drain every free page in the extent out of class 0 so the
        // current-extent fast path can no longer serve a class-0 request.
        for _ in 0..32 {
            alloc.extents.apply_page_class_change(first_extent, 0, 3, 0);
        }

        let second_slot = block_on(alloc.disk_page_prealloc(&pager, &tablespace, 8191, false)).unwrap();
        let second_extent = alloc.slot(second_slot).extent_info_ptr;

        assert_ne!(first_extent, second_extent);
        assert_eq!(alloc.extents.current_extent(), Some(second_extent));
    }
}
