//! UNDO replay dispatch and application.

use std::collections::HashSet;

use fragstore_common::{fatal, ErrorContext, Lsn, Page, StorageResult, UndoRecord, UndoRecordType};
use fragstore_disk::{FixedSlotLayout, GetPageRequest, Pager, PageRequestFlags, TablespaceManager};

use crate::marker::{FragmentMarker, RNIL};
use crate::queue::PendingUndoQueue;

pub struct UndoReplay {
    queue: PendingUndoQueue,
    fragments: std::collections::HashMap<(u32, u32), FragmentMarker>,
    dropped_tables: HashSet<u32>,
    layout: FixedSlotLayout,
}

impl UndoReplay {
    pub fn new(layout: FixedSlotLayout) -> Self {
        Self {
            queue: PendingUndoQueue::new(),
            fragments: std::collections::HashMap::new(),
            dropped_tables: HashSet::new(),
            layout,
        }
    }

    /// Seeds a fragment's restore target before replay begins for it,
    /// `lcp_id = RNIL` meaning "no LCP to restore to".
    pub fn disk_restart_lcp_id(&mut self, table_id: u32, fragment_id: u32, lcp_id: u32, local_lcp_id: u32) {
        self.fragments.insert((table_id, fragment_id), FragmentMarker::new(lcp_id, local_lcp_id));
    }

    fn marker_mut(&mut self, table_id: u32, fragment_id: u32) -> &mut FragmentMarker {
        self.fragments
            .entry((table_id, fragment_id))
            .or_insert_with(|| FragmentMarker::new(RNIL, RNIL))
    }

    /// `disk_restart_undo(lsn, type, ptr, len)`: dispatches one decoded
    /// log record, either updating marker/drop state directly or queuing
    /// (and, on first sight of a page, fetching) a page-targeted edit.
    pub async fn disk_restart_undo(&mut self, pager: &dyn Pager, tablespace: &dyn TablespaceManager, record: UndoRecord) -> StorageResult<()> {
        match record.record_type {
            UndoRecordType::Lcp | UndoRecordType::LcpFirst | UndoRecordType::LocalLcp | UndoRecordType::LocalLcpFirst => {
                let record_type = record.record_type;
                let lcp_id = record.lcp_id;
                let local_lcp_id = record.local_lcp_id;
                self.marker_mut(record.table_id, record.fragment_id)
                    .observe_lcp_marker(record_type, lcp_id, local_lcp_id);
                Ok(())
            }
            UndoRecordType::TupDrop => {
                self.dropped_tables.insert(record.table_id);
                for (&(table_id, _), marker) in self.fragments.iter_mut() {
                    if table_id == record.table_id {
                        marker.observe_drop();
                    }
                }
                Ok(())
            }
            UndoRecordType::End => {
                if !self.queue.is_empty() {
                    fatal!("UNDO replay reached END with a non-empty pending queue", ErrorContext::new());
                }
                Ok(())
            }
            _ => {
                let key = record.page;
                if self.queue.has_bucket(key) {
                    self.queue.push(record)?;
                    return Ok(());
                }
                let table_id = record.table_id;
                let fragment_id = record.fragment_id;
                self.queue.push(record)?;

                let request = GetPageRequest {
                    key,
                    table_id,
                    fragment_id,
                    flags: PageRequestFlags::UNDO_REQ,
                };
                let mut page = pager.get_page(request).await?;
                self.disk_restart_undo_callback(key, &mut page, tablespace);
                Ok(())
            }
        }
    }

    /// `disk_restart_undo_callback`: drains a page's queued records in
    /// arrival order and applies each compensating edit.
    pub fn disk_restart_undo_callback(&mut self, key: fragstore_common::LocalKey, page: &mut Page, tablespace: &dyn TablespaceManager) {
        let bucket = self.queue.take_bucket(key);
        for record in bucket {
            if self.dropped_tables.contains(&record.table_id) {
                continue;
            }
            let marker_applies = self
                .fragments
                .get(&(record.table_id, record.fragment_id))
                .map(|m| m.should_apply())
                .unwrap_or(true);

            let on_page_lsn_ahead = page.header.page_lsn.0 >= record.lsn;
            if !marker_applies || on_page_lsn_ahead {
                if !record.is_update_part_continuation() {
                    let class = tablespace.get_page_free_bits(key);
                    tablespace.restart_undo_page_free_bits(key, class);
                }
                continue;
            }

            if record.is_page_targeted() {
                self.apply_edit(page, &record);
            }

            page.header.page_lsn = Lsn(record.lsn.saturating_sub(1));
            let class = tablespace.get_page_free_bits(key);
            tablespace.restart_undo_page_free_bits(key, class);
        }
    }

    fn apply_edit(&self, page: &mut Page, record: &UndoRecord) {
        match record.record_type {
            UndoRecordType::TupAlloc => {
                self.layout.clear_row(page, record.page_idx);
            }
            UndoRecordType::TupUpdate | UndoRecordType::TupFree | UndoRecordType::TupFreePart | UndoRecordType::TupFreeVarPart => {
                self.layout.write_row(page, record.page_idx, &record.image);
            }
            UndoRecordType::TupFirstUpdatePart | UndoRecordType::TupFirstUpdateVarPart => {
                self.write_at_offset(page, record.page_idx, 0, &record.image);
            }
            UndoRecordType::TupUpdatePart | UndoRecordType::TupUpdateVarPart => {
                self.write_at_offset(page, record.page_idx, record.offset, &record.image);
            }
            UndoRecordType::TupDrop | UndoRecordType::Lcp | UndoRecordType::LcpFirst | UndoRecordType::LocalLcp | UndoRecordType::LocalLcpFirst | UndoRecordType::End => {}
        }
    }

    fn write_at_offset(&self, page: &mut Page, idx: u16, offset: u16, image: &[u32]) {
        let mut row = self.layout.read_row(page, idx);
        let start = offset as usize;
        let end = (start + image.len()).min(row.len());
        row[start..end].copy_from_slice(&image[..end - start]);
        self.layout.write_row(page, idx, &row);
    }
}
