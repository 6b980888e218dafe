//! Fixed-size row slot bookkeeping within a page: fixed-format pages
//! store rows at a per-page fixed header size, one row per slot. The
//! directory-based variable-size page format is out of scope for this
//! crate's depth of modelling; only the row-index free list needed to
//! make UNDO alloc/free round-trip correctly is implemented.

use fragstore_common::Page;

#[derive(Debug, Clone, Copy)]
pub struct FixedSlotLayout {
    pub fix_header_size_words: usize,
}

impl FixedSlotLayout {
    fn offset(&self, idx: u16) -> usize {
        idx as usize * self.fix_header_size_words
    }

    pub fn write_row(&self, page: &mut Page, idx: u16, image: &[u32]) {
        let off = self.offset(idx);
        page.words[off..off + image.len()].copy_from_slice(image);
    }

    pub fn read_row(&self, page: &Page, idx: u16) -> Vec<u32> {
        let off = self.offset(idx);
        page.words[off..off + self.fix_header_size_words].to_vec()
    }

    pub fn clear_row(&self, page: &mut Page, idx: u16) {
        let off = self.offset(idx);
        page.words[off..off + self.fix_header_size_words].fill(0);
    }
}

/// Per-page row-index allocator: a monotonic high-water mark plus a LIFO
/// free list of reclaimed indices, the minimal shape of the real
/// `alloc_record`/`free_record` slot allocator.
#[derive(Debug, Clone, Default)]
pub struct RowSlotAllocator {
    next_idx: u16,
    free_list: Vec<u16>,
}

impl RowSlotAllocator {
    pub fn alloc(&mut self) -> u16 {
        if let Some(idx) = self.free_list.pop() {
            idx
        } else {
            let idx = self.next_idx;
            self.next_idx += 1;
            idx
        }
    }

    pub fn free(&mut self, idx: u16) {
        self.free_list.push(idx);
    }

    /// Re-initialises the allocator, used when `restart_setup_page`
    /// detects an older page format.
    pub fn reset(&mut self) {
        self.next_idx = 0;
        self.free_list.clear();
    }
}
