//! Page and extent-key data model.

/// Disk and buffer-cache pages are fixed at 32 KiB, addressed by
/// `(file_no, page_no)`.
pub const PAGE_SIZE_BYTES: usize = 32 * 1024;
pub const PAGE_SIZE_WORDS: usize = PAGE_SIZE_BYTES / 4;

/// Identity of a page or an extent's first page: `(file_no, page_no)`.
/// Hashable, as required of extent keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LocalKey {
    pub file_no: u32,
    pub page_no: u32,
}

impl LocalKey {
    pub const fn new(file_no: u32, page_no: u32) -> Self {
        Self { file_no, page_no }
    }
}

impl std::fmt::Display for LocalKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.file_no, self.page_no)
    }
}

/// A page LSN is stored on the wire as two 32-bit halves
/// but compared as a single monotonic 64-bit quantity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Lsn(pub u64);

impl Lsn {
    pub const ZERO: Lsn = Lsn(0);

    pub const fn from_halves(hi: u32, lo: u32) -> Self {
        Lsn(((hi as u64) << 32) | lo as u64)
    }

    pub const fn split(self) -> (u32, u32) {
        ((self.0 >> 32) as u32, self.0 as u32)
    }

    pub fn prev(self) -> Lsn {
        Lsn(self.0.saturating_sub(1))
    }
}

/// Header fields recorded on every page. `extent_info_ptr` is an arena
/// index into a fragment's extent pool rather than a raw pointer.
#[derive(Debug, Clone, Copy)]
pub struct PageHeader {
    pub page_lsn: Lsn,
    pub page_type: PageType,
    pub file_no: u32,
    pub page_no: u32,
    pub table_id: u32,
    pub fragment_id: u32,
    pub extent_no: u32,
    pub extent_info_ptr: u32,
    pub restart_seq: u32,
    pub create_table_version: u32,
    pub ndb_version: u32,
}

impl PageHeader {
    pub fn zeroed(key: LocalKey) -> Self {
        Self {
            page_lsn: Lsn::ZERO,
            page_type: PageType::Tup,
            file_no: key.file_no,
            page_no: key.page_no,
            table_id: u32::MAX,
            fragment_id: u32::MAX,
            extent_no: 0,
            extent_info_ptr: u32::MAX,
            restart_seq: 0,
            create_table_version: 0,
            ndb_version: 0,
        }
    }

    pub fn key(&self) -> LocalKey {
        LocalKey::new(self.file_no, self.page_no)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageType {
    Tup,
    TupVarPart,
    Overflow,
}

/// A 32 KiB page buffer: a header plus the word-addressed body. Row/slot
/// encoding lives in `fragstore-disk`; this crate only owns the shape every
/// component agrees on.
#[derive(Clone)]
pub struct Page {
    pub header: PageHeader,
    pub words: Box<[u32; PAGE_SIZE_WORDS]>,
}

impl Page {
    pub fn new_empty(key: LocalKey) -> Self {
        Self {
            header: PageHeader::zeroed(key),
            words: Box::new([0u32; PAGE_SIZE_WORDS]),
        }
    }

    pub fn key(&self) -> LocalKey {
        self.header.key()
    }
}

impl std::fmt::Debug for Page {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Page").field("header", &self.header).finish_non_exhaustive()
    }
}

/// The four free-space classes used throughout the allocator and the
/// extent catalog: 0 = empty, 1 = partially free, 2 = almost full,
/// 3 = full.
pub const FREE_CLASSES: usize = 4;

