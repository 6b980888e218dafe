//! External collaborator interfaces (pager, tablespace manager). Both
//! are out-of-scope collaborators — this crate only defines the seam
//! it calls through, the way a `PageAlloc`/`Zone` trait pair defines a
//! seam for a concrete allocator to plug into.

use async_trait::async_trait;
use bitflags::bitflags;
use fragstore_common::{LocalKey, Lsn, Page, StorageResult};

bitflags! {
    /// Flags accompanying a `get_page` request.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PageRequestFlags: u32 {
        const ALLOC_REQ    = 1 << 0;
        const EMPTY_PAGE   = 1 << 1;
        const DIRTY_HEADER = 1 << 2;
        const UNDO_REQ     = 1 << 3;
        const ABORT_REQ    = 1 << 4;
    }
}

#[derive(Debug, Clone, Copy)]
pub struct GetPageRequest {
    pub key: LocalKey,
    pub table_id: u32,
    pub fragment_id: u32,
    pub flags: PageRequestFlags,
}

/// The page backing store. `get_page` is modelled as an `async fn`
/// instead of an explicit pending/callback protocol: a single-threaded
/// task runtime with a future-returning `get_page` composes naturally,
/// and the callbacks become continuations on the same task.
#[async_trait]
pub trait Pager: Send + Sync {
    /// Fetches (and, with `ALLOC_REQ`/`EMPTY_PAGE`, initialises) a page.
    async fn get_page(&self, request: GetPageRequest) -> StorageResult<Page>;

    fn update_lsn(&self, key: LocalKey, lsn: Lsn);
    fn set_lsn(&self, key: LocalKey, lsn: Lsn);
    fn init_page_entry(&self, request: GetPageRequest);

    /// `when`: `false` = before unmap, `true` = after. Lets the disk
    /// allocator move pages between per-class dirty lists and the unmap
    /// list and refresh tablespace bits.
    fn unmap_page_callback(&self, when_after: bool, key: LocalKey, dirty_count: u32);
}

/// The tablespace/extent manager collaborator. Takes a
/// `LocalKey` plus the configured free-space class (0..3) for every
/// operation.
pub trait TablespaceManager: Send + Sync {
    fn alloc_extent(&self, table_id: u32, fragment_id: u32) -> StorageResult<(LocalKey, u32, u32)>;
    fn alloc_page_from_extent(&self, extent_key: LocalKey, class: usize) -> StorageResult<LocalKey>;
    fn get_page_free_bits(&self, key: LocalKey) -> usize;
    fn update_page_free_bits(&self, key: LocalKey, class: usize);
    fn unmap_page(&self, key: LocalKey);
    fn restart_undo_page_free_bits(&self, key: LocalKey, class: usize);
}
