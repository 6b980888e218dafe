pub mod disk;
pub mod slot;
pub mod traits;

pub use disk::{DiskPageAllocator, PageSlot, PageSlotId};
pub use slot::{FixedSlotLayout, RowSlotAllocator};
pub use traits::{GetPageRequest, Pager, PageRequestFlags, TablespaceManager};
