pub mod error;
pub mod log_macros;
pub mod page;
pub mod undo;

pub use error::{AggProgramError, ErrorContext, StorageError, StorageResult};
pub use page::{LocalKey, Lsn, Page, PageHeader, PageType, FREE_CLASSES, PAGE_SIZE_BYTES, PAGE_SIZE_WORDS};
pub use undo::{UndoRecord, UndoRecordType};
