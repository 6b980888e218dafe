//! Root crate wiring the data-plane subsystems together: the page
//! memory manager, extent catalog, disk page allocator, UNDO replay, and
//! the aggregation interpreter/client. Each subsystem lives in its own
//! `fragstore-*` crate; this crate composes them into the caller-facing
//! shapes a storage node actually drives — a [`fragment::Fragment`] for
//! scan-with-aggregation, [`node::StorageNode`] for process-wide setup,
//! and [`restart`] for the restart replay loop.

pub mod fragment;
pub mod node;
pub mod restart;

pub use fragment::Fragment;
pub use node::StorageNode;

pub use fragstore_agg_client::{AggregatorBuilder, ColumnDescriptor, ResultMerger, TableDescriptor};
pub use fragstore_agg_vm::{AggProgram, Interpreter, RowSource};
pub use fragstore_common::{LocalKey, Lsn, Page, StorageError, StorageResult};
pub use fragstore_disk::{DiskPageAllocator, Pager, TablespaceManager};
pub use fragstore_extent::FragmentExtents;
pub use fragstore_pmm::{PageMemoryManager, PmmConfig, PrioClass};
pub use fragstore_topology::{RrGroupConfig, Topology};
pub use fragstore_undo::UndoReplay;
