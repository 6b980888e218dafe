//! Wires the disk page allocator and the aggregation interpreter
//! together into the per-fragment object a storage node actually drives.
//!
//! A `Fragment` composes `fragstore-extent`/`fragstore-disk` for storage
//! and `fragstore-agg-vm` for the scan-with-aggregation path behind one
//! caller-facing handle.

use fragstore_agg_vm::{encode_batches, AggProgram, Interpreter, ResultItem, RowSource};
use fragstore_common::{StorageError, StorageResult};
use fragstore_disk::DiskPageAllocator;

/// A storage node's local piece of a partitioned table: its disk
/// allocation state plus whatever aggregation programs are currently
/// scanning it.
pub struct Fragment {
    pub table_id: u32,
    pub fragment_id: u32,
    pub disk: DiskPageAllocator,
}

impl Fragment {
    pub fn new(disk: DiskPageAllocator) -> Self {
        Self {
            table_id: disk.table_id,
            fragment_id: disk.fragment_id,
            disk,
        }
    }

    /// Runs `program` over every row `rows` yields, emitting the encoded
    /// result batches a node would ship back to the API client. A row
    /// whose aggregation overflows is dropped and logged rather than
    /// aborting the whole scan, since the other rows' accumulated GROUP
    /// BY state is still good.
    pub fn scan_with_aggregation(&self, program: &AggProgram, rows: &[Box<dyn RowSource>]) -> StorageResult<Vec<Vec<u32>>> {
        let mut interp = Interpreter::new(program);
        for row in rows {
            match interp.execute_row(row.as_ref()) {
                Ok(()) => {}
                Err(StorageError::ArithmeticOverflow) => {
                    log::warn!(target: "fragstore::fragment", "dropping row: arithmetic overflow during aggregation");
                }
                Err(e) => return Err(e),
            }
        }
        let items: Vec<ResultItem> = interp
            .finish()
            .into_iter()
            .map(|(group_key, slots)| ResultItem { group_key, slots })
            .collect();
        Ok(encode_batches(&items, program.group_cols.len() as u16, program.n_agg_results)?)
    }
}
