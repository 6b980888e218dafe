//! Result iteration: decodes a merged result table into a stream of
//! `(group_columns, result_slots)` pairs the caller can step through one
//! record at a time.

use fragstore_agg_vm::{decode_column, Register};
use fragstore_common::error::{ErrorContext, StorageError, StorageResult};

use crate::builder::TableDescriptor;

/// One decoded GROUP BY column value, or `None` for a NULL group key
/// component.
#[derive(Debug, Clone)]
pub struct GroupColumn {
    pub col_id: u16,
    pub value: Option<Register>,
}

/// One finished result: the GROUP BY column values that produced it (empty
/// for the no-group case) paired with its aggregate result slots.
#[derive(Debug, Clone)]
pub struct ResultRecord {
    pub group_columns: Vec<GroupColumn>,
    pub results: Vec<Register>,
}

/// Decodes every `(group_key, slots)` pair a [`crate::merge::ResultMerger`]
/// produced into iterable [`ResultRecord`]s, using `group_cols`/`table` to
/// know each key component's width and type.
pub fn prepare_results(table: &TableDescriptor, group_cols: &[u16], rows: Vec<(Vec<u8>, Vec<Register>)>) -> StorageResult<Vec<ResultRecord>> {
    rows.into_iter()
        .map(|(key, results)| {
            let group_columns = decode_group_key(table, group_cols, &key)?;
            Ok(ResultRecord { group_columns, results })
        })
        .collect()
}

fn decode_group_key(table: &TableDescriptor, group_cols: &[u16], key: &[u8]) -> StorageResult<Vec<GroupColumn>> {
    let mut pos = 0usize;
    let mut out = Vec::with_capacity(group_cols.len());
    for &col_id in group_cols {
        let col_type = table.column(col_id).ok_or(StorageError::InvariantViolation {
            reason: "group-by column id absent from table descriptor while decoding results",
            ctx: ErrorContext::new(),
        })?;
        let tag = *key.get(pos).ok_or(StorageError::InvariantViolation {
            reason: "group key truncated",
            ctx: ErrorContext::new(),
        })?;
        pos += 1;
        if tag == 0 {
            out.push(GroupColumn { col_id, value: None });
            continue;
        }
        let n_words = col_type.payload_words();
        let byte_len = n_words * 4;
        let bytes = key.get(pos..pos + byte_len).ok_or(StorageError::InvariantViolation {
            reason: "group key truncated",
            ctx: ErrorContext::new(),
        })?;
        pos += byte_len;

        // Written high-word-first by the interpreter's `group_key`
        // (`words.iter().rev()`); reverse back to low-word-first before
        // decoding.
        let mut words: Vec<u32> = bytes.chunks(4).map(|c| u32::from_be_bytes(c.try_into().unwrap())).collect();
        words.reverse();
        out.push(GroupColumn {
            col_id,
            value: Some(decode_column(col_type, &words)),
        });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{AggregatorBuilder, ColumnDescriptor};
    use fragstore_agg_vm::{ColumnType, Interpreter, RegValue, RowSource};
    use std::collections::BTreeMap as StdBTreeMap;

    struct FakeRow {
        cols: StdBTreeMap<u16, Vec<u32>>,
    }

    impl RowSource for FakeRow {
        fn column_words(&self, col_id: u16) -> Option<&[u32]> {
            self.cols.get(&col_id).map(|v| v.as_slice())
        }
    }

    #[test]
    fn group_key_round_trips_through_decode() {
        let table = TableDescriptor::new(vec![
            ColumnDescriptor { col_id: 1, col_type: ColumnType::Int64 },
            ColumnDescriptor { col_id: 2, col_type: ColumnType::Int64 },
        ]);
        let mut builder = AggregatorBuilder::new(&table);
        builder.group_by(1).unwrap();
        builder.load_column(0, 2).unwrap();
        builder.sum(0, 0).unwrap();
        let (program, _ops) = builder.finalize().unwrap();

        let mut cols = StdBTreeMap::new();
        cols.insert(1u16, vec![7u32, 0u32]);
        cols.insert(2u16, vec![10u32, 0u32]);
        let row = FakeRow { cols };

        let mut interp = Interpreter::new(&program);
        interp.execute_row(&row).unwrap();
        let rows = interp.finish();

        let records = prepare_results(&table, &program.group_cols, rows).unwrap();
        assert_eq!(records.len(), 1);
        let gc = &records[0].group_columns[0];
        assert_eq!(gc.col_id, 1);
        assert_eq!(gc.value.unwrap().value, RegValue::Int64(7));
        assert_eq!(records[0].results[0].value, RegValue::Int64(10));
    }

    #[test]
    fn null_group_column_decodes_to_none() {
        let table = TableDescriptor::new(vec![ColumnDescriptor { col_id: 1, col_type: ColumnType::Int64 }]);
        let records = prepare_results(&table, &[1], vec![(vec![0u8], vec![Register::int64(0)])]).unwrap();
        assert!(records[0].group_columns[0].value.is_none());
    }
}
