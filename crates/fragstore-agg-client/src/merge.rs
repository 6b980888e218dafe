//! Result merging at the API client. Folds batches arriving from
//! multiple fragments into one GROUP BY result table, keyed by the raw
//! group-key byte string the interpreter emits.

use std::collections::BTreeMap;

use fragstore_agg_vm::{arithmetic, AggOp, RegValue, Register, ResultItem};
use fragstore_common::error::{ErrorContext, StorageError, StorageResult};

/// Accumulates per-fragment partial aggregates into final GROUP BY
/// results (component F). One instance serves one aggregator
/// program instance across all fragments of a scan.
pub struct ResultMerger {
    agg_ops: Vec<AggOp>,
    groups: BTreeMap<Vec<u8>, Vec<Register>>,
    no_group: Option<Vec<Register>>,
    has_groups: bool,
}

impl ResultMerger {
    pub fn new(agg_ops: Vec<AggOp>, has_groups: bool) -> Self {
        Self {
            agg_ops,
            groups: BTreeMap::new(),
            no_group: None,
            has_groups,
        }
    }

    /// Merges one fragment's decoded batch into the running totals.
    pub fn merge_batch(&mut self, items: Vec<ResultItem>) -> StorageResult<()> {
        if self.has_groups {
            for item in items {
                match self.groups.get_mut(&item.group_key) {
                    Some(existing) => merge_slots(&self.agg_ops, existing, &item.slots)?,
                    None => {
                        self.groups.insert(item.group_key, item.slots);
                    }
                }
            }
        } else if let Some(item) = items.into_iter().next() {
            match &mut self.no_group {
                Some(existing) => merge_slots(&self.agg_ops, existing, &item.slots)?,
                None => self.no_group = Some(item.slots),
            }
        }
        Ok(())
    }

    /// Final `{group_key -> result_slots}` table.
    pub fn into_results(self) -> Vec<(Vec<u8>, Vec<Register>)> {
        if self.has_groups {
            self.groups.into_iter().collect()
        } else {
            self.no_group.into_iter().map(|slots| (Vec::new(), slots)).collect()
        }
    }
}

/// Combines `incoming` into `existing` slot-by-slot following
/// `agg_ops[i]`'s opcode: `Sum`/`Count` add, `Max`/`Min`
/// compare; a NULL operand is absorbed by the non-null side; mismatched
/// types between the two sides are an internal error.
fn merge_slots(agg_ops: &[AggOp], existing: &mut [Register], incoming: &[Register]) -> StorageResult<()> {
    for (i, (slot, incoming)) in existing.iter_mut().zip(incoming.iter()).enumerate() {
        if incoming.is_null {
            continue;
        }
        if slot.is_null {
            *slot = *incoming;
            continue;
        }
        if !same_type_family(slot.value, incoming.value) {
            return Err(StorageError::InvariantViolation {
                reason: "aggregate result type mismatch while merging fragment batches",
                ctx: ErrorContext::new(),
            });
        }
        let op = agg_ops.get(i).copied().unwrap_or(AggOp::Sum);
        slot.value = match op {
            AggOp::Sum | AggOp::Count => arithmetic::add(slot.value, incoming.value)?,
            AggOp::Max => {
                if arithmetic::compare(incoming.value, slot.value) == std::cmp::Ordering::Greater {
                    incoming.value
                } else {
                    slot.value
                }
            }
            AggOp::Min => {
                if arithmetic::compare(incoming.value, slot.value) == std::cmp::Ordering::Less {
                    incoming.value
                } else {
                    slot.value
                }
            }
        };
    }
    Ok(())
}

fn same_type_family(a: RegValue, b: RegValue) -> bool {
    matches!(
        (a, b),
        (RegValue::Int64(_), RegValue::Int64(_))
            | (RegValue::Uint64(_), RegValue::Uint64(_))
            | (RegValue::Double(_), RegValue::Double(_))
            | (RegValue::Int64(_), RegValue::Uint64(_))
            | (RegValue::Uint64(_), RegValue::Int64(_))
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(key: &[u8], sum: i64, count: u64) -> ResultItem {
        ResultItem {
            group_key: key.to_vec(),
            slots: vec![Register::int64(sum), Register::uint64(count)],
        }
    }

    /// Two fragments' partial results merge into one per group.
    #[test]
    fn multi_fragment_merge_sums_and_counts() {
        let mut merger = ResultMerger::new(vec![AggOp::Sum, AggOp::Count], true);
        merger.merge_batch(vec![item(&[1], 15, 2), item(&[3], 9, 1)]).unwrap();
        merger.merge_batch(vec![item(&[1], 7, 1)]).unwrap();

        let results: BTreeMap<_, _> = merger.into_results().into_iter().collect();
        let g1 = &results[&vec![1u8]];
        assert_eq!(g1[0].value, RegValue::Int64(22));
        assert_eq!(g1[1].value, RegValue::Uint64(3));
        let g3 = &results[&vec![3u8]];
        assert_eq!(g3[0].value, RegValue::Int64(9));
        assert_eq!(g3[1].value, RegValue::Uint64(1));
    }

    #[test]
    fn null_slot_is_absorbed_by_non_null_peer() {
        let mut merger = ResultMerger::new(vec![AggOp::Max], true);
        merger
            .merge_batch(vec![ResultItem {
                group_key: vec![9],
                slots: vec![Register::null_of(RegValue::Undefined)],
            }])
            .unwrap();
        merger
            .merge_batch(vec![ResultItem {
                group_key: vec![9],
                slots: vec![Register::int64(5)],
            }])
            .unwrap();
        let results: BTreeMap<_, _> = merger.into_results().into_iter().collect();
        assert_eq!(results[&vec![9u8]][0].value, RegValue::Int64(5));
    }
}
