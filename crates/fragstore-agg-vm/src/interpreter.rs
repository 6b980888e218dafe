//! Per-row aggregation program execution.

use std::collections::BTreeMap;

use fragstore_common::{AggProgramError, StorageError, StorageResult};

use crate::arithmetic;
use crate::opcode::{AggOp, ArithOp, ColumnType};
use crate::program::{AggProgram, Instruction};
use crate::register::{decode_column, Register};

/// A source of column payload words for the row currently under the
/// cursor. Row layout (fixed-slot vs. variable) is the caller's
/// concern; the interpreter only ever asks for one column at a time.
pub trait RowSource {
    fn column_words(&self, col_id: u16) -> Option<&[u32]>;
}

const NUM_REGISTERS: usize = 16;

/// One GROUP BY bucket's accumulated aggregate slots, keyed by the
/// group's serialized column values.
#[derive(Debug, Clone, Default)]
struct GroupState {
    slots: Vec<Register>,
}

/// Executes a decoded [`AggProgram`] over a stream of rows, accumulating
/// aggregate results per GROUP BY key (or into a single accumulator when
/// the program declares no GROUP BY columns).
pub struct Interpreter<'p> {
    program: &'p AggProgram,
    groups: BTreeMap<Vec<u8>, GroupState>,
    no_group: GroupState,
    any_row_seen: bool,
}

impl<'p> Interpreter<'p> {
    pub fn new(program: &'p AggProgram) -> Self {
        Self {
            program,
            groups: BTreeMap::new(),
            no_group: GroupState {
                slots: vec![Register::undefined(); program.n_agg_results as usize],
            },
            any_row_seen: false,
        }
    }

    /// Executes the program's instruction stream against one row,
    /// folding the result into the row's GROUP BY bucket.
    pub fn execute_row(&mut self, row: &dyn RowSource) -> StorageResult<()> {
        self.any_row_seen = true;
        let mut regs = [Register::undefined(); NUM_REGISTERS];

        let key = self.group_key(row)?;
        let bucket = if self.program.group_cols.is_empty() {
            &mut self.no_group
        } else {
            self.groups.entry(key).or_insert_with(|| GroupState {
                slots: vec![Register::undefined(); self.program.n_agg_results as usize],
            })
        };

        for instr in &self.program.instructions {
            match *instr {
                Instruction::LoadColumn { col_type, reg, col_id } => {
                    regs[reg as usize] = load_column(row, col_type, col_id)?;
                }
                Instruction::LoadConst { col_type, reg, payload } => {
                    regs[reg as usize] = const_register(col_type, payload);
                }
                Instruction::Mov { reg_a, reg_b } => {
                    regs[reg_a as usize] = regs[reg_b as usize];
                }
                Instruction::Arith { op, reg_a, reg_b } => {
                    let a = regs[reg_a as usize];
                    let b = regs[reg_b as usize];
                    regs[reg_a as usize] = apply_arith(op, a, b)?;
                }
                Instruction::Aggregate { op, reg, agg_id } => {
                    let slot = bucket.slots.get_mut(agg_id as usize).ok_or(AggProgramError::AggregateIdOutOfRange)?;
                    apply_aggregate(op, slot, regs[reg as usize]);
                }
            }
        }
        Ok(())
    }

    /// Serializes the row's GROUP BY column values into a byte key whose
    /// natural `Ord` gives byte-wise lexicographic ordering of groups
    /// (each value big-endian, NULLs sorting before any value of the
    /// same column).
    fn group_key(&self, row: &dyn RowSource) -> StorageResult<Vec<u8>> {
        let mut key = Vec::new();
        for &col_id in &self.program.group_cols {
            match row.column_words(col_id) {
                None => key.push(0u8),
                Some(words) => {
                    key.push(1u8);
                    // `words` is stored low-word-first (the same convention
                    // `decode_column` reads); emit high-to-low so the byte
                    // key's natural `Ord` matches numeric order.
                    for w in words.iter().rev() {
                        key.extend_from_slice(&w.to_be_bytes());
                    }
                }
            }
        }
        Ok(key)
    }

    /// Finalizes execution, yielding one `(group_key, result_slots)` pair
    /// per GROUP BY bucket observed, or a single no-key pair when the
    /// program declares no GROUP BY columns and at least one row was
    /// scanned.
    pub fn finish(self) -> Vec<(Vec<u8>, Vec<Register>)> {
        if self.program.group_cols.is_empty() {
            if self.any_row_seen {
                vec![(Vec::new(), self.no_group.slots)]
            } else {
                Vec::new()
            }
        } else {
            self.groups.into_iter().map(|(k, v)| (k, v.slots)).collect()
        }
    }
}

fn load_column(row: &dyn RowSource, col_type: ColumnType, col_id: u16) -> StorageResult<Register> {
    match row.column_words(col_id) {
        None => Ok(Register::null_of(crate::register::RegValue::Undefined)),
        Some(words) => Ok(decode_column(col_type, words)),
    }
}

fn const_register(col_type: ColumnType, payload: u64) -> Register {
    match col_type {
        ColumnType::Double => Register::double(f64::from_bits(payload)),
        ColumnType::Int8
        | ColumnType::Int16
        | ColumnType::Int32
        | ColumnType::Int64 => Register::int64(payload as i64),
        ColumnType::Uint8 | ColumnType::Uint16 | ColumnType::Uint32 | ColumnType::Uint64 => Register::uint64(payload),
    }
}

/// Applies an arithmetic opcode, implementing the NULL-propagation rule
/// ("any NULL operand produces a NULL result") and the divide/modulo-by-
/// zero-is-NULL rule.
fn apply_arith(op: ArithOp, a: Register, b: Register) -> StorageResult<Register> {
    if a.is_null || b.is_null {
        return Ok(Register::null_of(a.value));
    }
    let zero_divisor = matches!(op, ArithOp::Div | ArithOp::DivInt | ArithOp::Mod) && crate::register::widen(b.value) == Some(0);
    if zero_divisor {
        return Ok(Register::null_of(a.value));
    }
    let value = match op {
        ArithOp::Plus => arithmetic::add(a.value, b.value)?,
        ArithOp::Minus => arithmetic::sub(a.value, b.value)?,
        ArithOp::Mul => arithmetic::mul(a.value, b.value)?,
        ArithOp::Div => arithmetic::true_div(a.value, b.value),
        ArithOp::DivInt => arithmetic::div_int(a.value, b.value)?,
        ArithOp::Mod => arithmetic::modulo(a.value, b.value)?,
    };
    Ok(Register { value, is_null: false })
}

/// Folds one row's register value into an aggregate slot: the first
/// non-null write initializes the slot's type from the operand; `Count`
/// initializes to unsigned zero regardless of operand type; a NULL
/// operand leaves `Sum`/`Max`/`Min` unchanged and never increments
/// `Count`.
fn apply_aggregate(op: AggOp, slot: &mut Register, operand: Register) {
    if op == AggOp::Count {
        if slot.is_null {
            *slot = Register::uint64(0);
        }
        if !operand.is_null {
            if let crate::register::RegValue::Uint64(n) = &mut slot.value {
                *n += 1;
            }
        }
        return;
    }

    if operand.is_null {
        return;
    }

    if slot.is_null {
        *slot = Register { value: operand.value, is_null: false };
        return;
    }

    let folded = match op {
        AggOp::Sum => arithmetic::add(slot.value, operand.value).unwrap_or(slot.value),
        AggOp::Max => {
            if arithmetic::compare(operand.value, slot.value) == std::cmp::Ordering::Greater {
                operand.value
            } else {
                slot.value
            }
        }
        AggOp::Min => {
            if arithmetic::compare(operand.value, slot.value) == std::cmp::Ordering::Less {
                operand.value
            } else {
                slot.value
            }
        }
        AggOp::Count => unreachable!("handled above"),
    };
    slot.value = folded;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opcode::AggOp;

    struct FakeRow {
        cols: BTreeMap<u16, Vec<u32>>,
    }

    impl RowSource for FakeRow {
        fn column_words(&self, col_id: u16) -> Option<&[u32]> {
            self.cols.get(&col_id).map(|v| v.as_slice())
        }
    }

    fn row(c1: i64, c2: Option<i64>) -> FakeRow {
        let mut cols = BTreeMap::new();
        cols.insert(1, vec![c1 as u32, (c1 >> 32) as u32]);
        if let Some(v) = c2 {
            cols.insert(2, vec![v as u32, (v >> 32) as u32]);
        }
        FakeRow { cols }
    }

    #[test]
    fn group_by_sum_matches_per_group_totals() {
        let program = AggProgram::new(
            1,
            vec![1],
            vec![
                Instruction::LoadColumn {
                    col_type: ColumnType::Int64,
                    reg: 0,
                    col_id: 2,
                },
                Instruction::Aggregate {
                    op: AggOp::Sum,
                    reg: 0,
                    agg_id: 0,
                },
            ],
        )
        .unwrap();

        let mut interp = Interpreter::new(&program);
        interp.execute_row(&row(1, Some(10))).unwrap();
        interp.execute_row(&row(2, Some(-3))).unwrap();
        interp.execute_row(&row(1, None)).unwrap();
        interp.execute_row(&row(1, Some(5))).unwrap();

        let mut results = interp.finish();
        results.sort_by(|a, b| a.0.cmp(&b.0));

        assert_eq!(results.len(), 2);
        let group1 = results.iter().find(|(k, _)| k.ends_with(&1i64.to_be_bytes())).unwrap();
        assert_eq!(group1.1[0].value, crate::register::RegValue::Int64(15));
        let group2 = results.iter().find(|(k, _)| k.ends_with(&2i64.to_be_bytes())).unwrap();
        assert_eq!(group2.1[0].value, crate::register::RegValue::Int64(-3));
    }

    #[test]
    fn no_group_by_emits_single_accumulator_once() {
        let program = AggProgram::new(
            1,
            Vec::new(),
            vec![
                Instruction::LoadColumn {
                    col_type: ColumnType::Int64,
                    reg: 0,
                    col_id: 2,
                },
                Instruction::Aggregate {
                    op: AggOp::Count,
                    reg: 0,
                    agg_id: 0,
                },
            ],
        )
        .unwrap();

        let mut interp = Interpreter::new(&program);
        interp.execute_row(&row(1, Some(10))).unwrap();
        interp.execute_row(&row(2, None)).unwrap();
        let results = interp.finish();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].1[0].value, crate::register::RegValue::Uint64(1));
    }
}
