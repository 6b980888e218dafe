//! Program builder (API-side). Exposes instruction-emitting methods
//! (`LoadColumn`/`Add`/`Sum`/`GroupBy`/`Finalize`, …) that return
//! `Result` instead of a bool-plus-sticky-error-code, and produces a
//! [`fragstore_agg_vm::AggProgram`] instead of writing directly into a
//! caller-owned byte buffer.

use fragstore_agg_vm::{AggOp, AggProgram, ArithOp, ColumnType, Instruction};
use fragstore_common::AggProgramError;

use crate::result_batch_size::estimate_result_bytes;

/// One column of the table this aggregator runs against: its logical id
/// and its storage type, the minimum a builder needs to emit a correctly
/// typed `LoadColumn` instruction.
#[derive(Debug, Clone, Copy)]
pub struct ColumnDescriptor {
    pub col_id: u16,
    pub col_type: ColumnType,
}

/// The subset of a table's schema an aggregator builder needs: column id
/// to type lookup. Stands in for `NdbDictionary::Table`.
#[derive(Debug, Clone, Default)]
pub struct TableDescriptor {
    columns: Vec<ColumnDescriptor>,
}

impl TableDescriptor {
    pub fn new(columns: Vec<ColumnDescriptor>) -> Self {
        Self { columns }
    }

    pub fn column(&self, col_id: u16) -> Option<ColumnType> {
        self.columns.iter().find(|c| c.col_id == col_id).map(|c| c.col_type)
    }
}

const MAX_REGISTERS: u8 = 16;

/// Builds an aggregation program one instruction at a time: `LoadColumn`,
/// `LoadInt64`/`LoadUint64`/`LoadDouble`, `Mov`,
/// `Add`/`Minus`/`Mul`/`Div`/`DivInt`/`Mod`, `Sum`/`Max`/`Min`/`Count`,
/// `GroupBy`, `Finalize`. Each call appends exactly the instruction
/// words the wire format requires. Becomes unusable once any call
/// returns an error or [`Self::finalize`] has been called.
pub struct AggregatorBuilder<'t> {
    table: &'t TableDescriptor,
    group_cols: Vec<u16>,
    instructions: Vec<Instruction>,
    agg_ops: Vec<Option<AggOp>>,
    n_agg_results: u16,
    result_size_est: usize,
    poisoned: bool,
    finalized: bool,
}

impl<'t> AggregatorBuilder<'t> {
    pub fn new(table: &'t TableDescriptor) -> Self {
        Self {
            table,
            group_cols: Vec::new(),
            instructions: Vec::new(),
            agg_ops: Vec::new(),
            n_agg_results: 0,
            result_size_est: 0,
            poisoned: false,
            finalized: false,
        }
    }

    fn guard(&mut self) -> Result<(), AggProgramError> {
        if self.poisoned {
            return Err(AggProgramError::AlreadyFinalised);
        }
        if self.finalized {
            self.poisoned = true;
            return Err(AggProgramError::AlreadyFinalised);
        }
        Ok(())
    }

    fn fail<T>(&mut self, err: AggProgramError) -> Result<T, AggProgramError> {
        self.poisoned = true;
        Err(err)
    }

    fn check_reg(&mut self, reg: u8) -> Result<(), AggProgramError> {
        if reg >= MAX_REGISTERS {
            return self.fail(AggProgramError::RegisterOutOfRange);
        }
        Ok(())
    }

    /// Loads a column's value into `reg`, looking up its declared type
    /// from the table descriptor.
    pub fn load_column(&mut self, reg: u8, col_id: u16) -> Result<&mut Self, AggProgramError> {
        self.guard()?;
        self.check_reg(reg)?;
        let col_type = match self.table.column(col_id) {
            Some(t) => t,
            None => return self.fail(AggProgramError::UnsupportedColumnType),
        };
        self.instructions.push(Instruction::LoadColumn { col_type, reg, col_id });
        Ok(self)
    }

    pub fn load_int64(&mut self, reg: u8, value: i64) -> Result<&mut Self, AggProgramError> {
        self.guard()?;
        self.check_reg(reg)?;
        self.instructions.push(Instruction::LoadConst {
            col_type: ColumnType::Int64,
            reg,
            payload: value as u64,
        });
        Ok(self)
    }

    pub fn load_uint64(&mut self, reg: u8, value: u64) -> Result<&mut Self, AggProgramError> {
        self.guard()?;
        self.check_reg(reg)?;
        self.instructions.push(Instruction::LoadConst {
            col_type: ColumnType::Uint64,
            reg,
            payload: value,
        });
        Ok(self)
    }

    pub fn load_double(&mut self, reg: u8, value: f64) -> Result<&mut Self, AggProgramError> {
        self.guard()?;
        self.check_reg(reg)?;
        self.instructions.push(Instruction::LoadConst {
            col_type: ColumnType::Double,
            reg,
            payload: value.to_bits(),
        });
        Ok(self)
    }

    pub fn mov(&mut self, reg_a: u8, reg_b: u8) -> Result<&mut Self, AggProgramError> {
        self.guard()?;
        self.check_reg(reg_a)?;
        self.check_reg(reg_b)?;
        self.instructions.push(Instruction::Mov { reg_a, reg_b });
        Ok(self)
    }

    fn arith(&mut self, op: ArithOp, reg_a: u8, reg_b: u8) -> Result<&mut Self, AggProgramError> {
        self.guard()?;
        self.check_reg(reg_a)?;
        self.check_reg(reg_b)?;
        self.instructions.push(Instruction::Arith { op, reg_a, reg_b });
        Ok(self)
    }

    pub fn add(&mut self, reg_a: u8, reg_b: u8) -> Result<&mut Self, AggProgramError> {
        self.arith(ArithOp::Plus, reg_a, reg_b)
    }

    pub fn minus(&mut self, reg_a: u8, reg_b: u8) -> Result<&mut Self, AggProgramError> {
        self.arith(ArithOp::Minus, reg_a, reg_b)
    }

    pub fn mul(&mut self, reg_a: u8, reg_b: u8) -> Result<&mut Self, AggProgramError> {
        self.arith(ArithOp::Mul, reg_a, reg_b)
    }

    pub fn div(&mut self, reg_a: u8, reg_b: u8) -> Result<&mut Self, AggProgramError> {
        self.arith(ArithOp::Div, reg_a, reg_b)
    }

    pub fn div_int(&mut self, reg_a: u8, reg_b: u8) -> Result<&mut Self, AggProgramError> {
        self.arith(ArithOp::DivInt, reg_a, reg_b)
    }

    pub fn modulo(&mut self, reg_a: u8, reg_b: u8) -> Result<&mut Self, AggProgramError> {
        self.arith(ArithOp::Mod, reg_a, reg_b)
    }

    fn check_agg_and_reg(&mut self, agg_id: u16, reg: u8) -> Result<(), AggProgramError> {
        self.check_reg(reg)?;
        if agg_id as usize >= fragstore_agg_vm::MAX_AGG_N_RESULTS {
            return self.fail(AggProgramError::AggregateIdOutOfRange);
        }
        Ok(())
    }

    fn aggregate(&mut self, op: AggOp, agg_id: u16, reg: u8) -> Result<&mut Self, AggProgramError> {
        self.guard()?;
        self.check_agg_and_reg(agg_id, reg)?;
        if self.agg_ops.len() <= agg_id as usize {
            self.agg_ops.resize(agg_id as usize + 1, None);
        }
        self.agg_ops[agg_id as usize] = Some(op);
        self.instructions.push(Instruction::Aggregate { op, reg, agg_id });
        self.n_agg_results = self.n_agg_results.max(agg_id + 1);
        self.result_size_est += fragstore_agg_vm::AGG_RES_ITEM_BYTES;
        Ok(self)
    }

    pub fn sum(&mut self, agg_id: u16, reg: u8) -> Result<&mut Self, AggProgramError> {
        self.aggregate(AggOp::Sum, agg_id, reg)
    }

    pub fn max(&mut self, agg_id: u16, reg: u8) -> Result<&mut Self, AggProgramError> {
        self.aggregate(AggOp::Max, agg_id, reg)
    }

    pub fn min(&mut self, agg_id: u16, reg: u8) -> Result<&mut Self, AggProgramError> {
        self.aggregate(AggOp::Min, agg_id, reg)
    }

    pub fn count(&mut self, agg_id: u16, reg: u8) -> Result<&mut Self, AggProgramError> {
        self.aggregate(AggOp::Count, agg_id, reg)
    }

    /// Declares a GROUP BY column, estimating its contribution to the
    /// per-group result size.
    pub fn group_by(&mut self, col_id: u16) -> Result<&mut Self, AggProgramError> {
        self.guard()?;
        let col_type = match self.table.column(col_id) {
            Some(t) => t,
            None => return self.fail(AggProgramError::UnsupportedColumnType),
        };
        self.group_cols.push(col_id);
        self.result_size_est += estimate_result_bytes(col_type);
        Ok(self)
    }

    /// Writes the header words and validates capacity limits, producing
    /// the finished program plus the per-aggregate-id operation table
    /// the client merger needs.
    pub fn finalize(&mut self) -> Result<(AggProgram, Vec<AggOp>), AggProgramError> {
        self.guard()?;
        if self.n_agg_results == 0 {
            return self.fail(AggProgramError::EmptyAggregatorSet);
        }
        let agg_ops: Vec<AggOp> = self.agg_ops.iter().map(|o| o.unwrap_or(AggOp::Sum)).collect();
        let program = match AggProgram::new(self.n_agg_results, self.group_cols.clone(), self.instructions.clone()) {
            Ok(p) => p,
            Err(e) => return self.fail(e),
        };
        if self.result_size_est > fragstore_agg_vm::MAX_AGG_RESULT_BATCH_BYTES {
            return self.fail(AggProgramError::TooBigResultBatch);
        }
        self.finalized = true;
        Ok((program, agg_ops))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> TableDescriptor {
        TableDescriptor::new(vec![
            ColumnDescriptor { col_id: 1, col_type: ColumnType::Int64 },
            ColumnDescriptor { col_id: 2, col_type: ColumnType::Int64 },
        ])
    }

    #[test]
    fn builds_group_by_sum_program() {
        let table = table();
        let mut b = AggregatorBuilder::new(&table);
        b.group_by(1).unwrap();
        b.load_column(0, 2).unwrap();
        b.sum(0, 0).unwrap();
        let (program, ops) = b.finalize().unwrap();
        assert_eq!(program.group_cols, vec![1]);
        assert_eq!(ops, vec![AggOp::Sum]);
    }

    #[test]
    fn reusing_a_finalized_builder_fails() {
        let table = table();
        let mut b = AggregatorBuilder::new(&table);
        b.load_column(0, 1).unwrap();
        b.sum(0, 0).unwrap();
        b.finalize().unwrap();
        assert!(b.load_column(1, 1).is_err());
    }

    #[test]
    fn empty_aggregator_set_is_rejected() {
        let table = table();
        let mut b = AggregatorBuilder::new(&table);
        b.load_column(0, 1).unwrap();
        assert_eq!(b.finalize().unwrap_err(), AggProgramError::EmptyAggregatorSet);
    }

    #[test]
    fn unknown_column_poisons_the_builder() {
        let table = table();
        let mut b = AggregatorBuilder::new(&table);
        assert!(b.load_column(0, 99).is_err());
        assert!(b.sum(0, 0).is_err());
    }
}
