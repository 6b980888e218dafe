//! Pushdown aggregation interpreter (node side): decodes a wire-format
//! aggregation program and executes it over a stream of rows, producing
//! one result row per GROUP BY bucket.

pub mod arithmetic;
pub mod constants;
pub mod interpreter;
pub mod opcode;
pub mod program;
pub mod register;
pub mod result_batch;

pub use constants::{
    AGG_RESULT_ATTR_ID, AGG_RES_ITEM_BYTES, DEF_AGG_RESULT_BATCH_BYTES, MAX_AGG_N_GROUPBY_COLS, MAX_AGG_N_RESULTS, MAX_AGG_PROGRAM_WORD_SIZE,
    MAX_AGG_RESULT_BATCH_BYTES, PROGRAM_MAGIC,
};
pub use interpreter::{Interpreter, RowSource};
pub use opcode::{AggOp, ArithOp, ColumnType, Opcode};
pub use program::{AggProgram, Instruction};
pub use register::{decode_column, Register, RegValue};
pub use result_batch::{decode_batch, encode_batches, ResultItem};
