//! Result-size estimation for GROUP BY columns: estimates the result
//! serialisation size including attribute headers.

use fragstore_agg_vm::ColumnType;

/// Bytes a GROUP BY column contributes to a group's serialised key: a
/// word of framing overhead plus the column's 4-byte-padded payload.
pub fn estimate_result_bytes(col_type: ColumnType) -> usize {
    4 + col_type.payload_words() * 4
}
