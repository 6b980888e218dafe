//! Capacity limits and wire constants.

pub const PROGRAM_MAGIC: u32 = 0x0721;

pub const DEF_AGG_RESULT_BATCH_BYTES: usize = 4096;
pub const MAX_AGG_RESULT_BATCH_BYTES: usize = 8192;

pub const MAX_AGG_PROGRAM_WORD_SIZE: usize = 1024;
pub const MAX_AGG_N_GROUPBY_COLS: usize = 128;
pub const MAX_AGG_N_RESULTS: usize = 256;

/// Wire size in bytes of one `AggResItem`: `{type:u32, value:u64,
/// is_unsigned:u8, is_null:u8}` padded to a 4-byte multiple.
pub const AGG_RES_ITEM_BYTES: usize = 16;

/// Sentinel attribute id tagging a result batch's leading word. A table's
/// pseudo-column numbering isn't modelled at this depth, so a fixed
/// out-of-band value is used instead (see DESIGN.md).
pub const AGG_RESULT_ATTR_ID: u16 = 0xFFFF;
