//! Extent and free-space catalog: per-fragment disk-allocation state.

pub mod catalog;
pub mod extent;

pub use catalog::FragmentExtents;
pub use extent::{calc_extent_pos, calc_page_free_bits, matrix_index, Extent, ExtentId, Membership, MATRIX_CELLS, MATRIX_COLS, MATRIX_ROWS};
