//! Extent bookkeeping and the free-matrix placement policy. Extents live
//! in a typed arena (`Vec<Extent>`) indexed by [`ExtentId`] rather than
//! linked through raw pointers, matching the index-into-pool style of
//! `PageHeader::extent_info_ptr`.

use fragstore_common::page::{LocalKey, FREE_CLASSES};

pub type ExtentId = u32;

pub const MATRIX_ROWS: usize = 5;
pub const MATRIX_COLS: usize = FREE_CLASSES;
pub const MATRIX_CELLS: usize = MATRIX_ROWS * MATRIX_COLS;

/// Where an extent currently lives: exactly one of a matrix cell, the
/// fragment's current-insertion slot, or detached (owned by a caller
/// mid-transition).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Membership {
    Matrix(usize),
    CurrentInsertion,
    Detached,
}

#[derive(Debug, Clone)]
pub struct Extent {
    pub key: LocalKey,
    pub extent_no: u32,
    pub page_count: u32,
    pub free_space: u32,
    pub free_page_count: [u32; FREE_CLASSES],
    pub first_page_no: u32,
    pub empty_page_no: u32,
    pub membership: Membership,
}

impl Extent {
    pub fn new_all_empty(key: LocalKey, extent_no: u32, page_count: u32, page_free_bits_map: &[u32; FREE_CLASSES]) -> Self {
        Self {
            key,
            extent_no,
            page_count,
            free_space: page_count * page_free_bits_map[0],
            free_page_count: [page_count, 0, 0, 0],
            first_page_no: key.page_no,
            empty_page_no: key.page_no,
            membership: Membership::Detached,
        }
    }

    /// `Σ free_page_count == pages_in_extent`.
    pub fn pages_accounted_for(&self) -> bool {
        self.free_page_count.iter().sum::<u32>() == self.page_count
    }
}

/// Classifies `free_units` into one of the 4 free-space classes using a
/// fragment's configured `page_free_bits_map`. Classes are
/// checked from most-free (0) to least-free (3); `page_free_bits_map[3]`
/// is conventionally 0 so every page classifies as at worst class 3.
pub fn calc_page_free_bits(page_free_bits_map: &[u32; FREE_CLASSES], free_units: u32) -> usize {
    for (class, &threshold) in page_free_bits_map.iter().enumerate() {
        if free_units >= threshold {
            return class;
        }
    }
    FREE_CLASSES - 1
}

/// Computes `(row, col)` for an extent given the fragment's row
/// thresholds.
pub fn calc_extent_pos(extent: &Extent, thresholds: &[u32; MATRIX_ROWS]) -> (usize, usize) {
    let row = thresholds
        .iter()
        .position(|&t| extent.free_space >= t)
        .unwrap_or(MATRIX_ROWS - 1);
    let col = extent
        .free_page_count
        .iter()
        .position(|&n| n > 0)
        .unwrap_or(MATRIX_COLS - 1);
    (row, col)
}

pub fn matrix_index(row: usize, col: usize) -> usize {
    row * MATRIX_COLS + col
}
