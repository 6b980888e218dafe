//! Per-fragment disk-allocation state: the free matrix, the current
//! insertion extent, and the extent scan chain.

use fragstore_common::page::{LocalKey, FREE_CLASSES};

use crate::extent::{calc_extent_pos, calc_page_free_bits, matrix_index, Extent, ExtentId, Membership, MATRIX_CELLS, MATRIX_COLS, MATRIX_ROWS};

pub struct FragmentExtents {
    extents: Vec<Extent>,
    free_extents: [Vec<ExtentId>; MATRIX_CELLS],
    curr_extent: Option<ExtentId>,
    extent_list: Vec<ExtentId>,
    thresholds: [u32; MATRIX_ROWS],
    page_free_bits_map: [u32; FREE_CLASSES],
}

impl FragmentExtents {
    pub fn new(thresholds: [u32; MATRIX_ROWS], page_free_bits_map: [u32; FREE_CLASSES]) -> Self {
        Self {
            extents: Vec::new(),
            free_extents: std::array::from_fn(|_| Vec::new()),
            curr_extent: None,
            extent_list: Vec::new(),
            thresholds,
            page_free_bits_map,
        }
    }

    pub fn page_free_bits_map(&self) -> &[u32; FREE_CLASSES] {
        &self.page_free_bits_map
    }

    pub fn get(&self, id: ExtentId) -> &Extent {
        &self.extents[id as usize]
    }

    /// Creates a new all-empty extent. It becomes the fragment's current
    /// insertion extent if there isn't one already; otherwise it is placed
    /// straight into the free matrix.
    pub fn create_extent(&mut self, key: LocalKey, extent_no: u32, page_count: u32) -> ExtentId {
        let mut extent = Extent::new_all_empty(key, extent_no, page_count, &self.page_free_bits_map);
        let id = self.extents.len() as ExtentId;
        if self.curr_extent.is_none() {
            extent.membership = Membership::CurrentInsertion;
            self.extents.push(extent);
            self.curr_extent = Some(id);
        } else {
            self.extents.push(extent);
            self.place_in_matrix(id);
        }
        self.extent_list.push(id);
        id
    }

    fn place_in_matrix(&mut self, id: ExtentId) {
        let pos = calc_extent_pos(&self.extents[id as usize], &self.thresholds);
        let cell = matrix_index(pos.0, pos.1);
        self.free_extents[cell].push(id);
        self.extents[id as usize].membership = Membership::Matrix(cell);
    }

    fn remove_from_matrix(&mut self, id: ExtentId) {
        if let Membership::Matrix(cell) = self.extents[id as usize].membership {
            self.free_extents[cell].retain(|&x| x != id);
        }
    }

    /// Re-places an extent after a `free_space`/`free_page_count`
    /// transition, if it currently lives in the matrix.
    fn reposition(&mut self, id: ExtentId) {
        if let Membership::Matrix(old_cell) = self.extents[id as usize].membership {
            let pos = calc_extent_pos(&self.extents[id as usize], &self.thresholds);
            let new_cell = matrix_index(pos.0, pos.1);
            if new_cell != old_cell {
                self.free_extents[old_cell].retain(|&x| x != id);
                self.free_extents[new_cell].push(id);
                self.extents[id as usize].membership = Membership::Matrix(new_cell);
            }
        }
    }

    /// Applies a page's free-space-class transition within its extent:
    /// one fewer page in `old_class`, one more in `new_class`, and a new
    /// `free_space` total. Valid regardless of whether the extent is
    /// currently the insertion extent or lives in the matrix; only
    /// matrix-resident extents get re-placed.
    pub fn apply_page_class_change(&mut self, id: ExtentId, old_class: usize, new_class: usize, new_free_space: u32) {
        let extent = &mut self.extents[id as usize];
        extent.free_page_count[old_class] -= 1;
        extent.free_page_count[new_class] += 1;
        extent.free_space = new_free_space;
        self.reposition(id);
    }

    /// Classifies `free_units` using this fragment's `page_free_bits_map`.
    pub fn calc_page_free_bits(&self, free_units: u32) -> usize {
        calc_page_free_bits(&self.page_free_bits_map, free_units)
    }

    /// Finds an extent with a free page of the requested size class:
    /// translates `sz` to a class, steps one class lower for
    /// variable-sized rows, then scans column-major from `(0, class)`
    /// toward `(4, 3)`.
    pub fn find_extent_for_size(&self, sz: u32, variable_sized: bool) -> Option<ExtentId> {
        let base_class = self.calc_page_free_bits(sz.saturating_sub(1));
        let class = if variable_sized { base_class.saturating_sub(1) } else { base_class };
        self.scan_matrix(class)
    }

    fn scan_matrix(&self, start_col: usize) -> Option<ExtentId> {
        for col in start_col..MATRIX_COLS {
            for row in 0..MATRIX_ROWS {
                let cell = matrix_index(row, col);
                if let Some(&id) = self.free_extents[cell].last() {
                    return Some(id);
                }
            }
        }
        None
    }

    /// Makes `id` the fragment's current insertion extent, demoting the
    /// previous current extent (if any) into the free matrix.
    pub fn make_current(&mut self, id: ExtentId) {
        if let Some(old) = self.curr_extent {
            if old != id {
                self.place_in_matrix(old);
            }
        }
        self.remove_from_matrix(id);
        self.extents[id as usize].membership = Membership::CurrentInsertion;
        self.curr_extent = Some(id);
    }

    pub fn current_extent(&self) -> Option<ExtentId> {
        self.curr_extent
    }

    pub fn extent_list(&self) -> &[ExtentId] {
        &self.extent_list
    }

    /// Cross-checks every extent's bookkeeping against the matrix and
    /// current-insertion state.
    pub fn check(&self) -> bool {
        for (idx, extent) in self.extents.iter().enumerate() {
            let id = idx as ExtentId;
            if !extent.pages_accounted_for() {
                return false;
            }
            if extent.free_space > extent.page_count * self.page_free_bits_map[0] {
                return false;
            }
            match extent.membership {
                Membership::Matrix(cell) => {
                    let pos = calc_extent_pos(extent, &self.thresholds);
                    if matrix_index(pos.0, pos.1) != cell {
                        return false;
                    }
                    if !self.free_extents[cell].contains(&id) {
                        return false;
                    }
                }
                Membership::CurrentInsertion => {
                    if self.curr_extent != Some(id) {
                        return false;
                    }
                }
                Membership::Detached => {}
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fragstore_common::page::LocalKey;

    /// A variable-sized row insert targets the single page of the
    /// fragment's only extent, then the extent lands in matrix column 2
    /// once it stops being the current insertion extent.
    #[test]
    fn variable_sized_extent_choice_and_reposition() {
        let map = [8191, 4096, 1365, 0];
        let mut cat = FragmentExtents::new([u32::MAX, 6000, 3000, 1000, 0], map);
        let id = cat.create_extent(LocalKey::new(1, 100), 0, 1);
        // single-page extent, pre-loaded with 4000 free units instead of
        // the full-empty default, matching the scenario's setup.
        cat.apply_page_class_change(id, 0, cat.calc_page_free_bits(4000), 4000);
        assert_eq!(cat.current_extent(), Some(id));

        // step-down class for a variable row of size 1400 is class 1.
        let base_class = cat.calc_page_free_bits(1400 - 1);
        assert_eq!(base_class, 2);
        assert_eq!(base_class - 1, 1);

        // only one page exists, so the insert necessarily targets it
        // regardless of the matrix (it's reached via the current-extent
        // path, not the dirty-page/matrix search).
        let old_class = cat.calc_page_free_bits(4000);
        let new_free_space = 4000 - 1400;
        let new_class = cat.calc_page_free_bits(new_free_space);
        cat.apply_page_class_change(id, old_class, new_class, new_free_space);

        // extent stops being current (e.g. a later extent takes over) and
        // must land in matrix column 2.
        let other = cat.create_extent(LocalKey::new(1, 200), 1, 1);
        cat.make_current(other);

        assert!(cat.check());
        match cat.get(id).membership {
            Membership::Matrix(cell) => assert_eq!(cell % MATRIX_COLS, 2),
            other => panic!("expected extent to be in the matrix, got {other:?}"),
        }
    }
}
