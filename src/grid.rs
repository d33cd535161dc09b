use cell_common::Vec2;
use log::debug;
use rayon::prelude::*;

/// Cells allowed regardless of disc count.
const MIN_CELL_BUDGET: usize = 1024;
/// Cells allowed per disc beyond the minimum.
const CELLS_PER_DISC: usize = 4;

/// Uniform grid used as collision broad phase.
///
/// Disc indices are bucketed by cell (counting sort: count, prefix sum,
/// scatter). With a cell size of at least twice the largest radius, any two
/// overlapping discs sit in the same or adjacent cells.
///
/// Cells are never smaller than the requested size but grow when the bounds
/// would need more cells than the disc count justifies, so a rebuild stays
/// linear in the number of discs.
#[derive(Debug, Clone)]
pub struct SpatialGrid {
    width: f64,
    height: f64,
    min_cell_size: f64,
    cell_budget: usize,
    cell_size: f64,
    inv_cell_size: f64,
    dim_x: u32,
    dim_y: u32,

    // Grid cell index for each disc
    disc_cells: Vec<u32>,
    // Number of discs in each grid cell
    cell_counts: Vec<u32>,
    // Start index in cell_disc_indices for each grid cell (prefix sum)
    cell_starts: Vec<u32>,
    // Disc indices sorted by grid cell
    cell_disc_indices: Vec<u32>,
}

impl SpatialGrid {
    pub fn new(width: f64, height: f64, cell_size: f64) -> Self {
        let min_cell_size = if cell_size > 1e-9 { cell_size } else { width.max(height).max(1.0) };
        let mut grid = Self {
            width,
            height,
            min_cell_size,
            cell_budget: 0,
            cell_size: min_cell_size,
            inv_cell_size: 1.0 / min_cell_size,
            dim_x: 1,
            dim_y: 1,
            disc_cells: Vec::new(),
            cell_counts: Vec::new(),
            cell_starts: Vec::new(),
            cell_disc_indices: Vec::new(),
        };
        grid.layout(MIN_CELL_BUDGET);
        grid
    }

    // Picks the smallest cell size (doubling from the minimum) whose cell count fits the budget.
    fn layout(&mut self, cell_budget: usize) {
        if cell_budget == self.cell_budget {
            return;
        }

        let mut cell_size = self.min_cell_size;
        let (dim_x, dim_y) = loop {
            let dim_x = (self.width / cell_size).ceil().max(1.0);
            let dim_y = (self.height / cell_size).ceil().max(1.0);
            if dim_x * dim_y <= cell_budget as f64 {
                break (dim_x as u32, dim_y as u32);
            }
            cell_size *= 2.0;
        };
        // dim_x * dim_y <= cell_budget, so this cannot overflow
        let num_cells = dim_x as usize * dim_y as usize;

        self.cell_budget = cell_budget;
        self.cell_size = cell_size;
        self.inv_cell_size = 1.0 / cell_size;
        self.dim_x = dim_x;
        self.dim_y = dim_y;
        self.cell_counts = vec![0; num_cells];
        self.cell_starts = vec![0; num_cells];
        debug!("Spatial grid: {} x {} cells of size {}.", dim_x, dim_y, cell_size);
    }

    pub fn cell_size(&self) -> f64 { self.cell_size }
    pub fn num_cells(&self) -> usize { self.cell_counts.len() }

    // Grid coordinates, clamped so positions outside the bounds land in border cells
    #[inline(always)]
    fn cell_coords(&self, pos: Vec2) -> (u32, u32) {
        let gx = (pos.x * self.inv_cell_size).floor().max(0.0) as u32;
        let gy = (pos.y * self.inv_cell_size).floor().max(0.0) as u32;
        (gx.min(self.dim_x - 1), gy.min(self.dim_y - 1))
    }

    #[inline(always)]
    pub fn cell_index(&self, pos: Vec2) -> u32 {
        let (gx, gy) = self.cell_coords(pos);
        gy * self.dim_x + gx
    }

    /// Budget for `num_discs`, rounded up to a power of two so small changes
    /// in the population do not relayout the grid.
    fn cell_budget_for(num_discs: usize) -> usize {
        num_discs
            .saturating_mul(CELLS_PER_DISC)
            .checked_next_power_of_two()
            .unwrap_or(usize::MAX)
            .max(MIN_CELL_BUDGET)
    }

    /// Rebuilds the buckets for the given positions (index = disc index).
    pub fn rebuild(&mut self, positions: &[Vec2]) {
        let num_discs = positions.len();
        self.layout(Self::cell_budget_for(num_discs));

        // Phase 1: Assign grid cells (Parallel).
        let grid = &*self;
        let cells: Vec<u32> = positions.par_iter().map(|&pos| grid.cell_index(pos)).collect();
        self.disc_cells = cells;

        // Phase 2: Count discs per cell.
        self.cell_counts.iter_mut().for_each(|c| *c = 0);
        for &cell in &self.disc_cells {
            self.cell_counts[cell as usize] += 1;
        }

        // Phase 3: Prefix sum for cell start indices.
        let mut total = 0;
        for (start, &count) in self.cell_starts.iter_mut().zip(&self.cell_counts) {
            *start = total;
            total += count;
        }
        debug_assert_eq!(total as usize, num_discs);

        // Phase 4: Scatter disc indices into their cell's block.
        self.cell_disc_indices.resize(num_discs, 0);
        let mut write_offsets = self.cell_starts.clone();
        for (disc_idx, &cell) in self.disc_cells.iter().enumerate() {
            let slot = &mut write_offsets[cell as usize];
            self.cell_disc_indices[*slot as usize] = disc_idx as u32;
            *slot += 1;
        }
    }

    /// Calls `f` for every disc index in the 3x3 cell neighbourhood of `pos`,
    /// including the disc itself. Stops early when `f` returns `false`.
    pub fn for_each_candidate<F>(&self, pos: Vec2, mut f: F)
    where
        F: FnMut(usize) -> bool,
    {
        let (cx, cy) = self.cell_coords(pos);
        let (cx, cy) = (cx as i64, cy as i64);

        for dy in -1..=1 {
            for dx in -1..=1 {
                let gx = cx + dx;
                let gy = cy + dy;
                if gx < 0 || gy < 0 || gx >= self.dim_x as i64 || gy >= self.dim_y as i64 {
                    continue;
                }

                let cell = (gy as u32 * self.dim_x + gx as u32) as usize;
                let start = self.cell_starts[cell] as usize;
                let end = start + self.cell_counts[cell] as usize;
                for &disc_idx in &self.cell_disc_indices[start..end] {
                    if !f(disc_idx as usize) {
                        return;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_neighbours_found_across_cell_border() {
        let mut grid = SpatialGrid::new(100.0, 100.0, 10.0);
        let positions = vec![Vec2::new(9.5, 5.0), Vec2::new(10.5, 5.0), Vec2::new(90.0, 90.0)];
        grid.rebuild(&positions);

        let mut seen = Vec::new();
        grid.for_each_candidate(positions[0], |idx| {
            seen.push(idx);
            true
        });
        seen.sort();
        assert_eq!(seen, vec![0, 1]);
    }

    #[test]
    fn test_outside_positions_are_clamped() {
        let mut grid = SpatialGrid::new(50.0, 50.0, 10.0);
        let positions = vec![Vec2::new(-5.0, -5.0), Vec2::new(60.0, 55.0)];
        grid.rebuild(&positions);
        assert_eq!(grid.cell_index(positions[0]), 0);
        assert_eq!(grid.cell_index(positions[1]) as usize, grid.num_cells() - 1);
    }

    #[test]
    fn test_huge_bounds_stay_within_budget() {
        let mut grid = SpatialGrid::new(200_000.0, 200_000.0, 2.0);
        assert!(grid.num_cells() <= MIN_CELL_BUDGET);
        assert!(grid.cell_size() >= 2.0);

        let positions = vec![Vec2::new(100_000.0, 100_000.0), Vec2::new(100_001.5, 100_000.0)];
        grid.rebuild(&positions);
        let mut seen = Vec::new();
        grid.for_each_candidate(positions[0], |idx| {
            seen.push(idx);
            true
        });
        seen.sort();
        assert_eq!(seen, vec![0, 1]);
    }

    #[test]
    fn test_cell_count_follows_disc_count() {
        let mut grid = SpatialGrid::new(10_000.0, 10_000.0, 2.0);
        let few = vec![Vec2::new(5.0, 5.0); 10];
        grid.rebuild(&few);
        let small = grid.num_cells();

        let many: Vec<Vec2> = (0..5000).map(|i| Vec2::new((i % 100) as f64 * 90.0, (i / 100) as f64 * 90.0)).collect();
        grid.rebuild(&many);
        assert!(grid.num_cells() > small);
        assert!(grid.num_cells() <= 4 * 8192);

        grid.rebuild(&few);
        assert_eq!(grid.num_cells(), small);
    }

    #[test]
    fn test_early_stop() {
        let mut grid = SpatialGrid::new(10.0, 10.0, 10.0);
        let positions = vec![Vec2::new(1.0, 1.0); 5];
        grid.rebuild(&positions);
        let mut calls = 0;
        grid.for_each_candidate(Vec2::new(1.0, 1.0), |_| {
            calls += 1;
            calls < 2
        });
        assert_eq!(calls, 2);
    }
}
