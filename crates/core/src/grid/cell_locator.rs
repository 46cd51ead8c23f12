//! Uniform-bin cell locator
//!
//! Every cell's bounding box is registered in each bin it overlaps; a query
//! only tests the cells of the bin containing the point. Bins are keyed by a
//! Morton code so neighbouring bins hash close together.

use crate::core_types::{Bounds, Vec3};
use crate::grid::cell::GenericCell;
use crate::grid::dataset::{brute_force_find, CellLocator, DataSet};
use rayon::prelude::*;
use rustc_hash::{FxBuildHasher, FxHashMap};
use tracing::debug;

/// Target number of cells per bin
pub const DEFAULT_CELLS_PER_BIN: usize = 8;

/// Largest bin count per axis
const MAX_DIVISIONS: usize = 1 << 10;

/// Spatial index over one dataset's cells
#[derive(Debug, Clone)]
pub struct BinnedCellLocator {
    bounds: Bounds,
    divisions: [usize; 3],
    bin_size: Vec3,
    padding: f64,
    bins: FxHashMap<u64, Vec<usize>>,
    cell_bounds: Vec<Bounds>,
}

impl BinnedCellLocator {
    /// Build a locator with the default bin occupancy
    pub fn build(dataset: &dyn DataSet) -> Self {
        Self::with_cells_per_bin(dataset, DEFAULT_CELLS_PER_BIN)
    }

    /// Build a locator aiming for `cells_per_bin` cells in each bin
    pub fn with_cells_per_bin(dataset: &dyn DataSet, cells_per_bin: usize) -> Self {
        let n_cells = dataset.number_of_cells();
        let bounds = dataset.bounds();
        let padding = bounds.diagonal_length() * 1e-6;

        // Cell boxes are independent, compute them in parallel
        let cell_bounds: Vec<Bounds> = (0..n_cells)
            .into_par_iter()
            .map_init(GenericCell::new, |cell, cell_id| {
                dataset.get_cell(cell_id, cell);
                cell.bounds()
            })
            .collect();

        let target_bins = n_cells.div_ceil(cells_per_bin.max(1)).max(1);
        let per_axis = ((target_bins as f64).cbrt().ceil() as usize).clamp(1, MAX_DIVISIONS);
        let extent = bounds.extent();
        let mut divisions = [1usize; 3];
        let mut bin_size = Vec3::repeat(1.0);
        for axis in 0..3 {
            if extent[axis] > 0.0 {
                divisions[axis] = per_axis;
                bin_size[axis] = extent[axis] / per_axis as f64;
            }
        }

        let mut locator = BinnedCellLocator {
            bounds,
            divisions,
            bin_size,
            padding,
            bins: FxHashMap::with_capacity_and_hasher(divisions.iter().product(), FxBuildHasher),
            cell_bounds: Vec::new(),
        };

        for (cell_id, cell_box) in cell_bounds.iter().enumerate() {
            if cell_box.is_empty() {
                continue;
            }
            let lo = locator.bin_coords(&cell_box.min.add_scalar(-padding));
            let hi = locator.bin_coords(&cell_box.max.add_scalar(padding));
            for k in lo[2]..=hi[2] {
                for j in lo[1]..=hi[1] {
                    for i in lo[0]..=hi[0] {
                        locator
                            .bins
                            .entry(morton_encode(i, j, k))
                            .or_default()
                            .push(cell_id);
                    }
                }
            }
        }
        locator.cell_bounds = cell_bounds;

        debug!(
            "Built cell locator: {} cells in {} bins ({}x{}x{})",
            n_cells,
            locator.bins.len(),
            divisions[0],
            divisions[1],
            divisions[2]
        );
        locator
    }

    /// Bin coordinates of a point, clamped to the grid of bins
    fn bin_coords(&self, p: &Vec3) -> [usize; 3] {
        let mut coords = [0usize; 3];
        for axis in 0..3 {
            let f = ((p[axis] - self.bounds.min[axis]) / self.bin_size[axis]).floor();
            coords[axis] = (f.max(0.0) as usize).min(self.divisions[axis] - 1);
        }
        coords
    }

    pub fn bin_count(&self) -> usize {
        self.bins.len()
    }

    pub fn divisions(&self) -> [usize; 3] {
        self.divisions
    }

    /// Cells registered in the bin containing `p`
    pub fn candidates(&self, p: &Vec3) -> &[usize] {
        let [i, j, k] = self.bin_coords(p);
        self.bins
            .get(&morton_encode(i, j, k))
            .map_or(&[][..], Vec::as_slice)
    }
}

impl CellLocator for BinnedCellLocator {
    fn find_cell(
        &self,
        dataset: &dyn DataSet,
        x: &Vec3,
        tol2: f64,
        cell: &mut GenericCell,
        pcoords: &mut Vec3,
        weights: &mut [f64],
    ) -> Option<usize> {
        let tolerance = tol2.sqrt();
        if !self.bounds.contains(x, tolerance + self.padding) {
            return None;
        }
        let candidates = self
            .candidates(x)
            .iter()
            .copied()
            .filter(|&id| self.cell_bounds[id].contains(x, tolerance + self.padding));
        brute_force_find(dataset, candidates, x, tol2, cell, pcoords, weights)
    }

    fn inside_cell_bounds(&self, x: &Vec3, cell_id: usize) -> bool {
        self.cell_bounds
            .get(cell_id)
            .is_some_and(|b| b.contains(x, self.padding))
    }
}

/// Interleave the low 21 bits of each coordinate into one key
fn morton_encode(x: usize, y: usize, z: usize) -> u64 {
    let (x, y, z) = (x as u64, y as u64, z as u64);
    let mut result = 0u64;
    for i in 0..21 {
        result |= ((x & (1 << i)) << (2 * i)) | ((y & (1 << i)) << (2 * i + 1)) | ((z & (1 << i)) << (2 * i + 2));
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::cell::MAX_CELL_SIZE;
    use crate::grid::{UniformGrid, UnstructuredGrid};

    fn mesh() -> UnstructuredGrid {
        let grid = UniformGrid::new(Vec3::zeros(), Vec3::repeat(0.25), [5, 5, 5]).unwrap();
        UnstructuredGrid::from_uniform(&grid)
    }

    #[test]
    fn test_morton_keys_are_distinct() {
        let mut keys: Vec<u64> = (0..4)
            .flat_map(|i| (0..4).flat_map(move |j| (0..4).map(move |k| morton_encode(i, j, k))))
            .collect();
        keys.sort_unstable();
        keys.dedup();
        assert_eq!(keys.len(), 64);
    }

    #[test]
    fn test_locator_agrees_with_brute_force() {
        let mesh = mesh();
        let locator = BinnedCellLocator::with_cells_per_bin(&mesh, 2);
        assert!(locator.bin_count() > 1);

        let mut cell = GenericCell::new();
        let mut pc = Vec3::zeros();
        let mut w = [0.0; MAX_CELL_SIZE];
        for p in [
            Vec3::new(0.1, 0.1, 0.1),
            Vec3::new(0.9, 0.3, 0.55),
            Vec3::new(0.5, 0.5, 0.5),
            Vec3::new(1.0, 1.0, 1.0),
        ] {
            let indexed = locator.find_cell(&mesh, &p, 1e-12, &mut cell, &mut pc, &mut w);
            let direct = mesh.find_cell(&p, 1e-12, &mut cell, &mut pc, &mut w);
            assert!(indexed.is_some(), "point {:?} should be found", p);
            // Shared faces may resolve to either neighbour, both must contain p
            let mut check = GenericCell::new();
            mesh.get_cell(indexed.unwrap(), &mut check);
            assert!(check.contains(&p, 1e-12, &mut pc, &mut w));
            assert!(direct.is_some());
        }
        assert!(locator
            .find_cell(&mesh, &Vec3::new(1.5, 0.5, 0.5), 1e-12, &mut cell, &mut pc, &mut w)
            .is_none());
    }

    #[test]
    fn test_inside_cell_bounds() {
        let mesh = mesh();
        let locator = BinnedCellLocator::build(&mesh);
        assert!(locator.inside_cell_bounds(&Vec3::new(0.1, 0.1, 0.1), 0));
        assert!(!locator.inside_cell_bounds(&Vec3::new(0.9, 0.9, 0.9), 0));
        assert!(!locator.inside_cell_bounds(&Vec3::zeros(), 10_000));
    }
}
