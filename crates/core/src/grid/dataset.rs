//! The mesh capability consumed by the velocity evaluators
//!
//! A dataset exposes its points, its cells (loaded into a reusable
//! [`GenericCell`]) and its named point arrays. Point location is either a
//! natural property of the mesh (structured grids) or delegated to a
//! [`CellLocator`].

use crate::core_types::{Bounds, Vec3};
use crate::grid::cell::GenericCell;
use crate::grid::point_data::PointData;
use std::fmt;

/// Read-only mesh shared between evaluators and time endpoints
pub trait DataSet: Send + Sync + fmt::Debug {
    fn number_of_points(&self) -> usize;

    fn number_of_cells(&self) -> usize;

    /// Coordinates of a point
    fn point(&self, point_id: usize) -> Vec3;

    fn bounds(&self) -> Bounds;

    /// Length scale used to derive location tolerances
    fn characteristic_length(&self) -> f64 {
        self.bounds().diagonal_length()
    }

    /// Largest vertex count of any cell in the mesh
    fn max_cell_size(&self) -> usize;

    fn point_data(&self) -> &PointData;

    /// Load cell `cell_id` into `cell`
    ///
    /// Panics if `cell_id >= number_of_cells()`.
    fn get_cell(&self, cell_id: usize, cell: &mut GenericCell);

    /// True if `find_cell` is fast without an external locator
    fn has_natural_locator(&self) -> bool {
        false
    }

    /// Find the cell containing `x` within squared tolerance `tol2`
    ///
    /// On success `cell`, `pcoords` and `weights` describe the hit. The
    /// default implementation tests every cell and prefers an exact hit,
    /// otherwise the closest cell within tolerance.
    fn find_cell(
        &self,
        x: &Vec3,
        tol2: f64,
        cell: &mut GenericCell,
        pcoords: &mut Vec3,
        weights: &mut [f64],
    ) -> Option<usize> {
        brute_force_find(self, 0..self.number_of_cells(), x, tol2, cell, pcoords, weights)
    }
}

/// Spatial index over the cells of one dataset
pub trait CellLocator: Send + Sync + fmt::Debug {
    fn find_cell(
        &self,
        dataset: &dyn DataSet,
        x: &Vec3,
        tol2: f64,
        cell: &mut GenericCell,
        pcoords: &mut Vec3,
        weights: &mut [f64],
    ) -> Option<usize>;

    /// Cheap rejection test against the bounding box of a known cell
    fn inside_cell_bounds(&self, x: &Vec3, cell_id: usize) -> bool;
}

/// Test the candidate cells in order and return the best hit
///
/// An exact hit (distance 0) returns immediately. Otherwise the closest
/// candidate within `tol2` wins and is reloaded into `cell`.
pub(crate) fn brute_force_find<D, I>(
    dataset: &D,
    candidates: I,
    x: &Vec3,
    tol2: f64,
    cell: &mut GenericCell,
    pcoords: &mut Vec3,
    weights: &mut [f64],
) -> Option<usize>
where
    D: DataSet + ?Sized,
    I: IntoIterator<Item = usize>,
{
    let mut best: Option<(usize, f64)> = None;
    for cell_id in candidates {
        dataset.get_cell(cell_id, cell);
        let Some(dist2) = cell.evaluate_position(x, pcoords, weights) else {
            continue;
        };
        if dist2 == 0.0 {
            return Some(cell_id);
        }
        if dist2 <= tol2 && !matches!(best, Some((_, d)) if d <= dist2) {
            best = Some((cell_id, dist2));
        }
    }

    let (cell_id, _) = best?;
    dataset.get_cell(cell_id, cell);
    cell.evaluate_position(x, pcoords, weights)?;
    Some(cell_id)
}
