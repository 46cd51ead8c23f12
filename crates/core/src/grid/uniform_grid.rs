//! Axis-aligned uniform grid with voxel cells

use crate::core_types::{Bounds, TraceError, Vec3};
use crate::grid::cell::{CellKind, GenericCell};
use crate::grid::dataset::DataSet;
use crate::grid::point_data::{DataArray, PointData};

/// Regular lattice of `dims[0] * dims[1] * dims[2]` points
///
/// Point `(i, j, k)` has id `i + nx * (j + ny * k)` and sits at
/// `origin + (i, j, k) * spacing`. Cells are voxels numbered the same way
/// over `(nx - 1) * (ny - 1) * (nz - 1)`.
#[derive(Debug, Clone)]
pub struct UniformGrid {
    origin: Vec3,
    spacing: Vec3,
    dims: [usize; 3],
    point_data: PointData,
}

impl UniformGrid {
    /// Create a grid with no point arrays
    ///
    /// # Errors
    /// Returns `InvalidConfig` if any dimension is below 2 or any spacing is
    /// not strictly positive.
    pub fn new(origin: Vec3, spacing: Vec3, dims: [usize; 3]) -> Result<Self, TraceError> {
        if dims.iter().any(|&n| n < 2) {
            return Err(TraceError::InvalidConfig(format!(
                "uniform grid needs at least 2 points per axis, got {:?}",
                dims
            )));
        }
        if spacing.iter().any(|&h| h <= 0.0 || !h.is_finite()) {
            return Err(TraceError::InvalidConfig(format!(
                "uniform grid spacing must be positive, got ({}, {}, {})",
                spacing.x, spacing.y, spacing.z
            )));
        }
        Ok(UniformGrid {
            origin,
            spacing,
            dims,
            point_data: PointData::new(),
        })
    }

    /// Grid spanning `bounds` with `dims` points per axis
    ///
    /// # Errors
    /// Same conditions as [`UniformGrid::new`].
    pub fn from_bounds(bounds: &Bounds, dims: [usize; 3]) -> Result<Self, TraceError> {
        let extent = bounds.extent();
        let spacing = Vec3::new(
            extent.x / (dims[0].max(2) - 1) as f64,
            extent.y / (dims[1].max(2) - 1) as f64,
            extent.z / (dims[2].max(2) - 1) as f64,
        );
        Self::new(bounds.min, spacing, dims)
    }

    pub fn origin(&self) -> Vec3 {
        self.origin
    }

    pub fn spacing(&self) -> Vec3 {
        self.spacing
    }

    pub fn dims(&self) -> [usize; 3] {
        self.dims
    }

    #[inline]
    pub fn point_index(&self, i: usize, j: usize, k: usize) -> usize {
        i + self.dims[0] * (j + self.dims[1] * k)
    }

    pub fn point_data_mut(&mut self) -> &mut PointData {
        &mut self.point_data
    }

    /// Sample `f` at every grid point into a new double vector array
    pub fn sample_vectors<F>(&self, name: &str, f: F) -> DataArray
    where
        F: Fn(&Vec3) -> Vec3,
    {
        let vectors: Vec<Vec3> = (0..self.number_of_points()).map(|id| f(&self.point(id))).collect();
        DataArray::from_vectors(name, &vectors)
    }

    /// Add a sampled vector array and make it the active vectors
    pub fn with_vectors<F>(mut self, name: &str, f: F) -> Self
    where
        F: Fn(&Vec3) -> Vec3,
    {
        let array = self.sample_vectors(name, f);
        self.point_data.add_array(array);
        self.point_data.set_active_vectors(name);
        self
    }

    /// Add a sampled scalar array
    pub fn with_scalars<F>(mut self, name: &str, f: F) -> Self
    where
        F: Fn(&Vec3) -> f64,
    {
        let scalars = (0..self.number_of_points()).map(|id| f(&self.point(id))).collect();
        self.point_data.add_array(DataArray::from_scalars(name, scalars));
        self
    }

    fn cell_dims(&self) -> [usize; 3] {
        [self.dims[0] - 1, self.dims[1] - 1, self.dims[2] - 1]
    }

    fn cell_point_ids(&self, cell_id: usize) -> [usize; 8] {
        let [cx, cy, _] = self.cell_dims();
        let i = cell_id % cx;
        let j = (cell_id / cx) % cy;
        let k = cell_id / (cx * cy);
        [
            self.point_index(i, j, k),
            self.point_index(i + 1, j, k),
            self.point_index(i, j + 1, k),
            self.point_index(i + 1, j + 1, k),
            self.point_index(i, j, k + 1),
            self.point_index(i + 1, j, k + 1),
            self.point_index(i, j + 1, k + 1),
            self.point_index(i + 1, j + 1, k + 1),
        ]
    }
}

impl DataSet for UniformGrid {
    fn number_of_points(&self) -> usize {
        self.dims.iter().product()
    }

    fn number_of_cells(&self) -> usize {
        self.cell_dims().iter().product()
    }

    fn point(&self, point_id: usize) -> Vec3 {
        let i = point_id % self.dims[0];
        let j = (point_id / self.dims[0]) % self.dims[1];
        let k = point_id / (self.dims[0] * self.dims[1]);
        self.origin + Vec3::new(i as f64, j as f64, k as f64).component_mul(&self.spacing)
    }

    fn bounds(&self) -> Bounds {
        let far = Vec3::new(
            (self.dims[0] - 1) as f64,
            (self.dims[1] - 1) as f64,
            (self.dims[2] - 1) as f64,
        );
        Bounds::new(self.origin, self.origin + far.component_mul(&self.spacing))
    }

    fn max_cell_size(&self) -> usize {
        8
    }

    fn point_data(&self) -> &PointData {
        &self.point_data
    }

    fn get_cell(&self, cell_id: usize, cell: &mut GenericCell) {
        assert!(
            cell_id < self.number_of_cells(),
            "cell id {} out of range for uniform grid with {} cells",
            cell_id,
            self.number_of_cells()
        );
        let ids = self.cell_point_ids(cell_id);
        cell.load(CellKind::Voxel, &ids, |id| self.point(id));
    }

    fn has_natural_locator(&self) -> bool {
        true
    }

    /// O(1) location: the containing voxel index follows from the spacing
    fn find_cell(
        &self,
        x: &Vec3,
        tol2: f64,
        cell: &mut GenericCell,
        pcoords: &mut Vec3,
        weights: &mut [f64],
    ) -> Option<usize> {
        if !self.bounds().contains(x, tol2.sqrt()) {
            return None;
        }
        let cell_dims = self.cell_dims();
        let mut index = [0usize; 3];
        for axis in 0..3 {
            let f = ((x[axis] - self.origin[axis]) / self.spacing[axis]).floor();
            index[axis] = (f.max(0.0) as usize).min(cell_dims[axis] - 1);
        }
        let cell_id = index[0] + cell_dims[0] * (index[1] + cell_dims[1] * index[2]);
        self.get_cell(cell_id, cell);
        cell.contains(x, tol2, pcoords, weights).then_some(cell_id)
    }
}
