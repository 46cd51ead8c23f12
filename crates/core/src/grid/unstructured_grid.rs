//! Explicit point list plus tetra/voxel connectivity

use crate::core_types::{Bounds, TraceError, Vec3};
use crate::grid::cell::{CellKind, GenericCell};
use crate::grid::dataset::DataSet;
use crate::grid::point_data::PointData;
use crate::grid::uniform_grid::UniformGrid;
use serde::{Deserialize, Serialize};

/// Connectivity of one cell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CellConnectivity {
    Tetra([usize; 4]),
    Voxel([usize; 8]),
}

impl CellConnectivity {
    pub fn kind(&self) -> CellKind {
        match self {
            CellConnectivity::Tetra(_) => CellKind::Tetra,
            CellConnectivity::Voxel(_) => CellKind::Voxel,
        }
    }

    pub fn point_ids(&self) -> &[usize] {
        match self {
            CellConnectivity::Tetra(ids) => ids,
            CellConnectivity::Voxel(ids) => ids,
        }
    }
}

/// Mesh without implicit structure
///
/// Point location tests every cell unless a [`CellLocator`] is attached to the
/// evaluator, so large meshes should always be paired with one.
///
/// [`CellLocator`]: crate::grid::CellLocator
#[derive(Debug, Clone)]
pub struct UnstructuredGrid {
    points: Vec<Vec3>,
    cells: Vec<CellConnectivity>,
    point_data: PointData,
    bounds: Bounds,
}

impl UnstructuredGrid {
    pub fn new(points: Vec<Vec3>) -> Self {
        let bounds = Bounds::from_points(points.iter());
        UnstructuredGrid {
            points,
            cells: Vec::new(),
            point_data: PointData::new(),
            bounds,
        }
    }

    /// Copy of a uniform grid with the same points, voxels and arrays
    pub fn from_uniform(grid: &UniformGrid) -> Self {
        let points = (0..grid.number_of_points()).map(|id| grid.point(id)).collect();
        let mut mesh = UnstructuredGrid::new(points);
        let mut cell = GenericCell::new();
        for cell_id in 0..grid.number_of_cells() {
            grid.get_cell(cell_id, &mut cell);
            let mut ids = [0usize; 8];
            ids.copy_from_slice(cell.point_ids());
            mesh.cells.push(CellConnectivity::Voxel(ids));
        }
        mesh.point_data = grid.point_data().clone();
        mesh
    }

    /// Append a cell, returning its id
    ///
    /// # Errors
    /// Returns `InvalidConfig` if the cell references a missing point.
    pub fn add_cell(&mut self, connectivity: CellConnectivity) -> Result<usize, TraceError> {
        if let Some(&bad) = connectivity.point_ids().iter().find(|&&id| id >= self.points.len()) {
            return Err(TraceError::InvalidConfig(format!(
                "cell references point {} but the mesh has {} points",
                bad,
                self.points.len()
            )));
        }
        self.cells.push(connectivity);
        Ok(self.cells.len() - 1)
    }

    pub fn cells(&self) -> &[CellConnectivity] {
        &self.cells
    }

    pub fn point_data_mut(&mut self) -> &mut PointData {
        &mut self.point_data
    }

    /// Translate every point, keeping connectivity and arrays
    pub fn translated(&self, offset: &Vec3) -> Self {
        let mut moved = self.clone();
        for p in &mut moved.points {
            *p += offset;
        }
        moved.bounds = Bounds::from_points(moved.points.iter());
        moved
    }
}

impl DataSet for UnstructuredGrid {
    fn number_of_points(&self) -> usize {
        self.points.len()
    }

    fn number_of_cells(&self) -> usize {
        self.cells.len()
    }

    fn point(&self, point_id: usize) -> Vec3 {
        self.points[point_id]
    }

    fn bounds(&self) -> Bounds {
        self.bounds
    }

    fn max_cell_size(&self) -> usize {
        self.cells
            .iter()
            .map(|c| c.point_ids().len())
            .max()
            .unwrap_or(0)
    }

    fn point_data(&self) -> &PointData {
        &self.point_data
    }

    fn get_cell(&self, cell_id: usize, cell: &mut GenericCell) {
        let connectivity = &self.cells[cell_id];
        cell.load(connectivity.kind(), connectivity.point_ids(), |id| self.points[id]);
    }
}
