//! Mesh capability: datasets, cells, point arrays and cell locators

pub mod cell;
pub mod cell_locator;
pub mod dataset;
pub mod point_data;
pub mod uniform_grid;
pub mod unstructured_grid;

pub use cell::{curl, CellKind, GenericCell, MAX_CELL_SIZE};
pub use cell_locator::BinnedCellLocator;
pub use dataset::{CellLocator, DataSet};
pub use point_data::{ArrayValues, DataArray, PointData};
pub use uniform_grid::UniformGrid;
pub use unstructured_grid::{CellConnectivity, UnstructuredGrid};
