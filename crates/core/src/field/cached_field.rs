//! Velocity evaluation with cell and dataset caching
//!
//! Consecutive queries from one particle are almost always in the same cell
//! or a neighbour of it. The evaluator remembers the last hit `(dataset, cell)`
//! and tests it before anything else, then searches the same dataset, and
//! only then falls back to the other registered datasets in slot order.
//!
//! One evaluator serves one query stream. Datasets are shared read-only, so
//! threads that want to evaluate in parallel each own their own evaluator.

use crate::core_types::{CellHint, ParticlePosition, TraceError, Vec3};
use crate::field::function_set::FunctionSet;
use crate::field::vector_view::VectorView;
use crate::grid::{curl, BinnedCellLocator, CellLocator, DataArray, DataSet, GenericCell, MAX_CELL_SIZE};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Location tolerance as a fraction of the dataset's characteristic length
pub const TOLERANCE_SCALE: f64 = 1e-8;

/// Where successful lookups were answered from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Answered by the last cell
    pub cell_hits: u64,
    /// Answered by the last dataset (or by weight reuse from the other endpoint)
    pub dataset_hits: u64,
    /// Needed a search of other datasets, or failed everywhere
    pub misses: u64,
}

impl CacheStats {
    pub fn total(&self) -> u64 {
        self.cell_hits + self.dataset_hits + self.misses
    }

    pub fn merge(&mut self, other: &CacheStats) {
        self.cell_hits += other.cell_hits;
        self.dataset_hits += other.dataset_hits;
        self.misses += other.misses;
    }
}

/// Cached state for one registered dataset
#[derive(Debug, Clone)]
pub(crate) struct DatasetCacheEntry {
    dataset: Arc<dyn DataSet>,
    locator: Option<Arc<dyn CellLocator>>,
    vectors: VectorView,
    tolerance: f64,
    is_static: bool,
    cell: GenericCell,
    pcoords: Vec3,
}

impl DatasetCacheEntry {
    #[inline]
    fn tol2(&self) -> f64 {
        self.tolerance * self.tolerance
    }

    /// Full search of this dataset
    fn locate(&mut self, x: &Vec3, weights: &mut [f64]) -> Option<usize> {
        let tol2 = self.tol2();
        match &self.locator {
            Some(locator) => locator.find_cell(
                self.dataset.as_ref(),
                x,
                tol2,
                &mut self.cell,
                &mut self.pcoords,
                weights,
            ),
            None => self
                .dataset
                .find_cell(x, tol2, &mut self.cell, &mut self.pcoords, weights),
        }
    }

    /// Test against the cell that is already loaded
    fn test_loaded_cell(&mut self, x: &Vec3, cell_id: usize, weights: &mut [f64]) -> bool {
        if let Some(locator) = &self.locator {
            if !locator.inside_cell_bounds(x, cell_id) {
                return false;
            }
        }
        let tol2 = self.tol2();
        self.cell.contains(x, tol2, &mut self.pcoords, weights)
    }
}

/// Vector field evaluator over an ordered list of datasets
#[derive(Debug, Clone, Default)]
pub struct CachedVelocityField {
    vector_name: Option<String>,
    entries: Vec<Option<DatasetCacheEntry>>,
    weights: Vec<f64>,
    last: Option<CellHint>,
    stats: CacheStats,
}

impl CachedVelocityField {
    /// Evaluator for the named vector array (`None` uses each dataset's active vectors)
    pub fn new(vector_name: Option<String>) -> Self {
        CachedVelocityField {
            vector_name,
            entries: Vec::new(),
            weights: vec![0.0; MAX_CELL_SIZE],
            last: None,
            stats: CacheStats::default(),
        }
    }

    pub fn vector_name(&self) -> Option<&str> {
        self.vector_name.as_deref()
    }

    /// Register `dataset` at `slot`, replacing what was there
    ///
    /// Without an explicit locator, a static dataset that cannot locate
    /// points by itself gets a [`BinnedCellLocator`]. Re-registering the same
    /// static dataset at the same slot keeps the locator already built.
    ///
    /// # Errors
    /// `MissingVectorField` if the vector array is absent, and
    /// `UnsupportedVectorType` if it is not 3-component float/double or is
    /// shorter than the point count.
    pub fn register_dataset(
        &mut self,
        slot: usize,
        dataset: Arc<dyn DataSet>,
        is_static: bool,
        locator: Option<Arc<dyn CellLocator>>,
    ) -> Result<(), TraceError> {
        let array = dataset
            .point_data()
            .vectors(self.vector_name.as_deref())
            .ok_or_else(|| TraceError::MissingVectorField {
                name: self.vector_name.clone(),
            })?;
        let vectors = VectorView::new(array)?;
        if vectors.len() < dataset.number_of_points() {
            return Err(TraceError::UnsupportedVectorType {
                name: vectors.name().to_string(),
                found: format!(
                    "{} tuples for {} points",
                    vectors.len(),
                    dataset.number_of_points()
                ),
            });
        }

        let locator = match locator {
            Some(locator) => Some(locator),
            None if dataset.has_natural_locator() => None,
            None if is_static => Some(self.reusable_locator(slot, &dataset)),
            None => None,
        };

        if self.entries.len() <= slot {
            self.entries.resize_with(slot + 1, || None);
        }
        let needed = dataset.max_cell_size().max(MAX_CELL_SIZE);
        if self.weights.len() < needed {
            self.weights.resize(needed, 0.0);
        }
        if self.last.is_some_and(|h| h.dataset_index == slot) {
            self.last = None;
        }

        let tolerance = dataset.characteristic_length() * TOLERANCE_SCALE;
        self.entries[slot] = Some(DatasetCacheEntry {
            dataset,
            locator,
            vectors,
            tolerance,
            is_static,
            cell: GenericCell::new(),
            pcoords: Vec3::zeros(),
        });
        Ok(())
    }

    fn reusable_locator(&self, slot: usize, dataset: &Arc<dyn DataSet>) -> Arc<dyn CellLocator> {
        if let Some(Some(entry)) = self.entries.get(slot) {
            if entry.is_static && Arc::ptr_eq(&entry.dataset, dataset) {
                if let Some(locator) = &entry.locator {
                    return Arc::clone(locator);
                }
            }
        }
        debug!(
            "Building cell locator for dataset slot {} ({} cells)",
            slot,
            dataset.number_of_cells()
        );
        Arc::new(BinnedCellLocator::build(dataset.as_ref()))
    }

    /// Number of slots, including empty ones
    pub fn number_of_datasets(&self) -> usize {
        self.entries.len()
    }

    /// Number of slots holding a dataset
    pub fn registered_count(&self) -> usize {
        self.entries.iter().filter(|e| e.is_some()).count()
    }

    pub fn dataset(&self, slot: usize) -> Option<&Arc<dyn DataSet>> {
        self.entries.get(slot)?.as_ref().map(|e| &e.dataset)
    }

    pub fn locator(&self, slot: usize) -> Option<Arc<dyn CellLocator>> {
        self.entries.get(slot)?.as_ref()?.locator.clone()
    }

    pub fn is_static(&self, slot: usize) -> Option<bool> {
        self.entries.get(slot)?.as_ref().map(|e| e.is_static)
    }

    /// Vector value at `x`, or `None` if no dataset contains it
    pub fn evaluate(&mut self, x: &Vec3) -> Option<Vec3> {
        let hint = self.locate(x)?;
        let entry = self.entries[hint.dataset_index].as_ref()?;
        let n = entry.cell.number_of_points();
        Some(entry.vectors.weighted_sum(entry.cell.point_ids(), &self.weights[..n]))
    }

    /// Containment only, with the same search order and cache updates as `evaluate`
    ///
    /// The search still fills the interpolation weights of the hit cell, so a
    /// following `fast_compute` or `interpolate_point` can use them without
    /// another search.
    pub fn inside_test(&mut self, x: &Vec3) -> bool {
        self.locate(x).is_some()
    }

    fn locate(&mut self, x: &Vec3) -> Option<CellHint> {
        let weights = &mut self.weights;

        if let Some(hint) = self.last {
            if let Some(entry) = self.entries.get_mut(hint.dataset_index).and_then(Option::as_mut) {
                if entry.test_loaded_cell(x, hint.cell_id, weights) {
                    self.stats.cell_hits += 1;
                    return Some(hint);
                }
                if let Some(cell_id) = entry.locate(x, weights) {
                    let hint = CellHint::new(cell_id, hint.dataset_index);
                    self.last = Some(hint);
                    self.stats.dataset_hits += 1;
                    return Some(hint);
                }
            }
        }

        let skip = self.last.map(|h| h.dataset_index);
        for (index, slot) in self.entries.iter_mut().enumerate() {
            if skip == Some(index) {
                continue;
            }
            let Some(entry) = slot.as_mut() else {
                continue;
            };
            if let Some(cell_id) = entry.locate(x, weights) {
                let hint = CellHint::new(cell_id, index);
                self.last = Some(hint);
                self.stats.misses += 1;
                return Some(hint);
            }
        }

        self.last = None;
        self.stats.misses += 1;
        None
    }

    /// Prime the cache with a known cell
    ///
    /// # Panics
    /// Panics if `hint.dataset_index` is not a registered slot or
    /// `hint.cell_id` is not a cell of that dataset.
    pub fn set_last_cell_info(&mut self, hint: CellHint) {
        if self.last == Some(hint) {
            return;
        }
        let Some(entry) = self.entries.get_mut(hint.dataset_index).and_then(Option::as_mut) else {
            panic!(
                "set_last_cell_info: dataset index {} is not registered ({} slots)",
                hint.dataset_index,
                self.entries.len()
            );
        };
        let n_cells = entry.dataset.number_of_cells();
        assert!(
            hint.cell_id < n_cells,
            "set_last_cell_info: cell {} out of range for dataset {} with {} cells",
            hint.cell_id,
            hint.dataset_index,
            n_cells
        );
        entry.dataset.get_cell(hint.cell_id, &mut entry.cell);
        self.last = Some(hint);
    }

    pub fn clear_last_cell_info(&mut self) {
        self.last = None;
    }

    pub fn last_cell_info(&self) -> Option<CellHint> {
        self.last
    }

    /// Evaluate at the cell and weights `source` found last
    ///
    /// Used for static geometry where both endpoints share cells: the other
    /// endpoint's weights apply unchanged to this endpoint's vectors, so no
    /// search is needed. Counts as a dataset hit.
    pub fn fast_compute(&mut self, source: &CachedVelocityField) -> Option<Vec3> {
        let hint = source.last?;
        let from = source.entries.get(hint.dataset_index)?.as_ref()?;
        let entry = self.entries.get_mut(hint.dataset_index)?.as_mut()?;
        let n = from.cell.number_of_points();

        entry.cell.copy_from(&from.cell);
        entry.pcoords = from.pcoords;
        self.weights[..n].copy_from_slice(&source.weights[..n]);
        self.last = Some(hint);
        self.stats.dataset_hits += 1;
        Some(entry.vectors.weighted_sum(entry.cell.point_ids(), &self.weights[..n]))
    }

    /// Curl of the vector field in the last located cell
    pub fn vorticity(&self) -> Option<Vec3> {
        let hint = self.last?;
        let entry = self.entries.get(hint.dataset_index)?.as_ref()?;
        let n = entry.cell.number_of_points();
        let mut values = [Vec3::zeros(); MAX_CELL_SIZE];
        for (value, &id) in values.iter_mut().zip(entry.cell.point_ids()) {
            *value = entry.vectors.vector(id);
        }
        Some(curl(&entry.cell.derivatives(&entry.pcoords, &values[..n])))
    }

    /// Append one interpolated tuple per output array, matched by name
    ///
    /// Arrays missing from the hit dataset, or every array when nothing is
    /// cached, receive a null tuple. Returns whether a cell was available.
    pub fn interpolate_point(&self, outputs: &mut [DataArray]) -> bool {
        let entry = self
            .last
            .and_then(|h| self.entries.get(h.dataset_index))
            .and_then(Option::as_ref);
        let Some(entry) = entry else {
            for out in outputs.iter_mut() {
                out.push_null();
            }
            return false;
        };

        let n = entry.cell.number_of_points();
        let point_ids = entry.cell.point_ids();
        let weights = &self.weights[..n];
        let point_data = entry.dataset.point_data();
        for out in outputs.iter_mut() {
            match point_data.array(out.name()) {
                Some(source) => out.push_interpolated(source, point_ids, weights),
                None => out.push_null(),
            }
        }
        true
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    pub fn reset_stats(&mut self) {
        self.stats = CacheStats::default();
    }

    pub(crate) fn take_entry(&mut self, slot: usize) -> Option<DatasetCacheEntry> {
        if self.last.is_some_and(|h| h.dataset_index == slot) {
            self.last = None;
        }
        self.entries.get_mut(slot).and_then(Option::take)
    }

    pub(crate) fn put_entry(&mut self, slot: usize, entry: Option<DatasetCacheEntry>) {
        if self.entries.len() <= slot {
            self.entries.resize_with(slot + 1, || None);
        }
        if self.last.is_some_and(|h| h.dataset_index == slot) {
            self.last = None;
        }
        if let Some(entry) = &entry {
            let needed = entry.dataset.max_cell_size().max(MAX_CELL_SIZE);
            if self.weights.len() < needed {
                self.weights.resize(needed, 0.0);
            }
        }
        self.entries[slot] = entry;
    }

    /// Drop every registered dataset
    pub fn clear(&mut self) {
        self.entries.clear();
        self.last = None;
    }
}

impl FunctionSet for CachedVelocityField {
    fn function_values(&mut self, x: &ParticlePosition) -> Option<Vec3> {
        self.evaluate(&x.point)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::{ArrayValues, DataArray, UniformGrid, UnstructuredGrid};
    use approx::assert_relative_eq;

    fn linear_grid(origin: Vec3) -> UniformGrid {
        UniformGrid::new(origin, Vec3::repeat(0.25), [5, 5, 5])
            .unwrap()
            .with_vectors("velocity", |p| Vec3::new(p.x, 2.0 * p.y, -p.z))
            .with_scalars("pressure", |p| p.x + p.y + p.z)
    }

    fn field_with(datasets: Vec<Arc<dyn DataSet>>) -> CachedVelocityField {
        let mut field = CachedVelocityField::new(None);
        for (slot, ds) in datasets.into_iter().enumerate() {
            field.register_dataset(slot, ds, true, None).unwrap();
        }
        field
    }

    #[test]
    fn test_linear_field_is_exact() {
        let mut field = field_with(vec![Arc::new(linear_grid(Vec3::zeros()))]);
        let x = Vec3::new(0.3, 0.7, 0.45);
        let v = field.evaluate(&x).unwrap();
        assert_relative_eq!(v, Vec3::new(0.3, 1.4, -0.45), epsilon = 1e-12);
        assert!(field.evaluate(&Vec3::new(2.0, 0.0, 0.0)).is_none());
        assert_eq!(field.last_cell_info(), None);
    }

    #[test]
    fn test_cache_never_changes_results() {
        let datasets: Vec<Arc<dyn DataSet>> = vec![
            Arc::new(linear_grid(Vec3::zeros())),
            Arc::new(UnstructuredGrid::from_uniform(&linear_grid(Vec3::new(1.0, 0.0, 0.0)))),
        ];
        let mut cached = field_with(datasets.clone());

        let path: Vec<Vec3> = (0..40)
            .map(|i| Vec3::new(0.05 * f64::from(i), 0.5 + 0.004 * f64::from(i), 0.3))
            .collect();
        for x in &path {
            let mut fresh = field_with(datasets.clone());
            let expected = fresh.evaluate(x);
            let got = cached.evaluate(x);
            match (expected, got) {
                (Some(e), Some(g)) => assert_relative_eq!(e, g, epsilon = 1e-12),
                (e, g) => assert_eq!(e.is_some(), g.is_some(), "containment differs at {:?}", x),
            }
        }

        let stats = cached.stats();
        assert!(stats.cell_hits > 0, "consecutive points should reuse the cell: {:?}", stats);
        assert!(stats.dataset_hits > 0);
        assert!(stats.misses > 0, "crossing into the second dataset is a miss");
    }

    #[test]
    fn test_missing_and_unsupported_vectors() {
        let mut field = CachedVelocityField::new(Some("wind".to_string()));
        let err = field
            .register_dataset(0, Arc::new(linear_grid(Vec3::zeros())), false, None)
            .unwrap_err();
        assert_eq!(
            err,
            TraceError::MissingVectorField {
                name: Some("wind".to_string())
            }
        );

        let mut grid = UniformGrid::new(Vec3::zeros(), Vec3::repeat(1.0), [2, 2, 2]).unwrap();
        grid.point_data_mut()
            .add_array(DataArray::new("wind", 3, ArrayValues::Int(vec![0; 24])));
        let err = field.register_dataset(0, Arc::new(grid), false, None).unwrap_err();
        assert!(matches!(err, TraceError::UnsupportedVectorType { .. }));
    }

    #[test]
    fn test_static_unstructured_locator_is_reused() {
        let mesh: Arc<dyn DataSet> = Arc::new(UnstructuredGrid::from_uniform(&linear_grid(Vec3::zeros())));
        let mut field = CachedVelocityField::new(None);
        field.register_dataset(0, Arc::clone(&mesh), true, None).unwrap();
        let first = field.locator(0).unwrap();
        field.register_dataset(0, Arc::clone(&mesh), true, None).unwrap();
        assert!(Arc::ptr_eq(&first, &field.locator(0).unwrap()));

        let mut dynamic = CachedVelocityField::new(None);
        dynamic.register_dataset(0, mesh, false, None).unwrap();
        assert!(dynamic.locator(0).is_none());
        assert!(dynamic.evaluate(&Vec3::new(0.5, 0.5, 0.5)).is_some());
    }

    #[test]
    fn test_set_last_cell_info_primes_cache() {
        let mut field = field_with(vec![Arc::new(linear_grid(Vec3::zeros()))]);
        field.set_last_cell_info(CellHint::new(0, 0));
        field.evaluate(&Vec3::new(0.1, 0.1, 0.1)).unwrap();
        assert_eq!(field.stats().cell_hits, 1);
        field.clear_last_cell_info();
        assert_eq!(field.last_cell_info(), None);
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn test_set_last_cell_info_rejects_bad_cell() {
        let mut field = field_with(vec![Arc::new(linear_grid(Vec3::zeros()))]);
        field.set_last_cell_info(CellHint::new(10_000, 0));
    }

    #[test]
    #[should_panic(expected = "not registered")]
    fn test_set_last_cell_info_rejects_bad_dataset() {
        let mut field = field_with(vec![Arc::new(linear_grid(Vec3::zeros()))]);
        field.set_last_cell_info(CellHint::new(0, 3));
    }

    #[test]
    fn test_vorticity_and_point_data() {
        let grid = UniformGrid::new(Vec3::zeros(), Vec3::repeat(0.5), [3, 3, 3])
            .unwrap()
            .with_vectors("velocity", |p| Vec3::new(-p.y, p.x, 0.0))
            .with_scalars("pressure", |p| 2.0 * p.x);
        let mut field = field_with(vec![Arc::new(grid)]);
        field.evaluate(&Vec3::new(0.6, 0.2, 0.9)).unwrap();
        assert_relative_eq!(field.vorticity().unwrap(), Vec3::new(0.0, 0.0, 2.0), epsilon = 1e-12);

        let mut outputs = vec![
            DataArray::new("pressure", 1, ArrayValues::Double(Vec::new())),
            DataArray::new("absent", 1, ArrayValues::Double(Vec::new())),
        ];
        assert!(field.interpolate_point(&mut outputs));
        assert_relative_eq!(outputs[0].component(0, 0), 1.2, epsilon = 1e-12);
        assert_relative_eq!(outputs[1].component(0, 0), 0.0);
    }
}
