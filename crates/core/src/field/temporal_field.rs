//! Linear blend of two cached evaluators across a time window
//!
//! Endpoint 0 holds the datasets at `T0`, endpoint 1 those at `T1`. Both
//! endpoints register datasets under the same slot indices. A slot is static
//! when its geometry is declared static at both endpoints; static slots share
//! one cell locator and evaluate `T1` by reusing the `T0` interpolation
//! weights instead of searching again.

use crate::core_types::{CellHint, LocationState, ParticlePosition, TraceError, Vec3};
use crate::field::cached_field::{CacheStats, CachedVelocityField};
use crate::field::function_set::FunctionSet;
use crate::grid::{BinnedCellLocator, CellLocator, DataArray, DataSet};
use std::sync::Arc;
use tracing::debug;

/// Time weights this close to 0 or 1 snap to the endpoint
pub const WEIGHT_SNAP: f64 = 1e-3;

/// Velocity at `(x, y, z, t)` for `t` in `[T0, T1]`
#[derive(Debug, Clone)]
pub struct TemporalVelocityField {
    fields: [CachedVelocityField; 2],
    times: [f64; 2],
    scale: f64,
    values: [Vec3; 2],
    last_good_velocity: Vec3,
    last_location: LocationState,
    endpoint_static: [Vec<bool>; 2],
}

impl Default for TemporalVelocityField {
    fn default() -> Self {
        Self::new(None)
    }
}

impl TemporalVelocityField {
    pub fn new(vector_name: Option<String>) -> Self {
        TemporalVelocityField {
            fields: [
                CachedVelocityField::new(vector_name.clone()),
                CachedVelocityField::new(vector_name),
            ],
            times: [0.0, 0.0],
            scale: 0.0,
            values: [Vec3::zeros(); 2],
            last_good_velocity: Vec3::zeros(),
            last_location: LocationState::OutsideAll,
            endpoint_static: [Vec::new(), Vec::new()],
        }
    }

    /// Register `dataset` at `slot` for one endpoint and set that endpoint's time
    ///
    /// Endpoint 1 requires the slot to be registered at endpoint 0 first. A
    /// slot static at both endpoints shares endpoint 0's locator; any other
    /// dataset without natural point location gets its own locator.
    ///
    /// # Errors
    /// `InvalidConfig` for an endpoint other than 0 or 1, `EndpointMismatch`
    /// if endpoint 1 has no matching endpoint 0 slot, plus any error from
    /// [`CachedVelocityField::register_dataset`].
    pub fn attach_endpoint_dataset(
        &mut self,
        slot: usize,
        endpoint: usize,
        time: f64,
        dataset: Arc<dyn DataSet>,
        is_static: bool,
    ) -> Result<(), TraceError> {
        let locator = match endpoint {
            0 => {
                if is_static && self.fields[0].is_static(slot) == Some(true) {
                    self.fields[0].locator(slot)
                } else {
                    fresh_locator(&dataset, is_static)
                }
            }
            1 => {
                let Some(static_at_t0) = self.fields[0].is_static(slot) else {
                    return Err(TraceError::EndpointMismatch(format!(
                        "dataset slot {} attached at T1 has no dataset at T0",
                        slot
                    )));
                };
                if static_at_t0 && is_static {
                    self.fields[0].locator(slot)
                } else {
                    fresh_locator(&dataset, false)
                }
            }
            _ => {
                return Err(TraceError::InvalidConfig(format!(
                    "time endpoint must be 0 or 1, got {}",
                    endpoint
                )))
            }
        };

        let both_static = match endpoint {
            0 => is_static,
            _ => is_static && self.endpoint_static[0].get(slot).copied().unwrap_or(false),
        };
        self.fields[endpoint].register_dataset(slot, dataset, both_static, locator)?;

        let flags = &mut self.endpoint_static[endpoint];
        if flags.len() <= slot {
            flags.resize(slot + 1, false);
        }
        flags[slot] = is_static;

        self.times[endpoint] = time;
        self.update_scale();
        Ok(())
    }

    fn update_scale(&mut self) {
        let span = self.times[1] - self.times[0];
        self.scale = if span > 0.0 { 1.0 / span } else { 0.0 };
    }

    /// Check that both endpoints mirror each other
    ///
    /// # Errors
    /// `NoInput` if an endpoint has no dataset, `EndpointMismatch` if the
    /// slot sets differ, if a static slot changes its point or cell count
    /// between endpoints, or if `static_mesh` is requested and a slot is not
    /// static at both endpoints.
    pub fn validate_endpoints(&self, static_mesh: bool) -> Result<(), TraceError> {
        for (endpoint, field) in self.fields.iter().enumerate() {
            if field.registered_count() == 0 {
                return Err(TraceError::NoInput(format!(
                    "no dataset with vectors at time endpoint {}",
                    endpoint
                )));
            }
        }
        let slots = self.fields[0].number_of_datasets().max(self.fields[1].number_of_datasets());
        for slot in 0..slots {
            let at_t0 = self.fields[0].dataset(slot).is_some();
            let at_t1 = self.fields[1].dataset(slot).is_some();
            if at_t0 != at_t1 {
                return Err(TraceError::EndpointMismatch(format!(
                    "dataset slot {} is registered at T{} only ({} vs {} datasets)",
                    slot,
                    usize::from(at_t1),
                    self.fields[0].registered_count(),
                    self.fields[1].registered_count()
                )));
            }
            if let (true, Some(d0), Some(d1)) = (
                self.is_static_slot(slot),
                self.fields[0].dataset(slot),
                self.fields[1].dataset(slot),
            ) {
                if d0.number_of_points() != d1.number_of_points()
                    || d0.number_of_cells() != d1.number_of_cells()
                {
                    return Err(TraceError::EndpointMismatch(format!(
                        "static dataset slot {} has {} points and {} cells at T0 but {} points and {} cells at T1",
                        slot,
                        d0.number_of_points(),
                        d0.number_of_cells(),
                        d1.number_of_points(),
                        d1.number_of_cells()
                    )));
                }
            }
            if static_mesh && at_t0 && !self.is_static_slot(slot) {
                return Err(TraceError::EndpointMismatch(format!(
                    "static mesh requested but dataset slot {} is not static at both endpoints",
                    slot
                )));
            }
        }
        Ok(())
    }

    pub fn is_static_slot(&self, slot: usize) -> bool {
        self.endpoint_static
            .iter()
            .all(|flags| flags.get(slot).copied().unwrap_or(false))
    }

    /// True if every registered slot is static at both endpoints
    pub fn all_static(&self) -> bool {
        (0..self.fields[0].number_of_datasets())
            .filter(|&slot| self.fields[0].dataset(slot).is_some())
            .all(|slot| self.is_static_slot(slot))
    }

    pub fn times(&self) -> [f64; 2] {
        self.times
    }

    /// Normalised position of `t` in the window, snapped to exact 0 and 1
    pub fn time_weight(&self, t: f64) -> f64 {
        if self.scale == 0.0 {
            return 0.0;
        }
        let w = ((t - self.times[0]) * self.scale).clamp(0.0, 1.0);
        if w < WEIGHT_SNAP {
            0.0
        } else if w > 1.0 - WEIGHT_SNAP {
            1.0
        } else {
            w
        }
    }

    /// Evaluate at `x` and report which endpoints contain it
    ///
    /// The blended (or single-endpoint) velocity becomes the last good
    /// velocity. A point outside both endpoints leaves it unchanged.
    pub fn classify_point(&mut self, x: &ParticlePosition) -> LocationState {
        let w = self.time_weight(x.time);
        let [f0, f1] = &mut self.fields;

        let location = if let Some(v0) = f0.evaluate(&x.point) {
            self.values[0] = v0;
            let slot_static = f0.last_cell_info().is_some_and(|hint| {
                self.endpoint_static
                    .iter()
                    .all(|flags| flags.get(hint.dataset_index).copied().unwrap_or(false))
            });
            let v1 = if slot_static {
                f1.fast_compute(f0)
            } else {
                f1.evaluate(&x.point)
            };
            match v1 {
                Some(v1) => {
                    self.values[1] = v1;
                    self.last_good_velocity = v0 * (1.0 - w) + v1 * w;
                    LocationState::InsideAll
                }
                None => {
                    self.last_good_velocity = v0;
                    LocationState::OutsideT1
                }
            }
        } else if let Some(v1) = f1.evaluate(&x.point) {
            self.values[1] = v1;
            self.last_good_velocity = v1;
            LocationState::OutsideT0
        } else {
            LocationState::OutsideAll
        };

        self.last_location = location;
        location
    }

    /// Containment classification of `x`
    pub fn test_point(&mut self, x: &ParticlePosition) -> LocationState {
        self.classify_point(x)
    }

    pub fn last_location(&self) -> LocationState {
        self.last_location
    }

    pub fn last_good_velocity(&self) -> Vec3 {
        self.last_good_velocity
    }

    /// Values at T0 and T1 from the last evaluation that reached them
    pub fn endpoint_values(&self) -> [Vec3; 2] {
        self.values
    }

    /// Last located cell at each endpoint
    pub fn get_cached_cell_ids(&self) -> [Option<CellHint>; 2] {
        [self.fields[0].last_cell_info(), self.fields[1].last_cell_info()]
    }

    /// Prime both endpoint caches; `None` clears that endpoint
    ///
    /// Returns true if at least one endpoint was primed.
    ///
    /// # Panics
    /// Panics if a hint names a slot or cell that does not exist.
    pub fn set_cached_cell_ids(&mut self, hints: [Option<CellHint>; 2]) -> bool {
        for (field, hint) in self.fields.iter_mut().zip(hints) {
            match hint {
                Some(hint) => field.set_last_cell_info(hint),
                None => field.clear_last_cell_info(),
            }
        }
        hints.iter().any(Option::is_some)
    }

    pub fn clear_cache(&mut self) {
        for field in &mut self.fields {
            field.clear_last_cell_info();
        }
    }

    /// Slide the window forward: the T1 datasets become the T0 datasets
    ///
    /// Every slot's endpoint 1 entry (dataset, vectors and locator) moves to
    /// endpoint 0 and both caches are invalidated. Static slots move as well,
    /// since only endpoint 1 is re-attached afterwards and the T0 vectors must
    /// be the ones valid at the new `T0`. Endpoint 1 is then empty until the
    /// next round of `attach_endpoint_dataset` calls, which for static slots
    /// reuses the moved locator.
    pub fn advance_one_time_step(&mut self) {
        let slots = self.fields[1].number_of_datasets();
        for slot in 0..slots {
            let entry = self.fields[1].take_entry(slot);
            if entry.is_some() {
                self.fields[0].put_entry(slot, entry);
            }
        }
        let flags = std::mem::take(&mut self.endpoint_static[1]);
        for (slot, &flag) in flags.iter().enumerate() {
            if let Some(t0) = self.endpoint_static[0].get_mut(slot) {
                *t0 = *t0 && flag;
            }
        }
        self.clear_cache();
        self.times[0] = self.times[1];
        self.update_scale();
        debug!("Temporal field advanced to T0 = {}", self.times[0]);
    }

    /// Interpolate point data from one endpoint's last located cell
    pub fn interpolate_point(&self, endpoint: usize, outputs: &mut [DataArray]) -> bool {
        self.fields[endpoint.min(1)].interpolate_point(outputs)
    }

    /// Curl of the field at one endpoint's last located cell
    pub fn vorticity(&self, endpoint: usize) -> Option<Vec3> {
        self.fields[endpoint.min(1)].vorticity()
    }

    pub fn endpoint(&self, endpoint: usize) -> &CachedVelocityField {
        &self.fields[endpoint.min(1)]
    }

    pub fn stats(&self) -> [CacheStats; 2] {
        [self.fields[0].stats(), self.fields[1].stats()]
    }

    pub fn reset_stats(&mut self) {
        for field in &mut self.fields {
            field.reset_stats();
        }
    }

    /// Drop every dataset at both endpoints
    pub fn clear(&mut self) {
        for field in &mut self.fields {
            field.clear();
        }
        self.endpoint_static = [Vec::new(), Vec::new()];
    }
}

impl FunctionSet for TemporalVelocityField {
    fn function_values(&mut self, x: &ParticlePosition) -> Option<Vec3> {
        match self.classify_point(x) {
            LocationState::OutsideAll => None,
            _ => Some(self.last_good_velocity),
        }
    }
}

/// A locator for datasets that cannot locate points themselves
fn fresh_locator(dataset: &Arc<dyn DataSet>, is_static: bool) -> Option<Arc<dyn CellLocator>> {
    if dataset.has_natural_locator() || is_static {
        // Static datasets get one from the evaluator, reusable across calls
        return None;
    }
    Some(Arc::new(BinnedCellLocator::build(dataset.as_ref())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::{UniformGrid, UnstructuredGrid};
    use approx::assert_relative_eq;

    fn constant_grid(max: f64, velocity: Vec3) -> Arc<dyn DataSet> {
        Arc::new(
            UniformGrid::new(Vec3::zeros(), Vec3::repeat(max / 4.0), [5, 5, 5])
                .unwrap()
                .with_vectors("velocity", move |_| velocity),
        )
    }

    fn window(is_static: bool, t0_max: f64, t1_max: f64) -> TemporalVelocityField {
        let mut field = TemporalVelocityField::new(None);
        field
            .attach_endpoint_dataset(0, 0, 0.0, constant_grid(t0_max, Vec3::new(1.0, 0.0, 0.0)), is_static)
            .unwrap();
        field
            .attach_endpoint_dataset(0, 1, 1.0, constant_grid(t1_max, Vec3::new(3.0, 0.0, 0.0)), is_static)
            .unwrap();
        field
    }

    #[test]
    fn test_weights_exact_at_endpoints_and_monotonic() {
        let field = window(true, 1.0, 1.0);
        assert_eq!(field.time_weight(0.0), 0.0);
        assert_eq!(field.time_weight(1.0), 1.0);
        assert_eq!(field.time_weight(0.0005), 0.0);
        assert_eq!(field.time_weight(0.9995), 1.0);

        let mut previous = -1.0;
        for i in 0..=100 {
            let w = field.time_weight(f64::from(i) / 100.0);
            assert!(w >= previous, "weight must not decrease");
            previous = w;
        }
    }

    #[test]
    fn test_blend_is_linear_in_time() {
        let mut field = window(false, 1.0, 1.0);
        let mut previous = 0.0;
        for t in [0.0, 0.25, 0.5, 0.75, 1.0] {
            let state = field.classify_point(&ParticlePosition::new(Vec3::new(0.5, 0.5, 0.5), t));
            assert_eq!(state, LocationState::InsideAll);
            let vx = field.last_good_velocity().x;
            assert_relative_eq!(vx, 1.0 + 2.0 * t, epsilon = 1e-12);
            assert!(vx >= previous);
            previous = vx;
        }
    }

    #[test]
    fn test_single_endpoint_classification() {
        // T1 domain is half the size of the T0 domain
        let mut field = window(false, 1.0, 0.5);
        let x = ParticlePosition::new(Vec3::new(0.8, 0.2, 0.2), 0.5);
        assert_eq!(field.classify_point(&x), LocationState::OutsideT1);
        assert_relative_eq!(field.last_good_velocity(), Vec3::new(1.0, 0.0, 0.0));

        let mut field = window(false, 0.5, 1.0);
        assert_eq!(field.classify_point(&x), LocationState::OutsideT0);
        assert_relative_eq!(field.last_good_velocity(), Vec3::new(3.0, 0.0, 0.0));

        let far = ParticlePosition::new(Vec3::new(5.0, 0.0, 0.0), 0.5);
        assert_eq!(field.classify_point(&far), LocationState::OutsideAll);
        assert!(field.function_values(&far).is_none());
        assert_relative_eq!(field.last_good_velocity(), Vec3::new(3.0, 0.0, 0.0));
    }

    #[test]
    fn test_static_slot_reuses_weights() {
        let mut field = window(true, 1.0, 1.0);
        for i in 0..10 {
            let x = ParticlePosition::new(Vec3::new(0.05 + 0.09 * f64::from(i), 0.5, 0.5), 0.5);
            assert_eq!(field.classify_point(&x), LocationState::InsideAll);
        }
        let [t0, t1] = field.stats();
        assert_eq!(t1.dataset_hits, 10);
        assert_eq!(t1.misses, 0);
        assert_eq!(t1.cell_hits, 0);
        assert!(t0.total() >= 10);
    }

    #[test]
    fn test_static_unstructured_shares_locator() {
        let grid = UniformGrid::new(Vec3::zeros(), Vec3::repeat(0.5), [3, 3, 3]).unwrap();
        let a = UnstructuredGrid::from_uniform(&grid.clone().with_vectors("velocity", |_| Vec3::x()));
        let b = UnstructuredGrid::from_uniform(&grid.with_vectors("velocity", |_| Vec3::y()));
        let mut field = TemporalVelocityField::new(None);
        field.attach_endpoint_dataset(0, 0, 0.0, Arc::new(a), true).unwrap();
        field.attach_endpoint_dataset(0, 1, 1.0, Arc::new(b), true).unwrap();
        let l0 = field.endpoint(0).locator(0).unwrap();
        let l1 = field.endpoint(1).locator(0).unwrap();
        assert!(Arc::ptr_eq(&l0, &l1));
        assert!(field.validate_endpoints(true).is_ok());
    }

    #[test]
    fn test_cached_cell_ids_round_trip() {
        let mut field = window(true, 1.0, 1.0);
        let hints = [Some(CellHint::new(7, 0)), None];
        assert!(field.set_cached_cell_ids(hints));
        assert_eq!(field.get_cached_cell_ids(), hints);

        let hints = [None, Some(CellHint::new(12, 0))];
        field.set_cached_cell_ids(hints);
        assert_eq!(field.get_cached_cell_ids(), hints);

        assert!(!field.set_cached_cell_ids([None, None]));
        assert_eq!(field.get_cached_cell_ids(), [None, None]);
        assert_eq!(CellHint::to_raw(field.get_cached_cell_ids()[0]), (-1, 0));
    }

    #[test]
    fn test_endpoint_validation() {
        let mut field = TemporalVelocityField::new(None);
        let err = field
            .attach_endpoint_dataset(0, 1, 1.0, constant_grid(1.0, Vec3::x()), false)
            .unwrap_err();
        assert!(matches!(err, TraceError::EndpointMismatch(_)));

        let mut field = window(false, 1.0, 1.0);
        field
            .attach_endpoint_dataset(1, 0, 0.0, constant_grid(1.0, Vec3::x()), false)
            .unwrap();
        assert!(matches!(
            field.validate_endpoints(false),
            Err(TraceError::EndpointMismatch(_))
        ));

        let field = window(false, 1.0, 1.0);
        assert!(field.validate_endpoints(false).is_ok());
        assert!(field.validate_endpoints(true).is_err());

        let empty = TemporalVelocityField::new(None);
        assert!(matches!(empty.validate_endpoints(false), Err(TraceError::NoInput(_))));
    }

    #[test]
    fn test_static_slot_with_different_mesh_sizes_is_rejected() {
        let coarse = UniformGrid::new(Vec3::zeros(), Vec3::repeat(0.5), [3, 3, 3])
            .unwrap()
            .with_vectors("velocity", |_| Vec3::x());
        let mut field = TemporalVelocityField::new(None);
        field
            .attach_endpoint_dataset(0, 0, 0.0, constant_grid(1.0, Vec3::x()), true)
            .unwrap();
        field.attach_endpoint_dataset(0, 1, 1.0, Arc::new(coarse), true).unwrap();

        let err = field.validate_endpoints(true).unwrap_err();
        assert!(matches!(err, TraceError::EndpointMismatch(_)));
        assert!(err.to_string().contains("125 points"));
        assert!(field.validate_endpoints(false).is_err());

        // The same sizes pass
        assert!(window(true, 1.0, 1.0).validate_endpoints(true).is_ok());
    }

    #[test]
    fn test_advance_moves_t1_into_t0() {
        let mut field = window(false, 1.0, 1.0);
        field.advance_one_time_step();
        assert_eq!(field.times()[0], 1.0);
        let v = field.endpoint(0).clone().evaluate(&Vec3::new(0.5, 0.5, 0.5)).unwrap();
        assert_relative_eq!(v, Vec3::new(3.0, 0.0, 0.0));
        assert_eq!(field.endpoint(1).registered_count(), 0);

        field
            .attach_endpoint_dataset(0, 1, 2.0, constant_grid(1.0, Vec3::new(5.0, 0.0, 0.0)), false)
            .unwrap();
        field.classify_point(&ParticlePosition::new(Vec3::new(0.5, 0.5, 0.5), 1.5));
        assert_relative_eq!(field.last_good_velocity(), Vec3::new(4.0, 0.0, 0.0), epsilon = 1e-12);
    }
}
