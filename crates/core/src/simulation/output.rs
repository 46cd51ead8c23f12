//! Tracer output: per-step particle frames, pathlines and step reports

use crate::core_types::{ParticlePosition, ParticleRecord, Vec3};
use crate::field::CacheStats;
use crate::grid::DataArray;
use rustc_hash::{FxBuildHasher, FxHashMap};

/// One emitted point per live particle, with parallel per-point arrays
///
/// Every `Vec` holds exactly [`ParticleOutput::len`] entries. The optional
/// rotation arrays are present only when vorticity is computed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParticleOutput {
    /// Time value this frame corresponds to
    pub time: f64,
    pub points: Vec<Vec3>,
    /// One vertex cell per point, holding the point index
    pub vertices: Vec<usize>,
    pub particle_ids: Vec<i64>,
    pub source_ids: Vec<i32>,
    pub injected_point_ids: Vec<i32>,
    pub injected_step_ids: Vec<i32>,
    pub error_codes: Vec<i32>,
    pub ages: Vec<f64>,
    pub vorticity: Option<Vec<Vec3>>,
    pub rotation: Option<Vec<f64>>,
    pub angular_velocity: Option<Vec<f64>>,
    /// Input point arrays interpolated at each particle
    pub point_data: Vec<DataArray>,
}

impl ParticleOutput {
    /// An empty frame whose interpolated arrays mirror `templates`
    pub fn new(time: f64, templates: &[DataArray], with_vorticity: bool) -> Self {
        ParticleOutput {
            time,
            point_data: templates.iter().map(DataArray::empty_like).collect(),
            vorticity: with_vorticity.then(Vec::new),
            rotation: with_vorticity.then(Vec::new),
            angular_velocity: with_vorticity.then(Vec::new),
            ..Default::default()
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Append a particle's position and scalar arrays, returning its point index
    ///
    /// Point data and rotation arrays are filled separately by the caller.
    pub(crate) fn push_particle(&mut self, p: &ParticleRecord) -> usize {
        let index = self.points.len();
        self.points.push(p.position.point);
        self.vertices.push(index);
        self.particle_ids.push(p.unique_id);
        self.source_ids.push(p.source_id);
        self.injected_point_ids.push(p.injected_point_id);
        self.injected_step_ids.push(p.injected_step_id);
        self.error_codes.push(p.error_code.as_i32());
        self.ages.push(p.age);
        index
    }

    pub(crate) fn push_rotation(&mut self, vorticity: Vec3, rotation: f64, angular_velocity: f64) {
        if let Some(v) = self.vorticity.as_mut() {
            v.push(vorticity);
        }
        if let Some(r) = self.rotation.as_mut() {
            r.push(rotation);
        }
        if let Some(w) = self.angular_velocity.as_mut() {
            w.push(angular_velocity);
        }
    }

    /// Point index of the particle with this unique id
    pub fn find(&self, unique_id: i64) -> Option<usize> {
        self.particle_ids.iter().position(|&id| id == unique_id)
    }

    /// An interpolated point array by name
    pub fn point_array(&self, name: &str) -> Option<&DataArray> {
        self.point_data.iter().find(|a| a.name() == name)
    }
}

/// The polyline traced by one particle
#[derive(Debug, Clone, PartialEq)]
pub struct ParticlePath {
    pub unique_id: i64,
    pub source_id: i32,
    pub injected_point_id: i32,
    /// Emitted positions in time order
    pub positions: Vec<ParticlePosition>,
    /// Error code at each emitted position
    pub error_codes: Vec<i32>,
}

impl ParticlePath {
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Polyline length in space
    pub fn arc_length(&self) -> f64 {
        self.positions
            .windows(2)
            .map(|w| (w[1].point - w[0].point).norm())
            .sum()
    }
}

/// Every frame of a run, grouped by particle
#[derive(Debug, Clone, Default)]
pub struct ParticlePaths {
    paths: FxHashMap<i64, ParticlePath>,
}

impl ParticlePaths {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append every point of `frame` to its particle's polyline
    pub fn append_frame(&mut self, frame: &ParticleOutput) {
        if self.paths.is_empty() {
            self.paths = FxHashMap::with_capacity_and_hasher(frame.len(), FxBuildHasher);
        }
        for i in 0..frame.len() {
            let path = self
                .paths
                .entry(frame.particle_ids[i])
                .or_insert_with(|| ParticlePath {
                    unique_id: frame.particle_ids[i],
                    source_id: frame.source_ids[i],
                    injected_point_id: frame.injected_point_ids[i],
                    positions: Vec::new(),
                    error_codes: Vec::new(),
                });
            path.positions
                .push(ParticlePosition::new(frame.points[i], frame.time));
            path.error_codes.push(frame.error_codes[i]);
        }
    }

    pub fn path(&self, unique_id: i64) -> Option<&ParticlePath> {
        self.paths.get(&unique_id)
    }

    /// Number of particles with at least one point
    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// All polylines ordered by unique id
    pub fn polylines(&self) -> Vec<&ParticlePath> {
        let mut paths: Vec<_> = self.paths.values().collect();
        paths.sort_unstable_by_key(|p| p.unique_id);
        paths
    }

    pub fn clear(&mut self) {
        self.paths.clear();
    }
}

/// What happened during one call to the tracer
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepReport {
    /// Snapshot index the step advanced to
    pub step: usize,
    pub time: f64,
    /// Particles that entered integration this step
    pub integrated: usize,
    pub emitted: usize,
    pub terminated_by_speed: usize,
    pub terminated_by_lifetime: usize,
    /// Particles this rank could not resolve and sent away
    pub handed_off: usize,
    /// Particles accepted from peer ranks
    pub received: usize,
    /// Seeds injected this step
    pub injected: usize,
    /// The abort flag was raised before every particle was integrated
    pub aborted: bool,
    pub cache_stats: [CacheStats; 2],
    /// Every particle that left this rank during the step, as sent
    pub outbox: Vec<ParticleRecord>,
}
