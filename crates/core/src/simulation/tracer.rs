//! Particle advection driver
//!
//! `ParticleTracer` owns the live particle population and walks it through a
//! sequence of mesh snapshots. Each call to [`ParticleTracer::advance`]
//! integrates every particle across the current `[T0, T1]` window, exchanges
//! particles that left this rank's domain, optionally re-injects seeds, and
//! emits one output frame.

use crate::core_types::{ErrorCode, LocationState, ParticlePosition, ParticleRecord, TraceError, Vec3};
use crate::field::{CacheStats, TemporalVelocityField};
use crate::grid::{DataArray, DataSet};
use crate::simulation::config::{OutputMode, ParticleLifetime, TerminationUnit, TracerConfig};
use crate::simulation::exchange::{
    assign_unique_ids, exchange_particles, lowest_rank_owners, Communicator, LocalCommunicator,
};
use crate::simulation::output::{ParticleOutput, ParticlePaths, StepReport};
use crate::simulation::seeds::SeedSource;
use crate::solver::{create_integrator, InitialValueProblemSolver};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

/// Sub-steps stop once the particle is this fraction of a sub-step from the target
const STEP_EPSILON: f64 = 1.0e-3;

/// The mesh blocks valid at one instant
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub time: f64,
    /// One entry per block; block `i` must describe the same region in every snapshot
    pub blocks: Vec<Arc<dyn DataSet>>,
}

impl Snapshot {
    pub fn new(time: f64, blocks: Vec<Arc<dyn DataSet>>) -> Self {
        Self { time, blocks }
    }

    /// A snapshot with a single block
    pub fn single(time: f64, block: Arc<dyn DataSet>) -> Self {
        Self {
            time,
            blocks: vec![block],
        }
    }
}

/// Where the driver is in its per-step cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DriverPhase {
    /// Seeds are being classified at the start time
    SeedingAtStart,
    /// Particles are being advanced across the window
    Integrating,
    /// Seeds are re-injected if the period has elapsed
    ReinjectingIfDue,
    /// A frame has been emitted; the driver waits for the next step
    Emitting,
    /// Not running (also the state before the first run)
    Finished,
}

impl DriverPhase {
    /// Whether the driver may move from `self` to `next`
    pub fn can_transition_to(self, next: DriverPhase) -> bool {
        matches!(
            (self, next),
            (DriverPhase::Finished, DriverPhase::SeedingAtStart)
                | (DriverPhase::SeedingAtStart, DriverPhase::Emitting)
                | (DriverPhase::Emitting, DriverPhase::Integrating)
                | (DriverPhase::Emitting, DriverPhase::Finished)
                | (DriverPhase::Integrating, DriverPhase::ReinjectingIfDue)
                | (DriverPhase::ReinjectingIfDue, DriverPhase::Emitting)
        )
    }
}

/// Shared flag that stops integration at the next particle
///
/// Clones observe the same flag, so a handle can be moved to another thread.
#[derive(Debug, Clone, Default)]
pub struct AbortHandle(Arc<AtomicBool>);

impl AbortHandle {
    pub fn abort(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::Relaxed);
    }
}

enum Fate {
    Emitted,
    HandedOff,
    Stagnated,
}

/// Advects seed particles through a time-varying vector field
///
/// One tracer runs per rank; ranks cooperate through the communicator `C`
/// and must make the same sequence of calls.
#[derive(Debug)]
pub struct ParticleTracer<C: Communicator = LocalCommunicator> {
    config: TracerConfig,
    comm: C,
    field: TemporalVelocityField,
    solver: Box<dyn InitialValueProblemSolver>,
    seeds: Vec<SeedSource>,
    particles: Vec<ParticleRecord>,
    unique_id_counter: i64,
    phase: DriverPhase,
    start_time: f64,
    current_time: f64,
    /// `[T0, T1]` of the attached snapshots, tracked even when this rank holds no data
    window: [f64; 2],
    /// Whether this rank has non-empty blocks in the current window
    has_local_data: bool,
    steps_taken: usize,
    reinjection_counter: i32,
    /// Empty copies of the input point arrays, one per interpolated output array
    templates: Vec<DataArray>,
    /// Seeds as first classified, re-used while seeds and geometry are static
    static_seeds: Option<Vec<ParticleRecord>>,
    output: ParticleOutput,
    paths: ParticlePaths,
    report: StepReport,
    abort: AbortHandle,
}

impl ParticleTracer<LocalCommunicator> {
    /// A single-rank tracer
    ///
    /// # Errors
    /// Returns `InvalidConfig` if the configuration does not validate.
    pub fn new(config: TracerConfig) -> Result<Self, TraceError> {
        Self::with_communicator(config, LocalCommunicator)
    }
}

impl<C: Communicator> ParticleTracer<C> {
    /// A tracer that cooperates with peer ranks through `comm`
    ///
    /// # Errors
    /// Returns `InvalidConfig` if the configuration does not validate.
    pub fn with_communicator(config: TracerConfig, comm: C) -> Result<Self, TraceError> {
        config.validate()?;
        let solver = create_integrator(config.integrator);
        let field = TemporalVelocityField::new(config.vector_field.clone());
        Ok(ParticleTracer {
            config,
            comm,
            field,
            solver,
            seeds: Vec::new(),
            particles: Vec::new(),
            unique_id_counter: 0,
            phase: DriverPhase::Finished,
            start_time: 0.0,
            current_time: 0.0,
            window: [0.0, 0.0],
            has_local_data: false,
            steps_taken: 0,
            reinjection_counter: 0,
            templates: Vec::new(),
            static_seeds: None,
            output: ParticleOutput::default(),
            paths: ParticlePaths::new(),
            report: StepReport::default(),
            abort: AbortHandle::default(),
        })
    }

    /// Add a seed source and return its source id
    pub fn add_seed_source(&mut self, source: SeedSource) -> i32 {
        self.seeds.push(source);
        self.static_seeds = None;
        (self.seeds.len() - 1) as i32
    }

    pub fn config(&self) -> &TracerConfig {
        &self.config
    }

    pub fn phase(&self) -> DriverPhase {
        self.phase
    }

    pub fn current_time(&self) -> f64 {
        self.current_time
    }

    pub fn start_time(&self) -> f64 {
        self.start_time
    }

    /// Particles still being advanced on this rank
    pub fn particles(&self) -> &[ParticleRecord] {
        &self.particles
    }

    /// The most recent frame
    pub fn output(&self) -> &ParticleOutput {
        &self.output
    }

    /// Accumulated polylines (filled in `Pathlines` mode)
    pub fn paths(&self) -> &ParticlePaths {
        &self.paths
    }

    pub fn last_report(&self) -> &StepReport {
        &self.report
    }

    /// Cache counters of the T0 and T1 evaluators since the last step began
    pub fn cache_stats(&self) -> [CacheStats; 2] {
        self.field.stats()
    }

    pub fn field(&self) -> &TemporalVelocityField {
        &self.field
    }

    pub fn communicator(&self) -> &C {
        &self.comm
    }

    /// A handle that stops integration from another thread
    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    /// Trace through a whole snapshot sequence
    ///
    /// Seeds at the configured start time, advances snapshot by snapshot up to
    /// the termination time and returns the last frame. Start and termination
    /// times outside the snapshot range are clamped with a warning.
    ///
    /// # Errors
    /// `InsufficientTimeSteps` or `NonMonotonicTime` for a bad sequence, plus
    /// any error from [`ParticleTracer::begin`], [`ParticleTracer::advance`]
    /// or [`ParticleTracer::push_snapshot`].
    pub fn run(&mut self, snapshots: &[Snapshot]) -> Result<&ParticleOutput, TraceError> {
        let times = snapshot_times(snapshots)?;
        let n = times.len();
        let (first, last) = (times[0], times[n - 1]);

        let start_time = match self.config.start_time {
            None => first,
            Some(t) => clamp_time("start", t, first, last),
        };
        let start_step = times
            .partition_point(|&t| t <= start_time)
            .saturating_sub(1)
            .min(n - 2);

        let termination_time = match (self.config.termination_time, self.config.termination_unit) {
            (None, _) => last,
            (Some(t), TerminationUnit::Time) => clamp_time("termination", t, start_time, last),
            (Some(step), TerminationUnit::Step) => {
                let requested = step as usize;
                let clamped = requested.clamp(start_step, n - 1);
                if clamped != requested {
                    warn!(
                        "Termination step {} clamped to {} (snapshots {}..{})",
                        requested,
                        clamped,
                        start_step,
                        n - 1
                    );
                }
                times[clamped].max(start_time)
            }
        };
        let termination_step = times
            .partition_point(|&t| t < termination_time)
            .clamp(start_step, n - 1);

        info!(
            "Tracing {} seed sources from t = {} to t = {} on rank {}/{}",
            self.seeds.len(),
            start_time,
            termination_time,
            self.comm.rank(),
            self.comm.size()
        );

        self.begin(&snapshots[start_step], &snapshots[start_step + 1], start_time)?;
        let mut step = start_step + 1;
        while step <= termination_step {
            self.advance(times[step].min(termination_time))?;
            let aborted = self.comm.all_reduce_sum(u64::from(self.report.aborted)) > 0;
            if aborted {
                warn!("Tracing aborted at t = {}", self.current_time);
                break;
            }
            if step == termination_step {
                break;
            }
            self.push_snapshot(&snapshots[step + 1])?;
            step += 1;
        }
        self.finish();

        info!(
            "Tracing finished at t = {} with {} live particles",
            self.current_time,
            self.particles.len()
        );
        Ok(&self.output)
    }

    /// Attach the first window, seed at `start_time` and emit the seed frame
    ///
    /// Any previous run is discarded. `start_time` is clamped into
    /// `[first.time, second.time]`. A rank whose snapshots hold no non-empty
    /// block takes part with an empty domain: it seeds nothing but still
    /// joins every collective.
    ///
    /// # Errors
    /// `NonMonotonicTime` if `second` does not follow `first`,
    /// `InconsistentPointData` if the blocks carry different point arrays,
    /// `NoInput` if no rank has a non-empty block, `PeerFailed` if another
    /// rank could not attach its blocks, plus any error from attaching the
    /// local blocks (missing or unsupported vector array, endpoint mismatch).
    pub fn begin(
        &mut self,
        first: &Snapshot,
        second: &Snapshot,
        start_time: f64,
    ) -> Result<&ParticleOutput, TraceError> {
        if second.time <= first.time {
            return Err(TraceError::NonMonotonicTime {
                previous: first.time,
                next: second.time,
            });
        }
        self.reset();
        self.transition(DriverPhase::SeedingAtStart);
        self.window = [first.time, second.time];

        let local = self.attach_window(first, second);
        self.has_local_data = matches!(local, Ok(true));
        self.agree_on(local.map(|_| ()))?;
        let ranks_with_data = self.comm.all_reduce_sum(u64::from(self.has_local_data));
        if ranks_with_data == 0 {
            return Err(TraceError::NoInput(format!(
                "no non-empty block at t = {} or t = {}",
                first.time, second.time
            )));
        }

        let start_time = clamp_time("start", start_time, first.time, second.time);
        self.start_time = start_time;
        self.current_time = start_time;

        let mut frame = ParticleOutput::new(start_time, &self.templates, self.config.compute_vorticity);
        let mut seeded = self.inject_seeds();
        for p in &mut seeded {
            self.emit_new(p, &mut frame);
        }
        self.particles = seeded;

        self.report = StepReport {
            time: start_time,
            injected: self.particles.len(),
            ..StepReport::default()
        };
        self.transition(DriverPhase::Emitting);
        self.publish(frame);
        Ok(&self.output)
    }

    /// Advance every particle to `target_time` within the current window
    ///
    /// A target past `T1` is clamped to `T1` with a warning.
    ///
    /// # Errors
    /// `NotStarted` unless a frame has just been emitted, `InvalidConfig` if
    /// `target_time` precedes the current time, `CorruptRecord` if a peer
    /// sends an undecodable hand-off.
    pub fn advance(&mut self, target_time: f64) -> Result<&ParticleOutput, TraceError> {
        if self.phase != DriverPhase::Emitting {
            return Err(TraceError::NotStarted);
        }
        let [_, window_end] = self.window;
        let mut target = target_time;
        if target > window_end {
            warn!(
                "Target time {} is past the window end {}, clamping",
                target, window_end
            );
            target = window_end;
        }
        if target < self.current_time {
            return Err(TraceError::InvalidConfig(format!(
                "target time {} precedes current time {}",
                target, self.current_time
            )));
        }

        self.transition(DriverPhase::Integrating);
        self.steps_taken += 1;
        self.field.reset_stats();
        let from = self.current_time;
        let mut report = StepReport {
            step: self.steps_taken,
            time: target,
            ..StepReport::default()
        };
        let mut frame = ParticleOutput::new(target, &self.templates, self.config.compute_vorticity);

        let mut pending = std::mem::take(&mut self.particles);
        if let Some(lifetime) = self.config.particle_lifetime {
            let before = pending.len();
            pending.retain(|p| !outlives(p, lifetime, target - from));
            report.terminated_by_lifetime = before - pending.len();
        }

        let passes = self.config.exchange_passes as usize;
        let mut survivors = Vec::with_capacity(pending.len());
        for pass in 0..passes {
            let mut outbox = Vec::new();
            for mut p in pending.drain(..) {
                if report.aborted || self.abort.is_aborted() {
                    report.aborted = true;
                    survivors.push(p);
                    continue;
                }
                report.integrated += 1;
                match self.integrate_particle(&mut p, from, target, &mut frame) {
                    Fate::Emitted => survivors.push(p),
                    Fate::HandedOff => outbox.push(p),
                    Fate::Stagnated => report.terminated_by_speed += 1,
                }
            }
            report.handed_off += outbox.len();

            if pass + 1 < passes {
                let received = exchange_particles(&self.comm, &outbox)?;
                let offered = received.len();
                pending = self.accept_received(received);
                report.received += pending.len();
                debug!(
                    "Pass {}: sent {}, accepted {} of {} offered particles",
                    pass,
                    outbox.len(),
                    pending.len(),
                    offered
                );
            } else if !outbox.is_empty() && self.comm.size() > 1 {
                warn!(
                    "{} particles still unresolved after {} passes, dropping",
                    outbox.len(),
                    passes
                );
            }
            report.outbox.append(&mut outbox);
        }

        self.particles = survivors;
        self.current_time = target;

        self.transition(DriverPhase::ReinjectingIfDue);
        if self.reinjection_due() {
            self.reinjection_counter = self.steps_taken as i32;
            let mut injected = self.inject_seeds();
            for p in &mut injected {
                self.emit_new(p, &mut frame);
            }
            report.injected = injected.len();
            self.particles.append(&mut injected);
        }

        report.emitted = frame.len();
        report.cache_stats = self.field.stats();
        debug!(
            "Step {} to t = {}: {} emitted, {} handed off, {} received, {} stagnated, {} expired, {} injected",
            report.step,
            report.time,
            report.emitted,
            report.handed_off,
            report.received,
            report.terminated_by_speed,
            report.terminated_by_lifetime,
            report.injected
        );
        self.report = report;
        self.transition(DriverPhase::Emitting);
        self.publish(frame);
        Ok(&self.output)
    }

    /// Slide the window so the current `T1` becomes `T0` and `next` becomes `T1`
    ///
    /// # Errors
    /// `NotStarted` unless a frame has just been emitted, `NonMonotonicTime`
    /// if `next` does not follow the current window, `EndpointMismatch` if a
    /// rank without data at `T0` gains blocks at `next`, `PeerFailed` if
    /// another rank failed, plus any error from attaching its blocks.
    pub fn push_snapshot(&mut self, next: &Snapshot) -> Result<(), TraceError> {
        if self.phase != DriverPhase::Emitting {
            return Err(TraceError::NotStarted);
        }
        let [_, window_end] = self.window;
        if next.time <= window_end {
            return Err(TraceError::NonMonotonicTime {
                previous: window_end,
                next: next.time,
            });
        }
        self.window = [window_end, next.time];

        let local = if self.has_local_data {
            self.field.advance_one_time_step();
            self.attach(next, 1)
                .and_then(|()| self.field.validate_endpoints(self.config.static_mesh))
        } else if next.blocks.iter().any(|b| b.number_of_cells() > 0) {
            Err(TraceError::EndpointMismatch(format!(
                "blocks appear at t = {} on a rank that had none at t = {}",
                next.time, window_end
            )))
        } else {
            Ok(())
        };
        self.agree_on(local)
    }

    /// End the run; the last frame stays available
    pub fn finish(&mut self) {
        if self.phase == DriverPhase::Emitting {
            self.transition(DriverPhase::Finished);
        }
    }

    fn reset(&mut self) {
        self.field.clear();
        self.particles.clear();
        self.unique_id_counter = 0;
        self.steps_taken = 0;
        self.reinjection_counter = 0;
        self.window = [0.0, 0.0];
        self.has_local_data = false;
        self.templates.clear();
        self.static_seeds = None;
        self.output = ParticleOutput::default();
        self.paths.clear();
        self.report = StepReport::default();
        self.phase = DriverPhase::Finished;
    }

    fn transition(&mut self, next: DriverPhase) {
        debug_assert!(
            self.phase.can_transition_to(next),
            "illegal driver transition {:?} -> {:?}",
            self.phase,
            next
        );
        trace!("Driver phase {:?} -> {:?}", self.phase, next);
        self.phase = next;
    }

    /// Attach both endpoints of the first window
    ///
    /// Returns false, attaching nothing, when neither snapshot has a
    /// non-empty block on this rank.
    fn attach_window(&mut self, first: &Snapshot, second: &Snapshot) -> Result<bool, TraceError> {
        let Some(templates) = point_data_templates(first, second)? else {
            debug!(
                "Rank {} holds no data between t = {} and t = {}",
                self.comm.rank(),
                first.time,
                second.time
            );
            return Ok(false);
        };
        self.templates = templates;
        self.attach(first, 0)?;
        self.attach(second, 1)?;
        self.field.validate_endpoints(self.config.static_mesh)?;
        Ok(true)
    }

    /// Make a local failure fatal on every rank
    ///
    /// Collective: each rank reports whether it failed, so all ranks return
    /// an error together and none is left waiting in a later collective.
    fn agree_on(&self, local: Result<(), TraceError>) -> Result<(), TraceError> {
        let failed = self.comm.all_reduce_sum(u64::from(local.is_err()));
        local?;
        if failed > 0 {
            warn!("Setup failed on {} peer rank(s), stopping", failed);
            return Err(TraceError::PeerFailed {
                ranks: failed as usize,
            });
        }
        Ok(())
    }

    fn attach(&mut self, snapshot: &Snapshot, endpoint: usize) -> Result<(), TraceError> {
        for (slot, block) in snapshot.blocks.iter().enumerate() {
            if block.number_of_cells() == 0 {
                debug!("Skipping empty block {} at t = {}", slot, snapshot.time);
                continue;
            }
            self.field.attach_endpoint_dataset(
                slot,
                endpoint,
                snapshot.time,
                Arc::clone(block),
                self.config.static_mesh,
            )?;
        }
        Ok(())
    }

    fn publish(&mut self, frame: ParticleOutput) {
        if self.config.output_mode == OutputMode::Pathlines {
            self.paths.append_frame(&frame);
        }
        self.output = frame;
    }

    fn reinjection_due(&self) -> bool {
        let period = self.config.reinjection_period as usize;
        period > 0 && self.current_time != self.start_time && self.steps_taken % period == 0
    }

    /// Classify (or re-use) the seeds at the current time and label them
    ///
    /// Collective: every rank must call this at the same steps.
    fn inject_seeds(&mut self) -> Vec<ParticleRecord> {
        let time = self.current_time;
        let step_id = self.reinjection_counter;
        let reuse = self.config.static_seeds && self.field.all_static();

        let mut injected = if let Some(cached) = self.static_seeds.as_ref().filter(|_| reuse) {
            cached
                .iter()
                .map(|seed| {
                    let mut p = seed.clone();
                    p.position.time = time;
                    p.simulation_time = time;
                    p.injected_step_id = step_id;
                    p
                })
                .collect()
        } else {
            let classified = self.classify_seeds(time, step_id);
            if reuse {
                self.static_seeds = Some(classified.clone());
            }
            classified
        };

        let counts = self.comm.all_gather_counts(injected.len());
        assign_unique_ids(&mut self.unique_id_counter, &mut injected, &counts, self.comm.rank());
        debug!(
            "Injected {} particles at t = {} (step id {})",
            injected.len(),
            time,
            step_id
        );
        injected
    }

    fn classify_seeds(&mut self, time: f64, step_id: i32) -> Vec<ParticleRecord> {
        let mut candidates: Vec<ParticleRecord> = self
            .seeds
            .iter()
            .enumerate()
            .flat_map(|(source_id, source)| {
                source.points().iter().enumerate().map(move |(i, point)| {
                    ParticleRecord::seed(*point, time, source_id as i32, i as i32, step_id, time)
                })
            })
            .collect();

        let accepted: Vec<bool> = candidates
            .iter_mut()
            .map(|p| {
                let inside = self.classify_particle(p);
                if !inside {
                    debug!(
                        "Seed {} of source {} at {:?} is outside every dataset",
                        p.injected_point_id, p.source_id, p.position.point
                    );
                }
                inside
            })
            .collect();

        let owners = lowest_rank_owners(&self.comm, &accepted);
        candidates
            .into_iter()
            .zip(owners)
            .filter_map(|(p, keep)| keep.then_some(p))
            .collect()
    }

    /// Locate a particle from scratch, priming its cached cells
    fn classify_particle(&mut self, p: &mut ParticleRecord) -> bool {
        self.field.clear_cache();
        let location = self.field.test_point(&p.position);
        if location == LocationState::OutsideAll {
            return false;
        }
        p.location = location;
        p.cached_cells = self.field.get_cached_cell_ids();
        true
    }

    fn accept_received(&mut self, received: Vec<ParticleRecord>) -> Vec<ParticleRecord> {
        received
            .into_iter()
            .filter_map(|mut p| self.classify_particle(&mut p).then_some(p))
            .collect()
    }

    fn integrate_particle(
        &mut self,
        p: &mut ParticleRecord,
        from: f64,
        target: f64,
        frame: &mut ParticleOutput,
    ) -> Fate {
        p.error_code = ErrorCode::None;
        if self.field.all_static() {
            self.field.set_cached_cell_ids(p.cached_cells);
        } else {
            self.field.clear_cache();
        }

        let del_t = (target - from) * self.config.integration_step;
        let epsilon = del_t * STEP_EPSILON;
        let min_step = self.config.minimum_step;
        let mut max_step = self.config.maximum_step;
        let mut substeps = 0usize;

        while p.position.time < target - epsilon {
            let mut step_wanted = del_t;
            if p.position.time + step_wanted > target {
                step_wanted = target - p.position.time;
                max_step = step_wanted;
            }

            let result = self.solver.compute_next_step(
                &mut self.field,
                &p.position,
                step_wanted,
                min_step,
                max_step,
                self.config.maximum_error,
            );
            match result {
                Ok(outcome) => {
                    substeps += 1;
                    p.position = ParticlePosition::new(outcome.next, p.position.time + outcome.step_taken);
                    p.age += outcome.step_taken;
                    p.simulation_time += outcome.step_taken;
                }
                Err(e) => {
                    p.error_code = ErrorCode::StepFailed;
                    if !self.retry_with_push(p, del_t, substeps) {
                        debug!(
                            "Particle {} left the domain at {:?} ({}), handing off",
                            p.unique_id, p.position.point, e
                        );
                        return Fate::HandedOff;
                    }
                    substeps += 1;
                }
            }
        }

        p.location = self.field.test_point(&p.position);
        if p.location == LocationState::OutsideAll {
            p.error_code = ErrorCode::ExitedDomain;
            debug!(
                "Particle {} ended outside every dataset at {:?}, handing off",
                p.unique_id, p.position.point
            );
            return Fate::HandedOff;
        }

        let velocity = self.field.last_good_velocity();
        p.speed = velocity.norm();
        if p.speed <= self.config.terminal_speed {
            debug!(
                "Particle {} stagnated at {:?} (speed {})",
                p.unique_id, p.position.point, p.speed
            );
            self.field.clear_cache();
            return Fate::Stagnated;
        }

        p.cached_cells = self.field.get_cached_cell_ids();
        p.time_step_age += 1;
        self.emit(p, &velocity, frame);
        Fate::Emitted
    }

    /// Nudge a particle that failed a sub-step along its last good velocity
    ///
    /// Returns whether the pushed position is inside any dataset. The error
    /// code records which velocity was used, or `PushRecovered` on success.
    fn retry_with_push(&mut self, p: &mut ParticleRecord, del_t: f64, substeps: usize) -> bool {
        self.field.clear_cache();
        p.location = self.field.test_point(&p.position);
        let velocity = match p.location {
            LocationState::OutsideAll => {
                p.error_code = ErrorCode::PushedWithoutVelocity;
                if substeps > 0 {
                    self.field.last_good_velocity()
                } else {
                    Vec3::zeros()
                }
            }
            LocationState::OutsideT0 => {
                p.error_code = ErrorCode::PushedWithT1Velocity;
                self.field.last_good_velocity()
            }
            LocationState::OutsideT1 => {
                p.error_code = ErrorCode::PushedWithT0Velocity;
                self.field.last_good_velocity()
            }
            LocationState::InsideAll => self.field.last_good_velocity(),
        };

        p.position = ParticlePosition::new(p.position.point + velocity * del_t, p.position.time + del_t);
        p.age += del_t;
        p.simulation_time += del_t;

        p.location = self.field.test_point(&p.position);
        if p.location == LocationState::OutsideAll {
            return false;
        }
        p.error_code = ErrorCode::PushRecovered;
        true
    }

    /// Emit a particle that has just been classified, without integrating it
    fn emit_new(&mut self, p: &mut ParticleRecord, frame: &mut ParticleOutput) {
        p.location = self.field.test_point(&p.position);
        let velocity = self.field.last_good_velocity();
        p.speed = velocity.norm();
        self.emit(p, &velocity, frame);
    }

    /// Append a particle to the frame
    ///
    /// Point data and vorticity come from T1 unless the particle is outside
    /// T1. The rotation angle integrates the angular velocity (vorticity
    /// projected on the flow direction) with the trapezoidal rule and starts
    /// at zero on a particle's first emission.
    fn emit(&mut self, p: &mut ParticleRecord, velocity: &Vec3, frame: &mut ParticleOutput) {
        let endpoint = usize::from(p.location != LocationState::OutsideT1);
        let index = frame.push_particle(p);
        self.field.interpolate_point(endpoint, &mut frame.point_data);

        if self.config.compute_vorticity {
            let vorticity = self.field.vorticity(endpoint).unwrap_or_else(Vec3::zeros);
            let omega = if p.speed > 0.0 {
                vorticity.dot(velocity) / p.speed * self.config.rotation_scale
            } else {
                0.0
            };
            let time = p.position.time;
            let rotation = if p.point_id.is_some() {
                p.rotation + 0.5 * (p.angular_velocity + omega) * (time - p.rotation_time)
            } else {
                0.0
            };
            frame.push_rotation(vorticity, rotation, omega);
            p.rotation = rotation;
            p.angular_velocity = omega;
            p.rotation_time = time;
        }
        p.point_id = Some(index);
    }
}

fn outlives(p: &ParticleRecord, lifetime: ParticleLifetime, interval: f64) -> bool {
    match lifetime {
        ParticleLifetime::Time(limit) => p.age + interval > limit,
        ParticleLifetime::Steps(limit) => i64::from(p.time_step_age) + 1 > i64::from(limit),
    }
}

fn clamp_time(what: &str, t: f64, lo: f64, hi: f64) -> f64 {
    let clamped = t.clamp(lo, hi);
    if clamped != t {
        warn!("{} time {} outside [{}, {}], clamped to {}", what, t, lo, hi, clamped);
    }
    clamped
}

/// Snapshot times, checked for at least two distinct, strictly increasing values
fn snapshot_times(snapshots: &[Snapshot]) -> Result<Vec<f64>, TraceError> {
    let times: Vec<f64> = snapshots.iter().map(|s| s.time).collect();
    let mut distinct = times.clone();
    distinct.sort_by(f64::total_cmp);
    distinct.dedup();
    if distinct.len() < 2 {
        return Err(TraceError::InsufficientTimeSteps {
            found: distinct.len(),
        });
    }
    if let Some(w) = times.windows(2).find(|w| w[1] <= w[0]) {
        return Err(TraceError::NonMonotonicTime {
            previous: w[0],
            next: w[1],
        });
    }
    Ok(times)
}

/// Empty output arrays mirroring the point data of the first non-empty block
///
/// Every non-empty block of both snapshots must carry the same array names.
/// `None` if there is no non-empty block at all.
fn point_data_templates(
    first: &Snapshot,
    second: &Snapshot,
) -> Result<Option<Vec<DataArray>>, TraceError> {
    let blocks: Vec<&Arc<dyn DataSet>> = first
        .blocks
        .iter()
        .chain(&second.blocks)
        .filter(|b| b.number_of_cells() > 0)
        .collect();
    let Some(reference) = blocks.first() else {
        return Ok(None);
    };

    let sorted_names = |block: &Arc<dyn DataSet>| {
        let mut names = block.point_data().names();
        names.sort();
        names
    };
    let expected = sorted_names(*reference);
    for block in &blocks[1..] {
        let found = sorted_names(*block);
        if found != expected {
            return Err(TraceError::InconsistentPointData { expected, found });
        }
    }

    Ok(Some(
        reference
            .point_data()
            .arrays()
            .iter()
            .map(|a| a.empty_like())
            .collect(),
    ))
}
