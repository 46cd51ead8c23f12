mod common;

use approx::assert_relative_eq;
use common::{steady, uniform_block};
use flowpath_core::simulation::InProcessCommunicator;
use flowpath_core::{
    Bounds, Communicator, InProcessGroup, ParticleOutput, ParticleTracer, SeedSource, Snapshot,
    StepReport, TraceError, TracerConfig, UniformGrid, Vec3,
};
use std::collections::HashSet;
use std::sync::Arc;
use std::thread;

/// Rank `r` owns the slab `[r, r + 1] x [0, 1] x [0, 1]`
fn run_slabs<F>(
    ranks: usize,
    config: &TracerConfig,
    seeds: &[Vec3],
    velocity: F,
    times: &[f64],
) -> Vec<(ParticleOutput, StepReport, ParticleOutput)>
where
    F: Fn(&Vec3) -> Vec3 + Copy + Send,
{
    let comms = InProcessGroup::create(ranks);
    thread::scope(|s| {
        let handles: Vec<_> = comms
            .into_iter()
            .map(|comm: InProcessCommunicator| {
                let config = config.clone();
                let seeds = seeds.to_vec();
                s.spawn(move || {
                    let x0 = comm.rank() as f64;
                    let block = uniform_block(
                        Vec3::new(x0, 0.0, 0.0),
                        Vec3::new(x0 + 1.0, 1.0, 1.0),
                        [3, 3, 3],
                        velocity,
                    );
                    let snapshots = steady(&block, times);
                    let mut tracer = ParticleTracer::with_communicator(config, comm).unwrap();
                    tracer.add_seed_source(SeedSource::from_points(seeds));

                    let first = tracer.begin(&snapshots[0], &snapshots[1], times[0]).unwrap().clone();
                    tracer.advance(times[1]).unwrap();
                    for (k, snapshot) in snapshots.iter().enumerate().skip(2) {
                        tracer.push_snapshot(snapshot).unwrap();
                        tracer.advance(times[k]).unwrap();
                    }
                    tracer.finish();
                    (first, tracer.last_report().clone(), tracer.output().clone())
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    })
}

#[test]
fn test_particles_cross_rank_boundaries() {
    let config = TracerConfig {
        static_mesh: true,
        ..TracerConfig::default()
    };
    let seeds = [
        Vec3::new(0.75, 0.5, 0.5),
        // shared by ranks 0 and 1, kept by rank 0
        Vec3::new(1.0, 0.5, 0.5),
        // leaves every rank during the step
        Vec3::new(2.25, 0.5, 0.5),
    ];
    let results = run_slabs(3, &config, &seeds, |_| Vec3::x(), &[0.0, 1.0]);

    let (first0, report0, out0) = &results[0];
    let (first1, report1, out1) = &results[1];
    let (first2, report2, out2) = &results[2];

    assert_eq!(first0.particle_ids, vec![0, 1]);
    assert!(first1.is_empty());
    assert_eq!(first2.particle_ids, vec![2]);

    assert!(out0.is_empty());
    assert_eq!(report0.handed_off, 2);
    assert!(out2.is_empty());
    assert_eq!(report2.handed_off, 1);

    assert_eq!(report1.received, 2);
    assert_eq!(out1.len(), 2);
    let a = out1.find(0).unwrap();
    let b = out1.find(1).unwrap();
    assert_relative_eq!(out1.points[a], Vec3::new(1.75, 0.5, 0.5), epsilon = 1e-9);
    assert_relative_eq!(out1.points[b], Vec3::new(2.0, 0.5, 0.5), epsilon = 1e-9);
    assert_relative_eq!(out1.ages[a], 1.0, epsilon = 1e-9);
    // the error code is reset when integration resumes on the new rank
    assert_eq!(out1.error_codes, vec![0, 0]);
}

#[test]
fn test_unique_ids_across_ranks() {
    for ranks in 1..=4usize {
        let config = TracerConfig {
            reinjection_period: 1,
            ..TracerConfig::default()
        };
        let n = 4 * ranks + 1;
        let seeds = SeedSource::line(
            Vec3::new(0.0, 0.5, 0.25),
            Vec3::new(ranks as f64, 0.5, 0.25),
            n,
        );
        let results = run_slabs(
            ranks,
            &config,
            seeds.points(),
            |_| Vec3::new(0.0, 0.0, 0.01),
            &[0.0, 1.0, 2.0],
        );

        let first_total: usize = results.iter().map(|(first, _, _)| first.len()).sum();
        assert_eq!(first_total, n, "{} ranks", ranks);

        let mut ids = HashSet::new();
        for (_, _, out) in &results {
            for &id in &out.particle_ids {
                assert!(ids.insert(id), "duplicate id {} with {} ranks", id, ranks);
            }
        }
        // three injections: at the start and after each step
        let expected: HashSet<i64> = (0..3 * n as i64).collect();
        assert_eq!(ids, expected, "{} ranks", ranks);
    }
}

/// Run each rank over its own snapshots, seeding the same points everywhere
fn run_each_rank(
    per_rank: Vec<Vec<Snapshot>>,
    seeds: &[Vec3],
) -> Vec<Result<ParticleOutput, TraceError>> {
    let comms = InProcessGroup::create(per_rank.len());
    thread::scope(|s| {
        let handles: Vec<_> = comms
            .into_iter()
            .zip(per_rank)
            .map(|(comm, snapshots)| {
                let seeds = seeds.to_vec();
                s.spawn(move || -> Result<ParticleOutput, TraceError> {
                    let mut tracer = ParticleTracer::with_communicator(TracerConfig::default(), comm)?;
                    tracer.add_seed_source(SeedSource::from_points(seeds));
                    let output = tracer.run(&snapshots)?.clone();
                    Ok(output)
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    })
}

fn empty_snapshots(times: &[f64]) -> Vec<Snapshot> {
    times.iter().map(|&t| Snapshot::new(t, vec![])).collect()
}

#[test]
fn test_rank_without_data_still_joins_every_step() {
    let times = [0.0, 1.0, 2.0];
    let block = uniform_block(Vec3::zeros(), Vec3::repeat(1.0), [3, 3, 3], |_| {
        Vec3::new(0.25, 0.0, 0.0)
    });
    let results = run_each_rank(
        vec![steady(&block, &times), empty_snapshots(&times)],
        &[Vec3::new(0.25, 0.5, 0.5), Vec3::new(5.0, 0.5, 0.5)],
    );

    let out0 = results[0].as_ref().unwrap();
    assert_eq!(out0.particle_ids, vec![0]);
    assert_relative_eq!(out0.points[0], Vec3::new(0.75, 0.5, 0.5), epsilon = 1e-9);
    assert_eq!(out0.time, 2.0);

    let out1 = results[1].as_ref().unwrap();
    assert!(out1.is_empty());
    assert_eq!(out1.time, 2.0);
}

#[test]
fn test_no_data_on_any_rank_is_fatal_everywhere() {
    let times = [0.0, 1.0];
    let results = run_each_rank(
        vec![empty_snapshots(&times), empty_snapshots(&times)],
        &[Vec3::repeat(0.5)],
    );
    for result in results {
        assert!(matches!(result, Err(TraceError::NoInput(_))));
    }
}

#[test]
fn test_setup_failure_on_one_rank_stops_all_ranks() {
    let times = [0.0, 1.0];
    let good = uniform_block(Vec3::zeros(), Vec3::repeat(1.0), [3, 3, 3], |_| Vec3::x());
    // no "pressure" array at T1
    let bare = UniformGrid::from_bounds(&Bounds::new(Vec3::zeros(), Vec3::repeat(1.0)), [3, 3, 3])
        .unwrap()
        .with_vectors("velocity", |_| Vec3::x());
    let broken = vec![
        Snapshot::single(times[0], Arc::clone(&good)),
        Snapshot::single(times[1], Arc::new(bare)),
    ];

    let results = run_each_rank(vec![steady(&good, &times), broken], &[Vec3::repeat(0.5)]);
    assert_eq!(results[0], Err(TraceError::PeerFailed { ranks: 1 }));
    assert!(matches!(results[1], Err(TraceError::InconsistentPointData { .. })));
}
