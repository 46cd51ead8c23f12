mod common;

use approx::assert_relative_eq;
use common::{steady, uniform_block, uniform_grid};
use flowpath_core::{
    Bounds, DataSet, ErrorCode, IntegratorType, LocationState, OutputMode, ParticleTracer,
    SeedSource, Snapshot, TracerConfig, UnstructuredGrid, Vec3,
};
use std::sync::Arc;

fn unit_cube_flow() -> Arc<dyn DataSet> {
    uniform_block(Vec3::zeros(), Vec3::repeat(1.0), [3, 3, 3], |_| Vec3::x())
}

fn exact_config() -> TracerConfig {
    TracerConfig {
        static_mesh: true,
        terminal_speed: 0.0,
        integration_step: 1.0,
        ..TracerConfig::default()
    }
}

#[test]
fn test_constant_flow_single_step() {
    let block = unit_cube_flow();
    let mut tracer = ParticleTracer::new(exact_config()).unwrap();
    tracer.add_seed_source(SeedSource::from_points(vec![Vec3::zeros()]));

    let out = tracer.run(&steady(&block, &[0.0, 1.0])).unwrap();

    assert_eq!(out.len(), 1);
    assert_eq!(out.time, 1.0);
    assert_relative_eq!(out.points[0], Vec3::new(1.0, 0.0, 0.0), epsilon = 1e-9);
    assert_relative_eq!(out.ages[0], 1.0, epsilon = 1e-12);
    assert_eq!(out.error_codes[0], ErrorCode::None.as_i32());
    assert_eq!(out.particle_ids, vec![0]);
    assert_eq!(out.vertices, vec![0]);

    let particle = &tracer.particles()[0];
    assert_eq!(particle.location, LocationState::InsideAll);
    assert_eq!(particle.time_step_age, 1);
}

#[test]
fn test_seed_on_outflow_boundary_leaves_domain() {
    let block = unit_cube_flow();
    let snapshots = steady(&block, &[0.0, 1.0, 2.0]);
    let mut tracer = ParticleTracer::new(exact_config()).unwrap();
    tracer.add_seed_source(SeedSource::from_points(vec![Vec3::new(1.0, 0.5, 0.5)]));

    assert_eq!(tracer.begin(&snapshots[0], &snapshots[1], 0.0).unwrap().len(), 1);

    let out = tracer.advance(1.0).unwrap();
    assert!(out.is_empty());
    let report = tracer.last_report();
    assert_eq!(report.handed_off, 1);
    let lost = &report.outbox[0];
    assert_ne!(lost.error_code, ErrorCode::None);
    assert!(matches!(
        lost.location,
        LocationState::OutsideT1 | LocationState::OutsideAll
    ));
    assert!(tracer.particles().is_empty());

    tracer.push_snapshot(&snapshots[2]).unwrap();
    assert!(tracer.advance(2.0).unwrap().is_empty());
    assert_eq!(tracer.last_report().integrated, 0);
}

#[test]
fn test_push_recovers_across_gap_between_blocks() {
    let left = uniform_block(Vec3::zeros(), Vec3::repeat(1.0), [3, 3, 3], |_| Vec3::x());
    let right = uniform_block(Vec3::new(1.2, 0.0, 0.0), Vec3::new(3.0, 1.0, 1.0), [5, 3, 3], |_| {
        Vec3::x()
    });
    let snapshots: Vec<Snapshot> = [0.0, 1.0]
        .iter()
        .map(|&t| Snapshot::new(t, vec![Arc::clone(&left), Arc::clone(&right)]))
        .collect();

    let config = TracerConfig {
        static_mesh: true,
        ..TracerConfig::default()
    };
    let mut tracer = ParticleTracer::new(config).unwrap();
    tracer.add_seed_source(SeedSource::from_points(vec![Vec3::new(0.9, 0.5, 0.5)]));

    // the first half step has a stage point in the gap and fails
    let out = tracer.run(&snapshots).unwrap();

    assert_eq!(out.len(), 1);
    assert_relative_eq!(out.points[0], Vec3::new(1.9, 0.5, 0.5), epsilon = 1e-9);
    assert_relative_eq!(out.ages[0], 1.0, epsilon = 1e-12);
    assert_eq!(out.error_codes, vec![ErrorCode::PushRecovered.as_i32()]);
    assert_eq!(tracer.last_report().handed_off, 0);
}

#[test]
fn test_push_from_single_endpoint_records_velocity_source() {
    let small = uniform_block(Vec3::zeros(), Vec3::repeat(1.0), [3, 3, 3], |_| Vec3::x());
    let large = uniform_block(Vec3::zeros(), Vec3::new(2.0, 1.0, 1.0), [5, 3, 3], |_| Vec3::x());

    let cases = [
        // only T0 contains the seed
        (Arc::clone(&large), Arc::clone(&small), ErrorCode::PushedWithT0Velocity),
        // only T1 contains the seed
        (small, large, ErrorCode::PushedWithT1Velocity),
    ];
    for (at_t0, at_t1, expected) in cases {
        let mut tracer = ParticleTracer::new(TracerConfig::default()).unwrap();
        tracer.add_seed_source(SeedSource::from_points(vec![Vec3::new(1.6, 0.5, 0.5)]));

        let first = Snapshot::single(0.0, at_t0);
        let second = Snapshot::single(1.0, at_t1);
        assert_eq!(tracer.begin(&first, &second, 0.0).unwrap().len(), 1);

        // the last stage of the first half step lands past x = 2
        assert!(tracer.advance(1.0).unwrap().is_empty());
        let report = tracer.last_report();
        assert_eq!(report.handed_off, 1);
        let lost = &report.outbox[0];
        assert_eq!(lost.error_code, expected);
        assert_eq!(lost.location, LocationState::OutsideAll);
        assert_relative_eq!(lost.position.point, Vec3::new(2.1, 0.5, 0.5), epsilon = 1e-9);
    }
}

#[test]
fn test_closed_domain_conserves_particles() {
    let block = uniform_block(Vec3::repeat(-2.0), Vec3::repeat(2.0), [9, 9, 9], |p| {
        Vec3::new(-p.y, p.x, 0.0)
    });
    let seeds = SeedSource::random_in_bounds(
        &Bounds::new(Vec3::new(-0.7, -0.7, -1.0), Vec3::new(0.7, 0.7, 1.0)),
        25,
        7,
    );
    let radii: Vec<f64> = seeds.points().iter().map(|p| p.xy().norm()).collect();

    let config = TracerConfig {
        static_mesh: true,
        terminal_speed: 0.0,
        ..TracerConfig::default()
    };
    let mut tracer = ParticleTracer::new(config).unwrap();
    tracer.add_seed_source(seeds);

    let snapshots = steady(&block, &[0.0, 0.25, 0.5, 0.75, 1.0, 1.25]);
    tracer.begin(&snapshots[0], &snapshots[1], 0.0).unwrap();
    for (k, snapshot) in snapshots.iter().enumerate().skip(1) {
        if k > 1 {
            tracer.push_snapshot(snapshot).unwrap();
        }
        let out = tracer.advance(snapshot.time).unwrap();
        assert_eq!(out.len(), 25);
        assert!(out.error_codes.iter().all(|&c| c == 0));

        let report = tracer.last_report();
        assert_eq!(report.handed_off, 0);
        assert_eq!(report.terminated_by_speed, 0);
        // static geometry: T1 is never searched
        assert_eq!(report.cache_stats[1].misses, 0);
        assert!(report.cache_stats[1].dataset_hits > 0);
    }
    tracer.finish();

    let out = tracer.output();
    assert_eq!(tracer.particles().len(), 25);
    for (i, point) in out.points.iter().enumerate() {
        let seed_index = out.injected_point_ids[i] as usize;
        assert_relative_eq!(point.xy().norm(), radii[seed_index], epsilon = 1e-4);
    }
}

#[test]
fn test_pathlines_collect_every_frame() {
    let block = uniform_block(Vec3::zeros(), Vec3::new(10.0, 1.0, 1.0), [11, 2, 2], |_| {
        Vec3::new(0.5, 0.0, 0.0)
    });
    let config = TracerConfig {
        output_mode: OutputMode::Pathlines,
        ..TracerConfig::default()
    };
    let mut tracer = ParticleTracer::new(config).unwrap();
    tracer.add_seed_source(SeedSource::line(
        Vec3::new(1.0, 0.2, 0.5),
        Vec3::new(1.0, 0.8, 0.5),
        3,
    ));

    tracer.run(&steady(&block, &[0.0, 1.0, 2.0, 3.0])).unwrap();

    let paths = tracer.paths();
    assert_eq!(paths.len(), 3);
    for path in paths.polylines() {
        assert_eq!(path.len(), 4);
        let times: Vec<f64> = path.positions.iter().map(|p| p.time).collect();
        assert_eq!(times, vec![0.0, 1.0, 2.0, 3.0]);
        assert_relative_eq!(path.arc_length(), 1.5, epsilon = 1e-9);
        assert!(path.error_codes.iter().all(|&c| c == 0));
    }
}

#[test]
fn test_moving_unstructured_mesh_matches_uniform() {
    let grid = uniform_grid(Vec3::zeros(), Vec3::new(4.0, 1.0, 1.0), [5, 2, 2], |_| {
        Vec3::new(0.75, 0.1, 0.0)
    });
    let mesh = UnstructuredGrid::from_uniform(&grid);
    let seeds = vec![Vec3::new(0.5, 0.25, 0.5), Vec3::new(1.5, 0.5, 0.25)];

    // a fresh mesh object per snapshot, so nothing may be treated as static
    let moving: Vec<Snapshot> = [0.0, 1.0, 2.0]
        .iter()
        .map(|&t| Snapshot::single(t, Arc::new(mesh.clone())))
        .collect();
    let mut unstructured = ParticleTracer::new(TracerConfig::default()).unwrap();
    unstructured.add_seed_source(SeedSource::from_points(seeds.clone()));
    let out_u = unstructured.run(&moving).unwrap().clone();

    let block: Arc<dyn DataSet> = Arc::new(grid);
    let mut uniform = ParticleTracer::new(TracerConfig::default()).unwrap();
    uniform.add_seed_source(SeedSource::from_points(seeds));
    let out_g = uniform.run(&steady(&block, &[0.0, 1.0, 2.0])).unwrap();

    assert_eq!(out_u.len(), 2);
    assert_eq!(out_u.particle_ids, out_g.particle_ids);
    for (a, b) in out_u.points.iter().zip(&out_g.points) {
        assert_relative_eq!(*a, *b, epsilon = 1e-9);
    }
    assert_relative_eq!(
        out_u.points[0],
        Vec3::new(2.0, 0.45, 0.5),
        epsilon = 1e-9
    );
    let pressure = out_u.point_array("pressure").unwrap();
    assert_relative_eq!(pressure.component(0, 0), 2.0, epsilon = 1e-9);
}

#[test]
fn test_adaptive_integrator_on_rotation() {
    let block = uniform_block(Vec3::repeat(-2.0), Vec3::repeat(2.0), [9, 9, 3], |p| {
        Vec3::new(-p.y, p.x, 0.0)
    });
    let config = TracerConfig {
        integrator: IntegratorType::Rk45,
        minimum_step: 1e-4,
        maximum_step: 0.5,
        maximum_error: 1e-8,
        static_mesh: true,
        ..TracerConfig::default()
    };
    let mut tracer = ParticleTracer::new(config).unwrap();
    tracer.add_seed_source(SeedSource::from_points(vec![Vec3::new(1.0, 0.0, 0.0)]));

    let quarter = std::f64::consts::FRAC_PI_2;
    let out = tracer
        .run(&steady(&block, &[0.0, quarter / 2.0, quarter]))
        .unwrap();

    assert_eq!(out.len(), 1);
    assert_relative_eq!(out.points[0], Vec3::new(0.0, 1.0, 0.0), epsilon = 1e-3);
    assert_relative_eq!(out.points[0].norm(), 1.0, epsilon = 1e-6);
    assert_relative_eq!(out.ages[0], quarter, epsilon = 1e-3);
}

#[test]
fn test_termination_time_stops_early() {
    let block = uniform_block(Vec3::zeros(), Vec3::new(10.0, 1.0, 1.0), [11, 2, 2], |_| {
        Vec3::x()
    });
    let config = TracerConfig {
        start_time: Some(1.0),
        termination_time: Some(2.5),
        ..TracerConfig::default()
    };
    let mut tracer = ParticleTracer::new(config).unwrap();
    tracer.add_seed_source(SeedSource::from_points(vec![Vec3::new(1.0, 0.5, 0.5)]));

    let out = tracer
        .run(&steady(&block, &[0.0, 1.0, 2.0, 3.0, 4.0]))
        .unwrap();
    assert_eq!(out.time, 2.5);
    assert_relative_eq!(out.points[0].x, 2.5, epsilon = 1e-9);
    assert_relative_eq!(out.ages[0], 1.5, epsilon = 1e-9);
}
