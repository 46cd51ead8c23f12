#![allow(dead_code)]

use flowpath_core::{Bounds, DataSet, Snapshot, UniformGrid, Vec3};
use std::sync::Arc;

#[ctor::ctor]
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Uniform grid over `[min, max]` carrying `velocity` (active) and `pressure = x`
pub fn uniform_grid<F>(min: Vec3, max: Vec3, dims: [usize; 3], velocity: F) -> UniformGrid
where
    F: Fn(&Vec3) -> Vec3,
{
    UniformGrid::from_bounds(&Bounds::new(min, max), dims)
        .expect("valid grid")
        .with_vectors("velocity", velocity)
        .with_scalars("pressure", |p| p.x)
}

pub fn uniform_block<F>(min: Vec3, max: Vec3, dims: [usize; 3], velocity: F) -> Arc<dyn DataSet>
where
    F: Fn(&Vec3) -> Vec3,
{
    Arc::new(uniform_grid(min, max, dims, velocity))
}

/// The same block at every time
pub fn steady(block: &Arc<dyn DataSet>, times: &[f64]) -> Vec<Snapshot> {
    times
        .iter()
        .map(|&t| Snapshot::single(t, Arc::clone(block)))
        .collect()
}
