//! Seed point sources
//!
//! A seed source is just an ordered list of points. The index of a point in
//! its source becomes the particle's injected point id, and the index of the
//! source in the tracer becomes its source id.

use crate::core_types::{Bounds, Vec3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// An ordered set of seed points
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SeedSource {
    points: Vec<Vec3>,
}

impl SeedSource {
    /// Seeds at exactly the given points
    pub fn from_points(points: Vec<Vec3>) -> Self {
        Self { points }
    }

    /// `count` evenly spaced seeds from `start` to `end` inclusive
    ///
    /// A single seed is placed at `start`.
    pub fn line(start: Vec3, end: Vec3, count: usize) -> Self {
        let points = match count {
            0 => Vec::new(),
            1 => vec![start],
            _ => {
                let denom = (count - 1) as f64;
                (0..count)
                    .map(|i| start + (end - start) * (i as f64 / denom))
                    .collect()
            }
        };
        Self { points }
    }

    /// `count` uniformly distributed seeds inside `bounds`
    ///
    /// The same `seed` always produces the same points, so every rank of a
    /// distributed run generates an identical source.
    pub fn random_in_bounds(bounds: &Bounds, count: usize, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let extent = bounds.extent();
        let points = (0..count)
            .map(|_| {
                Vec3::new(
                    bounds.min.x + rng.random::<f64>() * extent.x,
                    bounds.min.y + rng.random::<f64>() * extent.y,
                    bounds.min.z + rng.random::<f64>() * extent.z,
                )
            })
            .collect();
        Self { points }
    }

    pub fn points(&self) -> &[Vec3] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}
