//! Axis-aligned bounding boxes used for coarse point-in-domain rejection.

use crate::core_types::vec3::Vec3;
use serde::{Deserialize, Serialize};

/// Axis-aligned bounding box
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min: Vec3,
    pub max: Vec3,
}

impl Bounds {
    /// Create bounds from two corners
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Bounds { min, max }
    }

    /// An inverted box that any `expand` call will overwrite
    pub fn empty() -> Self {
        Bounds {
            min: Vec3::repeat(f64::INFINITY),
            max: Vec3::repeat(f64::NEG_INFINITY),
        }
    }

    /// Bounds of a set of points
    pub fn from_points<'a, I>(points: I) -> Self
    where
        I: IntoIterator<Item = &'a Vec3>,
    {
        let mut bounds = Bounds::empty();
        for p in points {
            bounds.expand(p);
        }
        bounds
    }

    /// Grow the box to include `p`
    pub fn expand(&mut self, p: &Vec3) {
        self.min = self.min.inf(p);
        self.max = self.max.sup(p);
    }

    /// Grow the box to include another box
    pub fn merge(&mut self, other: &Bounds) {
        self.min = self.min.inf(&other.min);
        self.max = self.max.sup(&other.max);
    }

    /// True if no point was ever added
    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y || self.min.z > self.max.z
    }

    /// Inclusive containment test with an absolute tolerance on every axis
    pub fn contains(&self, p: &Vec3, tolerance: f64) -> bool {
        (0..3).all(|i| p[i] >= self.min[i] - tolerance && p[i] <= self.max[i] + tolerance)
    }

    /// Length of the box diagonal
    pub fn diagonal_length(&self) -> f64 {
        if self.is_empty() {
            0.0
        } else {
            (self.max - self.min).norm()
        }
    }

    /// Edge lengths of the box
    pub fn extent(&self) -> Vec3 {
        if self.is_empty() {
            Vec3::zeros()
        } else {
            self.max - self.min
        }
    }
}
