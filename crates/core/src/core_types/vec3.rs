//! Vector type alias for 3D positions and velocities, plus the 4D particle position.

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

/// 3D vector type for positions, velocities, and vorticity.
///
/// This is a simple alias for `nalgebra::Vector3<f64>`, used throughout
/// the tracer for mesh points, interpolated field values and particle positions.
pub type Vec3 = Vector3<f64>;

/// A particle location in space-time: `(x, y, z)` plus the time `t` it refers to.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParticlePosition {
    /// Spatial part
    pub point: Vec3,
    /// Simulation time of this position
    pub time: f64,
}

impl ParticlePosition {
    /// Create a position from a point and a time value
    pub fn new(point: Vec3, time: f64) -> Self {
        Self { point, time }
    }

    /// The position as the raw `[x, y, z, t]` quadruple
    pub fn to_array(&self) -> [f64; 4] {
        [self.point.x, self.point.y, self.point.z, self.time]
    }
}

impl From<[f64; 4]> for ParticlePosition {
    fn from(x: [f64; 4]) -> Self {
        Self {
            point: Vec3::new(x[0], x[1], x[2]),
            time: x[3],
        }
    }
}
