//! The right-hand side handed to the ODE solvers

use crate::core_types::{ParticlePosition, Vec3};

/// A vector function of `(x, y, z, t)`
///
/// Returns `None` where the function is undefined, for velocity fields that
/// means the point is outside every dataset.
pub trait FunctionSet {
    fn function_values(&mut self, x: &ParticlePosition) -> Option<Vec3>;
}

impl<F> FunctionSet for F
where
    F: FnMut(&ParticlePosition) -> Option<Vec3>,
{
    fn function_values(&mut self, x: &ParticlePosition) -> Option<Vec3> {
        self(x)
    }
}
