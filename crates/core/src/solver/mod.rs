//! Numerical integrators for particle advection
//!
//! The core abstraction is the `InitialValueProblemSolver` trait; the tracer
//! only ever talks to a boxed solver chosen by [`create_integrator`].
//!
//! # Example
//!
//! ```rust,ignore
//! use flowpath_core::solver::{create_integrator, IntegratorType};
//!
//! let mut solver = create_integrator(IntegratorType::Rk45);
//! let outcome = solver.compute_next_step(&mut field, &start, 0.1, 0.0, 0.1, 1e-6)?;
//! ```

mod runge_kutta;
mod runge_kutta45;
#[allow(clippy::module_name_repetitions)]
mod r#trait;

pub use r#trait::{InitialValueProblemSolver, StepError, StepOutcome};
pub use runge_kutta::{RungeKutta2, RungeKutta4};
pub use runge_kutta45::RungeKutta45;

use serde::{Deserialize, Serialize};
use tracing::info;

/// Available integration schemes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum IntegratorType {
    /// Second-order midpoint rule
    Rk2,
    /// Classic fourth-order Runge-Kutta
    #[default]
    Rk4,
    /// Adaptive Cash-Karp 4(5)
    Rk45,
}

/// Create a boxed solver for the requested scheme
///
/// # Arguments
///
/// * `kind` - Integration scheme
///
/// # Returns
///
/// A boxed `InitialValueProblemSolver` trait object
pub fn create_integrator(kind: IntegratorType) -> Box<dyn InitialValueProblemSolver> {
    let solver: Box<dyn InitialValueProblemSolver> = match kind {
        IntegratorType::Rk2 => Box::new(RungeKutta2),
        IntegratorType::Rk4 => Box::new(RungeKutta4),
        IntegratorType::Rk45 => Box::new(RungeKutta45),
    };
    info!(
        "Using {} integrator{}",
        solver.name(),
        if solver.is_adaptive() { " (adaptive)" } else { "" }
    );
    solver
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_factory_matches_kind() {
        assert_eq!(create_integrator(IntegratorType::Rk2).name(), "RK2");
        assert_eq!(create_integrator(IntegratorType::Rk4).name(), "RK4");
        let rk45 = create_integrator(IntegratorType::Rk45);
        assert_eq!(rk45.name(), "RK45");
        assert!(rk45.is_adaptive());
        assert_eq!(IntegratorType::default(), IntegratorType::Rk4);
    }
}
