//! Initial-value-problem solver contract
//!
//! A solver advances one point `(x, t)` by one step of `dx/dt = f(x, t)`,
//! calling the [`FunctionSet`] as many times as its scheme needs. A failed
//! function evaluation aborts the step and the caller keeps the start point.

use crate::core_types::{ParticlePosition, Vec3};
use crate::field::FunctionSet;
use std::fmt;

/// Result of one successful step
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepOutcome {
    /// Position at `t + step_taken`
    pub next: Vec3,
    /// Step actually taken (may be smaller than requested for adaptive solvers)
    pub step_taken: f64,
    /// Step the solver suggests for the next call
    pub next_step: f64,
    /// Estimated relative local error, 0 for schemes without an estimate
    pub error: f64,
}

/// Why a step could not be taken
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepError {
    /// The function set had no value at one of the stage points
    OutOfDomain,
    /// Step size was zero, negative or not finite
    InvalidStep,
}

impl fmt::Display for StepError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepError::OutOfDomain => write!(f, "stage point left the domain"),
            StepError::InvalidStep => write!(f, "step size must be positive and finite"),
        }
    }
}

impl std::error::Error for StepError {}

/// Backend-agnostic single-step ODE integrator
pub trait InitialValueProblemSolver: Send + Sync + fmt::Debug {
    /// Advance `x0` by one step
    ///
    /// # Arguments
    ///
    /// * `field` - Right-hand side `f(x, t)`
    /// * `x0` - Start point and time
    /// * `step_wanted` - Requested step in time units
    /// * `min_step` / `max_step` - Bounds for adaptive schemes (equal means fixed)
    /// * `max_error` - Error tolerance for adaptive schemes
    ///
    /// # Errors
    ///
    /// `OutOfDomain` if any stage evaluation fails, `InvalidStep` for a
    /// non-positive step.
    fn compute_next_step(
        &mut self,
        field: &mut dyn FunctionSet,
        x0: &ParticlePosition,
        step_wanted: f64,
        min_step: f64,
        max_step: f64,
        max_error: f64,
    ) -> Result<StepOutcome, StepError>;

    /// True if the solver changes its step to meet an error tolerance
    fn is_adaptive(&self) -> bool {
        false
    }

    fn name(&self) -> &'static str;
}

/// Evaluate `field` at `x + h * k`, time `t`
#[inline]
pub(crate) fn stage(
    field: &mut dyn FunctionSet,
    x: &Vec3,
    t: f64,
    offset: Vec3,
) -> Result<Vec3, StepError> {
    field
        .function_values(&ParticlePosition::new(x + offset, t))
        .ok_or(StepError::OutOfDomain)
}

#[inline]
pub(crate) fn check_step(step: f64) -> Result<(), StepError> {
    if step > 0.0 && step.is_finite() {
        Ok(())
    } else {
        Err(StepError::InvalidStep)
    }
}
