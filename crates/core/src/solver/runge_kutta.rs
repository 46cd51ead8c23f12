//! Fixed-step Runge-Kutta schemes

use crate::core_types::{ParticlePosition, Vec3};
use crate::field::FunctionSet;
use crate::solver::r#trait::{check_step, stage, InitialValueProblemSolver, StepError, StepOutcome};

/// Second-order midpoint rule
#[derive(Debug, Clone, Copy, Default)]
pub struct RungeKutta2;

impl InitialValueProblemSolver for RungeKutta2 {
    fn compute_next_step(
        &mut self,
        field: &mut dyn FunctionSet,
        x0: &ParticlePosition,
        step_wanted: f64,
        _min_step: f64,
        _max_step: f64,
        _max_error: f64,
    ) -> Result<StepOutcome, StepError> {
        check_step(step_wanted)?;
        let h = step_wanted;
        let (x, t) = (&x0.point, x0.time);

        let k1 = stage(field, x, t, Vec3::zeros())?;
        let k2 = stage(field, x, t + 0.5 * h, k1 * (0.5 * h))?;

        Ok(StepOutcome {
            next: x + k2 * h,
            step_taken: h,
            next_step: h,
            error: 0.0,
        })
    }

    fn name(&self) -> &'static str {
        "RK2"
    }
}

/// Classic fourth-order scheme
#[derive(Debug, Clone, Copy, Default)]
pub struct RungeKutta4;

impl InitialValueProblemSolver for RungeKutta4 {
    fn compute_next_step(
        &mut self,
        field: &mut dyn FunctionSet,
        x0: &ParticlePosition,
        step_wanted: f64,
        _min_step: f64,
        _max_step: f64,
        _max_error: f64,
    ) -> Result<StepOutcome, StepError> {
        check_step(step_wanted)?;
        let h = step_wanted;
        let (x, t) = (&x0.point, x0.time);

        let k1 = stage(field, x, t, Vec3::zeros())?;
        let k2 = stage(field, x, t + 0.5 * h, k1 * (0.5 * h))?;
        let k3 = stage(field, x, t + 0.5 * h, k2 * (0.5 * h))?;
        let k4 = stage(field, x, t + h, k3 * h)?;

        Ok(StepOutcome {
            next: x + (k1 + k2 * 2.0 + k3 * 2.0 + k4) * (h / 6.0),
            step_taken: h,
            next_step: h,
            error: 0.0,
        })
    }

    fn name(&self) -> &'static str {
        "RK4"
    }
}
