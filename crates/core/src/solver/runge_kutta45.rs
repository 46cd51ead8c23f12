//! Embedded Cash-Karp Runge-Kutta 4(5) with step-size control

use crate::core_types::{ParticlePosition, Vec3};
use crate::field::FunctionSet;
use crate::solver::r#trait::{check_step, stage, InitialValueProblemSolver, StepError, StepOutcome};

const A: [f64; 6] = [0.0, 1.0 / 5.0, 3.0 / 10.0, 3.0 / 5.0, 1.0, 7.0 / 8.0];

const B: [[f64; 5]; 6] = [
    [0.0, 0.0, 0.0, 0.0, 0.0],
    [1.0 / 5.0, 0.0, 0.0, 0.0, 0.0],
    [3.0 / 40.0, 9.0 / 40.0, 0.0, 0.0, 0.0],
    [3.0 / 10.0, -9.0 / 10.0, 6.0 / 5.0, 0.0, 0.0],
    [-11.0 / 54.0, 5.0 / 2.0, -70.0 / 27.0, 35.0 / 27.0, 0.0],
    [1631.0 / 55296.0, 175.0 / 512.0, 575.0 / 13824.0, 44275.0 / 110592.0, 253.0 / 4096.0],
];

/// Fifth-order weights
const C: [f64; 6] = [37.0 / 378.0, 0.0, 250.0 / 621.0, 125.0 / 594.0, 0.0, 512.0 / 1771.0];

/// Fifth-order minus embedded fourth-order weights
const DC: [f64; 6] = [
    37.0 / 378.0 - 2825.0 / 27648.0,
    0.0,
    250.0 / 621.0 - 18575.0 / 48384.0,
    125.0 / 594.0 - 13525.0 / 55296.0,
    -277.0 / 14336.0,
    512.0 / 1771.0 - 1.0 / 4.0,
];

const SAFETY: f64 = 0.9;
const GROW_EXPONENT: f64 = -0.2;
const SHRINK_EXPONENT: f64 = -0.25;
const MAX_GROWTH: f64 = 5.0;
const MIN_SHRINK: f64 = 0.1;
const MAX_ATTEMPTS: usize = 64;

/// Adaptive when `min_step != max_step` and `max_error > 0`, otherwise a
/// plain fifth-order step that still reports its error estimate
#[derive(Debug, Clone, Copy, Default)]
pub struct RungeKutta45;

impl RungeKutta45 {
    /// One Cash-Karp step: fifth-order position and relative error estimate
    fn cash_karp(field: &mut dyn FunctionSet, x0: &ParticlePosition, h: f64) -> Result<(Vec3, f64), StepError> {
        let (x, t) = (&x0.point, x0.time);
        let mut k = [Vec3::zeros(); 6];
        for s in 0..6 {
            let mut offset = Vec3::zeros();
            for (j, kj) in k.iter().enumerate().take(s) {
                offset += kj * (B[s][j] * h);
            }
            k[s] = stage(field, x, t + A[s] * h, offset)?;
        }

        let mut delta = Vec3::zeros();
        let mut error = Vec3::zeros();
        for s in 0..6 {
            delta += k[s] * (C[s] * h);
            error += k[s] * (DC[s] * h);
        }
        let scale = delta.norm().max(f64::EPSILON);
        Ok((x + delta, error.norm() / scale))
    }
}

impl InitialValueProblemSolver for RungeKutta45 {
    fn compute_next_step(
        &mut self,
        field: &mut dyn FunctionSet,
        x0: &ParticlePosition,
        step_wanted: f64,
        min_step: f64,
        max_step: f64,
        max_error: f64,
    ) -> Result<StepOutcome, StepError> {
        check_step(step_wanted)?;

        let adaptive = min_step != max_step && max_error > 0.0;
        if !adaptive {
            let (next, error) = Self::cash_karp(field, x0, step_wanted)?;
            return Ok(StepOutcome {
                next,
                step_taken: step_wanted,
                next_step: step_wanted,
                error,
            });
        }

        let min_step = min_step.max(0.0);
        let clamp = |h: f64| {
            let h = h.max(min_step);
            if max_step > 0.0 {
                h.min(max_step)
            } else {
                h
            }
        };

        let mut h = clamp(step_wanted);
        for _ in 0..MAX_ATTEMPTS {
            let (next, error) = Self::cash_karp(field, x0, h)?;
            let ratio = error / max_error;

            // Accept, or accept anyway once the step cannot shrink further
            if ratio <= 1.0 || h <= min_step {
                let growth = if ratio > 0.0 {
                    (SAFETY * ratio.powf(GROW_EXPONENT)).min(MAX_GROWTH)
                } else {
                    MAX_GROWTH
                };
                return Ok(StepOutcome {
                    next,
                    step_taken: h,
                    next_step: clamp(h * growth),
                    error,
                });
            }

            let shrink = (SAFETY * ratio.powf(SHRINK_EXPONENT)).max(MIN_SHRINK);
            h = clamp(h * shrink);
            check_step(h)?;
        }

        // Tolerance unreachable: take the smallest step tried
        let (next, error) = Self::cash_karp(field, x0, h)?;
        Ok(StepOutcome {
            next,
            step_taken: h,
            next_step: h,
            error,
        })
    }

    fn is_adaptive(&self) -> bool {
        true
    }

    fn name(&self) -> &'static str {
        "RK45"
    }
}
