//! Tracer configuration

use crate::core_types::TraceError;
use crate::solver::IntegratorType;
use serde::{Deserialize, Serialize};

/// How `termination_time` is interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TerminationUnit {
    /// A time value
    #[default]
    Time,
    /// An index into the snapshot sequence
    Step,
}

/// Per-particle age limit
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ParticleLifetime {
    /// Remove a particle once its integrated age would exceed this
    Time(f64),
    /// Remove a particle once it has been advanced this many steps
    Steps(u32),
}

/// What the tracer keeps between steps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OutputMode {
    /// Only the latest frame
    #[default]
    FinalFrame,
    /// Every frame, grouped into one polyline per particle
    Pathlines,
}

/// Particle tracer settings
///
/// Every field has a default, so a JSON document only needs the values it
/// changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TracerConfig {
    /// Vector array to advect with (`None` uses the active vectors)
    pub vector_field: Option<String>,
    pub integrator: IntegratorType,
    /// Sub-step as a fraction of the time-step interval, in (0, 1]
    pub integration_step: f64,
    /// Error tolerance for adaptive integrators
    pub maximum_error: f64,
    /// Adaptive step bounds in time units (equal values disable adaptation)
    pub minimum_step: f64,
    pub maximum_step: f64,
    /// Particles at or below this speed are terminated
    pub terminal_speed: f64,
    /// Re-seed every N steps (0 never re-seeds)
    pub reinjection_period: u32,
    /// Geometry is identical at every time step
    pub static_mesh: bool,
    /// Seed points never change, so their classification can be reused
    pub static_seeds: bool,
    pub compute_vorticity: bool,
    /// Multiplier applied to the angular velocity
    pub rotation_scale: f64,
    /// Seeding time (`None` uses the first snapshot time)
    pub start_time: Option<f64>,
    /// Last time (or step index) to advance to (`None` runs to the last snapshot)
    pub termination_time: Option<f64>,
    pub termination_unit: TerminationUnit,
    pub particle_lifetime: Option<ParticleLifetime>,
    /// Integration passes per step; particles are exchanged between passes
    pub exchange_passes: u32,
    pub output_mode: OutputMode,
}

impl Default for TracerConfig {
    fn default() -> Self {
        Self {
            vector_field: None,
            integrator: IntegratorType::Rk4,
            integration_step: 0.5,
            maximum_error: 1.0e-6,
            minimum_step: 0.0,
            maximum_step: 0.0,
            terminal_speed: 1.0e-12,
            reinjection_period: 0,
            static_mesh: false,
            static_seeds: false,
            compute_vorticity: false,
            rotation_scale: 1.0,
            start_time: None,
            termination_time: None,
            termination_unit: TerminationUnit::Time,
            particle_lifetime: None,
            exchange_passes: 2,
            output_mode: OutputMode::FinalFrame,
        }
    }
}

impl TracerConfig {
    /// Parse a JSON document and validate it
    ///
    /// # Errors
    /// Returns `InvalidConfig` if the document does not parse or a value is
    /// out of range.
    pub fn from_json_str(json: &str) -> Result<Self, TraceError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| TraceError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to pretty-printed JSON
    ///
    /// # Errors
    /// Returns `InvalidConfig` if a value cannot be represented in JSON.
    pub fn to_json_string(&self) -> Result<String, TraceError> {
        serde_json::to_string_pretty(self).map_err(|e| TraceError::InvalidConfig(e.to_string()))
    }

    /// Check every value is in range
    ///
    /// # Errors
    /// Returns `InvalidConfig` naming the first offending field.
    pub fn validate(&self) -> Result<(), TraceError> {
        let invalid = |msg: String| Err(TraceError::InvalidConfig(msg));

        if self.integration_step.is_nan()
            || self.integration_step <= 0.0
            || self.integration_step > 1.0
        {
            return invalid(format!(
                "integration_step must be in (0, 1], got {}",
                self.integration_step
            ));
        }
        if !non_negative(self.maximum_error) {
            return invalid(format!("maximum_error must be >= 0, got {}", self.maximum_error));
        }
        if !non_negative(self.minimum_step) || !non_negative(self.maximum_step) {
            return invalid(format!(
                "step bounds must be >= 0, got [{}, {}]",
                self.minimum_step, self.maximum_step
            ));
        }
        if self.maximum_step > 0.0 && self.minimum_step > self.maximum_step {
            return invalid(format!(
                "minimum_step {} exceeds maximum_step {}",
                self.minimum_step, self.maximum_step
            ));
        }
        if !non_negative(self.terminal_speed) {
            return invalid(format!("terminal_speed must be >= 0, got {}", self.terminal_speed));
        }
        if !self.rotation_scale.is_finite() {
            return invalid("rotation_scale must be finite".to_string());
        }
        if self.exchange_passes == 0 {
            return invalid("exchange_passes must be at least 1".to_string());
        }
        if self.start_time.is_some_and(|t| !t.is_finite()) {
            return invalid("start_time must be finite".to_string());
        }
        match (self.termination_time, self.termination_unit) {
            (Some(t), _) if !t.is_finite() => {
                return invalid("termination_time must be finite".to_string());
            }
            (Some(t), TerminationUnit::Step) if t < 0.0 || t.fract() != 0.0 => {
                return invalid(format!(
                    "termination_time in steps must be a non-negative integer, got {}",
                    t
                ));
            }
            _ => {}
        }
        match self.particle_lifetime {
            Some(ParticleLifetime::Time(t)) if !non_negative(t) || t == 0.0 => {
                invalid(format!("particle lifetime must be positive, got {}", t))
            }
            Some(ParticleLifetime::Steps(0)) => {
                invalid("particle lifetime in steps must be positive".to_string())
            }
            _ => Ok(()),
        }
    }
}

fn non_negative(value: f64) -> bool {
    value.is_finite() && value >= 0.0
}
