//! Per-particle state carried through the advection loop
//!
//! A particle is created when a seed point is accepted (or a hand-off record
//! is received), mutated on every integration step, and dropped from the live
//! population when it leaves every domain, stagnates, outlives its lifetime or
//! is handed to a peer rank.

use crate::core_types::vec3::{ParticlePosition, Vec3};
use serde::{Deserialize, Serialize};

/// Where a point falls relative to the two time endpoints of the current window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum LocationState {
    /// Found in a dataset at both T0 and T1
    InsideAll = 0,
    /// Found only at T1
    OutsideT0 = 1,
    /// Found only at T0
    OutsideT1 = 2,
    /// Found at neither endpoint
    OutsideAll = 3,
}

impl LocationState {
    /// True unless the point is outside both endpoints
    pub fn is_inside_any(self) -> bool {
        self != LocationState::OutsideAll
    }

    /// Integer value used in output arrays and hand-off records
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// Inverse of [`LocationState::as_i32`]
    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(LocationState::InsideAll),
            1 => Some(LocationState::OutsideT0),
            2 => Some(LocationState::OutsideT1),
            3 => Some(LocationState::OutsideAll),
            _ => None,
        }
    }
}

/// Why integration of a particle stopped or had to be retried
///
/// The numeric values are stable and appear in the `ErrorCode` output array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum ErrorCode {
    /// No error
    #[default]
    None = 0,
    /// The solver failed a sub-step; a push retry was attempted
    StepFailed = 1,
    /// Integration succeeded but the final position is outside all domains
    ExitedDomain = 2,
    /// Push retry applied with zero velocity (no prior state to push from)
    PushedWithoutVelocity = 3,
    /// Push retry used the last good velocity from the T1 endpoint
    PushedWithT1Velocity = 4,
    /// Push retry used the last good velocity from the T0 endpoint
    PushedWithT0Velocity = 5,
    /// Push retry recovered containment
    PushRecovered = 6,
}

impl ErrorCode {
    /// Integer value used in output arrays and hand-off records
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// Inverse of [`ErrorCode::as_i32`]
    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(ErrorCode::None),
            1 => Some(ErrorCode::StepFailed),
            2 => Some(ErrorCode::ExitedDomain),
            3 => Some(ErrorCode::PushedWithoutVelocity),
            4 => Some(ErrorCode::PushedWithT1Velocity),
            5 => Some(ErrorCode::PushedWithT0Velocity),
            6 => Some(ErrorCode::PushRecovered),
            _ => None,
        }
    }
}

/// A remembered containing cell: which registered dataset and which cell in it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CellHint {
    pub cell_id: usize,
    pub dataset_index: usize,
}

impl CellHint {
    pub fn new(cell_id: usize, dataset_index: usize) -> Self {
        Self {
            cell_id,
            dataset_index,
        }
    }

    /// Raw `(cell id, dataset index)` pair; `None` maps to the `(-1, 0)` sentinel
    pub fn to_raw(hint: Option<CellHint>) -> (i64, usize) {
        match hint {
            Some(h) => (h.cell_id as i64, h.dataset_index),
            None => (-1, 0),
        }
    }

    /// Inverse of [`CellHint::to_raw`]; any negative cell id means "no cache"
    pub fn from_raw(cell_id: i64, dataset_index: usize) -> Option<CellHint> {
        usize::try_from(cell_id)
            .ok()
            .map(|cell_id| CellHint::new(cell_id, dataset_index))
    }
}

/// A live particle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticleRecord {
    /// Current `(x, y, z, t)`
    pub position: ParticlePosition,
    /// Containing cell at T0 and T1 from the last successful step
    pub cached_cells: [Option<CellHint>; 2],
    pub location: LocationState,
    /// Index of the seed source that injected this particle
    pub source_id: i32,
    /// Number of time steps this particle has been advanced
    pub time_step_age: i32,
    /// Index of the seed point within its source
    pub injected_point_id: i32,
    /// Step index (relative to the start step) of the injection
    pub injected_step_id: i32,
    /// Unique across all ranks for the lifetime of a run
    pub unique_id: i64,
    pub simulation_time: f64,
    pub error_code: ErrorCode,
    /// Accumulated integration time
    pub age: f64,
    /// Accumulated rotation angle (vorticity integration)
    pub rotation: f64,
    /// Angular velocity at the last emission
    pub angular_velocity: f64,
    /// Time of the last emission that updated `rotation`
    pub rotation_time: f64,
    pub speed: f64,
    /// Output point index from the last emission, if any
    pub point_id: Option<usize>,
}

impl ParticleRecord {
    /// A freshly injected particle at `point`, time `time`, with no id yet
    pub fn seed(
        point: Vec3,
        time: f64,
        source_id: i32,
        injected_point_id: i32,
        injected_step_id: i32,
        simulation_time: f64,
    ) -> Self {
        ParticleRecord {
            position: ParticlePosition::new(point, time),
            cached_cells: [None, None],
            location: LocationState::InsideAll,
            source_id,
            time_step_age: 0,
            injected_point_id,
            injected_step_id,
            unique_id: -1,
            simulation_time,
            error_code: ErrorCode::None,
            age: 0.0,
            rotation: 0.0,
            angular_velocity: 0.0,
            rotation_time: 0.0,
            speed: 0.0,
            point_id: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cell_hint_sentinel() {
        assert_eq!(CellHint::to_raw(None), (-1, 0));
        assert_eq!(CellHint::from_raw(-1, 0), None);
        assert_eq!(
            CellHint::from_raw(17, 2),
            Some(CellHint::new(17, 2))
        );
        assert_eq!(CellHint::to_raw(Some(CellHint::new(17, 2))), (17, 2));
    }

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(ErrorCode::PushRecovered.as_i32(), 6);
        assert_eq!(ErrorCode::from_i32(4), Some(ErrorCode::PushedWithT1Velocity));
        assert_eq!(ErrorCode::from_i32(7), None);
        assert_eq!(LocationState::OutsideT1.as_i32(), 2);
        assert_eq!(LocationState::from_i32(3), Some(LocationState::OutsideAll));
        assert!(!LocationState::OutsideAll.is_inside_any());
        assert!(LocationState::OutsideT0.is_inside_any());
    }

    #[test]
    fn test_seeded_particle_defaults() {
        let p = ParticleRecord::seed(Vec3::new(1.0, 2.0, 3.0), 0.5, 1, 7, 0, 0.5);
        assert_eq!(p.unique_id, -1);
        assert_eq!(p.error_code, ErrorCode::None);
        assert_eq!(p.cached_cells, [None, None]);
        assert_eq!(p.position.time, 0.5);
    }
}
