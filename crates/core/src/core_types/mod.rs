//! Core types and utilities

pub mod error;
pub mod particle;
pub mod spatial;
pub mod vec3;

pub use error::TraceError;
pub use particle::{CellHint, ErrorCode, LocationState, ParticleRecord};
pub use spatial::Bounds;
pub use vec3::{ParticlePosition, Vec3};
