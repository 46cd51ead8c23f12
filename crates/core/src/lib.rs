//! Flow Path Core Library
//!
//! Transient particle tracing through time-varying vector fields. Particles
//! are advected with a pluggable Runge-Kutta integrator through a velocity
//! field blended linearly between two mesh snapshots, and can be handed
//! between cooperating ranks when they leave a rank's domain.
//!
//! ## Layers
//!
//! - `grid`: meshes, cells, point arrays and cell locators
//! - `field`: cached point location and interpolation, temporal blending
//! - `solver`: RK2, RK4 and adaptive Cash-Karp RK45
//! - `simulation`: the particle tracer, seeding, hand-off and output

// Core types and utilities
pub mod core_types;

pub mod field;
pub mod grid;
pub mod simulation;
pub mod solver;

// Re-export core types
pub use core_types::{
    Bounds, CellHint, ErrorCode, LocationState, ParticlePosition, ParticleRecord, TraceError, Vec3,
};

// Re-export mesh and field types
pub use field::{CacheStats, CachedVelocityField, FunctionSet, TemporalVelocityField};
pub use grid::{
    BinnedCellLocator, CellConnectivity, CellLocator, DataArray, DataSet, PointData, UniformGrid,
    UnstructuredGrid,
};

// Re-export tracer types
pub use simulation::{
    AbortHandle, Communicator, DriverPhase, InProcessGroup, LocalCommunicator, OutputMode,
    ParticleLifetime, ParticleOutput, ParticlePaths, ParticleTracer, SeedSource, Snapshot,
    StepReport, TerminationUnit, TracerConfig,
};
pub use solver::{create_integrator, IntegratorType};
