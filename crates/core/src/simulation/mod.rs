//! Transient particle tracing
//!
//! [`ParticleTracer`] drives the advection loop over a sequence of
//! [`Snapshot`]s. Configuration lives in [`TracerConfig`], seed points in
//! [`SeedSource`], and cross-rank cooperation goes through a
//! [`Communicator`] (a no-op [`LocalCommunicator`] for single-process runs,
//! or an [`InProcessGroup`] of threads).

pub mod config;
pub mod exchange;
pub mod output;
pub mod seeds;
pub mod tracer;

pub use config::{OutputMode, ParticleLifetime, TerminationUnit, TracerConfig};
pub use exchange::{
    assign_unique_ids, decode_particles, encode_particles, exchange_particles, lowest_rank_owners,
    Communicator, InProcessCommunicator, InProcessGroup, LocalCommunicator, RECORD_SIZE,
};
pub use output::{ParticleOutput, ParticlePath, ParticlePaths, StepReport};
pub use seeds::SeedSource;
pub use tracer::{AbortHandle, DriverPhase, ParticleTracer, Snapshot};
