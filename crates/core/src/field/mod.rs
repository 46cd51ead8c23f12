//! Velocity field evaluation
//!
//! - [`CachedVelocityField`]: vector interpolation over a list of datasets
//!   with last-cell caching
//! - [`TemporalVelocityField`]: two cached evaluators blended across a time
//!   window, with inside/outside classification per endpoint
//! - [`FunctionSet`]: the function interface the ODE solvers call

pub mod cached_field;
pub mod function_set;
pub mod temporal_field;
pub mod vector_view;

pub use cached_field::{CacheStats, CachedVelocityField, TOLERANCE_SCALE};
pub use function_set::FunctionSet;
pub use temporal_field::{TemporalVelocityField, WEIGHT_SNAP};
pub use vector_view::VectorView;
