//! Fatal configuration and input errors
//!
//! Only problems that prevent a run from starting (or a hand-off record that
//! cannot be decoded) are reported through `TraceError`. Anything that goes
//! wrong for a single particle is recorded on the particle as an
//! [`ErrorCode`](crate::core_types::ErrorCode) and never propagates.

use std::fmt;

/// Errors that abort a tracer run before or instead of integration
#[derive(Debug, Clone, PartialEq)]
pub enum TraceError {
    /// The requested vector array is absent from every input block
    MissingVectorField {
        /// Requested array name (`None` means the active vectors)
        name: Option<String>,
    },
    /// The vector array is not a 3-component float or double array
    UnsupportedVectorType {
        /// Array name
        name: String,
        /// Description of what was found instead
        found: String,
    },
    /// Input blocks do not share the same point-data arrays
    InconsistentPointData {
        /// Array names of the reference block
        expected: Vec<String>,
        /// Array names of the offending block
        found: Vec<String>,
    },
    /// The datasets registered at the two time endpoints do not mirror each other
    EndpointMismatch(String),
    /// Fewer than two distinct input time values
    InsufficientTimeSteps {
        /// Number of distinct time values supplied
        found: usize,
    },
    /// Snapshot times are not strictly increasing
    NonMonotonicTime {
        /// Time of the earlier snapshot
        previous: f64,
        /// Time of the snapshot that did not advance
        next: f64,
    },
    /// A configuration value is out of range
    InvalidConfig(String),
    /// A particle hand-off record could not be decoded
    CorruptRecord(String),
    /// No usable dataset was supplied for one of the endpoints
    NoInput(String),
    /// `advance` was called before `begin`, or after the run finished
    NotStarted,
    /// Another rank failed a setup step and returned its own error
    PeerFailed {
        /// Number of ranks that reported a failure
        ranks: usize,
    },
}

impl fmt::Display for TraceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TraceError::MissingVectorField { name: Some(name) } => {
                write!(f, "Vector array '{name}' not found on any input block")
            }
            TraceError::MissingVectorField { name: None } => {
                write!(f, "No active vector array found on any input block")
            }
            TraceError::UnsupportedVectorType { name, found } => write!(
                f,
                "Vector array '{name}' must hold 3-component float or double values, found {found}"
            ),
            TraceError::InconsistentPointData { expected, found } => write!(
                f,
                "Point data arrays are not consistent across data sets: expected {expected:?}, found {found:?}"
            ),
            TraceError::EndpointMismatch(msg) => write!(f, "Time endpoint mismatch: {msg}"),
            TraceError::InsufficientTimeSteps { found } => write!(
                f,
                "At least two distinct input time values are required, found {found}"
            ),
            TraceError::NonMonotonicTime { previous, next } => write!(
                f,
                "Input time values must increase strictly: {next} follows {previous}"
            ),
            TraceError::InvalidConfig(msg) => write!(f, "Invalid tracer configuration: {msg}"),
            TraceError::CorruptRecord(msg) => write!(f, "Corrupt particle record: {msg}"),
            TraceError::NoInput(msg) => write!(f, "No usable input: {msg}"),
            TraceError::NotStarted => write!(f, "Tracer has not been started or has finished"),
            TraceError::PeerFailed { ranks } => {
                write!(f, "Setup failed on {ranks} peer rank(s)")
            }
        }
    }
}

impl std::error::Error for TraceError {}
