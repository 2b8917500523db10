//! Error taxonomy for differential runs.
//!
//! Every failure is a deterministic condition against static input, so
//! nothing here is retried: an error ends the enclosing scenario and, with it,
//! the comparison for the image being verified.

use thiserror::Error;

use crate::compare::Divergence;
use crate::import::{EnumQuery, Flavor};
use crate::perf::PerfScenarioKind;
use crate::token::{Status, Token};

/// Convenience alias used throughout the crate.
pub type Result<T, E = HarnessError> = std::result::Result<T, E>;

/// Errors produced while driving or comparing import sessions.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HarnessError {
    /// Opening a session (or an enumeration) returned a failure status.
    #[error("{what} failed with status {status}")]
    OpenFailure {
        /// What was being opened.
        what: String,
        /// Native status code.
        status: Status,
    },

    /// A page call failed mid-enumeration. The handle is still closed.
    #[error("{query} failed while paging with status {status}")]
    PagingFailure {
        /// The enumeration being paged.
        query: EnumQuery,
        /// Native status code.
        status: Status,
    },

    /// The native layer claimed to return more items than the buffer holds.
    #[error("{query} returned {returned} items into a buffer of {capacity}")]
    PageOverrun {
        query: EnumQuery,
        returned: usize,
        capacity: usize,
    },

    /// Counting an opened enumeration failed.
    #[error("counting {query} failed with status {status}")]
    CountFailure { query: EnumQuery, status: Status },

    /// The reported total disagrees with the number of items produced.
    #[error("{query} reported {reported} items but produced {produced}")]
    CountMismatch {
        /// The enumeration that was drained.
        query: EnumQuery,
        /// Value returned by the count call.
        reported: u32,
        /// Items actually accumulated while paging.
        produced: usize,
    },

    /// Repositioning a cursor failed.
    #[error("reset of {query} to offset {offset} failed with status {status}")]
    ResetFailure {
        query: EnumQuery,
        offset: u32,
        status: Status,
    },

    /// A replay after reset did not reproduce the expected tokens.
    #[error("reset replay on {flavor} session is inconsistent: {detail}")]
    ResetInconsistent { flavor: Flavor, detail: String },

    /// Resolving a signature token failed.
    #[error("signature lookup for {token} failed with status {status}")]
    LookupFailure { token: Token, status: Status },

    /// Baseline and current produced different sequences.
    #[error("{0}")]
    DifferentialMismatch(Box<Divergence>),

    /// The benchmark library's initialization entry point failed.
    #[error("Initialization failed: {status}")]
    InitializationFailure { status: Status },

    /// A timed scenario entry point returned a failure status.
    #[error("Failure {status} in {side} {scenario}")]
    BenchmarkFailure {
        scenario: PerfScenarioKind,
        side: Flavor,
        status: Status,
    },
}

impl HarnessError {
    /// Native status code carried by this error, if any.
    pub const fn status(&self) -> Option<Status> {
        match self {
            Self::OpenFailure { status, .. }
            | Self::PagingFailure { status, .. }
            | Self::CountFailure { status, .. }
            | Self::ResetFailure { status, .. }
            | Self::LookupFailure { status, .. }
            | Self::InitializationFailure { status }
            | Self::BenchmarkFailure { status, .. } => Some(*status),
            Self::PageOverrun { .. }
            | Self::CountMismatch { .. }
            | Self::ResetInconsistent { .. }
            | Self::DifferentialMismatch(_) => None,
        }
    }

    /// Whether this error is an equivalence failure rather than a native one.
    pub const fn is_mismatch(&self) -> bool {
        matches!(self, Self::DifferentialMismatch(_))
    }
}
