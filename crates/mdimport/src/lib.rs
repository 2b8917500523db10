#![forbid(unsafe_code)]
// Allow pedantic lints for early-stage API ergonomics.
#![allow(clippy::must_use_candidate)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

//! # mdimport
//!
//! Differential enumeration engine for cursor-based metadata import APIs.
//!
//! Two implementations of the same read-side import surface ("baseline" and
//! "current") are driven through identical enumeration, counting, reset and
//! signature-lookup sequences over one metadata image; their outputs must be
//! identical, element by element.
//!
//! ## Architecture
//!
//! - [`EnumCursor`]: owned enumeration handle, closed exactly once
//! - [`Enumerator`]: flat paging driver and hierarchical composer
//! - [`exercise_reset`]: rewind-to-offset and full-reset replay
//! - [`resolve_signatures`]: signature token to blob resolution
//! - [`DualLoader`] / [`SessionPair`]: one session per implementation
//! - [`DifferentialRunner`]: runs every [`Scenario`] against both sessions
//! - [`PerfComparator`]: times native benchmark entry points
//! - [`memory`]: in-memory reference import used by tests and benches
//!
//! ## Example
//!
//! ```rust
//! use mdimport::memory::{MemoryDispenser, MetadataModel};
//! use mdimport::{DifferentialRunner, DualLoader, Flavor, RunConfig};
//!
//! let model = MetadataModel::synthetic(3, 2, 1, 1);
//! let baseline = MemoryDispenser::new(Flavor::Baseline, model.clone());
//! let current = MemoryDispenser::new(Flavor::Current, model);
//!
//! let loader = DualLoader::new(&baseline, &current);
//! let sessions = loader.open(&[]).unwrap();
//! let summary = DifferentialRunner::new(RunConfig::default()).run("synthetic", &sessions);
//! assert!(summary.is_pass());
//! ```

mod compare;
mod cursor;
mod driver;
mod error;
mod import;
pub mod memory;
mod perf;
mod reset;
mod runner;
mod scenario;
mod session;
mod signature;
mod token;

pub use compare::{CompareResult, Divergence, SequenceComparator};
pub use cursor::EnumCursor;
pub use driver::{ChildWalk, DEFAULT_BUFFER_CAPACITY, Enumerator, MEMBERS, PROPERTIES_EVENTS, TYPE_HIERARCHY};
pub use error::{HarnessError, Result};
pub use import::{Dispenser, EnumKind, EnumQuery, Flavor, MetadataImport, RawEnum};
pub use perf::{
    BenchEntry, DEFAULT_MEASURE_ITERATIONS, DEFAULT_WARMUP_ITERATIONS, PerfComparator, PerfEvent,
    PerfMeasurement, PerfScenario, PerfScenarioKind,
};
pub use reset::{ResetReport, exercise_reset};
pub use runner::{DifferentialRunner, ImageSummary, RunConfig, ScenarioOutcome, ScenarioRecord};
pub use scenario::{ParseScenarioError, Scenario, ScenarioOutput};
pub use session::{DualLoader, SessionPair};
pub use signature::{SignatureBlob, SignatureRecord, copy_signature_blobs, resolve_signatures};
pub use token::{Status, Token, table};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        DifferentialRunner, Dispenser, DualLoader, EnumCursor, EnumQuery, Enumerator, Flavor,
        HarnessError, MetadataImport, RunConfig, Scenario, Status, Token,
    };
}
