#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

//! # mdimport-native
//!
//! Binds native metadata import implementations, loaded from dynamic
//! libraries, to the [`mdimport`] capability traits.
//!
//! - [`NativeModule`]: one loaded library, kept mapped by everything made from it
//! - [`NativeDispenser`]: an `IMetaDataDispenser` implementing [`mdimport::Dispenser`]
//! - [`NativeImport`]: an `IMetaDataImport` session implementing [`mdimport::MetadataImport`]
//! - [`PerfLibrary`]: the benchmark library's initialization and timed entry points
//!
//! COM interface pointers never leave this crate; they are owned by
//! reference-counted wrappers that release them on drop.
//!
//! ## Example
//!
//! ```rust,no_run
//! use mdimport::{DifferentialRunner, DualLoader, Flavor, RunConfig};
//! use mdimport_native::FactorySpec;
//!
//! let baseline = FactorySpec::for_flavor(Flavor::Baseline, "libcoreclr.so").open(Flavor::Baseline)?;
//! let current = FactorySpec::for_flavor(Flavor::Current, "libdnmd.so").open(Flavor::Current)?;
//!
//! let image = std::fs::read("System.Runtime.dll")?;
//! let summary = DifferentialRunner::new(RunConfig::default())
//!     .run_image("System.Runtime.dll", &DualLoader::new(&baseline, &current), &image);
//! println!("{} passed, {} failed", summary.passed, summary.failed);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod com;
mod error;
mod import;
mod loader;
mod perf;

pub use com::{CLSID_COR_METADATA_DISPENSER, Guid, IID_IMETADATA_DISPENSER, IID_IMETADATA_IMPORT};
pub use error::{NativeError, Result};
pub use import::NativeImport;
pub use loader::{FactoryAbi, FactorySpec, NativeDispenser, NativeModule, default_library_name};
pub use perf::{InitializedPerf, PerfLibrary};
