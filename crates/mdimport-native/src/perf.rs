//! Benchmark entry points exported by the native benchmark library.

#![allow(unsafe_code)]

use std::ffi::c_void;
use std::path::Path;

use mdimport::{Flavor, HarnessError, PerfComparator, PerfScenario, PerfScenarioKind, Status};
use tracing::{debug, info};

use crate::error::Result;
use crate::loader::{NativeDispenser, NativeModule};

/// `int PerfInitialize(void* image, int length, intptr_t dispenser)`
type PerfInitializeFn = unsafe extern "C" fn(image: *const c_void, len: i32, dispenser: isize) -> i32;

/// `int PerfBaseline<Name>(int iterations)` / `int PerfCurrent<Name>(int iterations)`
type PerfEntryFn = unsafe extern "C" fn(iterations: i32) -> i32;

const PERF_INITIALIZE: &str = "PerfInitialize";

struct EntryPair {
    kind: PerfScenarioKind,
    baseline: PerfEntryFn,
    current: PerfEntryFn,
}

/// The benchmark library with every entry point resolved.
///
/// All exports are looked up when the library is loaded, so a missing
/// scenario fails before anything is timed.
pub struct PerfLibrary {
    module: NativeModule,
    initialize: PerfInitializeFn,
    entries: Vec<EntryPair>,
}

impl PerfLibrary {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let module = NativeModule::load(path)?;
        // SAFETY: the export types match the benchmark library's C ABI.
        let initialize = unsafe { module.function::<PerfInitializeFn>(PERF_INITIALIZE)? };
        let entries = PerfScenarioKind::ALL
            .into_iter()
            .map(|kind| {
                // SAFETY: as above.
                unsafe {
                    Ok(EntryPair {
                        kind,
                        baseline: module.function(&kind.export_name(Flavor::Baseline))?,
                        current: module.function(&kind.export_name(Flavor::Current))?,
                    })
                }
            })
            .collect::<Result<Vec<_>>>()?;
        debug!(path = %module.path().display(), scenarios = entries.len(), "benchmark exports resolved");
        Ok(Self {
            module,
            initialize,
            entries,
        })
    }

    pub fn path(&self) -> &Path {
        self.module.path()
    }

    /// Hand the image and a dispenser to the library.
    ///
    /// The library keeps pointers to both, so the returned handle borrows
    /// them for as long as benchmarks may run.
    pub fn initialize<'a>(
        &'a self,
        image: &'a [u8],
        dispenser: Option<&'a NativeDispenser>,
    ) -> std::result::Result<InitializedPerf<'a>, HarnessError> {
        let len = i32::try_from(image.len()).map_err(|_| HarnessError::InitializationFailure {
            status: Status::E_INVALIDARG,
        })?;
        #[allow(clippy::cast_possible_wrap)]
        let selector = dispenser.map_or(0, |d| d.as_raw().expose_provenance() as isize);
        // SAFETY: `image` is valid for `len` bytes and outlives every
        // benchmark call made through the returned handle.
        let hr = unsafe { (self.initialize)(image.as_ptr().cast(), len, selector) };
        Status(hr)
            .into_result()
            .map_err(|status| HarnessError::InitializationFailure { status })?;
        info!(bytes = image.len(), "benchmark library initialized");
        Ok(InitializedPerf {
            library: self,
            _image: image,
        })
    }
}

/// A benchmark library after a successful `PerfInitialize`.
pub struct InitializedPerf<'a> {
    library: &'a PerfLibrary,
    _image: &'a [u8],
}

impl InitializedPerf<'_> {
    /// The scenario table, baseline and current entry per scenario.
    pub fn comparator(&self) -> PerfComparator<'_> {
        let scenarios = self
            .library
            .entries
            .iter()
            .map(|pair| {
                let (baseline, current) = (pair.baseline, pair.current);
                PerfScenario::new(
                    pair.kind,
                    // SAFETY: resolved from the initialized library, which
                    // stays loaded while `self` is borrowed.
                    move |iterations: i32| Status(unsafe { baseline(iterations) }),
                    // SAFETY: as above.
                    move |iterations: i32| Status(unsafe { current(iterations) }),
                )
            })
            .collect();
        PerfComparator::new(scenarios)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NativeError;

    #[test]
    fn missing_library_fails_before_timing() {
        let err = PerfLibrary::load("/nonexistent/libregnative.so").err().unwrap();
        assert!(matches!(err, NativeError::Load { .. }));
    }

    #[test]
    fn entry_points_are_named_per_side() {
        let names: Vec<String> = PerfScenarioKind::ALL
            .into_iter()
            .flat_map(|kind| Flavor::ALL.map(|side| kind.export_name(side)))
            .collect();
        assert_eq!(names.len(), 10);
        assert_eq!(names[0], "PerfBaselineCreateImport");
        assert_eq!(names[1], "PerfCurrentCreateImport");
        assert_eq!(names[9], "PerfCurrentGetCustomAttributeByName");
    }
}
