//! PerfComparator - timing baseline and current benchmark entry points
//!
//! The native benchmark library exports one entry point per scenario and
//! side, each taking an iteration count and returning a status. The table of
//! entry points is built once when the library is loaded; a run times every
//! call, reports it, and aborts on the first failure status.

use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{HarnessError, Result};
use crate::import::Flavor;
use crate::scenario::ParseScenarioError;
use crate::token::Status;

/// Iterations of the warm-up pass.
pub const DEFAULT_WARMUP_ITERATIONS: i32 = 100;

/// Iterations of the measured pass.
pub const DEFAULT_MEASURE_ITERATIONS: i32 = 100_000;

/// A timed benchmark entry point.
pub trait BenchEntry {
    /// Run the scenario `iterations` times.
    fn invoke(&self, iterations: i32) -> Status;
}

impl<F: Fn(i32) -> Status> BenchEntry for F {
    fn invoke(&self, iterations: i32) -> Status {
        self(iterations)
    }
}

/// Benchmark scenarios exported by the native library.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PerfScenarioKind {
    CreateImport,
    EnumTypeDefs,
    GetScopeProps,
    EnumUserStrings,
    GetCustomAttributeByName,
}

impl PerfScenarioKind {
    pub const ALL: [Self; 5] = [
        Self::CreateImport,
        Self::EnumTypeDefs,
        Self::GetScopeProps,
        Self::EnumUserStrings,
        Self::GetCustomAttributeByName,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            Self::CreateImport => "CreateImport",
            Self::EnumTypeDefs => "EnumTypeDefs",
            Self::GetScopeProps => "GetScopeProps",
            Self::EnumUserStrings => "EnumUserStrings",
            Self::GetCustomAttributeByName => "GetCustomAttributeByName",
        }
    }

    /// Exported symbol for one side, e.g. `PerfBaselineEnumTypeDefs`.
    pub fn export_name(self, side: Flavor) -> String {
        match side {
            Flavor::Baseline => format!("PerfBaseline{}", self.name()),
            Flavor::Current => format!("PerfCurrent{}", self.name()),
        }
    }
}

impl fmt::Display for PerfScenarioKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PerfScenarioKind {
    type Err = ParseScenarioError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ParseScenarioError(s.to_string()))
    }
}

/// One scenario's pair of entry points.
pub struct PerfScenario<'a> {
    kind: PerfScenarioKind,
    baseline: Box<dyn BenchEntry + 'a>,
    current: Box<dyn BenchEntry + 'a>,
}

impl<'a> PerfScenario<'a> {
    pub fn new(
        kind: PerfScenarioKind,
        baseline: impl BenchEntry + 'a,
        current: impl BenchEntry + 'a,
    ) -> Self {
        Self {
            kind,
            baseline: Box::new(baseline),
            current: Box::new(current),
        }
    }

    pub const fn kind(&self) -> PerfScenarioKind {
        self.kind
    }

    fn entry(&self, side: Flavor) -> &(dyn BenchEntry + 'a) {
        match side {
            Flavor::Baseline => self.baseline.as_ref(),
            Flavor::Current => self.current.as_ref(),
        }
    }
}

/// Progress reported while a pass runs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PerfEvent {
    /// A scenario is about to be timed.
    Started(PerfScenarioKind),
    /// One side finished; reported before its status is checked.
    Timed {
        scenario: PerfScenarioKind,
        side: Flavor,
        elapsed: Duration,
        status: Status,
    },
}

/// Timings of one scenario for one pass.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PerfMeasurement {
    pub scenario: PerfScenarioKind,
    pub iterations: i32,
    pub baseline_ms: f64,
    pub current_ms: f64,
}

impl PerfMeasurement {
    /// `current / baseline`; `None` when the baseline took no measurable time.
    pub fn ratio(&self) -> Option<f64> {
        (self.baseline_ms > 0.0).then(|| self.current_ms / self.baseline_ms)
    }
}

/// Runs a table of benchmark scenarios.
pub struct PerfComparator<'a> {
    scenarios: Vec<PerfScenario<'a>>,
}

impl<'a> PerfComparator<'a> {
    pub fn new(scenarios: Vec<PerfScenario<'a>>) -> Self {
        Self { scenarios }
    }

    pub fn scenarios(&self) -> impl Iterator<Item = PerfScenarioKind> + '_ {
        self.scenarios.iter().map(PerfScenario::kind)
    }

    /// Keep only the listed scenarios (all of them when `only` is empty).
    #[must_use]
    pub fn retain(mut self, only: &[PerfScenarioKind]) -> Self {
        if !only.is_empty() {
            self.scenarios.retain(|s| only.contains(&s.kind));
        }
        self
    }

    /// Time every scenario once at `iterations`, baseline then current.
    pub fn run(
        &self,
        iterations: i32,
        mut observe: impl FnMut(&PerfEvent),
    ) -> Result<Vec<PerfMeasurement>> {
        let mut measurements = Vec::with_capacity(self.scenarios.len());
        for scenario in &self.scenarios {
            observe(&PerfEvent::Started(scenario.kind));
            let mut elapsed = [Duration::ZERO; 2];
            for (slot, side) in Flavor::ALL.into_iter().enumerate() {
                let start = Instant::now();
                let status = scenario.entry(side).invoke(iterations);
                elapsed[slot] = start.elapsed();

                observe(&PerfEvent::Timed {
                    scenario: scenario.kind,
                    side,
                    elapsed: elapsed[slot],
                    status,
                });
                if status.is_failure() {
                    return Err(HarnessError::BenchmarkFailure {
                        scenario: scenario.kind,
                        side,
                        status,
                    });
                }
            }

            let measurement = PerfMeasurement {
                scenario: scenario.kind,
                iterations,
                baseline_ms: millis(elapsed[0]),
                current_ms: millis(elapsed[1]),
            };
            debug!(
                scenario = %scenario.kind,
                iterations,
                baseline_ms = measurement.baseline_ms,
                current_ms = measurement.current_ms,
                "perf scenario timed"
            );
            measurements.push(measurement);
        }
        Ok(measurements)
    }
}

fn millis(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}
