//! DifferentialRunner - Executing every scenario against both sessions
//!
//! For each image the runner:
//! - drives each selected scenario on the baseline session, then the current
//! - compares the two outputs with [`SequenceComparator`]
//! - stops at the first failure and marks the remaining scenarios skipped
//!
//! A native failure status and a divergence both fail the image; no partial
//! comparison is attempted for the scenario that failed.

use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{error, info};

use crate::compare::{CompareResult, Divergence, SequenceComparator};
use crate::driver::{DEFAULT_BUFFER_CAPACITY, Enumerator};
use crate::error::{HarnessError, Result};
use crate::import::Flavor;
use crate::scenario::{Scenario, ScenarioOutput};
use crate::session::{DualLoader, SessionPair};

/// Settings for a differential run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    /// Page size for every enumeration.
    pub buffer_capacity: usize,
    /// Check reset replay properties on each side, not just equality.
    pub strict_reset: bool,
    /// Scenarios to run, in order.
    pub scenarios: Vec<Scenario>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            strict_reset: false,
            scenarios: Scenario::ALL.to_vec(),
        }
    }
}

/// Outcome of one scenario on one image
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ScenarioOutcome {
    /// Both sides produced identical output
    Passed,
    /// A native failure on one side, or a divergence
    Failed {
        /// Side whose call failed; `None` for a divergence.
        side: Option<Flavor>,
        reason: String,
        divergence: Option<Box<Divergence>>,
    },
    /// Not run because an earlier scenario failed
    Skipped { reason: String },
}

impl ScenarioOutcome {
    pub const fn is_pass(&self) -> bool {
        matches!(self, Self::Passed)
    }

    pub const fn is_fail(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    pub const fn is_skipped(&self) -> bool {
        matches!(self, Self::Skipped { .. })
    }
}

/// Result of a single scenario
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioRecord {
    pub scenario: Scenario,
    pub outcome: ScenarioOutcome,
    /// Items produced by the baseline session
    pub baseline_items: Option<usize>,
    /// Items produced by the current session
    pub current_items: Option<usize>,
    /// Wall time for both sides and the comparison
    #[serde(rename = "duration_ms", serialize_with = "serialize_millis")]
    pub duration: Duration,
}

/// Summary of all scenarios for one image
#[derive(Debug, Clone, Default, Serialize)]
pub struct ImageSummary {
    /// Image name (usually its path)
    pub image: String,
    /// Why the sessions could not be opened, if they could not
    pub open_error: Option<String>,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    #[serde(rename = "duration_ms", serialize_with = "serialize_millis")]
    pub duration: Duration,
    /// Per-scenario results
    pub records: Vec<ScenarioRecord>,
}

impl ImageSummary {
    /// Summary for an image whose sessions failed to open.
    pub fn open_failed(image: &str, err: &HarnessError) -> Self {
        Self {
            image: image.to_string(),
            open_error: Some(err.to_string()),
            ..Self::default()
        }
    }

    pub fn is_pass(&self) -> bool {
        self.open_error.is_none() && self.failed == 0
    }

    /// The scenario that ended the run, if any.
    pub fn first_failure(&self) -> Option<&ScenarioRecord> {
        self.records.iter().find(|r| r.outcome.is_fail())
    }

    fn push(&mut self, record: ScenarioRecord) {
        match record.outcome {
            ScenarioOutcome::Passed => self.passed += 1,
            ScenarioOutcome::Failed { .. } => self.failed += 1,
            ScenarioOutcome::Skipped { .. } => self.skipped += 1,
        }
        self.records.push(record);
    }
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn serialize_millis<S: serde::Serializer>(
    duration: &Duration,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_f64(duration.as_secs_f64() * 1000.0)
}

/// A scenario failure attributed to one side (or to the comparison).
struct Failure {
    side: Option<Flavor>,
    error: HarnessError,
}

/// Runner for differential scenarios
#[derive(Debug, Clone, Default)]
pub struct DifferentialRunner {
    config: RunConfig,
    comparator: SequenceComparator,
}

impl DifferentialRunner {
    pub fn new(config: RunConfig) -> Self {
        Self {
            config,
            comparator: SequenceComparator::new(),
        }
    }

    /// Use a custom comparator (e.g. a wider diff context)
    #[must_use]
    pub const fn with_comparator(mut self, comparator: SequenceComparator) -> Self {
        self.comparator = comparator;
        self
    }

    pub const fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Open both sessions over `bytes` and run every scenario.
    pub fn run_image(&self, image: &str, loader: &DualLoader<'_>, bytes: &[u8]) -> ImageSummary {
        match loader.open(bytes) {
            Ok(sessions) => self.run(image, &sessions),
            Err(err) => {
                error!(image, error = %err, "failed to open sessions");
                ImageSummary::open_failed(image, &err)
            }
        }
    }

    /// Run every configured scenario against an open session pair.
    pub fn run(&self, image: &str, sessions: &SessionPair<'_>) -> ImageSummary {
        let start = Instant::now();
        let mut summary = ImageSummary {
            image: image.to_string(),
            ..ImageSummary::default()
        };
        let mut halted: Option<Scenario> = None;

        for &scenario in &self.config.scenarios {
            if let Some(failed) = halted {
                summary.push(ScenarioRecord {
                    scenario,
                    outcome: ScenarioOutcome::Skipped {
                        reason: format!("{failed} failed"),
                    },
                    baseline_items: None,
                    current_items: None,
                    duration: Duration::ZERO,
                });
                continue;
            }

            let scenario_start = Instant::now();
            let (outcome, baseline_items, current_items) = match self.execute(scenario, sessions) {
                Ok((b, c)) => {
                    info!(image, %scenario, items = b, "scenario passed");
                    (ScenarioOutcome::Passed, Some(b), Some(c))
                }
                Err(Failure { side, error: err }) => {
                    error!(image, %scenario, side = ?side, error = %err, "scenario failed");
                    halted = Some(scenario);
                    let divergence = match err {
                        HarnessError::DifferentialMismatch(ref divergence) => Some(divergence.clone()),
                        _ => None,
                    };
                    let counts = divergence
                        .as_ref()
                        .map(|d| (Some(d.baseline_len), Some(d.current_len)))
                        .unwrap_or_default();
                    let outcome = ScenarioOutcome::Failed {
                        side,
                        reason: err.to_string(),
                        divergence,
                    };
                    (outcome, counts.0, counts.1)
                }
            };
            summary.push(ScenarioRecord {
                scenario,
                outcome,
                baseline_items,
                current_items,
                duration: scenario_start.elapsed(),
            });
        }

        summary.duration = start.elapsed();
        summary
    }

    /// Drive one scenario on both sides and compare.
    pub fn run_scenario(&self, scenario: Scenario, sessions: &SessionPair<'_>) -> Result<(usize, usize)> {
        self.execute(scenario, sessions).map_err(|failure| failure.error)
    }

    fn execute(
        &self,
        scenario: Scenario,
        sessions: &SessionPair<'_>,
    ) -> std::result::Result<(usize, usize), Failure> {
        let drive = |flavor: Flavor| {
            let driver = Enumerator::with_capacity(sessions.session(flavor), self.config.buffer_capacity);
            scenario
                .run(&driver, flavor, self.config.strict_reset)
                .map_err(|error| Failure {
                    side: Some(flavor),
                    error,
                })
        };

        // Baseline is driven to completion before current is touched.
        let baseline = drive(Flavor::Baseline)?;
        let current = drive(Flavor::Current)?;

        match ScenarioOutput::compare(&self.comparator, scenario, &baseline, &current) {
            CompareResult::Equal => Ok((baseline.len(), current.len())),
            CompareResult::Different(divergence) => Err(Failure {
                side: None,
                error: HarnessError::DifferentialMismatch(divergence),
            }),
        }
    }
}
