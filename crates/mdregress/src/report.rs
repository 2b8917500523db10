//! Reporter - Human and JSON output for verify and perf runs
//!
//! Human output goes through `termcolor`:
//! - `PASS` in green, `FAIL` in red, one line per image
//! - the failing scenario's reason and unified diff under a failed image
//! - perf timings in the `Baseline:` / `Current:` layout, then a ratio table
//!
//! JSON output is a single document per run, timestamped with `chrono`.

use std::io::{self, IsTerminal, Write};
use std::path::PathBuf;

use chrono::Utc;
use mdimport::{Flavor, ImageSummary, PerfEvent, PerfMeasurement, ScenarioOutcome};
use mdimport_native::FactorySpec;
use serde::Serialize;
use termcolor::{Color, ColorChoice, ColorSpec, WriteColor};

use crate::cli::ColorMode;
use crate::config::{PerfConfig, VerifyConfig};

/// Width of the millisecond column in perf timings.
const TIMING_WIDTH: usize = 12;

/// Map the configured mode to a stream choice for stdout.
pub fn color_choice(mode: ColorMode) -> ColorChoice {
    match mode {
        ColorMode::Always => ColorChoice::Always,
        ColorMode::Never => ColorChoice::Never,
        ColorMode::Auto => {
            if std::env::var_os("NO_COLOR").is_some() || !io::stdout().is_terminal() {
                ColorChoice::Never
            } else {
                ColorChoice::Auto
            }
        }
    }
}

/// Everything a verify run produced.
#[derive(Debug, Clone, Serialize)]
pub struct VerifyReport {
    /// RFC 3339 time the run started.
    pub generated_at: String,
    pub baseline: FactorySpec,
    pub current: FactorySpec,
    pub buffer_capacity: usize,
    pub strict_reset: bool,
    pub passed: usize,
    pub failed: usize,
    pub images: Vec<ImageSummary>,
}

impl VerifyReport {
    pub fn new(config: &VerifyConfig) -> Self {
        Self {
            generated_at: Utc::now().to_rfc3339(),
            baseline: config.baseline.clone(),
            current: config.current.clone(),
            buffer_capacity: config.run.buffer_capacity,
            strict_reset: config.run.strict_reset,
            passed: 0,
            failed: 0,
            images: Vec::new(),
        }
    }

    pub fn push(&mut self, summary: ImageSummary) {
        if summary.is_pass() {
            self.passed += 1;
        } else {
            self.failed += 1;
        }
        self.images.push(summary);
    }

    /// True when every image passed (and there was at least one).
    pub fn is_pass(&self) -> bool {
        self.failed == 0 && !self.images.is_empty()
    }

    pub fn write_json(&self, writer: impl Write) -> serde_json::Result<()> {
        serde_json::to_writer_pretty(writer, self)
    }
}

/// Measurements of a perf run.
#[derive(Debug, Clone, Serialize)]
pub struct PerfReport {
    pub generated_at: String,
    pub library: PathBuf,
    pub image: PathBuf,
    pub warmup: Vec<PerfMeasurement>,
    pub measured: Vec<PerfMeasurement>,
}

impl PerfReport {
    pub fn new(config: &PerfConfig) -> Self {
        Self {
            generated_at: Utc::now().to_rfc3339(),
            library: config.library.clone(),
            image: config.image.clone(),
            warmup: Vec::new(),
            measured: Vec::new(),
        }
    }

    pub fn write_json(&self, writer: impl Write) -> serde_json::Result<()> {
        serde_json::to_writer_pretty(writer, self)
    }
}

/// Writes human-readable reports
pub struct Reporter<W> {
    out: W,
    show_passed: bool,
}

impl<W: WriteColor> Reporter<W> {
    pub const fn new(out: W) -> Self {
        Self {
            out,
            show_passed: false,
        }
    }

    /// List every scenario of passing images too
    #[must_use]
    pub const fn with_show_passed(mut self, show: bool) -> Self {
        self.show_passed = show;
        self
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn colored(&mut self, color: Color, bold: bool, text: &str) -> io::Result<()> {
        self.out
            .set_color(ColorSpec::new().set_fg(Some(color)).set_bold(bold))?;
        write!(self.out, "{text}")?;
        self.out.reset()
    }

    /// Write a plain line.
    pub fn line(&mut self, text: &str) -> io::Result<()> {
        writeln!(self.out, "{text}")
    }

    /// One image: status line, then failure details.
    pub fn image(&mut self, summary: &ImageSummary) -> io::Result<()> {
        let ms = summary.duration.as_secs_f64() * 1000.0;
        if summary.is_pass() {
            self.colored(Color::Green, true, "PASS")?;
            writeln!(
                self.out,
                "  {}  ({} scenarios, {ms:.1} ms)",
                summary.image, summary.passed
            )?;
            if self.show_passed {
                self.records(summary)?;
            }
            return Ok(());
        }

        self.colored(Color::Red, true, "FAIL")?;
        writeln!(self.out, "  {}", summary.image)?;
        if let Some(ref reason) = summary.open_error {
            writeln!(self.out, "      open failed: {reason}")?;
            return Ok(());
        }
        self.records(summary)
    }

    fn records(&mut self, summary: &ImageSummary) -> io::Result<()> {
        for record in &summary.records {
            match &record.outcome {
                ScenarioOutcome::Passed => {
                    if self.show_passed {
                        write!(self.out, "      ")?;
                        self.colored(Color::Green, false, "ok")?;
                        writeln!(
                            self.out,
                            "    {} ({} items)",
                            record.scenario,
                            record.baseline_items.unwrap_or(0)
                        )?;
                    }
                }
                ScenarioOutcome::Failed {
                    side,
                    reason,
                    divergence,
                } => {
                    write!(self.out, "      ")?;
                    self.colored(Color::Red, false, "failed")?;
                    match side {
                        Some(side) => writeln!(self.out, "  {} on {side}: {reason}", record.scenario)?,
                        None => writeln!(self.out, "  {reason}")?,
                    }
                    if let Some(divergence) = divergence {
                        self.diff(&divergence.unified_diff)?;
                    }
                }
                ScenarioOutcome::Skipped { .. } => {}
            }
        }
        if summary.skipped > 0 {
            writeln!(self.out, "      {} scenarios skipped", summary.skipped)?;
        }
        Ok(())
    }

    fn diff(&mut self, unified: &str) -> io::Result<()> {
        for line in unified.lines() {
            write!(self.out, "        ")?;
            let color = if line.starts_with("+++") || line.starts_with("---") {
                Some(Color::White)
            } else if line.starts_with('+') {
                Some(Color::Green)
            } else if line.starts_with('-') {
                Some(Color::Red)
            } else if line.starts_with("@@") {
                Some(Color::Cyan)
            } else {
                None
            };
            match color {
                Some(color) => self.colored(color, false, line)?,
                None => write!(self.out, "{line}")?,
            }
            writeln!(self.out)?;
        }
        Ok(())
    }

    /// Closing line of a verify run.
    pub fn totals(&mut self, report: &VerifyReport) -> io::Result<()> {
        writeln!(self.out)?;
        write!(self.out, "{} images: ", report.images.len())?;
        self.colored(Color::Green, false, &format!("{} passed", report.passed))?;
        write!(self.out, ", ")?;
        let failed = format!("{} failed", report.failed);
        if report.failed > 0 {
            self.colored(Color::Red, true, &failed)?;
        } else {
            write!(self.out, "{failed}")?;
        }
        writeln!(self.out)
    }

    /// Progress of a perf pass, as it happens.
    pub fn perf_event(&mut self, event: &PerfEvent) -> io::Result<()> {
        match *event {
            PerfEvent::Started(kind) => writeln!(self.out, "{kind}"),
            PerfEvent::Timed {
                side,
                elapsed,
                status,
                ..
            } => {
                let label = match side {
                    Flavor::Baseline => "Baseline:",
                    Flavor::Current => "Current: ",
                };
                writeln!(
                    self.out,
                    "  {label} {:>TIMING_WIDTH$}",
                    elapsed.as_millis()
                )?;
                if status.is_failure() {
                    self.colored(Color::Red, true, &format!("Failure {status}"))?;
                    writeln!(self.out)?;
                }
                Ok(())
            }
        }
    }

    /// Ratio table for a measured pass.
    pub fn perf_summary(&mut self, measurements: &[PerfMeasurement]) -> io::Result<()> {
        writeln!(self.out)?;
        writeln!(
            self.out,
            "{:<26} {:>12} {:>12} {:>8}",
            "Scenario", "Baseline ms", "Current ms", "Ratio"
        )?;
        for m in measurements {
            write!(
                self.out,
                "{:<26} {:>12.1} {:>12.1} ",
                m.scenario.name(),
                m.baseline_ms,
                m.current_ms
            )?;
            match m.ratio() {
                Some(ratio) => {
                    let color = if ratio <= 1.0 { Color::Green } else { Color::Yellow };
                    self.colored(color, false, &format!("{ratio:>7.2}x"))?;
                }
                None => write!(self.out, "{:>8}", "n/a")?,
            }
            writeln!(self.out)?;
        }
        Ok(())
    }
}
