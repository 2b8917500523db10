//! Command-line interface for `mdregress`.
//!
//! Defines the CLI contract using clap derive macros. Every option that can
//! also come from the config file is an `Option` here so that
//! [`Config::from_cli`](crate::config::Config::from_cli) can tell "not given"
//! apart from a default.
//!
//! # Examples
//!
//! ```bash
//! # Verify every image in a directory
//! mdregress verify --images-dir /usr/share/dotnet/shared/Microsoft.NETCore.App/9.0.0 \
//!     --baseline-lib libclrjit.so --current-lib libdnmd_interfaces.so
//!
//! # Only the member walk, machine-readable
//! mdregress verify image.dll --scenario members --format json
//!
//! # Time the benchmark library
//! mdregress perf ./libregnative.so --image System.Private.CoreLib.dll
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use mdimport::{PerfScenarioKind, Scenario};
use mdimport_native::FactoryAbi;
use serde::{Deserialize, Serialize};

/// mdregress - differential regression runner for metadata import libraries.
///
/// Loads a baseline and a current implementation of the metadata import
/// interface, drives both through identical enumerations over real metadata
/// images and reports the first difference.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "mdregress",
    author,
    version,
    about = "Differential regression runner for metadata import libraries",
    long_about = "Drives a baseline and a current metadata import implementation through \
                  identical enumeration, reset and signature scenarios and reports the first \
                  divergence. The perf subcommand times the native benchmark library."
)]
pub struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    ///
    /// `RUST_LOG` overrides this when set
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Log output format
    #[arg(long, value_enum, global = true, env = "MDREGRESS_LOG_FORMAT")]
    pub log_format: Option<LogFormat>,

    /// When to color the report
    #[arg(long, value_enum, global = true, env = "MDREGRESS_COLOR")]
    pub color: Option<ColorMode>,

    /// Path to a TOML config file
    ///
    /// Values given on the command line or through the environment win
    #[arg(long, global = true, env = "MDREGRESS_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Compare baseline and current over metadata images
    Verify(VerifyArgs),

    /// Time the native benchmark library's baseline and current entry points
    Perf(PerfArgs),
}

/// Factory options for one implementation, gathered from its `--<side>-*`
/// flags or from a `[baseline]` / `[current]` config table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FactoryArgs {
    pub library: Option<PathBuf>,
    pub symbol: Option<String>,
    pub abi: Option<FactoryAbi>,
}

/// Arguments for the verify subcommand.
#[derive(Parser, Debug, Clone)]
pub struct VerifyArgs {
    /// Metadata images to verify (PE files or raw metadata blobs)
    pub images: Vec<PathBuf>,

    /// Directory to scan for images; files without metadata are skipped
    /// [default: the baseline library's directory]
    #[arg(long, env = "MDREGRESS_IMAGES_DIR")]
    pub images_dir: Option<PathBuf>,

    /// Library exporting the baseline dispenser factory
    #[arg(long, env = "MDREGRESS_BASELINE_LIB")]
    pub baseline_lib: Option<PathBuf>,

    /// Baseline factory export
    #[arg(long, env = "MDREGRESS_BASELINE_SYMBOL")]
    pub baseline_symbol: Option<String>,

    /// Baseline factory calling convention (class-factory or interface)
    #[arg(long, env = "MDREGRESS_BASELINE_ABI")]
    pub baseline_abi: Option<FactoryAbi>,

    /// Library exporting the current dispenser factory
    #[arg(long, env = "MDREGRESS_CURRENT_LIB")]
    pub current_lib: Option<PathBuf>,

    /// Current factory export
    #[arg(long, env = "MDREGRESS_CURRENT_SYMBOL")]
    pub current_symbol: Option<String>,

    /// Current factory calling convention (class-factory or interface)
    #[arg(long, env = "MDREGRESS_CURRENT_ABI")]
    pub current_abi: Option<FactoryAbi>,

    /// Tokens requested per enumeration page
    #[arg(long, env = "MDREGRESS_BUFFER_CAPACITY")]
    pub buffer_capacity: Option<usize>,

    /// Run only this scenario (repeatable)
    #[arg(long = "scenario", short = 's')]
    pub scenarios: Vec<Scenario>,

    /// Also check each side's reset replay on its own
    #[arg(long, env = "MDREGRESS_STRICT_RESET")]
    pub strict_reset: bool,

    /// Stop after the first image that fails
    #[arg(long)]
    pub fail_fast: bool,

    /// Report format
    #[arg(long, short = 'f', value_enum)]
    pub format: Option<ReportFormat>,

    /// Write the report to a file instead of stdout
    #[arg(long, short = 'o')]
    pub output: Option<PathBuf>,

    /// Print every scenario, not just failures
    #[arg(long)]
    pub show_passed: bool,
}

impl VerifyArgs {
    pub fn baseline(&self) -> FactoryArgs {
        FactoryArgs {
            library: self.baseline_lib.clone(),
            symbol: self.baseline_symbol.clone(),
            abi: self.baseline_abi,
        }
    }

    pub fn current(&self) -> FactoryArgs {
        FactoryArgs {
            library: self.current_lib.clone(),
            symbol: self.current_symbol.clone(),
            abi: self.current_abi,
        }
    }
}

/// Arguments for the perf subcommand.
#[derive(Parser, Debug, Clone)]
pub struct PerfArgs {
    /// Benchmark library (defaults to the platform name of `regnative`)
    #[arg(env = "MDREGRESS_PERF_LIB")]
    pub library: Option<PathBuf>,

    /// Image whose metadata is handed to `PerfInitialize`
    /// [default: System.Private.CoreLib.dll beside the baseline library]
    #[arg(long, short = 'i', env = "MDREGRESS_PERF_IMAGE")]
    pub image: Option<PathBuf>,

    /// Iterations for the warm-up pass
    #[arg(long)]
    pub warmup: Option<i32>,

    /// Iterations for the measured pass
    #[arg(long, short = 'n')]
    pub iterations: Option<i32>,

    /// Run only this scenario (repeatable)
    #[arg(long = "scenario", short = 's')]
    pub scenarios: Vec<PerfScenarioKind>,

    /// Library exporting the baseline dispenser handed to the benchmarks
    #[arg(long, env = "MDREGRESS_BASELINE_LIB")]
    pub baseline_lib: Option<PathBuf>,

    /// Baseline factory export
    #[arg(long, env = "MDREGRESS_BASELINE_SYMBOL")]
    pub baseline_symbol: Option<String>,

    /// Baseline factory calling convention
    #[arg(long, env = "MDREGRESS_BASELINE_ABI")]
    pub baseline_abi: Option<FactoryAbi>,

    /// Also write the measurements as JSON to this file
    #[arg(long)]
    pub json: Option<PathBuf>,
}

impl PerfArgs {
    pub fn baseline(&self) -> FactoryArgs {
        FactoryArgs {
            library: self.baseline_lib.clone(),
            symbol: self.baseline_symbol.clone(),
            abi: self.baseline_abi,
        }
    }
}

/// Log output formats.
#[derive(ValueEnum, Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Text,
    /// One JSON object per event
    Json,
}

/// Report color modes.
#[derive(ValueEnum, Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorMode {
    /// Color when stdout is a terminal and `NO_COLOR` is unset
    #[default]
    Auto,
    Always,
    Never,
}

/// Verify report formats.
#[derive(ValueEnum, Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    /// Colored PASS/FAIL lines with diffs
    #[default]
    Human,
    /// A single JSON document
    Json,
}

impl Cli {
    /// Parse command line arguments.
    #[must_use]
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Create CLI from iterator (useful for testing).
    ///
    /// # Errors
    ///
    /// Returns an error if argument parsing fails.
    pub fn try_parse_from<I, T>(iter: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        <Self as Parser>::try_parse_from(iter)
    }
}
