//! Runtime configuration for `mdregress`.
//!
//! [`Config`] is the single resolved view of every option, independent of
//! where it came from. Precedence, highest first:
//!
//! 1. command-line flag
//! 2. `MDREGRESS_*` environment variable (handled by clap)
//! 3. the TOML file named by `--config`
//! 4. built-in default
//!
//! # Config file
//!
//! ```toml
//! color = "always"
//!
//! [baseline]
//! library = "/usr/share/dotnet/shared/Microsoft.NETCore.App/9.0.0/libcoreclr.so"
//!
//! [current]
//! library = "artifacts/libdnmd_interfaces.so"
//! symbol = "GetDispenser"
//! abi = "interface"
//!
//! [verify]
//! images_dir = "/usr/share/dotnet/shared/Microsoft.NETCore.App/9.0.0"
//! buffer_capacity = 32
//! scenarios = ["type_defs", "members"]
//!
//! [perf]
//! image = "System.Private.CoreLib.dll"
//! iterations = 10000
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use mdimport::{
    DEFAULT_BUFFER_CAPACITY, DEFAULT_MEASURE_ITERATIONS, DEFAULT_WARMUP_ITERATIONS, Flavor,
    PerfScenarioKind, RunConfig, Scenario,
};
use mdimport_native::{FactorySpec, default_library_name};
use serde::Deserialize;

use crate::cli::{Cli, ColorMode, Command, FactoryArgs, LogFormat, PerfArgs, ReportFormat, VerifyArgs};

/// Corelib image `perf` measures when no image is named.
pub const CORELIB_FILE_NAME: &str = "System.Private.CoreLib.dll";

/// Resolved configuration for one invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Log verbosity (0=warn, 1=info, 2=debug, 3+=trace).
    pub verbosity: u8,
    pub log_format: LogFormat,
    pub color: ColorMode,
    /// The selected subcommand with its settings.
    pub mode: Mode,
}

/// What to run.
#[derive(Debug, Clone, PartialEq)]
pub enum Mode {
    Verify(VerifyConfig),
    Perf(PerfConfig),
}

/// Settings for `mdregress verify`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyConfig {
    /// Images named explicitly; loading any of them must succeed.
    pub images: Vec<PathBuf>,
    /// Directory scanned for further images.
    pub images_dir: Option<PathBuf>,
    pub baseline: FactorySpec,
    pub current: FactorySpec,
    pub run: RunConfig,
    pub fail_fast: bool,
    pub format: ReportFormat,
    pub output: Option<PathBuf>,
    pub show_passed: bool,
}

/// Settings for `mdregress perf`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PerfConfig {
    pub library: PathBuf,
    pub image: PathBuf,
    /// Dispenser handed to `PerfInitialize`; none passes a null selector.
    pub baseline: Option<FactorySpec>,
    pub warmup: i32,
    pub iterations: i32,
    /// Empty runs every scenario.
    pub scenarios: Vec<PerfScenarioKind>,
    pub json: Option<PathBuf>,
}

/// Contents of a config file. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub verbose: Option<u8>,
    pub log_format: Option<LogFormat>,
    pub color: Option<ColorMode>,
    pub baseline: FactoryArgs,
    pub current: FactoryArgs,
    pub verify: FileVerify,
    pub perf: FilePerf,
}

/// `[verify]` table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileVerify {
    pub images: Vec<PathBuf>,
    pub images_dir: Option<PathBuf>,
    pub buffer_capacity: Option<usize>,
    pub scenarios: Vec<Scenario>,
    pub strict_reset: Option<bool>,
    pub fail_fast: Option<bool>,
    pub format: Option<ReportFormat>,
    pub output: Option<PathBuf>,
    pub show_passed: Option<bool>,
}

/// `[perf]` table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FilePerf {
    pub library: Option<PathBuf>,
    pub image: Option<PathBuf>,
    pub warmup: Option<i32>,
    pub iterations: Option<i32>,
    pub scenarios: Vec<PerfScenarioKind>,
    pub json: Option<PathBuf>,
}

impl FileConfig {
    /// Read and parse a TOML config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(path, &text)
    }

    fn parse(path: &Path, text: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source: Box::new(source),
        })
    }
}

impl Config {
    /// Read the config file (if any), resolve it against `cli` and validate.
    pub fn load(cli: &Cli) -> Result<Self, ConfigError> {
        let file = match &cli.config {
            Some(path) => FileConfig::load(path)?,
            None => FileConfig::default(),
        };
        let config = Self::from_cli(cli, &file)?;
        config.validate()?;
        Ok(config)
    }

    /// Resolve CLI arguments over file values and defaults.
    ///
    /// Fails only when a required value is given nowhere; range and
    /// existence checks belong to [`Config::validate`].
    pub fn from_cli(cli: &Cli, file: &FileConfig) -> Result<Self, ConfigError> {
        let mode = match &cli.command {
            Command::Verify(args) => Mode::Verify(VerifyConfig::resolve(args, file)?),
            Command::Perf(args) => Mode::Perf(PerfConfig::resolve(args, file)?),
        };
        Ok(Self {
            verbosity: if cli.verbose > 0 {
                cli.verbose
            } else {
                file.verbose.unwrap_or(0)
            },
            log_format: cli.log_format.or(file.log_format).unwrap_or_default(),
            color: cli.color.or(file.color).unwrap_or_default(),
            mode,
        })
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if a value is out of range or a named input is missing.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match &self.mode {
            Mode::Verify(verify) => {
                if verify.run.buffer_capacity == 0 {
                    return Err(ConfigError::InvalidBufferCapacity(verify.run.buffer_capacity));
                }
                if let Some(ref dir) = verify.images_dir {
                    if !dir.exists() {
                        return Err(ConfigError::NotFound {
                            what: "images directory",
                            path: dir.clone(),
                        });
                    }
                    if !dir.is_dir() {
                        return Err(ConfigError::NotADirectory(dir.clone()));
                    }
                }
                if let Some(missing) = verify.images.iter().find(|path| !path.exists()) {
                    return Err(ConfigError::NotFound {
                        what: "image",
                        path: missing.clone(),
                    });
                }
            }
            Mode::Perf(perf) => {
                if perf.warmup < 0 {
                    return Err(ConfigError::InvalidIterations {
                        what: "warm-up",
                        value: perf.warmup,
                    });
                }
                if perf.iterations < 1 {
                    return Err(ConfigError::InvalidIterations {
                        what: "measured",
                        value: perf.iterations,
                    });
                }
                if !perf.image.exists() {
                    return Err(ConfigError::NotFound {
                        what: "image",
                        path: perf.image.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Export configuration as a diagnostic string.
    #[must_use]
    pub fn to_diagnostic_string(&self) -> String {
        let mut lines = vec![
            format!("Verbosity: {}", self.verbosity),
            format!("Log format: {:?}", self.log_format),
            format!("Color: {:?}", self.color),
        ];
        match &self.mode {
            Mode::Verify(verify) => {
                lines.push(describe_factory(Flavor::Baseline, &verify.baseline));
                lines.push(describe_factory(Flavor::Current, &verify.current));
                if let Some(ref dir) = verify.images_dir {
                    lines.push(format!("Images dir: {}", dir.display()));
                }
                lines.push(format!("Explicit images: {}", verify.images.len()));
                lines.push(format!("Buffer capacity: {}", verify.run.buffer_capacity));
                lines.push(format!("Scenarios: {}", verify.run.scenarios.len()));
                lines.push(format!("Strict reset: {}", verify.run.strict_reset));
            }
            Mode::Perf(perf) => {
                lines.push(format!("Library: {}", perf.library.display()));
                lines.push(format!("Image: {}", perf.image.display()));
                if let Some(ref baseline) = perf.baseline {
                    lines.push(describe_factory(Flavor::Baseline, baseline));
                }
                lines.push(format!("Iterations: {} (warm-up {})", perf.iterations, perf.warmup));
            }
        }
        lines.join("\n")
    }
}

fn describe_factory(flavor: Flavor, spec: &FactorySpec) -> String {
    format!(
        "{flavor}: {} ({}, {})",
        spec.library.display(),
        spec.symbol,
        spec.abi
    )
}

/// Merge one side's factory options; `None` when no library is named anywhere.
fn resolve_factory(flavor: Flavor, cli: FactoryArgs, file: &FactoryArgs) -> Option<FactorySpec> {
    let library = cli.library.or_else(|| file.library.clone())?;
    let defaults = FactorySpec::for_flavor(flavor, library);
    Some(FactorySpec {
        symbol: cli
            .symbol
            .or_else(|| file.symbol.clone())
            .unwrap_or(defaults.symbol),
        abi: cli.abi.or(file.abi).unwrap_or(defaults.abi),
        library: defaults.library,
    })
}

/// Runtime directory holding the baseline library, its corelib and the
/// framework assemblies; `None` for a bare library name.
fn framework_dir(baseline: &FactorySpec) -> Option<PathBuf> {
    baseline
        .library
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .map(Path::to_path_buf)
}

/// CLI list if non-empty, else the file's list.
fn pick_list<T: Clone>(cli: &[T], file: &[T]) -> Vec<T> {
    (if cli.is_empty() { file } else { cli }).to_vec()
}

impl VerifyConfig {
    fn resolve(args: &VerifyArgs, file: &FileConfig) -> Result<Self, ConfigError> {
        let baseline = resolve_factory(Flavor::Baseline, args.baseline(), &file.baseline)
            .ok_or(ConfigError::MissingLibrary(Flavor::Baseline))?;
        let current = resolve_factory(Flavor::Current, args.current(), &file.current)
            .ok_or(ConfigError::MissingLibrary(Flavor::Current))?;

        let images = pick_list(&args.images, &file.verify.images);
        let mut images_dir = args.images_dir.clone().or_else(|| file.verify.images_dir.clone());
        if images.is_empty() && images_dir.is_none() {
            images_dir = Some(framework_dir(&baseline).ok_or(ConfigError::NoImages)?);
        }

        let mut scenarios = pick_list(&args.scenarios, &file.verify.scenarios);
        if scenarios.is_empty() {
            scenarios = Scenario::ALL.to_vec();
        }

        Ok(Self {
            images,
            images_dir,
            baseline,
            current,
            run: RunConfig {
                buffer_capacity: args
                    .buffer_capacity
                    .or(file.verify.buffer_capacity)
                    .unwrap_or(DEFAULT_BUFFER_CAPACITY),
                strict_reset: args.strict_reset || file.verify.strict_reset.unwrap_or(false),
                scenarios,
            },
            fail_fast: args.fail_fast || file.verify.fail_fast.unwrap_or(false),
            format: args.format.or(file.verify.format).unwrap_or_default(),
            output: args.output.clone().or_else(|| file.verify.output.clone()),
            show_passed: args.show_passed || file.verify.show_passed.unwrap_or(false),
        })
    }
}

impl PerfConfig {
    fn resolve(args: &PerfArgs, file: &FileConfig) -> Result<Self, ConfigError> {
        let baseline = resolve_factory(Flavor::Baseline, args.baseline(), &file.baseline);
        let image = args
            .image
            .clone()
            .or_else(|| file.perf.image.clone())
            .or_else(|| {
                let dir = framework_dir(baseline.as_ref()?)?;
                Some(dir.join(CORELIB_FILE_NAME))
            })
            .ok_or(ConfigError::MissingPerfImage)?;
        Ok(Self {
            library: args
                .library
                .clone()
                .or_else(|| file.perf.library.clone())
                .unwrap_or_else(|| PathBuf::from(default_library_name())),
            image,
            baseline,
            warmup: args
                .warmup
                .or(file.perf.warmup)
                .unwrap_or(DEFAULT_WARMUP_ITERATIONS),
            iterations: args
                .iterations
                .or(file.perf.iterations)
                .unwrap_or(DEFAULT_MEASURE_ITERATIONS),
            scenarios: pick_list(&args.scenarios, &file.perf.scenarios),
            json: args.json.clone().or_else(|| file.perf.json.clone()),
        })
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("failed to read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The config file is not valid TOML or has unknown keys.
    #[error("invalid config file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: Box<toml::de::Error>,
    },

    /// No library was given for one side.
    #[error("no {0} library given (use --{0}-lib or `library` under [{0}] in the config file)")]
    MissingLibrary(Flavor),

    /// Neither explicit images nor an images directory were given.
    #[error("no images given (pass image paths, --images-dir or a baseline library path)")]
    NoImages,

    /// `perf` needs an image for `PerfInitialize`.
    #[error("no image given for perf (use --image or --baseline-lib)")]
    MissingPerfImage,

    /// Enumeration pages must hold at least one token.
    #[error("buffer capacity must be at least 1, got {0}")]
    InvalidBufferCapacity(usize),

    /// An iteration count is out of range.
    #[error("{what} iteration count out of range: {value}")]
    InvalidIterations { what: &'static str, value: i32 },

    /// A named input does not exist.
    #[error("{what} not found: {}", path.display())]
    NotFound { what: &'static str, path: PathBuf },

    /// The images directory is a file.
    #[error("images directory is not a directory: {}", .0.display())]
    NotADirectory(PathBuf),
}
