#![forbid(unsafe_code)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::must_use_candidate)]

//! # mdregress
//!
//! Command-line front end for the differential metadata import harness.
//!
//! - [`cli`]: clap argument definitions
//! - [`config`]: CLI, environment and TOML file resolved into one [`Config`]
//! - [`image`]: metadata discovery in PE files and raw `BSJB` blobs
//! - [`report`]: colored human output and JSON reports
//! - [`commands`]: the `verify` and `perf` subcommands

pub mod cli;
pub mod commands;
pub mod config;
pub mod image;
pub mod report;

pub use cli::{Cli, ColorMode, Command, LogFormat, ReportFormat};
pub use config::{Config, ConfigError, Mode, PerfConfig, VerifyConfig};
pub use image::{ImageError, ImageKind, MetadataImage};
pub use report::{PerfReport, Reporter, VerifyReport};
