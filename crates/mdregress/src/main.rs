#![forbid(unsafe_code)]

//! # mdregress
//!
//! ```bash
//! mdregress verify --baseline-lib libcoreclr.so --current-lib libdnmd.so --images-dir ./refs
//! mdregress perf ./libregnative.so --image System.Private.CoreLib.dll
//! ```

use std::process::ExitCode;

use mdregress::cli::Cli;
use mdregress::config::{Config, Mode};
use mdregress::{LogFormat, commands, report};
use tracing::{debug, error};
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    let cli = Cli::parse_args();
    match run(&cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            error!(error = %err, "run aborted");
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> anyhow::Result<bool> {
    let config = Config::load(cli)?;
    init_tracing(config.verbosity, config.log_format);
    debug!("configuration:\n{}", config.to_diagnostic_string());

    let color = report::color_choice(config.color);
    match &config.mode {
        Mode::Verify(verify) => commands::verify(verify, color),
        Mode::Perf(perf) => commands::perf(perf, color).map(|()| true),
    }
}

/// Logs go to stderr so reports on stdout stay parseable.
fn init_tracing(verbosity: u8, format: LogFormat) {
    let default_level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}
