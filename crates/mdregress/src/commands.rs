//! Subcommand execution: `verify` and `perf`.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result, bail};
use mdimport::{DifferentialRunner, DualLoader, Flavor, ImageSummary, PerfComparator, PerfMeasurement};
use mdimport_native::PerfLibrary;
use termcolor::{ColorChoice, NoColor, StandardStream, WriteColor};
use tracing::{info, warn};

use crate::cli::ReportFormat;
use crate::config::{PerfConfig, VerifyConfig};
use crate::image::{self, MetadataImage};
use crate::report::{PerfReport, Reporter, VerifyReport};

/// Compare baseline and current over every configured image.
///
/// Returns whether every image passed.
pub fn verify(config: &VerifyConfig, color: ColorChoice) -> Result<bool> {
    let baseline = config.baseline.open(Flavor::Baseline).with_context(|| {
        format!(
            "acquiring the baseline dispenser from {}",
            config.baseline.library.display()
        )
    })?;
    let current = config.current.open(Flavor::Current).with_context(|| {
        format!(
            "acquiring the current dispenser from {}",
            config.current.library.display()
        )
    })?;

    let images = collect_images(config)?;
    if images.is_empty() {
        bail!("no metadata images found");
    }
    info!(images = images.len(), "verifying");

    let run = VerifyRun {
        config,
        runner: DifferentialRunner::new(config.run.clone()),
        loader: DualLoader::new(&baseline, &current),
        images: &images,
    };

    let report = match (config.format, &config.output) {
        (ReportFormat::Human, None) => run.human(StandardStream::stdout(color))?.0,
        (ReportFormat::Human, Some(path)) => {
            let (report, out) = run.human(NoColor::new(BufWriter::new(create(path)?)))?;
            out.into_inner().flush()?;
            report
        }
        (ReportFormat::Json, output) => {
            let report = run.execute(|_| Ok(()))?;
            match output {
                Some(path) => {
                    let mut out = BufWriter::new(create(path)?);
                    report.write_json(&mut out)?;
                    writeln!(out)?;
                    out.flush()?;
                }
                None => {
                    let mut out = io::stdout().lock();
                    report.write_json(&mut out)?;
                    writeln!(out)?;
                }
            }
            report
        }
    };

    info!(passed = report.passed, failed = report.failed, "verify finished");
    Ok(report.is_pass())
}

/// Explicit images first (each must load), then the directory scan.
fn collect_images(config: &VerifyConfig) -> Result<Vec<MetadataImage>> {
    let mut images = config
        .images
        .iter()
        .map(MetadataImage::load)
        .collect::<Result<Vec<_>, _>>()?;
    if let Some(ref dir) = config.images_dir {
        images.extend(image::discover(dir)?);
    }
    Ok(images)
}

fn create(path: &Path) -> Result<File> {
    File::create(path).with_context(|| format!("creating {}", path.display()))
}

struct VerifyRun<'a> {
    config: &'a VerifyConfig,
    runner: DifferentialRunner,
    loader: DualLoader<'a>,
    images: &'a [MetadataImage],
}

impl VerifyRun<'_> {
    /// Run every image in order, handing each summary to `on_image`.
    fn execute(&self, mut on_image: impl FnMut(&ImageSummary) -> io::Result<()>) -> Result<VerifyReport> {
        let mut report = VerifyReport::new(self.config);
        for image in self.images {
            let name = image.name();
            let summary = self.runner.run_image(&name, &self.loader, image.metadata());
            on_image(&summary)?;

            let failed = !summary.is_pass();
            report.push(summary);
            if failed && self.config.fail_fast {
                warn!(image = %name, "stopping after first failing image");
                break;
            }
        }
        Ok(report)
    }

    fn human<W: WriteColor>(&self, out: W) -> Result<(VerifyReport, W)> {
        let mut reporter = Reporter::new(out).with_show_passed(self.config.show_passed);
        let report = self.execute(|summary| reporter.image(summary))?;
        reporter.totals(&report)?;
        Ok((report, reporter.into_inner()))
    }
}

/// Time every benchmark scenario: a warm-up pass, then the measured pass.
pub fn perf(config: &PerfConfig, color: ColorChoice) -> Result<()> {
    let library = PerfLibrary::load(&config.library)
        .with_context(|| format!("loading benchmark library {}", config.library.display()))?;
    let image = MetadataImage::load(&config.image)?;
    let baseline = config
        .baseline
        .as_ref()
        .map(|spec| spec.open(Flavor::Baseline))
        .transpose()
        .context("acquiring the baseline dispenser")?;
    if baseline.is_none() {
        warn!("no baseline library given; PerfInitialize receives a null dispenser");
    }

    let perf = library.initialize(image.metadata(), baseline.as_ref())?;
    let comparator = perf.comparator().retain(&config.scenarios);
    let mut reporter = Reporter::new(StandardStream::stdout(color));
    let mut report = PerfReport::new(config);

    if config.warmup > 0 {
        reporter.line("Warm-up")?;
        report.warmup = timed_pass(&comparator, config.warmup, &mut reporter)?;
        reporter.line("")?;
    }
    reporter.line(&format!("Run iterations - {}", config.iterations))?;
    report.measured = timed_pass(&comparator, config.iterations, &mut reporter)?;
    reporter.perf_summary(&report.measured)?;

    if let Some(ref path) = config.json {
        let mut out = BufWriter::new(create(path)?);
        report.write_json(&mut out)?;
        writeln!(out)?;
        out.flush()?;
        info!(path = %path.display(), "measurements written");
    }
    Ok(())
}

/// One pass, reporting each timing as it completes.
fn timed_pass<W: WriteColor>(
    comparator: &PerfComparator<'_>,
    iterations: i32,
    reporter: &mut Reporter<W>,
) -> Result<Vec<PerfMeasurement>> {
    let mut written = Ok(());
    let measurements = comparator.run(iterations, |event| {
        if written.is_ok() {
            written = reporter.perf_event(event);
        }
    });
    written?;
    Ok(measurements?)
}
