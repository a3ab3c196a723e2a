//! breaklink-bench: CLI tool for running the connection engine on fragment
//! files and collecting diagnostics.
//!
//! Loads fragments from a JSON file, validates and connects them with
//! configurable parameters, and prints per-stage diagnostics. Useful for:
//!
//! - Comparing candidate strategies (`triangulated` vs `direct`)
//! - Tuning the snap tolerance and surface padding
//! - Measuring per-stage durations and search effort on real data
//!
//! The input file holds a JSON array of fragments, each an array of
//! points `{"x": .., "y": .., "z": ..}` (`z` may be omitted).
//!
//! # Usage
//!
//! ```text
//! cargo run --release --bin breaklink-bench -- [OPTIONS] <FRAGMENTS_PATH>
//! ```

#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use breaklink::{CandidateStrategy, ConnectConfig, ConnectDiagnostics, ConnectOutcome, ConnectReport, Fragment};
use clap::{Parser, ValueEnum};
use env_logger::Env;
use log::{info, warn};

/// Breakline fragment connection and diagnostics.
///
/// Validates the fragments in a JSON file, connects them into one
/// non-crossing line string when they are clean, and prints per-stage
/// timing and count diagnostics.
#[derive(Parser)]
#[command(name = "breaklink-bench", version)]
struct Cli {
    /// Path to a JSON array of fragments.
    fragments_path: PathBuf,

    /// Plan distance under which endpoints are snapped together.
    #[arg(long, default_value_t = ConnectConfig::DEFAULT_SNAP_TOLERANCE)]
    snap_tolerance: f64,

    /// Candidate discovery strategy.
    #[arg(long, value_enum, default_value_t = Strategy::Triangulated)]
    strategy: Strategy,

    /// Surface padding as a fraction of the fragments' extent.
    #[arg(long, default_value_t = ConnectConfig::DEFAULT_SURFACE_PADDING)]
    padding: f64,

    /// Write a plan-view SVG of fragments, connectors and defects.
    #[arg(long)]
    svg: Option<PathBuf>,

    /// Write the joined polyline as a JSON array of points.
    #[arg(long)]
    output: Option<PathBuf>,

    /// Close the joined polyline when the connected string allows it.
    #[arg(long)]
    close: bool,

    /// Number of runs for averaging.
    #[arg(long, default_value_t = 1, value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..))]
    runs: usize,

    /// Output diagnostics as JSON instead of human-readable report.
    #[arg(long)]
    json: bool,

    /// Full connection config as a JSON string.
    ///
    /// When provided, all other connection parameter flags are ignored.
    /// The JSON must be a valid `ConnectConfig` serialization.
    #[arg(long)]
    config_json: Option<String>,
}

/// Candidate strategy selection.
#[derive(Clone, Copy, ValueEnum)]
enum Strategy {
    /// Neighbours on a triangulated surface that can see each other.
    Triangulated,
    /// Every unobstructed endpoint pair.
    Direct,
}

/// Build a [`ConnectConfig`] from CLI arguments.
///
/// If `--config-json` is provided, the JSON is parsed directly and all
/// individual parameter flags are ignored.
fn config_from_cli(cli: &Cli) -> Result<ConnectConfig, String> {
    if let Some(ref json) = cli.config_json {
        return serde_json::from_str(json).map_err(|e| format!("Error parsing --config-json: {e}"));
    }

    Ok(ConnectConfig {
        snap_tolerance: cli.snap_tolerance,
        strategy: match cli.strategy {
            Strategy::Triangulated => CandidateStrategy::Triangulated,
            Strategy::Direct => CandidateStrategy::Direct,
        },
        surface_padding: cli.padding,
    })
}

fn load_fragments(path: &Path) -> Result<Vec<Fragment>, String> {
    let text = std::fs::read_to_string(path).map_err(|e| format!("Error reading {}: {e}", path.display()))?;
    serde_json::from_str(&text).map_err(|e| format!("Error parsing {}: {e}", path.display()))
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    let config = match config_from_cli(&cli) {
        Ok(c) => c,
        Err(msg) => {
            eprintln!("{msg}");
            return ExitCode::FAILURE;
        }
    };

    let fragments = match load_fragments(&cli.fragments_path) {
        Ok(fragments) => fragments,
        Err(msg) => {
            eprintln!("{msg}");
            return ExitCode::FAILURE;
        }
    };

    eprintln!(
        "Fragments: {} ({} points)",
        fragments.len(),
        fragments.iter().map(Fragment::len).sum::<usize>(),
    );
    eprintln!("Config: {config:#?}");
    eprintln!("Runs: {}", cli.runs);
    eprintln!();

    let mut all_diagnostics = Vec::with_capacity(cli.runs);

    for run in 0..cli.runs {
        if cli.runs > 1 {
            eprintln!("--- Run {}/{} ---", run + 1, cli.runs);
        }

        let report = match breaklink::process(&fragments, &config) {
            Ok(report) => report,
            Err(e) => {
                eprintln!("Connection error: {e}");
                return ExitCode::FAILURE;
            }
        };

        if cli.json {
            match serde_json::to_string_pretty(&report) {
                Ok(json) => println!("{json}"),
                Err(e) => {
                    eprintln!("Error serializing report: {e}");
                    return ExitCode::FAILURE;
                }
            }
        } else {
            println!("{}", report.diagnostics.report());
            for defect in &report.defects {
                println!("  defect: {defect}");
            }
        }

        // Write outputs on the first run only.
        if run == 0 {
            if let Some(ref svg_path) = cli.svg {
                write_svg(svg_path, &cli, &config, &fragments, &report);
            }
            if let Some(ref output_path) = cli.output {
                write_joined(output_path, cli.close, &fragments, &report);
            }
        }

        all_diagnostics.push(report.diagnostics);

        if cli.runs > 1 {
            eprintln!();
        }
    }

    if cli.runs > 1 {
        print_multi_run_summary(&all_diagnostics);
    }

    ExitCode::SUCCESS
}

fn write_svg(path: &Path, cli: &Cli, config: &ConnectConfig, fragments: &[Fragment], report: &ConnectReport) {
    let title = cli
        .fragments_path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("bench");
    let desc = format!("{config:#?}");
    let config_json = serde_json::to_string(config).ok();
    let metadata = breaklink_export::SvgMetadata {
        title: Some(title),
        description: Some(&desc),
        config_json: config_json.as_deref(),
    };
    let svg = match breaklink_export::report_to_svg(fragments, report, &metadata) {
        Ok(svg) => svg,
        Err(e) => {
            warn!("SVG export failed: {e}");
            return;
        }
    };
    match std::fs::write(path, &svg) {
        Ok(()) => info!("SVG written to {} ({} bytes)", path.display(), svg.len()),
        Err(e) => warn!("Error writing SVG to {}: {e}", path.display()),
    }
}

fn write_joined(path: &Path, close: bool, fragments: &[Fragment], report: &ConnectReport) {
    let Some(string) = report.outcome.as_ref().and_then(ConnectOutcome::connected) else {
        warn!("No connected string; {} not written", path.display());
        return;
    };
    let json = string
        .to_fragment(fragments, close)
        .map_err(|e| e.to_string())
        .and_then(|joined| serde_json::to_string_pretty(&joined).map_err(|e| e.to_string()));
    match json {
        Ok(json) => match std::fs::write(path, &json) {
            Ok(()) => info!("Joined polyline written to {}", path.display()),
            Err(e) => warn!("Error writing {}: {e}", path.display()),
        },
        Err(e) => warn!("Error building joined polyline: {e}"),
    }
}

/// Function pointer type for extracting a stage duration from diagnostics.
type StageExtractor = fn(&ConnectDiagnostics) -> Option<std::time::Duration>;

/// Print aggregated statistics across multiple runs.
#[allow(clippy::cast_precision_loss)]
fn print_multi_run_summary(all_diagnostics: &[ConnectDiagnostics]) {
    debug_assert!(!all_diagnostics.is_empty(), "no diagnostics to summarize");

    println!();
    println!(
        "Summary ({} runs)\n{}",
        all_diagnostics.len(),
        "=".repeat(60),
    );

    if all_diagnostics.is_empty() {
        println!("Warning: no diagnostics to summarize");
        return;
    }

    let durations: Vec<f64> = all_diagnostics
        .iter()
        .map(|d| d.total_duration.as_secs_f64() * 1000.0)
        .collect();

    let min = durations.iter().copied().reduce(f64::min).unwrap_or(0.0);
    let max = durations.iter().copied().reduce(f64::max).unwrap_or(0.0);
    let mean = durations.iter().sum::<f64>() / durations.len() as f64;

    println!("Total duration: min={min:.3}ms  mean={mean:.3}ms  max={max:.3}ms");

    println!();
    println!("{:<24} {:>12}", "Stage", "Mean (ms)");
    println!("{}", "-".repeat(40));

    let stage_extractors: &[(&str, StageExtractor)] = &[
        ("Validation", |d| Some(d.validation.duration)),
        ("Candidates", |d| d.candidates.as_ref().map(|s| s.duration)),
        ("Blocking", |d| d.blocking.as_ref().map(|s| s.duration)),
        ("Search", |d| d.search.as_ref().map(|s| s.duration)),
    ];

    for (name, extractor) in stage_extractors {
        let stage_durations: Vec<f64> = all_diagnostics
            .iter()
            .filter_map(extractor)
            .map(|dur| dur.as_secs_f64() * 1000.0)
            .collect();

        if stage_durations.is_empty() {
            continue;
        }

        let stage_mean = stage_durations.iter().sum::<f64>() / stage_durations.len() as f64;
        println!("{name:<24} {stage_mean:>10.3}ms");
    }
}
