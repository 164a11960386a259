//! Report output for the runner

use std::path::Path;

use biodata_regress::Report;
use clap::ValueEnum;
use colored::Colorize;
use tracing::{error, info, warn};

/// Output format
#[derive(Debug, Clone, Copy, ValueEnum, Default)]
pub enum OutputFormat {
    /// Human-readable tables
    #[default]
    Text,
    /// JSON format
    Json,
    /// YAML format
    Yaml,
}

/// Print the report, then write `regression-report.json` into `output_dir`.
///
/// Output problems are logged; the returned exit code is always the report's.
pub fn publish(report: &Report, format: OutputFormat, output_dir: &Path) -> i32 {
    if let Err(e) = print_report(report, format) {
        error!("Could not print report: {:#}", e);
    }

    match report.write_json(output_dir) {
        Ok(path) => info!("Report written to {}", path.display()),
        Err(e) => warn!("Could not write report to {}: {}", output_dir.display(), e),
    }

    report.exit_code()
}

/// Print the report to stdout in the requested format
pub fn print_report(report: &Report, format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Text => {
            print!("{}", report.render_text());
            println!();
            print_verdict(report);
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(report)?);
        }
        OutputFormat::Yaml => {
            println!("{}", serde_yaml::to_string(report)?);
        }
    }
    Ok(())
}

fn print_verdict(report: &Report) {
    let fixed = format!(
        "{}/{} defects fixed ({:.1}%)",
        report.fixed_count(),
        report.defect_records.len(),
        report.fix_rate
    );

    if report.has_blocking_failure() {
        println!("{} {}", "✗ Regression run failed:".red().bold(), fixed);
    } else {
        println!("{} {}", "✓ Regression run passed:".green().bold(), fixed);
    }
}
