//! BioData Manager regression runner
//!
//! Launches a Playwright session, runs the harness against the configured
//! routes, writes `regression-report.json` and prints the report.
//!
//! Exit codes: 0 clean run, 1 high-severity failure or uncaught page error,
//! 2 no browser session or invalid configuration.

use std::path::PathBuf;

use anyhow::Context;
use clap::{ArgAction, Parser};
use tracing::error;
use tracing_subscriber::EnvFilter;

use biodata_regress::playwright::{Browser, PlaywrightConfig, PlaywrightDriver};
use biodata_regress::{Harness, HarnessConfig};

mod output;

/// Regression verification for the BioData Manager
#[derive(Parser, Debug)]
#[command(name = "biodata-regress")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Registry YAML (defaults to the built-in BioData Manager registry)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the application base URL
    #[arg(long, env = "BIODATA_BASE_URL")]
    base_url: Option<String>,

    /// Node.js executable used for the Playwright bridge
    #[arg(long, default_value = "node")]
    node: PathBuf,

    /// node_modules directory that contains playwright
    #[arg(long, env = "NODE_PATH")]
    node_path: Option<PathBuf>,

    /// Browser to use (chromium, firefox, webkit)
    #[arg(long, default_value = "chromium")]
    browser: String,

    /// Run the browser headless
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    headless: bool,

    /// Output directory for the JSON report
    #[arg(short, long, default_value = "test-results")]
    output: PathBuf,

    /// Report format on stdout
    #[arg(long, default_value = "text")]
    format: output::OutputFormat,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            2
        }
    };

    std::process::exit(code);
}

async fn run(cli: Cli) -> anyhow::Result<i32> {
    let config = match &cli.config {
        Some(path) => HarnessConfig::from_file(path)
            .with_context(|| format!("failed to load registry {}", path.display()))?,
        None => HarnessConfig::builtin().context("built-in registry is invalid")?,
    };
    let config = match cli.base_url {
        Some(url) => config.with_base_url(url),
        None => config,
    };

    let playwright = PlaywrightConfig {
        node: cli.node,
        node_path: cli.node_path,
        browser: cli.browser.parse::<Browser>()?,
        headless: cli.headless,
        ..Default::default()
    };

    let driver = PlaywrightDriver::launch(playwright)
        .await
        .context("could not obtain a browser session")?;

    let harness = Harness::new(config);
    let report = harness.run(Box::new(driver)).await;

    Ok(output::publish(&report, cli.format, &cli.output))
}
