//! Compute agent metrics for a results file.
//!
//! Reads a results document (tasks, simulations and run info), computes
//! every metric and prints the text summary followed by the JSON report.
//!
//! # Configuration
//!
//! Environment variables (with defaults):
//! - `AGENT_METRICS_TCRR_WINDOW_SIZE`: window of previous assistant turns (default: 3)
//! - `AGENT_METRICS_TCRR_BATCH_THRESHOLD`: identical calls allowed per turn (default: 2)
//! - `RUST_LOG`: log filter, e.g. `agent_metrics=debug`
//!
//! # Output
//!
//! - JSON report written to `results/agent_metrics.json`
//! - Summary and JSON report printed to stdout
//!
//! # Usage
//!
//! ```bash
//! cargo run --example compute_metrics -- path/to/results.json
//!
//! # Simple computation only
//! cargo run --example compute_metrics -- path/to/results.json --simple
//! ```

use std::env;
use std::fs;
use std::path::Path;

use agent_metrics::{MetricsAggregator, MetricsConfig, Results};
use tracing_subscriber::EnvFilter;

/// Directory to write results to.
const RESULTS_DIR: &str = "results";

/// Output file name.
const OUTPUT_FILE: &str = "agent_metrics.json";

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let mut args = env::args().skip(1);
    let Some(input) = args.next() else {
        eprintln!("usage: compute_metrics <results.json> [--simple]");
        std::process::exit(2);
    };
    let simple = args.any(|a| a == "--simple");

    let config = MetricsConfig::from_env();
    println!("Configuration:");
    println!("  TCRR window:     {}", config.tcrr_window_size);
    println!("  Batch threshold: {}", config.tcrr_batch_threshold);
    println!("  Judge model:     {}", config.judge_model);
    println!();

    let results = Results::from_json(&fs::read_to_string(&input)?)?;
    println!(
        "Loaded {} tasks and {} simulations from {input}",
        results.tasks.len(),
        results.simulations.len()
    );
    println!();

    let aggregator = MetricsAggregator::new(config);
    let metrics = if simple {
        aggregator.compute_simple(&results)
    } else {
        aggregator.compute(&results)
    };
    print!("{metrics}");

    let results_dir = Path::new(RESULTS_DIR);
    fs::create_dir_all(results_dir)?;
    let output_path = results_dir.join(OUTPUT_FILE);
    let json = metrics.to_json()?;
    fs::write(&output_path, &json)?;
    println!();
    println!("{json}");
    println!("Report written to {}", output_path.display());

    Ok(())
}
