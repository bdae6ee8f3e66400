//! mprtp-tester
//!
//! Runs one or more congestion-control test scenarios back to back:
//!
//! - Builds a typed test spec per scenario key
//! - Starts the stats relay, the scenario driver, and a stall watchdog
//! - Stops every run exactly once, then evaluates and plots it
//! - Archives artifacts when several runs share one results directory
//!
//! SIGINT/SIGTERM stop the current run gracefully; a second one exits at once.

use std::path::PathBuf;
use std::sync::Arc;

use clap::builder::TypedValueParser as _;
use clap::Parser;
use mprtp_scenarios::{Algorithm, ScenarioParams, ScenarioRegistry};
use tracing_subscriber::EnvFilter;

use mprtp_tester::batch::{BatchRequest, BatchRunner, SystemCollaborators};
use mprtp_tester::cancel::{self, CancellationGate};
use mprtp_tester::config;

const DEFAULT_SOURCE: &str = "FILE:Kristen.yuv:1:1280:720:2:25/1";

/// Congestion-control test runner.
#[derive(Parser, Debug)]
#[command(name = "mprtp-tester", about = "Run congestion-control test scenarios")]
struct Cli {
    /// Scenario keys to run (rmcat1..rmcat7, mprtp1..mprtp11).
    #[arg(required = true, num_args = 1..)]
    types: Vec<String>,

    /// Path latency in milliseconds.
    #[arg(short, long, num_args = 1.., default_values_t = [50u32],
          value_parser = clap::builder::PossibleValuesParser::new(["50", "100", "150", "300"])
              .map(|s| s.parse::<u32>().unwrap_or_default()))]
    latency: Vec<u32>,

    /// Path jitter in milliseconds.
    #[arg(short, long, num_args = 1.., default_values_t = [0u32])]
    jitter: Vec<u32>,

    /// Congestion-control algorithm under test.
    #[arg(short, long, default_value = "FRACTaL", value_parser = parse_algorithm)]
    algorithm: Algorithm,

    /// How many times each scenario is repeated.
    #[arg(short, long, default_value_t = 1)]
    runs: u32,

    /// Results directory the run artifacts land in.
    #[arg(short, long)]
    target: Option<PathBuf>,

    /// Media source descriptor.
    #[arg(short, long, default_value = DEFAULT_SOURCE)]
    source: String,

    /// Media sink descriptor.
    #[arg(short = 'i', long, default_value = "FAKESINK")]
    sink: String,

    /// Number of subflows for multi-path scenarios.
    #[arg(short = 'u', long = "subflows_num", default_value_t = 2)]
    subflows_num: u32,

    /// Add a competing TCP flow (0 or 1) where the scenario supports it.
    #[arg(long, default_value_t = 0)]
    tcp: u8,

    /// Video quality metrics after the run (accepted, not yet wired).
    #[arg(long)]
    vqmt: Option<String>,

    /// Tester configuration file (TOML).
    #[arg(long)]
    config: Option<PathBuf>,
}

fn parse_algorithm(s: &str) -> Result<Algorithm, String> {
    s.parse::<Algorithm>().map_err(|e| e.to_string())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut cfg = config::load(cli.config.as_deref())?;
    if let Some(target) = cli.target.clone() {
        cfg.results_dir = target;
    }

    tracing::info!(
        types = ?cli.types,
        algorithm = %cli.algorithm,
        runs = cli.runs,
        latency = ?cli.latency,
        jitter = ?cli.jitter,
        subflows = cli.subflows_num,
        tcp = cli.tcp,
        "mprtp-tester starting"
    );
    if let Some(vqmt) = &cli.vqmt {
        tracing::warn!(vqmt = %vqmt, "video quality metrics are not wired, ignoring");
    }

    // ── Termination requests ────────────────────────────────────
    let gate = Arc::new(CancellationGate::new(cancel::process_exit()));
    let requests = cancel::spawn_os_listener()?;
    tokio::spawn(gate.clone().listen(requests));

    // ── Batch ───────────────────────────────────────────────────
    let request = BatchRequest {
        keys: cli.types,
        runs: cli.runs,
        params: ScenarioParams {
            algorithm: cli.algorithm,
            latencies_ms: cli.latency,
            jitters_ms: cli.jitter,
            source: cli.source,
            sink: cli.sink,
            subflows: cli.subflows_num,
            tcp: cli.tcp >= 1,
        },
    };
    let runner = BatchRunner::new(
        ScenarioRegistry::standard(),
        SystemCollaborators::new(&cfg),
        gate,
        &cfg,
    );
    tracing::info!(run_id = %runner.run_id(), "batch id");

    let records = runner.run(&request).await?;
    for record in &records {
        let failures = record.archive.as_ref().map_or(0, |a| a.failures.len());
        tracing::info!(
            scenario = %record.key,
            run = record.run_index,
            outcome = ?record.outcome,
            archive_failures = failures,
            "run summary"
        );
    }

    tracing::info!("mprtp-tester finished");
    Ok(())
}
