//! Rackwatt - sample every host of an inventory table and write a power report
//!
//! ```text
//! rackwatt -i power.yaml --table hosts -o power_report.json --workers 32
//! ```
//!
//! Exit codes: 0 run completed (per-host failures are in the report),
//! 2 configuration error, 3 inventory error, 130 stopped by Ctrl-C, 1 otherwise.

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use rackwatt_agent::config::Interface;
use rackwatt_agent::inventory::{self, InventoryError};
use rackwatt_agent::report::{self, RunReport};
use rackwatt_agent::{build_orchestrator, ConfigError, EngineConfig};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "rackwatt")]
#[command(version, about = "Concurrent IPMI power sampling with room/rack totals", long_about = None)]
struct Cli {
    /// Inventory YAML file
    #[arg(short = 'i', long = "input", value_name = "PATH")]
    input: Option<PathBuf>,

    /// Table (sheet) inside the inventory
    #[arg(long = "table", alias = "sheet", value_name = "NAME")]
    table: Option<String>,

    /// Report file (.json, or .yaml / .yml)
    #[arg(short = 'o', long = "output", value_name = "PATH")]
    output: Option<PathBuf>,

    /// Concurrent hosts
    #[arg(long)]
    workers: Option<usize>,

    /// Total seconds allowed for one ipmitool call
    #[arg(long)]
    timeout: Option<f64>,

    /// Host-level retries after the first attempt
    #[arg(long)]
    retries: Option<u32>,

    #[arg(long, value_enum)]
    interface: Option<InterfaceArg>,

    /// ipmitool -N
    #[arg(long = "net-timeout", value_name = "SECS")]
    net_timeout: Option<u32>,

    /// ipmitool -R
    #[arg(long = "retries-ipmi", value_name = "N")]
    retries_ipmi: Option<u32>,

    /// ipmitool executable
    #[arg(long, value_name = "PROGRAM")]
    ipmitool: Option<String>,

    /// Config file (defaults to $RACKWATT_CONFIG, then the user config dir)
    #[arg(short = 'c', long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// JSON log lines
    #[arg(long = "log-json")]
    log_json: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum InterfaceArg {
    Lanplus,
    Lan,
}

impl Cli {
    /// Command-line flags win over the config file.
    fn apply(&self, config: &mut EngineConfig) {
        if let Some(input) = &self.input {
            config.io.inventory = input.clone();
        }
        if let Some(table) = &self.table {
            config.io.table = table.clone();
        }
        if let Some(output) = &self.output {
            config.io.report = output.clone();
        }
        if let Some(workers) = self.workers {
            config.sampling.workers = workers;
        }
        if let Some(timeout) = self.timeout {
            config.sampling.timeout_secs = timeout;
        }
        if let Some(retries) = self.retries {
            config.sampling.retries = retries;
        }
        if let Some(interface) = self.interface {
            config.ipmitool.interface = match interface {
                InterfaceArg::Lanplus => Interface::Lanplus,
                InterfaceArg::Lan => Interface::Lan,
            };
        }
        if let Some(secs) = self.net_timeout {
            config.ipmitool.net_timeout_secs = secs;
        }
        if let Some(retries) = self.retries_ipmi {
            config.ipmitool.retries = retries;
        }
        if let Some(program) = &self.ipmitool {
            config.ipmitool.program = program.clone();
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // .env is optional
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_logging(cli.log_json);

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::from(failure_code(&e))
        }
    }
}

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("rackwatt=info,rackwatt_agent=info"));

    if json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let mut config = EngineConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    cli.apply(&mut config);
    config.validate().context("Invalid configuration")?;

    let cancel = CancellationToken::new();
    let orchestrator = build_orchestrator(&config, cancel.clone()).context("Failed to build sampling engine")?;

    let hosts = inventory::load(&config.io.inventory, &config.io.table)
        .await
        .context("Failed to load inventory")?;
    if hosts.is_empty() {
        warn!("table '{}' has no hosts", config.io.table);
    }

    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, stopping run");
                cancel.cancel();
            }
        }
    });

    let outcome = orchestrator.run(&hosts).await;
    for line in report::summary_lines(&outcome.summary) {
        info!("{}", line);
    }

    let report = RunReport::build(&outcome);
    report
        .write(&config.io.report)
        .await
        .with_context(|| format!("Failed to write report {}", config.io.report.display()))?;

    info!(
        "finished: {}/{} hosts ok in {:.1}s, report written to {}",
        report.ok_count,
        report.hosts,
        outcome.elapsed.as_secs_f64(),
        config.io.report.display()
    );

    if cancel.is_cancelled() {
        return Ok(ExitCode::from(130));
    }
    Ok(ExitCode::SUCCESS)
}

fn failure_code(err: &anyhow::Error) -> u8 {
    if err.chain().any(|cause| cause.is::<ConfigError>()) {
        2
    } else if err.chain().any(|cause| cause.is::<InventoryError>()) {
        3
    } else {
        1
    }
}
