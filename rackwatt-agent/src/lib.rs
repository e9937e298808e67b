//! Rackwatt - concurrent IPMI power sampling
//!
//! Reads each host's power draw from its management controller by streaming
//! `ipmitool sdr elist`, stopping as soon as a whole-system power sensor is
//! seen, then folds the readings into room → rack totals.
//!
//! - `scanner`: sensor name scoring and value extraction
//! - `execution`: one bounded ipmitool call per attempt
//! - `sampling`: per-host retry controller
//! - `orchestrator`: bounded fan-out and completion-order fan-in
//! - `aggregate`: room / rack totals
//! - `inventory` / `report`: YAML host tables in, JSON or YAML report out

pub mod aggregate;
pub mod config;
pub mod execution;
pub mod inventory;
pub mod models;
pub mod orchestrator;
pub mod report;
pub mod sampling;
pub mod scanner;

pub use config::{ConfigError, EngineConfig};
pub use models::{AttemptLog, HostRecord, SampleResult, SampleStatus};
pub use orchestrator::{Orchestrator, RunOutcome};

use execution::{IpmiTool, ProcessRunner};
use sampling::Sampler;
use scanner::SensorScanner;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Wire scanner, runner, retry controller and pool from one config.
///
/// The config is validated first, so out-of-range values come back as errors.
pub fn build_orchestrator(
    config: &EngineConfig,
    cancel: CancellationToken,
) -> Result<Orchestrator<ProcessRunner>, ConfigError> {
    config.validate()?;
    let scanner = SensorScanner::new(
        &config.scanner.extra_aggregate_patterns,
        &config.scanner.extra_exclude_patterns,
    )?;
    let runner = ProcessRunner::new(
        IpmiTool::from_config(&config.ipmitool),
        Arc::new(scanner),
        config.sampling.call_timeout(),
    );
    let sampler = Sampler::new(runner, config.sampling.max_attempts());
    Ok(Orchestrator::new(sampler, config.sampling.workers, cancel))
}
