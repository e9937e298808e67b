//! Per-host sampling with bounded retries
//!
//! Attempts run strictly one after another, stop at the first `ok`, and
//! never wait between tries: each attempt already paid its own deadline.

use crate::execution::{ProbeOutcome, ProcessRunner};
use crate::models::{AttemptLog, HostRecord, SampleResult, SampleStatus};
use std::future::Future;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// One power reading attempt against one host
pub trait PowerProbe: Send + Sync + 'static {
    fn probe(
        &self,
        host: &HostRecord,
        cancel: &CancellationToken,
    ) -> impl Future<Output = ProbeOutcome> + Send;
}

impl PowerProbe for ProcessRunner {
    fn probe(
        &self,
        host: &HostRecord,
        cancel: &CancellationToken,
    ) -> impl Future<Output = ProbeOutcome> + Send {
        self.run(host, cancel)
    }
}

/// Retry controller around a probe
#[derive(Debug)]
pub struct Sampler<P> {
    probe: P,
    max_attempts: u32,
}

impl<P: PowerProbe> Sampler<P> {
    /// `max_attempts` below 1 is raised to 1.
    pub fn new(probe: P, max_attempts: u32) -> Self {
        Self {
            probe,
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn probe(&self) -> &P {
        &self.probe
    }

    /// Sample one host until the first `ok` or attempts are exhausted.
    pub async fn sample(&self, host: HostRecord, cancel: &CancellationToken) -> SampleResult {
        let tag = host.tag();
        let mut attempts: Vec<AttemptLog> = Vec::with_capacity(self.max_attempts as usize);
        let mut last_status = SampleStatus::Cancelled;

        info!("--> START {}", tag);
        for index in 1..=self.max_attempts {
            if cancel.is_cancelled() {
                break;
            }

            let ProbeOutcome { watts, status, mut log } = self.probe.probe(&host, cancel).await;
            log.attempt_index = index;
            let duration = log.duration_secs;
            attempts.push(log);

            match (status, watts) {
                (SampleStatus::Ok, Some(watts)) => {
                    info!("<-- DONE  {} | {:.1} W  (attempt {}, {:.3}s)", tag, watts, index, duration);
                    return SampleResult::succeeded(host, watts, attempts);
                }
                (SampleStatus::Ok, None) => {
                    warn!("!!  FAIL  {} | ok without reading (attempt {}, {:.3}s)", tag, index, duration);
                    last_status = SampleStatus::NoPowerOutputFound;
                }
                (SampleStatus::Cancelled, _) => {
                    warn!("!!  FAIL  {} | cancelled (attempt {}, {:.3}s)", tag, index, duration);
                    last_status = SampleStatus::Cancelled;
                    break;
                }
                (status, _) => {
                    warn!("!!  FAIL  {} | {} (attempt {}, {:.3}s)", tag, status, index, duration);
                    last_status = status;
                }
            }
        }

        SampleResult::failed(host, last_status, attempts)
    }
}
