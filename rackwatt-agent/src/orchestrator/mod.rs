//! Bounded fan-out of per-host sampling tasks
//!
//! - At most `width` hosts sample concurrently (semaphore permits)
//! - Completions are drained in completion order by this task alone, which
//!   is also the only place aggregates are folded
//! - A panicking task becomes an `exception` result; the run continues
//! - The stop token is checked before every submission

use crate::aggregate::{LocationTotals, PowerSummary};
use crate::models::{HostRecord, SampleResult, SampleStatus};
use crate::sampling::{PowerProbe, Sampler};
use chrono::{DateTime, Local};
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Progress is logged every this many completions
const PROGRESS_EVERY: usize = 10;

/// Everything a run produced, one result per inventory host
#[derive(Debug)]
pub struct RunOutcome {
    /// Completion order
    pub results: Vec<SampleResult>,
    pub summary: PowerSummary,
    pub started_at: DateTime<Local>,
    pub finished_at: DateTime<Local>,
    pub elapsed: Duration,
}

impl RunOutcome {
    pub fn ok_count(&self) -> usize {
        self.results.iter().filter(|r| r.status.is_ok()).count()
    }
}

pub struct Orchestrator<P> {
    sampler: Arc<Sampler<P>>,
    width: usize,
    cancel: CancellationToken,
}

impl<P: PowerProbe> Orchestrator<P> {
    /// `width` is clamped to what a semaphore can hold, and at least 1.
    pub fn new(sampler: Sampler<P>, width: usize, cancel: CancellationToken) -> Self {
        Self {
            sampler: Arc::new(sampler),
            width: width.clamp(1, Semaphore::MAX_PERMITS),
            cancel,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub async fn run(&self, hosts: &[HostRecord]) -> RunOutcome {
        self.run_with(hosts, |_| {}).await
    }

    /// Sample every host; `on_complete` sees each result as it drains.
    pub async fn run_with<F>(&self, hosts: &[HostRecord], on_complete: F) -> RunOutcome
    where
        F: FnMut(&SampleResult),
    {
        let started_at = Local::now();
        let started = Instant::now();
        info!(
            "start tasks: {} hosts, workers={}, attempts={}",
            hosts.len(),
            self.width,
            self.sampler.max_attempts()
        );

        let permits = Arc::new(Semaphore::new(self.width));
        let mut tasks: JoinSet<(usize, SampleResult)> = JoinSet::new();
        let mut drained = vec![false; hosts.len()];
        let mut collector = Collector::new(hosts.len(), started, on_complete);
        let mut queue = hosts.iter().enumerate().peekable();

        loop {
            if queue.peek().is_none() && tasks.is_empty() {
                break;
            }

            tokio::select! {
                biased;
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    match joined {
                        Ok((idx, result)) => {
                            drained[idx] = true;
                            collector.accept(result);
                        }
                        Err(e) => error!("sampling task aborted: {}", e),
                    }
                }
                permit = permits.clone().acquire_owned(), if queue.peek().is_some() => {
                    let Some((idx, host)) = queue.next() else { continue };
                    let permit = match permit {
                        Ok(permit) => permit,
                        Err(e) => {
                            error!("worker pool closed: {}", e);
                            drained[idx] = true;
                            collector.accept(SampleResult::exception(host.clone(), "worker pool closed"));
                            continue;
                        }
                    };

                    if self.cancel.is_cancelled() {
                        drop(permit);
                        drained[idx] = true;
                        collector.accept(SampleResult::cancelled(host.clone()));
                        continue;
                    }

                    let sampler = self.sampler.clone();
                    let cancel = self.cancel.clone();
                    let host = host.clone();
                    tasks.spawn(async move {
                        let _permit = permit;
                        let result = AssertUnwindSafe(sampler.sample(host.clone(), &cancel))
                            .catch_unwind()
                            .await
                            .unwrap_or_else(|panic| SampleResult::exception(host, panic_message(panic.as_ref())));
                        (idx, result)
                    });
                }
                else => break,
            }
        }

        // Tasks lost to runtime aborts still owe one result each.
        for (idx, host) in hosts.iter().enumerate() {
            if !drained[idx] {
                collector.accept(SampleResult::exception(host.clone(), "task aborted"));
            }
        }

        let Collector { totals, results, .. } = collector;
        let elapsed = started.elapsed();
        if self.cancel.is_cancelled() {
            warn!("run stopped early: {} hosts cancelled", results.iter().filter(|r| r.status == SampleStatus::Cancelled).count());
        }

        RunOutcome {
            summary: totals.reconcile(hosts),
            results,
            started_at,
            finished_at: Local::now(),
            elapsed,
        }
    }
}

/// Single consumer of completed samples
struct Collector<F> {
    totals: LocationTotals,
    results: Vec<SampleResult>,
    expected: usize,
    started: Instant,
    on_complete: F,
}

impl<F: FnMut(&SampleResult)> Collector<F> {
    fn new(expected: usize, started: Instant, on_complete: F) -> Self {
        Self {
            totals: LocationTotals::new(),
            results: Vec::with_capacity(expected),
            expected,
            started,
            on_complete,
        }
    }

    fn accept(&mut self, result: SampleResult) {
        if let SampleStatus::Exception(detail) = &result.status {
            error!("!!  EXC   {} | exception: {}", result.host.tag(), detail);
        }

        self.totals.fold(&result);
        (self.on_complete)(&result);
        self.results.push(result);

        let done = self.results.len();
        if done % PROGRESS_EVERY == 0 || done == self.expected {
            info!(
                "progress: {}/{} done in {:.1}s",
                done,
                self.expected,
                self.started.elapsed().as_secs_f64()
            );
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "sampling task panicked".to_string()
    }
}
