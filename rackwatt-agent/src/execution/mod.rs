//! Deadline-bounded ipmitool execution
//!
//! Runs `ipmitool ... sdr elist` for one host and streams its output through
//! the sensor scanner:
//! - Confident match: kill the process and return immediately
//! - Deadline reached: kill the process, return `timeout` with what was seen
//! - Natural exit: decide from exit code and best candidate
//!
//! A hung BMC can never hold a worker past `now + timeout`.

mod stream;
mod terminate;

pub use stream::LineReader;
pub use terminate::exit_code;

use crate::config::{Interface, ToolConfig};
use crate::models::{AttemptLog, HostRecord, SampleStatus};
use crate::scanner::{single_line, BestMatch, ScanVerdict, SensorCandidate, SensorScanner};
use parking_lot::Mutex;
use std::io;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{ChildStderr, Command};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Longest error excerpt kept in diagnostics
const ERR_EXCERPT_LIMIT: usize = 800;
/// Stderr bytes retained per invocation
const STDERR_CAPTURE_LIMIT: usize = 64 * 1024;
/// Time allowed for stderr to drain once the process is gone
const STDERR_GRACE: Duration = Duration::from_millis(300);

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Outcome of one ipmitool invocation
///
/// `watts` is `Some` exactly when `status` is `Ok`.
#[derive(Debug, Clone)]
pub struct ProbeOutcome {
    pub watts: Option<f64>,
    pub status: SampleStatus,
    pub log: AttemptLog,
}

impl ProbeOutcome {
    pub fn ok(watts: f64, log: AttemptLog) -> Self {
        Self {
            watts: Some(watts),
            status: SampleStatus::Ok,
            log,
        }
    }

    pub fn failed(status: SampleStatus, log: AttemptLog) -> Self {
        Self {
            watts: None,
            status,
            log,
        }
    }
}

/// Fixed ipmitool argument shape
#[derive(Debug, Clone)]
pub struct IpmiTool {
    pub program: String,
    pub program_args: Vec<String>,
    pub interface: Interface,
    pub net_timeout_secs: u32,
    pub retries: u32,
}

impl IpmiTool {
    pub fn from_config(config: &ToolConfig) -> Self {
        Self {
            program: config.program.trim().to_string(),
            program_args: config.program_args.clone(),
            interface: config.interface,
            net_timeout_secs: config.net_timeout_secs,
            retries: config.retries,
        }
    }

    /// Arguments following `program_args`
    pub fn args(&self, host: &HostRecord) -> Vec<String> {
        vec![
            "-I".to_string(),
            self.interface.as_str().to_string(),
            "-H".to_string(),
            host.address.clone(),
            "-U".to_string(),
            host.username.clone(),
            "-P".to_string(),
            host.secret.clone(),
            "-N".to_string(),
            self.net_timeout_secs.to_string(),
            "-R".to_string(),
            self.retries.to_string(),
            "sdr".to_string(),
            "elist".to_string(),
        ]
    }

    fn command(&self, host: &HostRecord) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(&self.program_args)
            .args(self.args(host))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(windows)]
        command.creation_flags(CREATE_NO_WINDOW);
        command
    }
}

/// Runs one ipmitool call per `run` with a hard wall-clock deadline
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    tool: IpmiTool,
    scanner: Arc<SensorScanner>,
    timeout: Duration,
}

impl ProcessRunner {
    pub fn new(tool: IpmiTool, scanner: Arc<SensorScanner>, timeout: Duration) -> Self {
        Self {
            tool,
            scanner,
            timeout,
        }
    }

    /// Execute one attempt against `host`.
    ///
    /// Never returns an error: every failure is a status in the outcome.
    pub async fn run(&self, host: &HostRecord, cancel: &CancellationToken) -> ProbeOutcome {
        let started = Instant::now();

        if self.tool.program.is_empty() {
            return ProbeOutcome::failed(SampleStatus::ToolNotFound, AttemptLog::default());
        }

        let deadline = started + self.timeout;
        let mut child = match self.tool.command(host).spawn() {
            Ok(child) => child,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("ipmitool not found at '{}': {}", self.tool.program, e);
                return ProbeOutcome::failed(SampleStatus::ToolNotFound, AttemptLog::default());
            }
            Err(e) => {
                return ProbeOutcome::failed(SampleStatus::SpawnError(e.to_string()), AttemptLog::default());
            }
        };

        let stderr = StderrCapture::spawn(child.stderr.take());
        let Some(stdout) = child.stdout.take() else {
            terminate::terminate(&mut child).await;
            return ProbeOutcome::failed(
                SampleStatus::SpawnError("stdout not captured".into()),
                AttemptLog::default(),
            );
        };

        let mut reader = LineReader::new(stdout);
        let mut best = BestMatch::default();

        // Stream phase: scan lines as they arrive.
        loop {
            while let Some(line) = reader.next_line() {
                if self.scanner.feed(&mut best, &line) == ScanVerdict::Confident {
                    terminate::terminate(&mut child).await;
                    return self.confident(started, &reader, best);
                }
            }
            if reader.is_eof() {
                break;
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    terminate::terminate(&mut child).await;
                    let log = attempt_log(started, &reader, best.get(), None, String::new());
                    return ProbeOutcome::failed(SampleStatus::Cancelled, log);
                }
                _ = sleep_until(deadline) => {
                    terminate::terminate(&mut child).await;
                    let err = stderr.excerpt().await;
                    let log = attempt_log(started, &reader, best.get(), None, err);
                    return ProbeOutcome::failed(SampleStatus::Timeout, log);
                }
                filled = reader.fill() => {
                    if let Err(e) = filled {
                        debug!("stdout read failed for {}: {}", host.address, e);
                        break;
                    }
                }
            }
        }

        if let Some(line) = reader.take_remainder() {
            if self.scanner.feed(&mut best, &line) == ScanVerdict::Confident {
                terminate::terminate(&mut child).await;
                return self.confident(started, &reader, best);
            }
        }

        // Exit phase: stdout is closed, the process may still linger.
        let waited = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                terminate::terminate(&mut child).await;
                let log = attempt_log(started, &reader, best.get(), None, String::new());
                return ProbeOutcome::failed(SampleStatus::Cancelled, log);
            }
            _ = sleep_until(deadline) => {
                terminate::terminate(&mut child).await;
                let err = stderr.excerpt().await;
                let log = attempt_log(started, &reader, best.get(), None, err);
                return ProbeOutcome::failed(SampleStatus::Timeout, log);
            }
            status = child.wait() => status,
        };

        let status = match waited {
            Ok(status) => status,
            Err(e) => {
                let log = attempt_log(started, &reader, best.get(), None, single_line(&e.to_string(), ERR_EXCERPT_LIMIT));
                return ProbeOutcome::failed(SampleStatus::SpawnError(format!("wait failed: {}", e)), log);
            }
        };

        let code = exit_code(status);
        if status.success() {
            let log = attempt_log(started, &reader, best.get(), Some(code), String::new());
            return match best.into_inner() {
                Some(candidate) => ProbeOutcome::ok(candidate.watts, log),
                None => ProbeOutcome::failed(SampleStatus::NoPowerOutputFound, log),
            };
        }

        let err = stderr.excerpt().await;
        let log = attempt_log(started, &reader, best.get(), Some(code), err);
        ProbeOutcome::failed(SampleStatus::ToolError(code), log)
    }

    fn confident<R: AsyncRead + Unpin>(
        &self,
        started: Instant,
        reader: &LineReader<R>,
        best: BestMatch,
    ) -> ProbeOutcome {
        let log = attempt_log(started, reader, best.get(), None, String::new());
        match best.into_inner() {
            Some(candidate) => ProbeOutcome::ok(candidate.watts, log),
            None => ProbeOutcome::failed(SampleStatus::NoPowerOutputFound, log),
        }
    }
}

fn attempt_log<R: AsyncRead + Unpin>(
    started: Instant,
    reader: &LineReader<R>,
    best: Option<&SensorCandidate>,
    exit_code: Option<i32>,
    stderr_excerpt: String,
) -> AttemptLog {
    let elapsed = started.elapsed().as_secs_f64();
    AttemptLog {
        attempt_index: 0,
        duration_secs: (elapsed * 1000.0).round() / 1000.0,
        lines_scanned: reader.lines_read(),
        bytes_read: reader.bytes_read(),
        matched_name: best.map(|c| c.name.clone()).unwrap_or_default(),
        matched_value_text: best.map(|c| c.value_text.clone()).unwrap_or_default(),
        matched_line: best.map(|c| c.raw_line.clone()).unwrap_or_default(),
        exit_code,
        stderr_excerpt,
    }
}

/// Stderr drained concurrently so a chatty tool never blocks on a full pipe
struct StderrCapture {
    buffer: Arc<Mutex<Vec<u8>>>,
    task: Option<JoinHandle<()>>,
}

impl StderrCapture {
    fn spawn(pipe: Option<ChildStderr>) -> Self {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let task = pipe.map(|mut pipe| {
            let buffer = buffer.clone();
            tokio::spawn(async move {
                let mut chunk = [0u8; 4096];
                loop {
                    match pipe.read(&mut chunk).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            let mut buf = buffer.lock();
                            let room = STDERR_CAPTURE_LIMIT.saturating_sub(buf.len());
                            buf.extend_from_slice(&chunk[..n.min(room)]);
                        }
                    }
                }
            })
        });
        Self { buffer, task }
    }

    /// Wait briefly for the pipe to drain, then return a one-line excerpt.
    async fn excerpt(mut self) -> String {
        if let Some(mut task) = self.task.take() {
            if tokio::time::timeout(STDERR_GRACE, &mut task).await.is_err() {
                task.abort();
            }
        }
        let text = String::from_utf8_lossy(&self.buffer.lock()).into_owned();
        single_line(&text, ERR_EXCERPT_LIMIT)
    }
}

impl Drop for StderrCapture {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host() -> HostRecord {
        HostRecord {
            room: "R1".into(),
            rack: "A".into(),
            name: "node-01".into(),
            address: "10.0.0.1".into(),
            username: "admin".into(),
            secret: "s3cret".into(),
        }
    }

    fn runner(program: &str, timeout: Duration) -> ProcessRunner {
        let tool = IpmiTool::from_config(&ToolConfig {
            program: program.to_string(),
            ..ToolConfig::default()
        });
        ProcessRunner::new(tool, Arc::new(SensorScanner::new(&[], &[]).unwrap()), timeout)
    }

    #[test]
    fn test_argument_shape() {
        let tool = IpmiTool::from_config(&ToolConfig {
            interface: Interface::Lan,
            net_timeout_secs: 3,
            retries: 2,
            ..ToolConfig::default()
        });
        assert_eq!(
            tool.args(&host()),
            vec![
                "-I", "lan", "-H", "10.0.0.1", "-U", "admin", "-P", "s3cret", "-N", "3", "-R",
                "2", "sdr", "elist"
            ]
        );
    }

    #[tokio::test]
    async fn test_missing_program_is_tool_not_found() {
        let outcome = runner("/nonexistent/bin/ipmitool", Duration::from_secs(1))
            .run(&host(), &CancellationToken::new())
            .await;
        assert_eq!(outcome.status, SampleStatus::ToolNotFound);
        assert!(outcome.watts.is_none());
    }

    #[tokio::test]
    async fn test_empty_program_is_tool_not_found() {
        let outcome = runner("", Duration::from_secs(1))
            .run(&host(), &CancellationToken::new())
            .await;
        assert_eq!(outcome.status, SampleStatus::ToolNotFound);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_non_executable_program_is_spawn_error() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let outcome = runner(file.path().to_str().unwrap(), Duration::from_secs(1))
            .run(&host(), &CancellationToken::new())
            .await;
        assert!(matches!(outcome.status, SampleStatus::SpawnError(_)));
    }
}
