//! Core data types shared by every stage of a sampling run
//!
//! - `HostRecord`: one BMC to sample, as delivered by the inventory
//! - `SampleStatus`: terminal status taxonomy for a host
//! - `AttemptLog`: diagnostics of one ipmitool invocation
//! - `SampleResult`: final per-host outcome handed to aggregation and reporting

use chrono::{DateTime, Local};
use serde::Serialize;
use std::fmt;

/// One management controller to sample (matches inventory row schema)
#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct HostRecord {
    pub room: String,
    pub rack: String,
    pub name: String,
    pub address: String,
    pub username: String,
    #[serde(skip)] // Never serialize passwords
    pub secret: String,
}

impl HostRecord {
    /// Console tag used in every per-host log line
    pub fn tag(&self) -> String {
        format!("[{}/{}] {} {}", self.room, self.rack, self.name, self.address)
    }
}

impl fmt::Debug for HostRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostRecord")
            .field("room", &self.room)
            .field("rack", &self.rack)
            .field("name", &self.name)
            .field("address", &self.address)
            .field("username", &self.username)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Terminal status of one attempt, and of a host once retries are exhausted
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SampleStatus {
    Ok,
    Timeout,
    ToolError(i32),
    NoPowerOutputFound,
    SpawnError(String),
    ToolNotFound,
    Exception(String),
    Cancelled,
}

impl SampleStatus {
    pub fn is_ok(&self) -> bool {
        matches!(self, SampleStatus::Ok)
    }
}

impl fmt::Display for SampleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SampleStatus::Ok => f.write_str("ok"),
            SampleStatus::Timeout => f.write_str("timeout"),
            SampleStatus::ToolError(rc) => write!(f, "tool_error(rc={})", rc),
            SampleStatus::NoPowerOutputFound => f.write_str("no_power_output"),
            SampleStatus::SpawnError(detail) => write!(f, "spawn_error: {}", detail),
            SampleStatus::ToolNotFound => f.write_str("tool_not_found"),
            SampleStatus::Exception(detail) => write!(f, "exception: {}", detail),
            SampleStatus::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// Diagnostics of a single ipmitool execution
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AttemptLog {
    pub attempt_index: u32,
    pub duration_secs: f64,
    pub lines_scanned: u64,
    pub bytes_read: u64,
    pub matched_name: String,
    pub matched_value_text: String,
    pub matched_line: String,
    pub exit_code: Option<i32>,
    pub stderr_excerpt: String,
}

impl AttemptLog {
    /// Compact one-line form: `a1:0.812s,lines=42,match=342 Watts`
    pub fn compact(&self) -> String {
        let mut part = format!(
            "a{}:{:.3}s,lines={}",
            self.attempt_index, self.duration_secs, self.lines_scanned
        );
        if !self.matched_value_text.is_empty() {
            part.push_str(&format!(",match={}", self.matched_value_text));
        }
        if !self.stderr_excerpt.is_empty() {
            part.push_str(&format!(",err={}", self.stderr_excerpt));
        }
        part
    }
}

/// Final outcome for one host in one run
///
/// `watts` is `Some` exactly when `status` is `Ok`; use the constructors.
#[derive(Debug, Clone)]
pub struct SampleResult {
    pub host: HostRecord,
    pub watts: Option<f64>,
    pub status: SampleStatus,
    pub attempts: Vec<AttemptLog>,
    pub timestamp: DateTime<Local>,
}

impl SampleResult {
    pub fn succeeded(host: HostRecord, watts: f64, attempts: Vec<AttemptLog>) -> Self {
        Self {
            host,
            watts: Some(watts),
            status: SampleStatus::Ok,
            attempts,
            timestamp: Local::now(),
        }
    }

    pub fn failed(host: HostRecord, status: SampleStatus, attempts: Vec<AttemptLog>) -> Self {
        debug_assert!(!status.is_ok(), "failed() called with ok status");
        Self {
            host,
            watts: None,
            status,
            attempts,
            timestamp: Local::now(),
        }
    }

    /// Task-level fault: no attempt log, no reading
    pub fn exception(host: HostRecord, detail: impl Into<String>) -> Self {
        Self::failed(host, SampleStatus::Exception(detail.into()), Vec::new())
    }

    /// Host never sampled because the run was stopped
    pub fn cancelled(host: HostRecord) -> Self {
        Self::failed(host, SampleStatus::Cancelled, Vec::new())
    }

    pub fn total_duration_secs(&self) -> f64 {
        self.attempts.iter().map(|a| a.duration_secs).sum()
    }

    pub fn last_attempt(&self) -> Option<&AttemptLog> {
        self.attempts.last()
    }

    /// All attempts joined with ` | `
    pub fn compact_log(&self) -> String {
        self.attempts
            .iter()
            .map(AttemptLog::compact)
            .collect::<Vec<_>>()
            .join(" | ")
    }
}
