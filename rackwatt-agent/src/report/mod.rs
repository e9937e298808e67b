//! Run report: per-host detail rows plus the room → rack summary blocks

use crate::aggregate::PowerSummary;
use crate::models::SampleResult;
use crate::orchestrator::RunOutcome;
use chrono::{DateTime, Local};
use serde::Serialize;
use std::path::Path;
use thiserror::Error;
use uuid::Uuid;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("failed to write report: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to encode report as JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("failed to encode report as YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// One row per sampled host
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetailRow {
    pub room: String,
    pub rack: String,
    pub name: String,
    pub address: String,
    pub username: String,
    /// Absent when unresolved
    pub watts: Option<f64>,
    pub status: String,
    pub timestamp: String,
    pub attempts: usize,
    pub duration_total_secs: f64,
    pub lines_scanned: u64,
    pub bytes_read: u64,
    pub match_name: String,
    pub match_value: String,
    pub match_line: String,
    pub last_rc: Option<i32>,
    pub last_stderr: String,
    pub log: String,
}

impl From<&SampleResult> for DetailRow {
    fn from(result: &SampleResult) -> Self {
        let host = &result.host;
        let last = result.last_attempt();
        let last_stderr = result
            .attempts
            .iter()
            .rev()
            .map(|a| a.stderr_excerpt.as_str())
            .find(|e| !e.is_empty())
            .unwrap_or_default();

        Self {
            room: host.room.clone(),
            rack: host.rack.clone(),
            name: host.name.clone(),
            address: host.address.clone(),
            username: host.username.clone(),
            watts: result.watts.map(round1),
            status: result.status.to_string(),
            timestamp: result.timestamp.format(TIMESTAMP_FORMAT).to_string(),
            attempts: result.attempts.len(),
            duration_total_secs: round3(result.total_duration_secs()),
            lines_scanned: last.map(|a| a.lines_scanned).unwrap_or(0),
            bytes_read: last.map(|a| a.bytes_read).unwrap_or(0),
            match_name: last.map(|a| a.matched_name.clone()).unwrap_or_default(),
            match_value: last.map(|a| a.matched_value_text.clone()).unwrap_or_default(),
            match_line: last.map(|a| a.matched_line.clone()).unwrap_or_default(),
            last_rc: last.and_then(|a| a.exit_code),
            last_stderr: last_stderr.to_string(),
            log: result.compact_log(),
        }
    }
}

/// One visual row of the summary block layout
///
/// Per room: a header row, one row per rack, a subtotal row, a blank row.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SummaryRow {
    pub room: String,
    pub rack: String,
    pub label: String,
    pub total_watts: Option<f64>,
    pub timestamp: Option<String>,
}

pub fn summary_rows(summary: &PowerSummary, at: DateTime<Local>) -> Vec<SummaryRow> {
    let stamp = at.format(TIMESTAMP_FORMAT).to_string();
    let mut rows = Vec::new();

    for room in &summary.rooms {
        rows.push(SummaryRow {
            room: room.room.clone(),
            ..Default::default()
        });
        for rack in &room.racks {
            rows.push(SummaryRow {
                room: room.room.clone(),
                rack: rack.rack.clone(),
                label: rack.rack.clone(),
                total_watts: Some(round1(rack.total_watts)),
                timestamp: Some(stamp.clone()),
            });
        }
        rows.push(SummaryRow {
            room: room.room.clone(),
            label: format!("subtotal ({})", room.room),
            total_watts: Some(round1(room.total_watts)),
            timestamp: Some(stamp.clone()),
            ..Default::default()
        });
        rows.push(SummaryRow::default());
    }
    rows
}

/// Human-readable totals for the console log
pub fn summary_lines(summary: &PowerSummary) -> Vec<String> {
    let mut lines = Vec::new();
    for room in &summary.rooms {
        lines.push(format!("room {}: {:.1} W", room.room, room.total_watts));
        for rack in &room.racks {
            lines.push(format!("  rack {}: {:.1} W", rack.rack, rack.total_watts));
        }
    }
    lines.push(format!("total: {:.1} W", summary.grand_total()));
    lines
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    /// Host that ran the collection
    pub collector: String,
    pub started_at: DateTime<Local>,
    pub finished_at: DateTime<Local>,
    pub hosts: usize,
    pub ok_count: usize,
    pub detail: Vec<DetailRow>,
    pub summary: Vec<SummaryRow>,
}

impl RunReport {
    pub fn build(outcome: &RunOutcome) -> Self {
        let mut detail: Vec<DetailRow> = outcome.results.iter().map(DetailRow::from).collect();
        detail.sort_by(|a, b| {
            (&a.room, &a.rack, &a.name, &a.address).cmp(&(&b.room, &b.rack, &b.name, &b.address))
        });

        Self {
            run_id: Uuid::new_v4(),
            collector: gethostname::gethostname().to_string_lossy().into_owned(),
            started_at: outcome.started_at,
            finished_at: outcome.finished_at,
            hosts: outcome.results.len(),
            ok_count: outcome.ok_count(),
            detail,
            summary: summary_rows(&outcome.summary, outcome.finished_at),
        }
    }

    /// YAML for `.yaml` / `.yml`, pretty JSON otherwise.
    pub fn render(&self, path: &Path) -> Result<String, ReportError> {
        let yaml = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("yaml") || e.eq_ignore_ascii_case("yml"))
            .unwrap_or(false);

        if yaml {
            Ok(serde_yaml::to_string(self)?)
        } else {
            Ok(serde_json::to_string_pretty(self)?)
        }
    }

    pub async fn write(&self, path: &Path) -> Result<(), ReportError> {
        let body = self.render(path)?;
        tokio::fs::write(path, body).await?;
        Ok(())
    }
}

fn round1(watts: f64) -> f64 {
    (watts * 10.0).round() / 10.0
}

fn round3(secs: f64) -> f64 {
    (secs * 1000.0).round() / 1000.0
}
