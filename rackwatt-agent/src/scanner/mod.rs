//! Sensor listing scanner for `ipmitool sdr elist` output
//!
//! Pure line-level parsing, no I/O:
//! - Splits pipe-delimited rows into sensor name and value field
//! - Extracts a wattage (unit-qualified number first, bare number second)
//! - Scores the sensor name so chassis-level readings beat component telemetry
//!
//! Pattern tables are compiled once per `SensorScanner` and shared read-only
//! between sampling tasks.

use regex::{Regex, RegexBuilder};
use serde::Serialize;
use tracing::trace;

/// Aggregate power sensor (total/system/chassis/platform/node power)
pub const AGGREGATE_SCORE: u8 = 100;
/// Sensor named exactly "Power"
pub const PLAIN_POWER_SCORE: u8 = 90;
/// Any other sensor mentioning "power"
pub const GENERIC_POWER_SCORE: u8 = 40;
/// Component or pin-level telemetry (CPU, PSU1, VIN, ...)
pub const COMPONENT_SCORE: u8 = 20;
/// Candidates at or above this score end the scan
pub const CONFIDENT_SCORE: u8 = 90;

const FIELD_DELIMITER: char = '|';
const LINE_EXCERPT_LIMIT: usize = 800;

const AGGREGATE_PATTERNS: &[&str] = &[
    r"(?:^|[^a-z0-9])total[\s_-]*power(?:$|[^a-z0-9])",
    r"(?:^|[^a-z0-9])system[\s_-]*power(?:$|[^a-z0-9])",
    r"(?:^|[^a-z0-9])chassis[\s_-]*power(?:$|[^a-z0-9])",
    r"(?:^|[^a-z0-9])platform[\s_-]*power(?:$|[^a-z0-9])",
    r"(?:^|[^a-z0-9])node[\s_-]*power(?:$|[^a-z0-9])",
];

const PLAIN_POWER_PATTERN: &str = r"^\s*power\s*$";

const EXCLUDE_PATTERNS: &[&str] = &[
    r"CPU|MEM|GPU|FAN|HDD|NVME|RAID|PSU\d|_PIN|_POUT|IIN|IOUT|VIN|VOUT|Power\d+",
];

const WATTS_VALUE_PATTERN: &str = r"([-+]?\d+(?:\.\d+)?)\s*(?:W|Watts?)\b";
const BARE_NUMBER_PATTERN: &str = r"^[-+]?\d+(?:\.\d+)?$";

/// A row that produced a wattage, with the confidence of its sensor name
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorCandidate {
    pub name: String,
    pub watts: f64,
    pub score: u8,
    /// Text the number was taken from (`342 Watts` or `342`)
    pub value_text: String,
    pub raw_line: String,
}

impl SensorCandidate {
    pub fn is_confident(&self) -> bool {
        self.score >= CONFIDENT_SCORE
    }
}

/// Whether the caller should keep feeding lines
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanVerdict {
    Continue,
    Confident,
}

/// Highest-scoring usable candidate seen during one invocation
#[derive(Debug, Default)]
pub struct BestMatch {
    best: Option<SensorCandidate>,
}

impl BestMatch {
    /// Offer a candidate; component-level noise (score <= 20) is dropped.
    pub fn offer(&mut self, candidate: SensorCandidate) -> ScanVerdict {
        if candidate.score <= COMPONENT_SCORE {
            return ScanVerdict::Continue;
        }

        let verdict = if candidate.is_confident() {
            ScanVerdict::Confident
        } else {
            ScanVerdict::Continue
        };

        let better = self
            .best
            .as_ref()
            .map_or(true, |current| candidate.score > current.score);
        if better {
            self.best = Some(candidate);
        }

        verdict
    }

    pub fn get(&self) -> Option<&SensorCandidate> {
        self.best.as_ref()
    }

    pub fn into_inner(self) -> Option<SensorCandidate> {
        self.best
    }
}

/// Compiled scoring and extraction tables
#[derive(Debug, Clone)]
pub struct SensorScanner {
    aggregate: Vec<Regex>,
    plain_power: Regex,
    exclude: Vec<Regex>,
    watts_value: Regex,
    bare_number: Regex,
}

impl SensorScanner {
    /// Build a scanner from the built-in tables plus user supplied patterns.
    ///
    /// Extra patterns are matched case-insensitively, like the built-ins.
    pub fn new(
        extra_aggregate: &[String],
        extra_exclude: &[String],
    ) -> Result<Self, regex::Error> {
        let aggregate = AGGREGATE_PATTERNS
            .iter()
            .copied()
            .chain(extra_aggregate.iter().map(String::as_str))
            .map(compile)
            .collect::<Result<Vec<_>, _>>()?;
        let exclude = EXCLUDE_PATTERNS
            .iter()
            .copied()
            .chain(extra_exclude.iter().map(String::as_str))
            .map(compile)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            aggregate,
            plain_power: compile(PLAIN_POWER_PATTERN)?,
            exclude,
            watts_value: compile(WATTS_VALUE_PATTERN)?,
            bare_number: compile(BARE_NUMBER_PATTERN)?,
        })
    }

    /// Confidence that `name` is the chassis-level power reading.
    ///
    /// First match wins: aggregate 100, bare "Power" 90, component 20,
    /// other "power" 40, anything else 0.
    pub fn score_name(&self, name: &str) -> u8 {
        let name = name.trim();
        if name.is_empty() {
            return 0;
        }
        if self.aggregate.iter().any(|re| re.is_match(name)) {
            return AGGREGATE_SCORE;
        }
        if self.plain_power.is_match(name) {
            return PLAIN_POWER_SCORE;
        }
        if self.exclude.iter().any(|re| re.is_match(name)) {
            return COMPONENT_SCORE;
        }
        if name.to_lowercase().contains("power") {
            return GENERIC_POWER_SCORE;
        }
        0
    }

    /// Parse one listing row into a candidate, if it carries a number.
    pub fn scan_line(&self, line: &str) -> Option<SensorCandidate> {
        if !line.contains(FIELD_DELIMITER) {
            return None;
        }

        let fields: Vec<&str> = line.split(FIELD_DELIMITER).map(str::trim).collect();
        let name = fields.first().copied().unwrap_or("");
        // sdr elist: name | id | status | entity | reading
        let value_field = fields.get(4).or_else(|| fields.get(2)).copied().unwrap_or("");

        let (watts, value_text) = self.extract_watts(value_field)?;

        Some(SensorCandidate {
            name: name.to_string(),
            watts,
            score: self.score_name(name),
            value_text,
            raw_line: single_line(line, LINE_EXCERPT_LIMIT),
        })
    }

    /// Scan one row and offer any candidate to `best`.
    pub fn feed(&self, best: &mut BestMatch, line: &str) -> ScanVerdict {
        match self.scan_line(line) {
            Some(candidate) => {
                trace!("candidate {:?} score={} watts={}", candidate.name, candidate.score, candidate.watts);
                best.offer(candidate)
            }
            None => ScanVerdict::Continue,
        }
    }

    fn extract_watts(&self, value_field: &str) -> Option<(f64, String)> {
        if let Some(caps) = self.watts_value.captures(value_field) {
            if let Ok(watts) = caps[1].parse::<f64>() {
                return Some((watts, caps[0].to_string()));
            }
        }

        let first = value_field.split_whitespace().next()?;
        if self.bare_number.is_match(first) {
            if let Ok(watts) = first.parse::<f64>() {
                return Some((watts, first.to_string()));
            }
        }
        None
    }
}

fn compile(pattern: &str) -> Result<Regex, regex::Error> {
    RegexBuilder::new(pattern).case_insensitive(true).build()
}

/// Collapse whitespace runs to one space, trim, and cap at `limit` chars.
pub fn single_line(text: &str, limit: usize) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .chars()
        .take(limit)
        .collect()
}
