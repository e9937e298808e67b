//! Host inventory loading
//!
//! The inventory is a YAML document mapping table names to host rows:
//!
//! ```yaml
//! hosts:
//!   - { room: R1, rack: A, name: node-01, ip: 10.0.0.1, username: admin, password: secret }
//! ```
//!
//! Every problem here is fatal and reported before any host is sampled.

use crate::models::HostRecord;
use serde_yaml::{Mapping, Value};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tracing::{debug, info};

/// Required fields, with the accepted aliases of each
const FIELDS: [(&str, &[&str]); 6] = [
    ("room", &[]),
    ("rack", &[]),
    ("name", &[]),
    ("address", &["ip"]),
    ("username", &[]),
    ("secret", &["password"]),
];

#[derive(Debug, Error)]
pub enum InventoryError {
    #[error("inventory file not found: {0}")]
    NotFound(PathBuf),
    #[error("failed to read inventory {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid inventory {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("inventory {0} must map table names to host rows")]
    NotATableMap(PathBuf),
    #[error("table '{table}' not found in inventory (available: {})", available.join(", "))]
    MissingTable { table: String, available: Vec<String> },
    #[error("table '{0}' must be a list of host rows")]
    NotAList(String),
    #[error("table '{table}' row {row} is not a mapping")]
    InvalidRow { table: String, row: usize },
    #[error("table '{table}' row {row}: field '{field}' must be a scalar")]
    InvalidValue {
        table: String,
        row: usize,
        field: &'static str,
    },
    #[error("table '{table}' is missing required fields: {} ({rows} rows affected)", fields.join(", "))]
    MissingFields {
        table: String,
        fields: Vec<&'static str>,
        rows: usize,
    },
}

/// Read `table` from the inventory file at `path`.
pub async fn load(path: &Path, table: &str) -> Result<Vec<HostRecord>, InventoryError> {
    if !path.exists() {
        return Err(InventoryError::NotFound(path.to_path_buf()));
    }
    let text = fs::read_to_string(path)
        .await
        .map_err(|source| InventoryError::Read {
            path: path.to_path_buf(),
            source,
        })?;

    let hosts = parse(&text, table, path)?;
    info!("inventory {}: {} hosts in table '{}'", path.display(), hosts.len(), table);
    Ok(hosts)
}

/// Parse an inventory document; `origin` only labels errors.
pub fn parse(text: &str, table: &str, origin: &Path) -> Result<Vec<HostRecord>, InventoryError> {
    let document: Value = serde_yaml::from_str(text).map_err(|source| InventoryError::Parse {
        path: origin.to_path_buf(),
        source,
    })?;
    let Value::Mapping(tables) = document else {
        return Err(InventoryError::NotATableMap(origin.to_path_buf()));
    };

    let rows = match tables.get(table) {
        Some(Value::Sequence(rows)) => rows,
        Some(Value::Null) => return Ok(Vec::new()),
        Some(_) => return Err(InventoryError::NotAList(table.to_string())),
        None => {
            return Err(InventoryError::MissingTable {
                table: table.to_string(),
                available: table_names(&tables),
            })
        }
    };

    let mut hosts = Vec::with_capacity(rows.len());
    let mut missing: Vec<&'static str> = Vec::new();
    let mut incomplete_rows = 0;

    for (idx, row) in rows.iter().enumerate() {
        let row_number = idx + 1;
        let Value::Mapping(row) = row else {
            return Err(InventoryError::InvalidRow {
                table: table.to_string(),
                row: row_number,
            });
        };

        let mut values: Vec<String> = Vec::with_capacity(FIELDS.len());
        let mut complete = true;
        for (field, aliases) in FIELDS {
            match lookup(row, field, aliases) {
                Some(value) => {
                    let text = scalar_text(value).ok_or_else(|| InventoryError::InvalidValue {
                        table: table.to_string(),
                        row: row_number,
                        field,
                    })?;
                    values.push(text);
                }
                None => {
                    complete = false;
                    if !missing.contains(&field) {
                        missing.push(field);
                    }
                }
            }
        }

        if !complete {
            incomplete_rows += 1;
            continue;
        }

        let mut values = values.into_iter();
        let mut next = || values.next().unwrap_or_default();
        hosts.push(HostRecord {
            room: next(),
            rack: next(),
            name: next(),
            address: next(),
            username: next(),
            secret: next(),
        });
    }

    if !missing.is_empty() {
        // Report in declaration order regardless of which row missed first
        missing.sort_by_key(|f| FIELDS.iter().position(|(name, _)| name == f));
        return Err(InventoryError::MissingFields {
            table: table.to_string(),
            fields: missing,
            rows: incomplete_rows,
        });
    }

    debug!("parsed {} host rows from table '{}'", hosts.len(), table);
    Ok(hosts)
}

fn lookup<'a>(row: &'a Mapping, field: &str, aliases: &[&str]) -> Option<&'a Value> {
    std::iter::once(&field)
        .chain(aliases.iter())
        .find_map(|key| row.get(*key))
}

/// Cells are text: numbers and booleans are rendered, null is empty.
fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null => Some(String::new()),
        Value::Tagged(tagged) => scalar_text(&tagged.value),
        Value::Sequence(_) | Value::Mapping(_) => None,
    }
}

fn table_names(tables: &Mapping) -> Vec<String> {
    tables
        .keys()
        .filter_map(|key| key.as_str().map(str::to_string))
        .collect()
}
