/*!
Fixture builders: `sdr elist` listings and inventory documents
*/

use anyhow::{Context, Result};
use serde_yaml::{Mapping, Value};
use std::path::{Path, PathBuf};

/// Builds `ipmitool sdr elist` style output
///
/// `Name | 01h | ok | 7.1 | Reading`
#[derive(Debug, Clone, Default)]
pub struct SensorListingBuilder {
    lines: Vec<String>,
    next_id: u32,
}

impl SensorListingBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Generic sensor row
    pub fn sensor(mut self, name: &str, reading: &str) -> Self {
        self.next_id += 1;
        self.lines
            .push(format!("{:<16} | {:02X}h | ok  | 7.1 | {}", name, self.next_id, reading));
        self
    }

    pub fn temperature(self, name: &str, celsius: u32) -> Self {
        self.sensor(name, &format!("{} degrees C", celsius))
    }

    pub fn fan(self, name: &str, rpm: u32) -> Self {
        self.sensor(name, &format!("{} RPM", rpm))
    }

    pub fn watts(self, name: &str, watts: f64) -> Self {
        self.sensor(name, &format!("{} Watts", watts))
    }

    /// Sensor present but without a reading
    pub fn no_reading(mut self, name: &str) -> Self {
        self.next_id += 1;
        self.lines
            .push(format!("{:<16} | {:02X}h | ns  | 7.1 | No Reading", name, self.next_id));
        self
    }

    /// `count` temperature rows, for long listings
    pub fn filler(mut self, count: usize) -> Self {
        for i in 0..count {
            self = self.temperature(&format!("Temp {}", i + 1), 30 + (i % 20) as u32);
        }
        self
    }

    pub fn raw(mut self, line: &str) -> Self {
        self.lines.push(line.to_string());
        self
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.clone()
    }

    /// Newline-terminated listing text
    pub fn build(&self) -> String {
        self.lines.iter().map(|l| format!("{}\n", l)).collect()
    }
}

/// Writes YAML inventory tables
#[derive(Debug, Clone)]
pub struct InventoryBuilder {
    table: String,
    rows: Vec<Mapping>,
}

impl InventoryBuilder {
    pub fn new(table: &str) -> Self {
        Self {
            table: table.to_string(),
            rows: Vec::new(),
        }
    }

    /// Host row using the `ip` / `password` column names
    pub fn host(mut self, room: &str, rack: &str, name: &str, ip: &str) -> Self {
        let mut row = Mapping::new();
        for (key, value) in [
            ("room", room),
            ("rack", rack),
            ("name", name),
            ("ip", ip),
            ("username", "admin"),
            ("password", "changeme"),
        ] {
            row.insert(Value::from(key), Value::from(value));
        }
        self.rows.push(row);
        self
    }

    pub fn to_yaml(&self) -> Result<String> {
        let mut doc = Mapping::new();
        doc.insert(
            Value::from(self.table.as_str()),
            Value::Sequence(self.rows.iter().cloned().map(Value::Mapping).collect()),
        );
        serde_yaml::to_string(&doc).context("encoding inventory")
    }

    /// Write `inventory.yaml` under `dir`.
    pub fn write(&self, dir: &Path) -> Result<PathBuf> {
        let path = dir.join("inventory.yaml");
        std::fs::write(&path, self.to_yaml()?)
            .with_context(|| format!("writing {}", path.display()))?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listing_shape() {
        let listing = SensorListingBuilder::new()
            .temperature("Inlet Temp", 22)
            .watts("Total Power", 342.0)
            .build();

        let lines: Vec<&str> = listing.lines().collect();
        assert_eq!(lines.len(), 2);
        let fields: Vec<&str> = lines[1].split('|').map(str::trim).collect();
        assert_eq!(fields, vec!["Total Power", "02h", "ok", "7.1", "342 Watts"]);
        assert!(listing.ends_with('\n'));
    }

    #[test]
    fn test_filler_rows() {
        assert_eq!(SensorListingBuilder::new().filler(25).lines().len(), 25);
    }

    #[test]
    fn test_inventory_yaml() {
        let yaml = InventoryBuilder::new("hosts")
            .host("R1", "A", "node-01", "10.0.0.1")
            .to_yaml()
            .unwrap();

        let doc: Value = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(doc["hosts"][0]["ip"], Value::from("10.0.0.1"));
        assert_eq!(doc["hosts"][0]["password"], Value::from("changeme"));
    }
}
