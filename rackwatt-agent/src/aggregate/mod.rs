//! Room → rack power aggregation
//!
//! Readings are collected by the single consumer that drains completed
//! samples, then summed in a fixed order when reconciled against the
//! inventory. Totals therefore do not depend on completion order, and empty
//! racks and rooms report 0 W.

use crate::models::{HostRecord, SampleResult};
use serde::Serialize;
use std::collections::{HashMap, HashSet};

/// One `ok` reading, keyed by where the host sits
#[derive(Debug, Clone)]
struct Reading {
    room: String,
    rack: String,
    name: String,
    address: String,
    watts: f64,
}

/// Collected readings, mutated only by the draining consumer
#[derive(Debug, Default)]
pub struct LocationTotals {
    readings: Vec<Reading>,
}

impl LocationTotals {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep an `ok` result's watts; every other status is ignored.
    pub fn fold(&mut self, result: &SampleResult) {
        let Some(watts) = result.watts.filter(|_| result.status.is_ok()) else {
            return;
        };
        let host = &result.host;
        self.readings.push(Reading {
            room: host.room.clone(),
            rack: host.rack.clone(),
            name: host.name.clone(),
            address: host.address.clone(),
            watts,
        });
    }

    /// Freeze into a summary covering every room and rack of the inventory,
    /// in first-appearance order.
    pub fn reconcile(mut self, inventory: &[HostRecord]) -> PowerSummary {
        // Float addition is order sensitive: sum in host order, not arrival order
        self.readings.sort_by(|a, b| {
            (&a.room, &a.rack, &a.name, &a.address)
                .cmp(&(&b.room, &b.rack, &b.name, &b.address))
                .then(a.watts.total_cmp(&b.watts))
        });

        let mut room_sums: HashMap<&str, f64> = HashMap::new();
        let mut rack_sums: HashMap<(&str, &str), f64> = HashMap::new();
        for reading in &self.readings {
            *room_sums.entry(reading.room.as_str()).or_insert(0.0) += reading.watts;
            *rack_sums
                .entry((reading.room.as_str(), reading.rack.as_str()))
                .or_insert(0.0) += reading.watts;
        }

        let mut rooms: Vec<RoomTotal> = Vec::new();
        let mut room_index: HashMap<&str, usize> = HashMap::new();
        let mut seen_racks: HashSet<(&str, &str)> = HashSet::new();

        for host in inventory {
            let idx = *room_index.entry(host.room.as_str()).or_insert_with(|| {
                rooms.push(RoomTotal {
                    room: host.room.clone(),
                    total_watts: room_sums.get(host.room.as_str()).copied().unwrap_or(0.0),
                    racks: Vec::new(),
                });
                rooms.len() - 1
            });

            let key = (host.room.as_str(), host.rack.as_str());
            if seen_racks.insert(key) {
                rooms[idx].racks.push(RackTotal {
                    rack: host.rack.clone(),
                    total_watts: rack_sums.get(&key).copied().unwrap_or(0.0),
                });
            }
        }

        PowerSummary { rooms }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RackTotal {
    pub rack: String,
    pub total_watts: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoomTotal {
    pub room: String,
    pub total_watts: f64,
    pub racks: Vec<RackTotal>,
}

/// Immutable reconciled totals
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PowerSummary {
    pub rooms: Vec<RoomTotal>,
}

impl PowerSummary {
    pub fn room_total(&self, room: &str) -> Option<f64> {
        self.rooms.iter().find(|r| r.room == room).map(|r| r.total_watts)
    }

    pub fn rack_total(&self, room: &str, rack: &str) -> Option<f64> {
        self.rooms
            .iter()
            .find(|r| r.room == room)?
            .racks
            .iter()
            .find(|r| r.rack == rack)
            .map(|r| r.total_watts)
    }

    pub fn grand_total(&self) -> f64 {
        self.rooms.iter().map(|r| r.total_watts).sum()
    }
}
