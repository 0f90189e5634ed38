//! Coordinator-side registry of reporting stations, feeding the status
//! endpoints. Same slot-arena shape as the core peer table, smaller cap.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use flood_core::NodeAddress;

/// Maximum number of remote stations tracked for the dashboard.
pub const MAX_STATIONS: usize = 10;

/// Inactivity window after which a station drops off the dashboard (ms).
pub const STATION_TIMEOUT_MS: u64 = 30_000;

#[derive(Debug, Clone)]
pub struct Station {
    pub address: NodeAddress,
    pub name: String,
    pub water_level_cm: f32,
    pub temperature_c: f32,
    pub alert_level: u8,
    pub last_seen_ms: u64,
}

pub struct StationTable {
    slots: [Option<Station>; MAX_STATIONS],
}

pub type SharedStations = Arc<Mutex<StationTable>>;

pub fn shared() -> SharedStations {
    Arc::new(Mutex::new(StationTable::new()))
}

pub fn lock(stations: &SharedStations) -> MutexGuard<'_, StationTable> {
    stations.lock().unwrap_or_else(PoisonError::into_inner)
}

impl StationTable {
    pub fn new() -> StationTable {
        StationTable {
            slots: std::array::from_fn(|_| None),
        }
    }

    pub fn len(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = &Station> {
        self.slots.iter().flatten()
    }

    /// Record a report from `address`. An existing entry is refreshed in
    /// place; otherwise the first free slot is taken. A full table drops
    /// the report (logged, not fatal).
    pub fn upsert(
        &mut self,
        address: NodeAddress,
        name: &str,
        values: &[f32],
        alert_level: u8,
        now_ms: u64,
    ) {
        let water_level_cm = values.first().copied().unwrap_or(0.0);
        let temperature_c = values.get(1).copied().unwrap_or(0.0);

        if let Some(station) = self
            .slots
            .iter_mut()
            .flatten()
            .find(|s| s.address == address)
        {
            station.name = name.to_string();
            station.water_level_cm = water_level_cm;
            station.temperature_c = temperature_c;
            station.alert_level = alert_level;
            station.last_seen_ms = now_ms;
            return;
        }

        match self.slots.iter_mut().find(|slot| slot.is_none()) {
            Some(slot) => {
                *slot = Some(Station {
                    address,
                    name: name.to_string(),
                    water_level_cm,
                    temperature_c,
                    alert_level,
                    last_seen_ms: now_ms,
                });
            }
            None => tracing::warn!(station = %address, "station table full, report dropped"),
        }
    }

    /// Drop stations silent beyond [`STATION_TIMEOUT_MS`]. Returns how many
    /// were removed.
    pub fn sweep(&mut self, now_ms: u64) -> usize {
        let mut removed = 0;
        for slot in self.slots.iter_mut() {
            let stale = slot
                .as_ref()
                .is_some_and(|s| now_ms.saturating_sub(s.last_seen_ms) > STATION_TIMEOUT_MS);
            if stale {
                if let Some(station) = slot.take() {
                    tracing::info!(station = %station.address, name = %station.name, "station inactive");
                    removed += 1;
                }
            }
        }
        removed
    }

    /// Highest alert level currently reported by any station.
    pub fn max_alert_level(&self) -> u8 {
        self.iter().map(|s| s.alert_level).max().unwrap_or(0)
    }

    /// Highest water level currently reported by any station.
    pub fn max_water_level(&self) -> f32 {
        self.iter()
            .map(|s| s.water_level_cm)
            .fold(0.0, |acc, v| acc.max(v))
    }
}

impl Default for StationTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(n: u8) -> NodeAddress {
        NodeAddress::from_bytes([0x02, 0, 0, 0, 0, n])
    }

    #[test]
    fn upsert_refreshes_instead_of_duplicating() {
        let mut table = StationTable::new();
        table.upsert(addr(1), "WaterSensor", &[5.0, 19.5], 0, 100);
        table.upsert(addr(1), "WaterSensor", &[11.0, 19.0], 1, 200);
        assert_eq!(table.len(), 1);
        let station = table.iter().next().unwrap();
        assert_eq!(station.water_level_cm, 11.0);
        assert_eq!(station.alert_level, 1);
        assert_eq!(station.last_seen_ms, 200);
    }

    #[test]
    fn full_table_drops_new_reports() {
        let mut table = StationTable::new();
        for n in 0..MAX_STATIONS {
            table.upsert(addr(n as u8), "s", &[1.0], 0, 0);
        }
        table.upsert(addr(99), "late", &[1.0], 0, 0);
        assert_eq!(table.len(), MAX_STATIONS);
        assert!(table.iter().all(|s| s.address != addr(99)));
    }

    #[test]
    fn sweep_removes_stale_stations() {
        let mut table = StationTable::new();
        table.upsert(addr(1), "a", &[1.0], 0, 0);
        table.upsert(addr(2), "b", &[2.0], 0, 10_000);
        assert_eq!(table.sweep(30_000), 0);
        assert_eq!(table.sweep(30_001), 1);
        assert_eq!(table.len(), 1);
        assert_eq!(table.iter().next().unwrap().address, addr(2));
    }

    #[test]
    fn aggregates_over_stations() {
        let mut table = StationTable::new();
        assert_eq!(table.max_alert_level(), 0);
        assert_eq!(table.max_water_level(), 0.0);
        table.upsert(addr(1), "a", &[12.0], 1, 0);
        table.upsert(addr(2), "b", &[25.0], 2, 0);
        assert_eq!(table.max_alert_level(), 2);
        assert_eq!(table.max_water_level(), 25.0);
    }
}
