//! Catalog/history store contract: station identities, PSD history and file
//! coverage. Relational backends live outside this crate; the in-memory
//! implementation backs tests and standalone runs.

use chrono::{DateTime, Duration, DurationRound, Utc};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use thiserror::Error;

pub type SystemId = u32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemRecord {
    pub system_id: SystemId,
    pub location_code: String,
    pub antenna: u16,
}

/// One monitored PSD measurement. `noise_psd` and `calibrator_psd` are null
/// when the estimate could not be produced.
#[derive(Debug, Clone, PartialEq)]
pub struct PsdSample {
    pub system_id: SystemId,
    pub timestamp: DateTime<Utc>,
    pub noise_psd: Option<f64>,
    pub calibrator_psd: Option<f64>,
    pub calibrator_freq_hz: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileCoverage {
    pub system_id: SystemId,
    pub location_code: String,
    pub antenna: u16,
    pub start_us: i64,
    pub end_us: i64,
    pub path: PathBuf,
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("catalog unavailable: {0}")]
    Unavailable(String),
}

/// Interval-bucketed PSD history per system.
pub type PsdHistory = HashMap<SystemId, BTreeMap<DateTime<Utc>, PsdSample>>;

pub trait Catalog {
    /// Known systems; an empty station list selects all of them.
    fn systems(&self, stations: &[String]) -> Result<Vec<SystemRecord>, CatalogError>;

    /// PSD samples in `[from, to)` grouped to the interval grid.
    fn psd_history(
        &self,
        system_ids: &[SystemId],
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        interval_minutes: u32,
    ) -> Result<PsdHistory, CatalogError>;

    /// Upsert by `(system_id, timestamp)`. All samples are persisted or none
    /// are.
    fn upsert_psd(&mut self, samples: &[PsdSample]) -> Result<(), CatalogError>;

    /// Per-station recordings overlapping `[start_us, end_us]`.
    fn file_coverage(
        &self,
        system_ids: &[SystemId],
        start_us: i64,
        end_us: i64,
    ) -> Result<Vec<FileCoverage>, CatalogError>;
}

pub fn bucket(timestamp: DateTime<Utc>, interval_minutes: u32) -> DateTime<Utc> {
    timestamp
        .duration_trunc(Duration::minutes(interval_minutes.max(1) as i64))
        .unwrap_or(timestamp)
}

#[derive(Debug, Default)]
pub struct MemoryCatalog {
    systems: Vec<SystemRecord>,
    history: HashMap<SystemId, BTreeMap<i64, PsdSample>>,
    files: Vec<FileCoverage>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_system(&mut self, location_code: &str, antenna: u16) -> SystemId {
        if let Some(existing) = self
            .systems
            .iter()
            .find(|s| s.location_code == location_code && s.antenna == antenna)
        {
            return existing.system_id;
        }
        let system_id = self.systems.len() as SystemId + 1;
        self.systems.push(SystemRecord {
            system_id,
            location_code: location_code.to_string(),
            antenna,
        });
        system_id
    }

    pub fn add_file(&mut self, coverage: FileCoverage) {
        self.files.push(coverage);
    }

    pub fn sample_count(&self) -> usize {
        self.history.values().map(|h| h.len()).sum()
    }
}

impl Catalog for MemoryCatalog {
    fn systems(&self, stations: &[String]) -> Result<Vec<SystemRecord>, CatalogError> {
        Ok(self
            .systems
            .iter()
            .filter(|s| stations.is_empty() || stations.contains(&s.location_code))
            .cloned()
            .collect())
    }

    fn psd_history(
        &self,
        system_ids: &[SystemId],
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        interval_minutes: u32,
    ) -> Result<PsdHistory, CatalogError> {
        let mut out: PsdHistory = HashMap::new();
        for &system_id in system_ids {
            let Some(series) = self.history.get(&system_id) else {
                continue;
            };
            let grouped = out.entry(system_id).or_default();
            for sample in series.values() {
                if sample.timestamp < from || sample.timestamp >= to {
                    continue;
                }
                grouped
                    .entry(bucket(sample.timestamp, interval_minutes))
                    .or_insert_with(|| sample.clone());
            }
        }
        Ok(out)
    }

    fn upsert_psd(&mut self, samples: &[PsdSample]) -> Result<(), CatalogError> {
        for sample in samples {
            self.history
                .entry(sample.system_id)
                .or_default()
                .insert(sample.timestamp.timestamp_micros(), sample.clone());
        }
        Ok(())
    }

    fn file_coverage(
        &self,
        system_ids: &[SystemId],
        start_us: i64,
        end_us: i64,
    ) -> Result<Vec<FileCoverage>, CatalogError> {
        Ok(self
            .files
            .iter()
            .filter(|f| system_ids.contains(&f.system_id))
            .filter(|f| f.start_us <= end_us && f.end_us >= start_us)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2022, 3, 15, h, m, 0).unwrap()
    }

    fn sample(system_id: SystemId, timestamp: DateTime<Utc>, noise: f64) -> PsdSample {
        PsdSample {
            system_id,
            timestamp,
            noise_psd: Some(noise),
            calibrator_psd: None,
            calibrator_freq_hz: None,
        }
    }

    #[test]
    fn registration_is_idempotent() {
        let mut catalog = MemoryCatalog::new();
        let a = catalog.register_system("BEHAAC", 1);
        let b = catalog.register_system("BEHAAC", 1);
        let c = catalog.register_system("BEHAAC", 2);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(catalog.systems(&[]).unwrap().len(), 2);
        assert_eq!(
            catalog.systems(&["BEHAAC".to_string()]).unwrap().len(),
            2
        );
        assert!(catalog.systems(&["BEDINA".to_string()]).unwrap().is_empty());
    }

    #[test]
    fn upsert_replaces_by_system_and_timestamp() {
        let mut catalog = MemoryCatalog::new();
        let id = catalog.register_system("BEHAAC", 1);
        catalog.upsert_psd(&[sample(id, at(10, 0), 1.0)]).unwrap();
        catalog.upsert_psd(&[sample(id, at(10, 0), 2.0)]).unwrap();
        assert_eq!(catalog.sample_count(), 1);

        let history = catalog
            .psd_history(&[id], at(9, 0), at(11, 0), 60)
            .unwrap();
        assert_eq!(history[&id][&at(10, 0)].noise_psd, Some(2.0));
    }

    #[test]
    fn history_is_bucketed_and_range_limited() {
        let mut catalog = MemoryCatalog::new();
        let id = catalog.register_system("BEHAAC", 1);
        catalog
            .upsert_psd(&[
                sample(id, at(10, 2), 1.0),
                sample(id, at(11, 0), 2.0),
                sample(id, at(13, 0), 3.0),
            ])
            .unwrap();

        let history = catalog
            .psd_history(&[id], at(10, 0), at(12, 0), 60)
            .unwrap();
        let series = &history[&id];
        assert_eq!(series.len(), 2);
        // 10:02 lands in the 10:00 bucket.
        assert_eq!(series[&at(10, 0)].noise_psd, Some(1.0));
        assert_eq!(series[&at(11, 0)].noise_psd, Some(2.0));
    }

    #[test]
    fn buckets_snap_to_the_interval_grid() {
        assert_eq!(bucket(at(10, 44), 30), at(10, 30));
        assert_eq!(bucket(at(10, 30), 30), at(10, 30));
        assert_eq!(bucket(at(10, 59), 60), at(10, 0));
    }

    #[test]
    fn file_coverage_matches_overlaps_only() {
        let mut catalog = MemoryCatalog::new();
        let id = catalog.register_system("BEHAAC", 1);
        catalog.add_file(FileCoverage {
            system_id: id,
            location_code: "BEHAAC".into(),
            antenna: 1,
            start_us: 1_000_000,
            end_us: 2_000_000,
            path: PathBuf::from("a.wav"),
        });

        assert_eq!(
            catalog.file_coverage(&[id], 1_500_000, 3_000_000).unwrap().len(),
            1
        );
        assert!(catalog.file_coverage(&[id], 2_000_001, 3_000_000).unwrap().is_empty());
        assert!(catalog.file_coverage(&[99], 0, i64::MAX).unwrap().is_empty());
    }
}
