//! Output sinks for detection results and monitoring summaries. The core
//! pipeline writes rows into a sink; where they end up (CSV file, memory,
//! a future mailer) is the sink's business.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};

/// One CSV line per detected meteor.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionRow {
    pub location_code: String,
    pub antenna_id: u16,
    pub file_start: DateTime<Utc>,
    pub meteor_count: usize,
    pub meteor_time: DateTime<Utc>,
    pub fmin_hz: f64,
    pub fmax_hz: f64,
    pub distance_km: Option<f64>,
}

pub trait DetectionSink {
    fn record(&mut self, row: &DetectionRow) -> Result<()>;
    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

const CSV_HEADER: [&str; 8] = [
    "location_code",
    "antenna_id",
    "file_start",
    "meteor_count",
    "meteor_time",
    "fmin",
    "fmax",
    "distance_km",
];

pub struct CsvSink {
    writer: csv::Writer<std::fs::File>,
    pub path: PathBuf,
}

impl CsvSink {
    /// Create `<basename>.csv` in `directory`, appending ` (n)` while the
    /// name is taken.
    pub fn create(directory: &Path, basename: &str) -> Result<Self> {
        let mut path = directory.join(format!("{basename}.csv"));
        let mut attempt = 0;
        while path.exists() {
            attempt += 1;
            path = directory.join(format!("{basename} ({attempt}).csv"));
        }
        let mut writer = csv::Writer::from_path(&path)
            .with_context(|| format!("creating {}", path.display()))?;
        writer.write_record(CSV_HEADER)?;
        Ok(Self { writer, path })
    }
}

impl DetectionSink for CsvSink {
    fn record(&mut self, row: &DetectionRow) -> Result<()> {
        self.writer.write_record([
            row.location_code.clone(),
            row.antenna_id.to_string(),
            row.file_start.format("%Y-%m-%dT%H:%M:%S").to_string(),
            row.meteor_count.to_string(),
            row.meteor_time.format("%Y-%m-%dT%H:%M:%S%.6f").to_string(),
            format!("{:.1}", row.fmin_hz),
            format!("{:.1}", row.fmax_hz),
            row.distance_km.map(|d| format!("{d:.1}")).unwrap_or_default(),
        ])?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Collects rows in memory; used by tests and dry runs.
#[derive(Debug, Default)]
#[cfg_attr(not(test), allow(dead_code))]
pub struct MemorySink {
    pub rows: Vec<DetectionRow>,
}

impl DetectionSink for MemorySink {
    fn record(&mut self, row: &DetectionRow) -> Result<()> {
        self.rows.push(row.clone());
        Ok(())
    }
}

/// Per-station monitoring warnings, ready for the summary report.
#[derive(Debug, Clone, Default)]
pub struct StationWarnings {
    pub title: String,
    pub noise_increase: Vec<DateTime<Utc>>,
    pub noise_decrease: Vec<DateTime<Utc>>,
    pub calibrator: Vec<(DateTime<Utc>, Option<f64>)>,
}

impl StationWarnings {
    pub fn new(title: String) -> Self {
        Self {
            title,
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.noise_increase.is_empty()
            && self.noise_decrease.is_empty()
            && self.calibrator.is_empty()
    }
}

/// Plain-text monitoring summary; delivery is someone else's job.
pub fn render_summary(stations: &[StationWarnings]) -> String {
    let mut out = String::new();
    for station in stations {
        out.push_str(&format!("\n----------{}----------\n", station.title));
        out.push_str("NOISE:\n");
        for t in &station.noise_decrease {
            out.push_str(&format!("significant noise drop at {}\n", t.format("%Y-%m-%d %H:%M")));
        }
        for t in &station.noise_increase {
            out.push_str(&format!(
                "significant noise increase at {}\n",
                t.format("%Y-%m-%d %H:%M")
            ));
        }
        out.push_str("CALIBRATOR:\n");
        for (t, freq) in &station.calibrator {
            match freq {
                Some(f) => out.push_str(&format!(
                    "significant calibrator psd variation at {} ({f:.1} Hz)\n",
                    t.format("%Y-%m-%d %H:%M")
                )),
                None => out.push_str(&format!(
                    "significant calibrator psd variation at {}\n",
                    t.format("%Y-%m-%d %H:%M")
                )),
            }
        }
    }
    out
}
