//! Run configuration, loaded from a JSON file. Date handling stays at this
//! boundary: the processing core only ever sees microsecond instants.

use crate::dsp::meteor::ExtractorConfig;
use crate::dsp::psd::PsdConfig;
use crate::dsp::spectrogram::SpectrogramConfig;
use crate::dsp::variation::VariationConfig;
use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Instant to hunt meteors around; selects detection mode.
    pub detection_time: Option<DateTime<Utc>>,
    /// Station whose distance column anchors the report.
    pub reference_station: Option<String>,
    pub stations: Vec<String>,
    pub file_directory: PathBuf,
    pub csv_destination: Option<PathBuf>,
    /// Plain wav tree instead of hour tar archives.
    pub is_wav_tree: bool,
    /// Monitoring sampling interval, minutes.
    pub interval_minutes: u32,
    /// Monitoring range; selects monitoring mode.
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    /// Recompute PSD values already present in the catalog.
    pub overwrite: bool,
    /// Plot bounds, carried for the plotting collaborator.
    pub fmin: Option<f64>,
    pub fmax: Option<f64>,
    /// Summary recipient, carried for the mail collaborator.
    pub email: Option<String>,
    pub spectrogram: SpectrogramConfig,
    pub extractor: ExtractorConfig,
    pub psd: PsdConfig,
    pub variation: VariationConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            detection_time: None,
            reference_station: None,
            stations: Vec::new(),
            file_directory: PathBuf::from("recordings/wav"),
            csv_destination: None,
            is_wav_tree: true,
            interval_minutes: 60,
            start_date: None,
            end_date: None,
            overwrite: false,
            fmin: None,
            fmax: None,
            email: None,
            spectrogram: SpectrogramConfig::default(),
            extractor: ExtractorConfig::default(),
            psd: PsdConfig::default(),
            variation: VariationConfig::default(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("parsing config {}", path.display()))
    }

    /// Sampling interval snapped down to a multiple of five minutes.
    pub fn rounded_interval(&self) -> u32 {
        let rounded = self.interval_minutes - self.interval_minutes % 5;
        rounded.max(5)
    }

    /// Stations for detection mode, reference station first.
    pub fn detection_stations(&self) -> Vec<String> {
        let mut out = Vec::new();
        if let Some(reference) = &self.reference_station {
            out.push(reference.clone());
        }
        for station in &self.stations {
            if !out.contains(station) {
                out.push(station.clone());
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_minimal_monitoring_config() {
        let json = r#"{
            "stations": ["BEHAAC", "BEOUDS"],
            "file_directory": "/data/wav",
            "interval_minutes": 47,
            "start_date": "2022-03-01",
            "end_date": "2022-03-20",
            "overwrite": true
        }"#;
        let cfg: Config = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.stations.len(), 2);
        assert_eq!(cfg.rounded_interval(), 45);
        assert!(cfg.overwrite);
        assert!(cfg.detection_time.is_none());
        assert_eq!(cfg.spectrogram.nperseg, 16384);
        assert_eq!(cfg.psd.calibrator_search_hi_hz, 1750.0);
    }

    #[test]
    fn parses_a_detection_config_with_overrides() {
        let json = r#"{
            "detection_time": "2022-02-11T17:36:30Z",
            "reference_station": "BEHUMA",
            "stations": ["BEHAAC", "BEHUMA"],
            "csv_destination": "/tmp/out",
            "spectrogram": { "nperseg": 4096, "noverlap": 3584 },
            "extractor": { "plane_width_limit": 20 }
        }"#;
        let cfg: Config = serde_json::from_str(json).unwrap();
        assert!(cfg.detection_time.is_some());
        assert_eq!(cfg.detection_stations(), ["BEHUMA", "BEHAAC"]);
        assert_eq!(cfg.spectrogram.nperseg, 4096);
        assert_eq!(cfg.extractor.plane_width_limit, 20);
        assert_eq!(cfg.extractor.narrow_max_width, 6);
    }

    #[test]
    fn config_round_trips_through_json() {
        let cfg = Config {
            stations: vec!["BEHAAC".into()],
            interval_minutes: 30,
            overwrite: true,
            email: Some("ops@example.org".into()),
            ..Default::default()
        };
        let text = serde_json::to_string_pretty(&cfg).unwrap();
        let back: Config = serde_json::from_str(&text).unwrap();
        assert_eq!(back.stations, cfg.stations);
        assert_eq!(back.interval_minutes, 30);
        assert!(back.overwrite);
        assert_eq!(back.email.as_deref(), Some("ops@example.org"));
        assert_eq!(back.spectrogram, cfg.spectrogram);
        assert_eq!(back.extractor, cfg.extractor);
    }

    #[test]
    fn load_reports_missing_and_malformed_files() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Config::load(&dir.path().join("absent.json")).is_err());
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(Config::load(&path).is_err());
    }

    #[test]
    fn interval_rounding_has_a_floor() {
        let cfg = Config {
            interval_minutes: 3,
            ..Default::default()
        };
        assert_eq!(cfg.rounded_interval(), 5);
        let cfg = Config {
            interval_minutes: 60,
            ..Default::default()
        };
        assert_eq!(cfg.rounded_interval(), 60);
    }
}
