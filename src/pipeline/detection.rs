//! Detection mode: one instant, many stations.
//!
//! For every recording that covers the nominated instant, run the full
//! preparation chain on a window around it and extract meteor candidates.
//! A failing file is logged and skipped; it never aborts the other
//! stations.

use crate::config::Config;
use crate::dsp::beacon::BeaconLocator;
use crate::dsp::meteor::{Candidate, MeteorExtractor};
use crate::dsp::spectrogram::Spectrogram;
use crate::geo;
use crate::recording::archive::{self, MatchWindow};
use crate::recording::repository::{CoverageEntry, RecordingRepository};
use crate::recording::Recording;
use crate::report::{DetectionRow, DetectionSink};
use crate::util::Stopwatch;
use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};

/// Seconds around the instant forming the narrow search window.
const WINDOW_SECONDS: f64 = 3.0;
/// Columns added on each side for preparation and plane lookahead.
const BROADEN_COLUMNS: usize = 23;

#[derive(Debug, Clone)]
pub struct StationDetections {
    pub station: String,
    pub antenna: u16,
    pub file_start_us: i64,
    pub distance_km: Option<f64>,
    pub candidates: Vec<Candidate>,
}

#[derive(Debug)]
pub struct DetectionReport {
    pub instant: DateTime<Utc>,
    pub stations: Vec<StationDetections>,
    pub skipped_files: usize,
}

impl DetectionReport {
    pub fn total_candidates(&self) -> usize {
        self.stations.iter().map(|s| s.candidates.len()).sum()
    }
}

pub fn run(
    cfg: &Config,
    repo: &dyn RecordingRepository,
    sink: &mut dyn DetectionSink,
) -> Result<DetectionReport> {
    let instant = cfg
        .detection_time
        .context("detection mode requires detection_time")?;
    let stations = cfg.detection_stations();
    let entries = repo.list_covering(instant, &stations)?;
    info!(
        "{} recording(s) cover {} across {} station(s)",
        entries.len(),
        instant,
        stations.len()
    );

    let mut report = DetectionReport {
        instant,
        stations: Vec::new(),
        skipped_files: 0,
    };

    for entry in entries {
        match process_entry(cfg, repo, &entry, instant) {
            Ok(Some(detections)) => {
                for candidate in &detections.candidates {
                    sink.record(&row_for(&detections, candidate))?;
                }
                info!(
                    "{} antenna {}: {} candidate(s)",
                    detections.station,
                    detections.antenna,
                    detections.candidates.len()
                );
                report.stations.push(detections);
            }
            Ok(None) => report.skipped_files += 1,
            Err(err) => {
                warn!(
                    "skipping {} ({} antenna {}): {err:#}",
                    entry.path.display(),
                    entry.station,
                    entry.antenna
                );
                report.skipped_files += 1;
            }
        }
    }
    sink.flush()?;
    Ok(report)
}

fn process_entry(
    cfg: &Config,
    repo: &dyn RecordingRepository,
    entry: &CoverageEntry,
    instant: DateTime<Utc>,
) -> Result<Option<StationDetections>> {
    let _timer = Stopwatch::start("detection pipeline");
    let bytes = repo.open(&entry.path)?;
    let (wav_bytes, stamp) = if entry.is_tar {
        let (bytes, stamp) = archive::extract_wav(bytes.as_slice(), instant, MatchWindow::Strict)?;
        (bytes, Some(stamp))
    } else {
        let stamp = entry
            .path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(archive::parse_stamp);
        (bytes, stamp)
    };
    let recording = Recording::decode(&wav_bytes, stamp.as_ref())?;

    if recording.len() < cfg.spectrogram.nperseg {
        warn!(
            "{}: too short for one spectrogram segment, skipping",
            entry.path.display()
        );
        return Ok(None);
    }

    info!(
        "{} antenna {}: {:.1} s at {:.1} Hz",
        recording.station_code,
        recording.antenna_id,
        recording.duration_seconds(),
        recording.fs
    );
    let sg = Spectrogram::compute(&recording.samples, recording.fs, &cfg.spectrogram);
    let locator = BeaconLocator::default();
    let band = locator.locate(&sg);
    let mut workbench = sg.workbench();
    locator.suppress(&band, &mut workbench);

    let offset = (instant.timestamp_micros() - recording.start_us) as f64 / 1e6;
    let narrow = sg.column_at(offset - WINDOW_SECONDS)..sg.column_at(offset + WINDOW_SECONDS) + 1;
    let broadened = narrow.start.saturating_sub(BROADEN_COLUMNS)
        ..(narrow.end + BROADEN_COLUMNS).min(sg.column_count());

    let extractor = MeteorExtractor::new(cfg.extractor);
    extractor.prepare(&mut workbench, broadened, sg.freq_resolution);
    let candidates = extractor.extract(&sg, &workbench, narrow);

    let beacon_site = recording
        .beacon
        .as_ref()
        .map(|b| b.site)
        .unwrap_or(geo::BEACON);
    let distance_km = recording
        .antenna_site
        .as_ref()
        .map(|site| site.distance_km(&beacon_site));

    Ok(Some(StationDetections {
        station: recording.station_code.clone(),
        antenna: recording.antenna_id,
        file_start_us: recording.start_us,
        distance_km,
        candidates,
    }))
}

fn row_for(detections: &StationDetections, candidate: &Candidate) -> DetectionRow {
    let start = DateTime::from_timestamp_micros(detections.file_start_us)
        .unwrap_or_else(Utc::now);
    DetectionRow {
        location_code: detections.station.clone(),
        antenna_id: detections.antenna,
        file_start: start,
        meteor_count: detections.candidates.len(),
        meteor_time: start + Duration::microseconds(candidate.t_repr_us),
        fmin_hz: candidate.f_min_hz,
        fmax_hz: candidate.f_max_hz,
        distance_km: detections.distance_km,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::spectrogram::SpectrogramConfig;
    use crate::recording::repository::FsRepository;
    use crate::recording::testutil::{bra1_with, wav_bytes_with};
    use crate::report::MemorySink;
    use chrono::TimeZone;
    use rand::{Rng, SeedableRng, rngs::SmallRng};
    use std::fs;

    const FS: f64 = 5512.0;

    fn burst_recording() -> Vec<i16> {
        // Beacon tone over a weak noise floor for 14 s, plus a wideband
        // burst at t = 7 s.
        let n = (14.0 * FS) as usize;
        let mut rng = SmallRng::seed_from_u64(42);
        let mut signal: Vec<f64> = (0..n).map(|_| rng.gen_range(-30.0..30.0)).collect();
        for (i, v) in signal.iter_mut().enumerate() {
            let t = i as f64 / FS;
            *v += 8000.0 * (std::f64::consts::TAU * 1000.19 * t).sin();
        }
        let mut f = 1050.0;
        let mut phase = 0.0;
        while f <= 1150.0 {
            for (i, v) in signal.iter_mut().enumerate() {
                let t = i as f64 / FS;
                let dt = t - 7.0;
                *v += 400.0
                    * (-dt * dt / (2.0 * 0.05 * 0.05)).exp()
                    * (std::f64::consts::TAU * f * t + phase).sin();
            }
            f += 2.0;
            phase += 2.4;
        }
        signal
            .into_iter()
            .map(|v| v.clamp(i16::MIN as f64, i16::MAX as f64) as i16)
            .collect()
    }

    #[test]
    fn end_to_end_detection_writes_csv_rows() {
        let file_start = Utc.with_ymd_and_hms(2022, 2, 11, 17, 35, 0).unwrap();
        let bra1 = bra1_with(FS, file_start.timestamp_micros() as u64, "BEHAAC", 1);
        let bytes = wav_bytes_with(FS as u32, &burst_recording(), Some(&bra1), &[]);

        let tree = tempfile::tempdir().unwrap();
        let day = tree.path().join("BEHAAC/2022/02/11");
        fs::create_dir_all(&day).unwrap();
        fs::write(day.join("RAD_BEDOUR_20220211_1735_BEHAAC_SYS001.wav"), bytes).unwrap();

        let cfg = Config {
            detection_time: Some(file_start + Duration::seconds(7)),
            stations: vec!["BEHAAC".into()],
            spectrogram: SpectrogramConfig {
                nperseg: 8192,
                noverlap: 7680,
                ..Default::default()
            },
            ..Default::default()
        };

        let repo = FsRepository::new(tree.path(), true);
        let mut sink = MemorySink::default();
        let report = run(&cfg, &repo, &mut sink).unwrap();

        assert_eq!(report.skipped_files, 0);
        assert_eq!(report.stations.len(), 1);
        assert_eq!(report.total_candidates(), 1);
        assert_eq!(sink.rows.len(), 1);

        let row = &sink.rows[0];
        assert_eq!(row.location_code, "BEHAAC");
        assert_eq!(row.file_start, file_start);
        let offset = row.meteor_time - file_start;
        assert!((offset.num_milliseconds() as f64 / 1000.0 - 7.0).abs() < 0.3);
        assert!(row.fmin_hz > 1000.0 && row.fmax_hz < 1200.0);
        assert!(row.distance_km.unwrap() > 50.0);
    }

    #[test]
    fn corrupt_files_are_counted_and_skipped() {
        let tree = tempfile::tempdir().unwrap();
        let day = tree.path().join("BEHAAC/2022/02/11");
        fs::create_dir_all(&day).unwrap();
        fs::write(
            day.join("RAD_BEDOUR_20220211_1735_BEHAAC_SYS001.wav"),
            b"definitely not a wav",
        )
        .unwrap();

        let cfg = Config {
            detection_time: Some(Utc.with_ymd_and_hms(2022, 2, 11, 17, 36, 0).unwrap()),
            stations: vec!["BEHAAC".into()],
            ..Default::default()
        };
        let repo = FsRepository::new(tree.path(), true);
        let mut sink = MemorySink::default();
        let report = run(&cfg, &repo, &mut sink).unwrap();
        assert_eq!(report.skipped_files, 1);
        assert!(report.stations.is_empty());
        assert!(sink.rows.is_empty());
    }

    #[test]
    fn missing_directories_yield_an_empty_report() {
        let tree = tempfile::tempdir().unwrap();
        let cfg = Config {
            detection_time: Some(Utc.with_ymd_and_hms(2022, 2, 11, 17, 36, 0).unwrap()),
            stations: vec!["BEHAAC".into(), "BEONEA".into()],
            ..Default::default()
        };
        let repo = FsRepository::new(tree.path(), true);
        let mut sink = MemorySink::default();
        let report = run(&cfg, &repo, &mut sink).unwrap();
        assert_eq!(report.stations.len(), 0);
        assert_eq!(report.total_candidates(), 0);
    }
}
