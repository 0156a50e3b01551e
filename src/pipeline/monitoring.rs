//! Monitoring mode: walk a time range per station, estimate noise and
//! calibrator PSDs, feed the variation detector and batch-persist the new
//! samples.
//!
//! Stations are independent and processed in parallel; within one station
//! the timeline stays strictly chronological so the rolling detector keeps
//! its semantics. A twenty-day lead-in of cached values warms the detector
//! before the requested range begins.

use crate::catalog::{Catalog, PsdSample, SystemId, SystemRecord, bucket};
use crate::config::Config;
use crate::dsp::psd::{self, Spectrum};
use crate::dsp::variation::{VariationDetector, Verdict};
use crate::recording::Recording;
use crate::recording::archive::{self, MatchWindow};
use crate::recording::repository::{RecordingRepository, RepositoryError};
use crate::report::StationWarnings;
use crate::util::Stopwatch;
use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use rayon::prelude::*;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

const LEAD_IN_DAYS: i64 = 20;

#[derive(Debug, Default)]
pub struct MonitoringReport {
    pub warnings: Vec<StationWarnings>,
    pub computed: usize,
    pub reused: usize,
    pub skipped: usize,
    pub persisted: usize,
}

struct StationOutcome {
    warnings: StationWarnings,
    samples: Vec<PsdSample>,
    computed: usize,
    reused: usize,
    skipped: usize,
}

pub fn run(
    cfg: &Config,
    repo: &(dyn RecordingRepository + Sync),
    catalog: &mut dyn Catalog,
) -> Result<MonitoringReport> {
    let interval = cfg.rounded_interval();
    let window = VariationDetector::window_for_interval(interval);
    let start = cfg
        .start_date
        .context("monitoring mode requires start_date")?
        .and_hms_opt(0, 0, 0)
        .unwrap()
        .and_utc();
    let end = cfg
        .end_date
        .context("monitoring mode requires end_date")?
        .and_hms_opt(0, 0, 0)
        .unwrap()
        .and_utc();
    let lead_in = start - Duration::days(LEAD_IN_DAYS);

    let systems = catalog.systems(&cfg.stations)?;
    let ids: Vec<SystemId> = systems.iter().map(|s| s.system_id).collect();
    let history = catalog.psd_history(&ids, lead_in, end, interval)?;
    info!(
        "monitoring {} system(s) from {start} to {end}, interval {interval} min, window {window}",
        systems.len()
    );

    let outcomes: Vec<StationOutcome> = systems
        .par_iter()
        .map(|system| {
            process_system(
                cfg,
                repo,
                system,
                history.get(&system.system_id),
                interval,
                window,
                lead_in,
                start,
                end,
            )
        })
        .collect();

    let mut report = MonitoringReport::default();
    let mut samples = Vec::new();
    for outcome in outcomes {
        report.computed += outcome.computed;
        report.reused += outcome.reused;
        report.skipped += outcome.skipped;
        if !outcome.warnings.is_empty() {
            report.warnings.push(outcome.warnings.clone());
        }
        samples.extend(outcome.samples);
    }

    // Single batch commit; a failing catalog persists nothing.
    catalog
        .upsert_psd(&samples)
        .context("persisting PSD samples")?;
    report.persisted = samples.len();
    Ok(report)
}

#[allow(clippy::too_many_arguments)]
fn process_system(
    cfg: &Config,
    repo: &(dyn RecordingRepository + Sync),
    system: &SystemRecord,
    cached: Option<&BTreeMap<DateTime<Utc>, PsdSample>>,
    interval: u32,
    window: usize,
    lead_in: DateTime<Utc>,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> StationOutcome {
    let mut detector = VariationDetector::new(window, cfg.variation);
    let mut outcome = StationOutcome {
        warnings: StationWarnings::new(format!("{}{}", system.location_code, system.antenna)),
        samples: Vec::new(),
        computed: 0,
        reused: 0,
        skipped: 0,
    };
    let step = Duration::minutes(interval as i64);

    // Lead-in: warm the detector from cached values only, no decoding and
    // no warnings.
    let mut requested = lead_in;
    while requested < start {
        if let Some(sample) = cached.and_then(|h| h.get(&bucket(requested, interval))) {
            detector.observe_noise(sample.noise_psd);
            detector.observe_calibrator(sample.calibrator_psd);
        }
        requested += step;
    }

    while requested < end {
        let key = bucket(requested, interval);
        if !cfg.overwrite
            && let Some(sample) = cached.and_then(|h| h.get(&key))
        {
            observe(&mut detector, &mut outcome.warnings, sample);
            outcome.reused += 1;
            requested += step;
            continue;
        }

        match measure(cfg, repo, system, requested) {
            Ok(Some(estimate)) => {
                let sample = PsdSample {
                    system_id: system.system_id,
                    timestamp: requested,
                    noise_psd: estimate.noise_psd,
                    calibrator_psd: estimate.calibrator_psd,
                    calibrator_freq_hz: estimate.calibrator_freq_hz,
                };
                observe(&mut detector, &mut outcome.warnings, &sample);
                outcome.samples.push(sample);
                outcome.computed += 1;
            }
            Ok(None) => outcome.skipped += 1,
            Err(MeasureError::DayMissing) => {
                debug!(
                    "{} antenna {}: no archive day around {requested}",
                    system.location_code, system.antenna
                );
                outcome.skipped += 1;
                requested += Duration::days(1);
                continue;
            }
            Err(MeasureError::Other(err)) => {
                warn!(
                    "{} antenna {} at {requested}: {err:#}",
                    system.location_code, system.antenna
                );
                outcome.skipped += 1;
            }
        }
        requested += step;
    }
    outcome
}

enum MeasureError {
    /// The whole archive day is absent; advance by a day instead of an
    /// interval.
    DayMissing,
    Other(anyhow::Error),
}

fn measure(
    cfg: &Config,
    repo: &(dyn RecordingRepository + Sync),
    system: &SystemRecord,
    requested: DateTime<Utc>,
) -> std::result::Result<Option<psd::PsdEstimate>, MeasureError> {
    let entry = match repo.locate(
        &system.location_code,
        system.antenna,
        requested,
        MatchWindow::Relaxed,
    ) {
        Ok(Some(entry)) => entry,
        Ok(None) => return Ok(None),
        Err(RepositoryError::DirectoryNotFound(_)) => return Err(MeasureError::DayMissing),
        Err(err) => return Err(MeasureError::Other(err.into())),
    };

    let inner = || -> Result<psd::PsdEstimate> {
        let _timer = Stopwatch::start("psd estimate");
        let bytes = repo.open(&entry.path)?;
        let (wav_bytes, stamp) = if entry.is_tar {
            let (bytes, stamp) =
                archive::extract_wav(bytes.as_slice(), requested, MatchWindow::Relaxed)?;
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
        let spectrum = Spectrum::compute(&recording.samples, recording.fs);
        Ok(psd::estimate(&spectrum, &cfg.psd))
    };
    inner().map(Some).map_err(MeasureError::Other)
}

fn observe(detector: &mut VariationDetector, warnings: &mut StationWarnings, sample: &PsdSample) {
    match detector.observe_noise(sample.noise_psd) {
        Verdict::Increase => warnings.noise_increase.push(sample.timestamp),
        Verdict::Decrease => warnings.noise_decrease.push(sample.timestamp),
        Verdict::Normal => {}
    }
    if detector.observe_calibrator(sample.calibrator_psd) != Verdict::Normal {
        warnings
            .calibrator
            .push((sample.timestamp, sample.calibrator_freq_hz));
    }
}
