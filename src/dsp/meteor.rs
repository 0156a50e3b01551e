//! Meteor-echo extraction from a prepared workbench.
//!
//! Meteors are short wideband reflections: tall, narrow components in the
//! spectrogram. Plane echoes drift slowly and masquerade as wide meteors;
//! they are told apart by following the component outward column by column
//! and accumulating how far a dominant feature persists.

use crate::dsp::spectrogram::Spectrogram;
use crate::dsp::workbench::{COMPONENT_THRESHOLD, Component, Workbench};
use crate::util::{Interpolation, percentile, power_to_db};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::ops::Range;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractorConfig {
    /// Candidates whose frequency extent leaves this band are rejected.
    pub band_lo_hz: f64,
    pub band_hi_hz: f64,
    /// A component narrower than this and taller than `narrow_min_height`
    /// is a meteor without further checks.
    pub narrow_max_width: usize,
    pub narrow_min_height: usize,
    /// Per-column percentile kept during preparation.
    pub percentile: f64,
    /// Minimum component extent, in Hz, to survive preparation.
    pub min_component_hz: f64,
    /// Plane test: columns scanned on each side, accumulated-width limit,
    /// consecutive-miss limit and row-band margin.
    pub plane_scan_columns: usize,
    pub plane_width_limit: usize,
    pub plane_miss_limit: usize,
    pub band_margin: usize,
    /// Percentile below which the refinement profile is floored.
    pub refine_percentile: f64,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            band_lo_hz: 800.0,
            band_hi_hz: 1400.0,
            narrow_max_width: 6,
            narrow_min_height: 50,
            percentile: 95.0,
            min_component_hz: 6.0,
            plane_scan_columns: 22,
            plane_width_limit: 16,
            plane_miss_limit: 2,
            band_margin: 3,
            refine_percentile: 85.0,
        }
    }
}

/// One detected meteor echo. Times are microseconds from the recording
/// start; the row/column slices index the spectrogram grid.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub t_start_us: i64,
    pub t_stop_us: i64,
    pub t_repr_us: i64,
    pub f_min_hz: f64,
    pub f_max_hz: f64,
    pub rows: Range<usize>,
    pub cols: Range<usize>,
}

/// 27x7 kernel amplifying tall vertical features and penalising persistent
/// horizontal neighbours.
pub fn amplify_kernel() -> Array2<f64> {
    let mut k = Array2::<f64>::zeros((27, 7));
    for row in [0, 1, 25, 26] {
        k[[row, 3]] = 50.0;
    }
    for row in [12, 13, 14] {
        k[[row, 0]] = -1.5;
        k[[row, 6]] = -1.5;
    }
    k
}

/// 3x3 vertical smoothing kernel.
pub fn smooth_kernel() -> Array2<f64> {
    let mut k = Array2::<f64>::zeros((3, 3));
    for row in 0..3 {
        k[[row, 1]] = 1.0 / 3.0;
    }
    k
}

pub struct MeteorExtractor {
    cfg: ExtractorConfig,
}

impl MeteorExtractor {
    pub fn new(cfg: ExtractorConfig) -> Self {
        Self { cfg }
    }

    /// Detection preparation over `range`: amplify, keep only the strongest
    /// per-column cells, drop components shorter than the minimum frequency
    /// extent, then smooth.
    pub fn prepare(&self, wb: &mut Workbench, range: Range<usize>, freq_resolution: f64) {
        let min_height = (self.cfg.min_component_hz / freq_resolution).ceil() as usize;
        wb.convolve(&amplify_kernel(), 1, range.clone());
        wb.filter_by_percentile(self.cfg.percentile, range.clone());
        wb.delete_short_components(min_height, range.clone());
        wb.convolve(&smooth_kernel(), 1, range);
    }

    /// Classify the components of the (prepared) workbench inside `range`.
    /// The workbench may extend beyond the range; the plane test reads the
    /// neighbouring columns for its outward scan.
    pub fn extract(&self, sg: &Spectrogram, wb: &Workbench, range: Range<usize>) -> Vec<Candidate> {
        let mut candidates = Vec::new();
        for component in wb.label_components(COMPONENT_THRESHOLD, range.clone()) {
            if !self.in_band(sg, &component) {
                continue;
            }
            let (w, h) = (component.width(), component.height());
            let accepted = if w < self.cfg.narrow_max_width && h > self.cfg.narrow_min_height {
                true
            } else if w > 1 {
                !self.is_plane(wb, &component)
            } else {
                false
            };
            if accepted {
                candidates.push(self.refine(sg, &component));
            }
        }
        debug!("{} candidate(s) in columns {range:?}", candidates.len());
        candidates
    }

    fn in_band(&self, sg: &Spectrogram, component: &Component) -> bool {
        let f_lo = sg.freqs[component.rows.start];
        let f_hi = sg
            .freqs
            .get(component.rows.end)
            .copied()
            .unwrap_or(sg.fs / 2.0);
        f_lo >= self.cfg.band_lo_hz && f_hi <= self.cfg.band_hi_hz
    }

    /// Outward scan on both sides of the component. Planes leave a dominant
    /// feature in most neighbouring columns; meteors do not.
    fn is_plane(&self, wb: &Workbench, component: &Component) -> bool {
        let margin = self.cfg.band_margin;
        let mut total_width = 0usize;

        for forward in [false, true] {
            let mut lo = component.rows.start.saturating_sub(margin);
            let mut hi = (component.rows.end + margin).min(wb.rows());
            let mut misses = 0usize;

            for step in 0..self.cfg.plane_scan_columns {
                let col = if forward {
                    component.cols.end as isize + step as isize
                } else {
                    component.cols.start as isize - 1 - step as isize
                };
                if col < 0 || col >= wb.cols() as isize {
                    break;
                }

                misses += 1;
                if let Some((run_lo, run_hi)) = merged_run(wb, col as usize, lo..hi) {
                    let band_height = (hi - lo) as f64;
                    if (run_hi - run_lo) as f64 > 0.7 * band_height {
                        total_width += 1;
                        misses = misses.saturating_sub(2);
                        let band_base = lo;
                        lo = (band_base + run_lo).saturating_sub(margin);
                        hi = (band_base + run_hi + margin).min(wb.rows());
                        if total_width >= self.cfg.plane_width_limit {
                            return true;
                        }
                    }
                }
                if misses >= self.cfg.plane_miss_limit {
                    break;
                }
            }
        }
        total_width >= self.cfg.plane_width_limit
    }

    /// Refine the frequency extent on the original spectrogram: sum the dB
    /// columns across the component's time slice, floor everything below the
    /// refinement percentile, then walk outward from the component's middle
    /// row until the profile has gone quiet twice.
    fn refine(&self, sg: &Spectrogram, component: &Component) -> Candidate {
        let bins = sg.row_count();
        let mut profile = vec![0.0f64; bins];
        for col in component.cols.clone() {
            for (row, acc) in profile.iter_mut().enumerate() {
                *acc += power_to_db(sg.power()[[row, col]]);
            }
        }

        let cutoff = percentile(&profile, self.cfg.refine_percentile, Interpolation::Linear);
        let floor = profile.iter().copied().fold(f64::INFINITY, f64::min);
        for v in profile.iter_mut() {
            if *v <= cutoff {
                *v = floor;
            }
        }

        let height = component.height();
        let walk = |start: usize, forward: bool| -> usize {
            let mut idx = start as isize;
            let mut hits = 0i32;
            let limit = bins as isize;
            while hits < 2 && idx > 0 && idx < limit {
                let v = profile[idx as usize];
                if v == floor {
                    hits += 1;
                } else if v > 0.0 {
                    hits -= 1;
                }
                idx += if forward { 1 } else { -1 };
            }
            idx.clamp(0, limit - 1) as usize
        };

        let lower = walk(component.rows.start + height / 2, false);
        let upper = walk(component.rows.start + height.div_ceil(2), true);

        let last_col = sg.column_count() - 1;
        let mid_col = (component.cols.start + component.width() / 2).min(last_col);
        let to_us = |seconds: f64| (seconds * 1e6).round() as i64;

        Candidate {
            t_start_us: to_us(sg.times[component.cols.start]),
            t_stop_us: to_us(sg.times[component.cols.end.min(last_col)]),
            t_repr_us: to_us(sg.times[mid_col]),
            f_min_hz: sg.freqs[lower].max(self.cfg.band_lo_hz),
            f_max_hz: sg.freqs[upper].min(self.cfg.band_hi_hz),
            rows: component.rows.clone(),
            cols: component.cols.clone(),
        }
    }
}

/// Runs of above-threshold cells in one column of the band, merged while
/// the gaps stay within a quarter of the band height; the returned extent
/// (relative to `band.start`) is the last merge group.
fn merged_run(wb: &Workbench, col: usize, band: Range<usize>) -> Option<(usize, usize)> {
    let band = band.start.min(wb.rows())..band.end.min(wb.rows());
    let height = band.len();
    let mut runs: Vec<(usize, usize)> = Vec::new();
    let mut current: Option<usize> = None;
    for (i, row) in band.clone().enumerate() {
        let set = wb.data()[[row, col]] > COMPONENT_THRESHOLD;
        match (set, current) {
            (true, None) => current = Some(i),
            (false, Some(start)) => {
                runs.push((start, i));
                current = None;
            }
            _ => {}
        }
    }
    if let Some(start) = current {
        runs.push((start, height));
    }
    if runs.is_empty() {
        return None;
    }

    let gap_tolerance = 0.25 * height as f64;
    let (mut merged_lo, mut merged_hi) = runs[0];
    for &(start, end) in &runs[1..] {
        if (start - merged_hi) as f64 > gap_tolerance {
            merged_lo = start;
        }
        merged_hi = end;
    }
    Some((merged_lo, merged_hi))
}
