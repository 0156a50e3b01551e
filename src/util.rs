// Shared numeric helpers for the DSP pipeline.

// Minimum power value to avoid log(0) in dB conversions.
const POWER_EPSILON: f64 = 1.0e-30;

// Floor value (dB) below which magnitudes are clamped.
pub const DB_FLOOR: f64 = -300.0;

// Convert linear power to decibels with a hard floor.
#[inline(always)]
pub fn power_to_db(power: f64) -> f64 {
    if power > POWER_EPSILON {
        (10.0 * power.log10()).max(DB_FLOOR)
    } else {
        DB_FLOOR
    }
}

// Interpolation modes for `percentile`, matching the conventions of the
// quartile tests (nearest-rank below / above) and the column filters (linear).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interpolation {
    Linear,
    Lower,
    Higher,
}

/// q-th percentile of `values` (q in 0..=100). `values` must be non-empty.
pub fn percentile(values: &[f64], q: f64, interpolation: Interpolation) -> f64 {
    assert!(!values.is_empty(), "percentile of empty slice");
    let mut sorted: Vec<f64> = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    percentile_sorted(&sorted, q, interpolation)
}

/// Same as `percentile`, but assumes `sorted` is already ascending.
pub fn percentile_sorted(sorted: &[f64], q: f64, interpolation: Interpolation) -> f64 {
    assert!(!sorted.is_empty(), "percentile of empty slice");
    let rank = (sorted.len() - 1) as f64 * (q / 100.0).clamp(0.0, 1.0);
    let below = rank.floor() as usize;
    let above = rank.ceil() as usize;
    match interpolation {
        Interpolation::Lower => sorted[below],
        Interpolation::Higher => sorted[above],
        Interpolation::Linear => {
            let frac = rank - below as f64;
            sorted[below] + (sorted[above] - sorted[below]) * frac
        }
    }
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

// Population variance, the convention used by the block statistics.
pub fn variance(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let m = mean(values);
    values.iter().map(|v| (v - m) * (v - m)).sum::<f64>() / values.len() as f64
}

pub fn median(values: &[f64]) -> f64 {
    percentile(values, 50.0, Interpolation::Linear)
}

/// Logs the elapsed time of a pipeline stage when dropped.
pub struct Stopwatch {
    label: &'static str,
    started: std::time::Instant,
}

impl Stopwatch {
    pub fn start(label: &'static str) -> Self {
        Self {
            label,
            started: std::time::Instant::now(),
        }
    }

    pub fn elapsed_ms(&self) -> u128 {
        self.started.elapsed().as_millis()
    }
}

impl Drop for Stopwatch {
    fn drop(&mut self) {
        tracing::debug!("{} took {} ms", self.label, self.elapsed_ms());
    }
}
