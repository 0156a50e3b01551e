//! Short-time Fourier magnitude spectrograms.
//!
//! Conventions follow the classic overlapped-segment estimate: periodic
//! window, per-segment mean removal, one-sided density scaling
//! `|X|^2 / (fs * sum(w^2))` with interior-bin doubling, and segment-centre
//! time stamps. The whole matrix is then normalised so its maximum equals
//! `max_norm`; the fixed thresholds used downstream (0.01, 0.002) assume
//! this normalisation.

use crate::dsp::workbench::Workbench;
use ndarray::Array2;
use parking_lot::RwLock;
use realfft::RealFftPlanner;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, OnceLock};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowKind {
    Hann,
    Hamming,
}

impl WindowKind {
    pub(crate) fn coefficients(self, len: usize, periodic: bool) -> Vec<f64> {
        if len <= 1 {
            return vec![1.0; len];
        }
        let denom = if periodic { len } else { len - 1 } as f64;
        match self {
            Self::Hann => cosine_window(len, &[0.5, -0.5], denom),
            Self::Hamming => cosine_window(len, &[0.54, -0.46], denom),
        }
    }
}

fn cosine_window(len: usize, c: &[f64], denom: f64) -> Vec<f64> {
    let step = core::f64::consts::TAU / denom;
    (0..len)
        .map(|n| {
            let phi = n as f64 * step;
            c.iter()
                .enumerate()
                .fold(0.0, |acc, (k, &v)| acc + v * (phi * k as f64).cos())
        })
        .collect()
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
struct WindowKey {
    kind: WindowKind,
    len: usize,
    periodic: bool,
}

struct WindowCache(RwLock<FxHashMap<WindowKey, Arc<[f64]>>>);

impl WindowCache {
    fn get(kind: WindowKind, len: usize, periodic: bool) -> Arc<[f64]> {
        static INSTANCE: OnceLock<WindowCache> = OnceLock::new();
        let cache = INSTANCE.get_or_init(|| WindowCache(RwLock::new(FxHashMap::default())));
        if len == 0 {
            return Arc::from([]);
        }
        let key = WindowKey {
            kind,
            len,
            periodic,
        };
        if let Some(v) = cache.0.read().get(&key) {
            return v.clone();
        }
        cache
            .0
            .write()
            .entry(key)
            .or_insert_with(|| Arc::from(kind.coefficients(len, periodic)))
            .clone()
    }
}

// Cached window coefficients; segment windows recur for every column and
// every recording of the same grid.
fn window(kind: WindowKind, len: usize, periodic: bool) -> Arc<[f64]> {
    WindowCache::get(kind, len, periodic)
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpectrogramConfig {
    pub nperseg: usize,
    pub noverlap: usize,
    pub window: WindowKind,
    pub max_norm: f64,
}

impl Default for SpectrogramConfig {
    fn default() -> Self {
        Self {
            nperseg: 16384,
            noverlap: 14488,
            window: WindowKind::Hamming,
            max_norm: 1.0,
        }
    }
}

impl SpectrogramConfig {
    pub fn hop(&self) -> usize {
        debug_assert!(self.noverlap < self.nperseg);
        self.nperseg - self.noverlap
    }

    pub fn freq_bins(&self) -> usize {
        self.nperseg / 2 + 1
    }

    /// Number of columns a recording of `n` samples produces.
    pub fn column_count(&self, n: usize) -> usize {
        if n < self.nperseg {
            0
        } else {
            (n - self.nperseg) / self.hop() + 1
        }
    }
}

/// A computed magnitude spectrogram. `power` is `F x T`, normalised so the
/// maximum equals `max_norm`; rows are frequencies, columns time segments.
#[derive(Debug, Clone)]
pub struct Spectrogram {
    pub freqs: Vec<f64>,
    pub times: Vec<f64>,
    power: Array2<f64>,
    pub freq_resolution: f64,
    pub fs: f64,
    hop: usize,
}

impl Spectrogram {
    /// Pure function of the input samples; inputs shorter than one segment
    /// are a caller bug.
    pub fn compute(samples: &[i16], fs: f64, cfg: &SpectrogramConfig) -> Self {
        assert!(fs > 0.0, "sample rate must be positive");
        assert!(
            cfg.noverlap < cfg.nperseg,
            "overlap must be below segment size"
        );
        assert!(
            samples.len() >= cfg.nperseg,
            "recording shorter than one segment ({} < {})",
            samples.len(),
            cfg.nperseg
        );

        let nperseg = cfg.nperseg;
        let hop = cfg.hop();
        let bins = cfg.freq_bins();
        let columns = cfg.column_count(samples.len());

        let win = window(cfg.window, nperseg, true);
        let win_sumsq: f64 = win.iter().map(|w| w * w).sum();
        let scale = 1.0 / (fs * win_sumsq);

        let fft = RealFftPlanner::<f64>::new().plan_fft_forward(nperseg);
        let mut input = fft.make_input_vec();
        let mut spectrum = fft.make_output_vec();
        let mut scratch = fft.make_scratch_vec();

        let mut power = Array2::<f64>::zeros((bins, columns));
        for column in 0..columns {
            let segment = &samples[column * hop..column * hop + nperseg];
            for (dst, &s) in input.iter_mut().zip(segment) {
                *dst = s as f64;
            }
            let mean = input.iter().sum::<f64>() / nperseg as f64;
            for (dst, w) in input.iter_mut().zip(win.iter()) {
                *dst = (*dst - mean) * w;
            }
            fft.process_with_scratch(&mut input, &mut spectrum, &mut scratch)
                .ok();
            for (k, c) in spectrum.iter().enumerate() {
                let mut p = (c.re * c.re + c.im * c.im) * scale;
                if k != 0 && k != bins - 1 {
                    p *= 2.0;
                }
                power[[k, column]] = p;
            }
        }

        let max = power.iter().copied().fold(0.0_f64, f64::max);
        if max > 0.0 {
            let norm = cfg.max_norm / max;
            power.mapv_inplace(|v| v * norm);
        }

        let freqs = (0..bins).map(|k| k as f64 * fs / nperseg as f64).collect();
        let times = (0..columns)
            .map(|j| (nperseg as f64 / 2.0 + (j * hop) as f64) / fs)
            .collect();

        Self {
            freqs,
            times,
            power,
            freq_resolution: fs / 2.0 / bins as f64,
            fs,
            hop,
        }
    }

    pub fn power(&self) -> &Array2<f64> {
        &self.power
    }

    pub fn row_count(&self) -> usize {
        self.power.nrows()
    }

    pub fn column_count(&self) -> usize {
        self.power.ncols()
    }

    pub fn columns_per_second(&self) -> f64 {
        self.fs / self.hop as f64
    }

    /// Grid row nearest to a frequency.
    pub fn row_for_freq(&self, hz: f64) -> usize {
        ((hz / self.freq_resolution).round() as usize).min(self.row_count().saturating_sub(1))
    }

    /// Grid column for an offset in seconds from the recording start,
    /// clamped to the spectrogram.
    pub fn column_at(&self, seconds: f64) -> usize {
        let col = (seconds * self.columns_per_second()).floor();
        if col < 0.0 {
            0
        } else {
            (col as usize).min(self.column_count().saturating_sub(1))
        }
    }

    /// Start of the mutable processing copy.
    pub fn workbench(&self) -> Workbench {
        Workbench::new(self.power.clone())
    }
}
