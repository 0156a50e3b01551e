//! Single-sideband power spectral density over frequency bands.
//!
//! One full-length FFT per recording feeds both the noise and the
//! calibrator estimates; the caller owns the `Spectrum` and reuses it
//! across the calls. Scaling follows the single-sided convention: spectrum
//! divided by the sample count, interior bins doubled, so integrated power
//! equals the two-sided total. The result unit is ADU^2/Hz.

use crate::dsp::spectrogram::WindowKind;
use realfft::RealFftPlanner;
use rustfft::num_complex::Complex64;
use serde::{Deserialize, Serialize};

/// Windowed, scaled one-sided spectrum of a whole recording.
#[derive(Debug, Clone)]
pub struct Spectrum {
    bins: Vec<Complex64>,
    pub bin_width: f64,
}

impl Spectrum {
    pub fn compute(samples: &[i16], fs: f64) -> Self {
        assert!(!samples.is_empty(), "cannot transform an empty recording");
        assert!(fs > 0.0, "sample rate must be positive");

        // Full-length windows are one-shot; no point caching them.
        let n = samples.len();
        let win = WindowKind::Hann.coefficients(n, false);
        // Scale by 1/mean(window) so the mean amplitude is preserved.
        let w_scale = n as f64 / win.iter().sum::<f64>();

        let fft = RealFftPlanner::<f64>::new().plan_fft_forward(n);
        let mut input = fft.make_input_vec();
        let mut bins = fft.make_output_vec();
        let mut scratch = fft.make_scratch_vec();
        for ((dst, &s), w) in input.iter_mut().zip(samples).zip(win.iter()) {
            *dst = s as f64 * w * w_scale;
        }
        fft.process_with_scratch(&mut input, &mut bins, &mut scratch)
            .ok();

        let len = bins.len();
        let inv_n = 1.0 / n as f64;
        for (k, bin) in bins.iter_mut().enumerate() {
            *bin *= inv_n;
            if k != 0 && k != len - 1 {
                *bin *= 2.0;
            }
        }

        Self {
            bins,
            bin_width: fs / n as f64,
        }
    }

    pub fn freq(&self, bin: usize) -> f64 {
        bin as f64 * self.bin_width
    }

    fn band(&self, f_lo: f64, f_hi: f64) -> std::ops::Range<usize> {
        let lo = (f_lo / self.bin_width).ceil().max(0.0) as usize;
        let hi = ((f_hi / self.bin_width).ceil().max(0.0) as usize).min(self.bins.len());
        lo.min(hi)..hi
    }

    /// Mean single-sideband PSD over `f_lo <= f < f_hi`, in ADU^2/Hz.
    /// `None` when the band holds no bins.
    pub fn band_psd(&self, f_lo: f64, f_hi: f64) -> Option<f64> {
        let band = self.band(f_lo, f_hi);
        if band.is_empty() {
            return None;
        }
        let count = band.len() as f64;
        let power: f64 = self.bins[band].iter().map(|c| c.norm_sqr() / 2.0).sum();
        Some(power / count / self.bin_width)
    }

    /// Strongest bin in `f_lo <= f < f_hi` as `(frequency, magnitude)`.
    pub fn peak(&self, f_lo: f64, f_hi: f64) -> Option<(f64, f64)> {
        let band = self.band(f_lo, f_hi);
        let offset = band.start;
        self.bins[band]
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.norm_sqr().total_cmp(&b.1.norm_sqr()))
            .map(|(i, c)| (self.freq(offset + i), c.norm()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PsdConfig {
    pub noise_lo_hz: f64,
    pub noise_hi_hz: f64,
    pub calibrator_search_lo_hz: f64,
    pub calibrator_search_hi_hz: f64,
    /// Half-width of the band integrated around the calibrator tone.
    pub calibrator_signal_halfwidth_hz: f64,
    /// Width of the adjacent band subtracted as the local noise floor.
    pub calibrator_adjacent_width_hz: f64,
    /// Peak magnitude below which no calibrator is reported.
    pub calibrator_peak_floor: Option<f64>,
}

impl Default for PsdConfig {
    fn default() -> Self {
        Self {
            noise_lo_hz: 800.0,
            noise_hi_hz: 900.0,
            calibrator_search_lo_hz: 1350.0,
            calibrator_search_hi_hz: 1750.0,
            calibrator_signal_halfwidth_hz: 9.0,
            calibrator_adjacent_width_hz: 18.0,
            calibrator_peak_floor: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PsdEstimate {
    pub noise_psd: Option<f64>,
    pub calibrator_psd: Option<f64>,
    pub calibrator_freq_hz: Option<f64>,
}

/// Noise-band PSD plus the calibrator PSD around the located calibrator
/// tone (signal band minus the adjacent band's floor).
pub fn estimate(spectrum: &Spectrum, cfg: &PsdConfig) -> PsdEstimate {
    let noise_psd = spectrum.band_psd(cfg.noise_lo_hz, cfg.noise_hi_hz);

    let peak = spectrum.peak(cfg.calibrator_search_lo_hz, cfg.calibrator_search_hi_hz);
    let calibrator = peak.filter(|(_, magnitude)| {
        cfg.calibrator_peak_floor
            .is_none_or(|floor| *magnitude >= floor)
    });

    let (calibrator_psd, calibrator_freq_hz) = match calibrator {
        Some((fc, _)) => {
            let half = cfg.calibrator_signal_halfwidth_hz;
            let adjacent = cfg.calibrator_adjacent_width_hz;
            let signal = spectrum.band_psd(fc - half, fc + half);
            let floor = spectrum.band_psd(fc - half - adjacent, fc - half);
            match (signal, floor) {
                (Some(s), Some(f)) => (Some(s - f), Some(fc)),
                _ => (None, Some(fc)),
            }
        }
        None => (None, None),
    };

    PsdEstimate {
        noise_psd,
        calibrator_psd,
        calibrator_freq_hz,
    }
}
