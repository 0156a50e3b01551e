//! Direct-signal (beacon) localisation and suppression.
//!
//! The continuous-wave beacon shows up as a narrow horizontal line, normally
//! between 800 and 1200 Hz. A column-by-column argmax streak defeats
//! transient spikes: only a bin that stays the strongest (within one bin of
//! drift) for 50 consecutive columns is accepted as the beacon.

use crate::dsp::spectrogram::Spectrogram;
use crate::dsp::workbench::Workbench;
use tracing::debug;

/// Suppression floor; keeps later log operations well-defined.
const SUPPRESSION_FLOOR: f64 = 0.001;
const TILE_WIDTH: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BeaconBand {
    pub row_center: usize,
    /// First suppressed row (inclusive).
    pub row_lo: usize,
    /// Last suppressed row (inclusive).
    pub row_hi: usize,
    pub found: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct BeaconLocator {
    pub search_lo_hz: f64,
    pub search_hi_hz: f64,
    pub fallback_hz: f64,
    pub required_streak: usize,
    pub band_halfwidth: usize,
}

impl Default for BeaconLocator {
    fn default() -> Self {
        Self {
            search_lo_hz: 800.0,
            search_hi_hz: 1200.0,
            fallback_hz: 1000.0,
            required_streak: 50,
            band_halfwidth: 2,
        }
    }
}

impl BeaconLocator {
    pub fn locate(&self, sg: &Spectrogram) -> BeaconBand {
        let rows = sg.row_count();
        let row_lo = sg.row_for_freq(self.search_lo_hz);
        let row_hi = sg.row_for_freq(self.search_hi_hz).max(row_lo + 1);

        let mut streak = 0usize;
        let mut anchor = 0usize;
        for column in 0..sg.column_count() {
            let argmax = sg
                .power()
                .slice(ndarray::s![row_lo..row_hi, column])
                .iter()
                .enumerate()
                .max_by(|a, b| a.1.total_cmp(b.1))
                .map(|(i, _)| i)
                .unwrap_or(0);

            if argmax + 1 >= anchor && argmax <= anchor + 1 {
                streak += 1;
            } else {
                streak = 0;
                anchor = argmax;
            }
            if streak == self.required_streak {
                let row_center = anchor + row_lo;
                debug!(
                    "beacon found around {:.1} Hz",
                    row_center as f64 * sg.freq_resolution
                );
                return BeaconBand {
                    row_center,
                    row_lo: row_center.saturating_sub(self.band_halfwidth),
                    row_hi: (row_center + self.band_halfwidth).min(rows - 1),
                    found: true,
                };
            }
        }

        let fallback = sg.row_for_freq(self.fallback_hz);
        debug!(
            "beacon not found, falling back to {:.0} Hz",
            self.fallback_hz
        );
        BeaconBand {
            row_center: fallback,
            row_lo: fallback.saturating_sub(self.band_halfwidth),
            row_hi: (fallback + self.band_halfwidth).min(rows - 1),
            found: false,
        }
    }

    /// Replace the beacon band, tile by tile, with the mean of the two rows
    /// flanking the band. Tiles are 3 columns wide; the replacement keeps
    /// the local noise statistics while removing the horizontal line.
    pub fn suppress(&self, band: &BeaconBand, wb: &mut Workbench) {
        if !band.found {
            return;
        }
        let rows = wb.rows();
        let cols = wb.cols();
        let adj_lo = band.row_lo.saturating_sub(1);
        let adj_hi = (band.row_hi + 1).min(rows - 1);

        let mut start = 0usize;
        while start < cols {
            let end = (start + TILE_WIDTH).min(cols);
            let mut lo_sum = 0.0;
            let mut hi_sum = 0.0;
            for col in start..end {
                lo_sum += wb.data()[[adj_lo, col]];
                hi_sum += wb.data()[[adj_hi, col]];
            }
            let tile_len = (end - start) as f64;
            let replacement =
                ((lo_sum / tile_len + hi_sum / tile_len) / 2.0).max(SUPPRESSION_FLOOR);
            for row in band.row_lo..=band.row_hi {
                for col in start..end {
                    wb.set(row, col, replacement);
                }
            }
            start = end;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::spectrogram::{Spectrogram, SpectrogramConfig};
    use crate::recording::testutil::tone_samples;
    use rand::{Rng, SeedableRng, rngs::SmallRng};

    const FS: f64 = 5512.0;

    fn test_cfg() -> SpectrogramConfig {
        SpectrogramConfig {
            nperseg: 1024,
            noverlap: 768,
            ..Default::default()
        }
    }

    fn bin_centred(hz: f64, cfg: &SpectrogramConfig) -> f64 {
        (hz / (FS / cfg.nperseg as f64)).round() * FS / cfg.nperseg as f64
    }

    #[test]
    fn finds_a_steady_tone_and_suppresses_it() {
        let cfg = test_cfg();
        let tone_hz = bin_centred(1000.0, &cfg);
        let samples = tone_samples(FS, tone_hz, 4.0, 8000.0);
        let sg = Spectrogram::compute(&samples, FS, &cfg);

        let locator = BeaconLocator::default();
        let band = locator.locate(&sg);
        assert!(band.found);
        let located_hz = band.row_center as f64 * sg.freq_resolution;
        assert!(
            (located_hz - tone_hz).abs() < 2.0 * sg.freq_resolution,
            "beacon located at {located_hz} Hz"
        );

        let mut wb = sg.workbench();
        let tone_row = band.row_center;
        let before = wb.data()[[tone_row, 10]];
        locator.suppress(&band, &mut wb);
        let after = wb.data()[[tone_row, 10]];
        // The tone row drops to the suppression floor, ~30 dB down.
        assert!(before > 0.5, "tone row unexpectedly dim: {before}");
        assert!(after <= 0.0011, "only suppressed {before} -> {after}");
        assert!(after >= 0.001);
    }

    #[test]
    fn streak_tolerates_one_bin_of_wobble() {
        // A tone sitting between two bins makes the per-column argmax flip
        // back and forth by one bin; the anchor comparison must absorb it.
        let cfg = test_cfg();
        let tone_hz = bin_centred(1000.0, &cfg) + 0.4 * FS / cfg.nperseg as f64;
        let samples = tone_samples(FS, tone_hz, 4.0, 8000.0);
        let sg = Spectrogram::compute(&samples, FS, &cfg);
        assert!(BeaconLocator::default().locate(&sg).found);
    }

    #[test]
    fn pure_noise_falls_back_to_1000_hz() {
        let cfg = test_cfg();
        let mut rng = SmallRng::seed_from_u64(7);
        let samples: Vec<i16> = (0..16384 * 2).map(|_| rng.gen_range(-500..500)).collect();
        let sg = Spectrogram::compute(&samples, FS, &cfg);

        let band = BeaconLocator::default().locate(&sg);
        assert!(!band.found);
        assert_eq!(band.row_center, sg.row_for_freq(1000.0));
    }

    #[test]
    fn short_spectrograms_never_reach_the_streak() {
        let cfg = test_cfg();
        let tone_hz = bin_centred(1000.0, &cfg);
        // Ten columns only; the 50-column streak cannot complete.
        let samples = tone_samples(FS, tone_hz, 0.65, 8000.0);
        let sg = Spectrogram::compute(&samples, FS, &cfg);
        assert!(sg.column_count() < 50);
        assert!(!BeaconLocator::default().locate(&sg).found);
    }
}
