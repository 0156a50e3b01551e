//! Pipeline orchestration: the detection path (decode, spectrogram, beacon,
//! workbench, extraction) and the monitoring path (decode, PSD, variation
//! detection), with per-file failure containment.

pub mod detection;
pub mod monitoring;
