//! Per-recording signal processing: spectrogram construction, beacon
//! handling, the detection workbench, meteor extraction, PSD estimation and
//! PSD variation detection.

pub mod beacon;
pub mod meteor;
pub mod psd;
pub mod spectrogram;
pub mod variation;
pub mod workbench;
