//! Recording acquisition: WAV/tar decoding and file discovery.

pub mod archive;
pub mod repository;
#[cfg(test)]
pub mod testutil;
pub mod wav;

use crate::geo::GeoPoint;
use archive::FileStamp;
use wav::{DecodeError, WavFile};

/// Beacon description carried by the `BRA1` chunk.
#[derive(Debug, Clone, PartialEq)]
pub struct BeaconMeta {
    pub frequency_hz: f64,
    pub code: String,
    pub site: GeoPoint,
    pub power_w: f64,
}

/// An immutable, decoded mono recording. Constructed once per file and owned
/// exclusively by the pipeline for the duration of its processing.
#[derive(Debug, Clone)]
pub struct Recording {
    pub fs: f64,
    pub samples: Vec<i16>,
    pub start_us: i64,
    pub station_code: String,
    pub antenna_id: u16,
    pub beacon: Option<BeaconMeta>,
    pub antenna_site: Option<GeoPoint>,
}

impl Recording {
    /// Decode a byte source; `stamp` (from the file name) fills in start time
    /// and station identity when the container has no `BRA1` chunk.
    pub fn decode(bytes: &[u8], stamp: Option<&FileStamp>) -> Result<Self, DecodeError> {
        let file = WavFile::parse(bytes)?;
        Self::from_wav(&file, stamp)
    }

    pub fn from_wav(file: &WavFile, stamp: Option<&FileStamp>) -> Result<Self, DecodeError> {
        let samples = file.samples().ok_or(DecodeError::MissingData)?.to_vec();
        let fs = file.sample_rate().ok_or(DecodeError::MissingData)?;

        let bra1 = file.bra1();
        let start_us = bra1
            .map(|b| b.start_us as i64)
            .or_else(|| stamp.map(|s| s.timestamp_us()))
            .unwrap_or(0);
        let station_code = bra1
            .map(|b| b.station())
            .filter(|s| !s.is_empty())
            .or_else(|| stamp.map(|s| s.station.clone()))
            .unwrap_or_default();
        let antenna_id = bra1
            .map(|b| b.antenna_id)
            .or_else(|| stamp.map(|s| s.antenna))
            .unwrap_or(1);

        let beacon = bra1.filter(|b| b.beacon_frequency > 0.0).map(|b| BeaconMeta {
            frequency_hz: b.beacon_frequency,
            code: b.beacon(),
            site: GeoPoint::new(b.beacon_latitude, b.beacon_longitude, b.beacon_altitude),
            power_w: b.beacon_power,
        });
        let antenna_site = bra1
            .filter(|b| b.antenna_latitude != 0.0 || b.antenna_longitude != 0.0)
            .map(|b| GeoPoint::new(b.antenna_latitude, b.antenna_longitude, b.antenna_altitude));

        Ok(Self {
            fs,
            samples,
            start_us,
            station_code,
            antenna_id,
            beacon,
            antenna_site,
        })
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration_seconds(&self) -> f64 {
        self.samples.len() as f64 / self.fs
    }

    pub fn end_us(&self) -> i64 {
        self.start_us + (self.samples.len() as f64 * 1e6 / self.fs).round() as i64
    }
}
