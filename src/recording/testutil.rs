//! Synthetic BRAMS containers for tests.

use super::wav::{Bra1Chunk, Chunk, FmtChunk, RawChunk, WavFile};

pub fn code6(text: &str) -> [u8; 6] {
    let mut out = [0u8; 6];
    let bytes = text.as_bytes();
    out[..bytes.len().min(6)].copy_from_slice(&bytes[..bytes.len().min(6)]);
    out
}

pub fn bra1_with(sample_rate: f64, start_us: u64, station: &str, antenna: u16) -> Bra1Chunk {
    Bra1Chunk {
        version: 2,
        sample_rate,
        lo_freq: 49_969_000.0,
        start_us,
        pps_count: 0,
        beacon_latitude: 50.097569,
        beacon_longitude: 4.588487,
        beacon_altitude: 167.0,
        beacon_frequency: 49_970_000.0,
        beacon_power: 130.0,
        beacon_polarisation: 0,
        antenna_id: antenna,
        antenna_latitude: 50.85,
        antenna_longitude: 4.35,
        antenna_altitude: 80.0,
        antenna_azimuth: 0.0,
        antenna_elevation: 90.0,
        beacon_code: code6("BEDOUR"),
        observer_code: code6("OBS"),
        station_code: code6(station),
        description: [0u8; 234],
        reserved: [0u8; 256],
    }
}

pub fn fmt_for(sample_rate: u32) -> FmtChunk {
    FmtChunk {
        audio_format: 1,
        num_channels: 1,
        sample_rate,
        byte_rate: sample_rate * 2,
        block_align: 2,
        bits_per_sample: 16,
    }
}

pub fn wav_bytes(sample_rate: u32, samples: &[i16]) -> Vec<u8> {
    wav_bytes_with(sample_rate, samples, None, &[])
}

pub fn wav_bytes_with(
    sample_rate: u32,
    samples: &[i16],
    bra1: Option<&Bra1Chunk>,
    extra: &[RawChunk],
) -> Vec<u8> {
    let mut chunks = vec![Chunk::Fmt(fmt_for(sample_rate))];
    if let Some(b) = bra1 {
        chunks.push(Chunk::Bra1(Box::new(b.clone())));
    }
    for raw in extra {
        chunks.push(Chunk::Other(raw.clone()));
    }
    chunks.push(Chunk::Data(samples.to_vec()));
    WavFile {
        chunks,
        data_truncated: false,
    }
    .encode()
}

/// A tone plus optional extras, as 16-bit PCM.
pub fn tone_samples(sample_rate: f64, freq_hz: f64, seconds: f64, amplitude: f64) -> Vec<i16> {
    let n = (sample_rate * seconds) as usize;
    (0..n)
        .map(|i| {
            let t = i as f64 / sample_rate;
            (amplitude * (std::f64::consts::TAU * freq_hz * t).sin()) as i16
        })
        .collect()
}
