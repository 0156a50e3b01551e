//! BRAMS-annotated RIFF/WAVE container decoding.
//!
//! A BRAMS recording is a plain WAVE file carrying an extra `BRA1` subchunk
//! with the acquisition metadata (authoritative sample rate, start timestamp
//! in microseconds since epoch, station/antenna/beacon description). Chunks
//! may appear in any order; unrecognised chunks are kept verbatim so a parsed
//! file can be re-encoded byte-identically.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("not a RIFF/WAVE container")]
    NotRiff,
    #[error("unexpected end of file inside {0} chunk")]
    UnexpectedEof(&'static str),
    #[error("no data chunk found")]
    MissingData,
    #[error("unsupported channel count {0}, only mono is accepted")]
    UnsupportedChannels(u16),
    #[error("no wav member matches the requested time in archive")]
    NoMatchInArchive,
    #[error("i/o: {0}")]
    Io(#[from] std::io::Error),
}

pub const BRA1_PAYLOAD_LEN: usize = 626;
const FMT_PAYLOAD_LEN: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FmtChunk {
    pub audio_format: u16,
    pub num_channels: u16,
    pub sample_rate: u32,
    pub byte_rate: u32,
    pub block_align: u16,
    pub bits_per_sample: u16,
}

/// Fixed-layout little-endian `BRA1` record. Text fields are kept as raw
/// bytes (NUL-padded on disk) so encoding reproduces the input exactly.
#[derive(Debug, Clone, PartialEq)]
pub struct Bra1Chunk {
    pub version: u16,
    pub sample_rate: f64,
    pub lo_freq: f64,
    pub start_us: u64,
    pub pps_count: u64,
    pub beacon_latitude: f64,
    pub beacon_longitude: f64,
    pub beacon_altitude: f64,
    pub beacon_frequency: f64,
    pub beacon_power: f64,
    pub beacon_polarisation: u16,
    pub antenna_id: u16,
    pub antenna_latitude: f64,
    pub antenna_longitude: f64,
    pub antenna_altitude: f64,
    pub antenna_azimuth: f64,
    pub antenna_elevation: f64,
    pub beacon_code: [u8; 6],
    pub observer_code: [u8; 6],
    pub station_code: [u8; 6],
    pub description: [u8; 234],
    pub reserved: [u8; 256],
}

impl Bra1Chunk {
    pub fn station(&self) -> String {
        trimmed(&self.station_code)
    }

    pub fn beacon(&self) -> String {
        trimmed(&self.beacon_code)
    }
}

fn trimmed(raw: &[u8]) -> String {
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    String::from_utf8_lossy(&raw[..end]).into_owned()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawChunk {
    pub id: [u8; 4],
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Chunk {
    Fmt(FmtChunk),
    Bra1(Box<Bra1Chunk>),
    Data(Vec<i16>),
    Other(RawChunk),
}

/// A fully parsed container, chunk order preserved.
#[derive(Debug, Clone)]
pub struct WavFile {
    pub chunks: Vec<Chunk>,
    /// The data chunk declared more bytes than the file held; the available
    /// whole samples were kept.
    pub data_truncated: bool,
}

impl WavFile {
    pub fn parse(bytes: &[u8]) -> Result<Self, DecodeError> {
        if bytes.len() < 12 || &bytes[0..4] != b"RIFF" || &bytes[8..12] != b"WAVE" {
            return Err(DecodeError::NotRiff);
        }

        let mut chunks = Vec::new();
        let mut data_truncated = false;
        let mut offset = 12usize;

        while offset + 8 <= bytes.len() {
            let id: [u8; 4] = bytes[offset..offset + 4].try_into().unwrap();
            let declared = read_u32(bytes, offset + 4) as usize;
            let payload = offset + 8;
            let declared_end = payload + declared;

            match &id {
                b"fmt " => {
                    if declared < FMT_PAYLOAD_LEN || declared_end > bytes.len() {
                        return Err(DecodeError::UnexpectedEof("fmt "));
                    }
                    chunks.push(Chunk::Fmt(parse_fmt(&bytes[payload..payload + FMT_PAYLOAD_LEN])));
                }
                b"BRA1" => {
                    if declared < BRA1_PAYLOAD_LEN || declared_end > bytes.len() {
                        return Err(DecodeError::UnexpectedEof("BRA1"));
                    }
                    chunks.push(Chunk::Bra1(Box::new(parse_bra1(
                        &bytes[payload..payload + BRA1_PAYLOAD_LEN],
                    ))));
                }
                b"data" => {
                    // A short data chunk is not fatal: keep the whole samples
                    // that are present and carry on.
                    let end = declared_end.min(bytes.len());
                    if declared_end > bytes.len() {
                        data_truncated = true;
                    }
                    let samples = bytes[payload..end]
                        .chunks_exact(2)
                        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
                        .collect();
                    chunks.push(Chunk::Data(samples));
                }
                _ => {
                    if declared_end > bytes.len() {
                        return Err(DecodeError::UnexpectedEof("chunk"));
                    }
                    chunks.push(Chunk::Other(RawChunk {
                        id,
                        bytes: bytes[payload..declared_end].to_vec(),
                    }));
                }
            }

            if declared_end > bytes.len() {
                break;
            }
            offset = declared_end;
        }

        let file = Self {
            chunks,
            data_truncated,
        };
        if file.samples().is_none() {
            return Err(DecodeError::MissingData);
        }
        if let Some(fmt) = file.fmt()
            && fmt.num_channels != 1
        {
            return Err(DecodeError::UnsupportedChannels(fmt.num_channels));
        }
        Ok(file)
    }

    pub fn encode(&self) -> Vec<u8> {
        let payload_len: usize = self
            .chunks
            .iter()
            .map(|c| {
                8 + match c {
                    Chunk::Fmt(_) => FMT_PAYLOAD_LEN,
                    Chunk::Bra1(_) => BRA1_PAYLOAD_LEN,
                    Chunk::Data(samples) => samples.len() * 2,
                    Chunk::Other(raw) => raw.bytes.len(),
                }
            })
            .sum();

        let mut out = Vec::with_capacity(12 + payload_len);
        out.extend_from_slice(b"RIFF");
        out.extend_from_slice(&((payload_len + 4) as u32).to_le_bytes());
        out.extend_from_slice(b"WAVE");
        for chunk in &self.chunks {
            match chunk {
                Chunk::Fmt(fmt) => {
                    out.extend_from_slice(b"fmt ");
                    out.extend_from_slice(&(FMT_PAYLOAD_LEN as u32).to_le_bytes());
                    out.extend_from_slice(&fmt.audio_format.to_le_bytes());
                    out.extend_from_slice(&fmt.num_channels.to_le_bytes());
                    out.extend_from_slice(&fmt.sample_rate.to_le_bytes());
                    out.extend_from_slice(&fmt.byte_rate.to_le_bytes());
                    out.extend_from_slice(&fmt.block_align.to_le_bytes());
                    out.extend_from_slice(&fmt.bits_per_sample.to_le_bytes());
                }
                Chunk::Bra1(b) => {
                    out.extend_from_slice(b"BRA1");
                    out.extend_from_slice(&(BRA1_PAYLOAD_LEN as u32).to_le_bytes());
                    encode_bra1(b, &mut out);
                }
                Chunk::Data(samples) => {
                    out.extend_from_slice(b"data");
                    out.extend_from_slice(&((samples.len() * 2) as u32).to_le_bytes());
                    for s in samples {
                        out.extend_from_slice(&s.to_le_bytes());
                    }
                }
                Chunk::Other(raw) => {
                    out.extend_from_slice(&raw.id);
                    out.extend_from_slice(&(raw.bytes.len() as u32).to_le_bytes());
                    out.extend_from_slice(&raw.bytes);
                }
            }
        }
        out
    }

    pub fn fmt(&self) -> Option<&FmtChunk> {
        self.chunks.iter().find_map(|c| match c {
            Chunk::Fmt(fmt) => Some(fmt),
            _ => None,
        })
    }

    pub fn bra1(&self) -> Option<&Bra1Chunk> {
        self.chunks.iter().find_map(|c| match c {
            Chunk::Bra1(b) => Some(b.as_ref()),
            _ => None,
        })
    }

    pub fn samples(&self) -> Option<&[i16]> {
        self.chunks.iter().find_map(|c| match c {
            Chunk::Data(samples) => Some(samples.as_slice()),
            _ => None,
        })
    }

    /// Authoritative sample rate: `BRA1` wins over `fmt `.
    pub fn sample_rate(&self) -> Option<f64> {
        self.bra1()
            .map(|b| b.sample_rate)
            .or_else(|| self.fmt().map(|f| f.sample_rate as f64))
    }
}

fn read_u16(bytes: &[u8], at: usize) -> u16 {
    u16::from_le_bytes(bytes[at..at + 2].try_into().unwrap())
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes(bytes[at..at + 4].try_into().unwrap())
}

fn read_u64(bytes: &[u8], at: usize) -> u64 {
    u64::from_le_bytes(bytes[at..at + 8].try_into().unwrap())
}

fn read_f64(bytes: &[u8], at: usize) -> f64 {
    f64::from_le_bytes(bytes[at..at + 8].try_into().unwrap())
}

fn parse_fmt(payload: &[u8]) -> FmtChunk {
    FmtChunk {
        audio_format: read_u16(payload, 0),
        num_channels: read_u16(payload, 2),
        sample_rate: read_u32(payload, 4),
        byte_rate: read_u32(payload, 8),
        block_align: read_u16(payload, 12),
        bits_per_sample: read_u16(payload, 14),
    }
}

fn parse_bra1(payload: &[u8]) -> Bra1Chunk {
    Bra1Chunk {
        version: read_u16(payload, 0),
        sample_rate: read_f64(payload, 2),
        lo_freq: read_f64(payload, 10),
        start_us: read_u64(payload, 18),
        pps_count: read_u64(payload, 26),
        beacon_latitude: read_f64(payload, 34),
        beacon_longitude: read_f64(payload, 42),
        beacon_altitude: read_f64(payload, 50),
        beacon_frequency: read_f64(payload, 58),
        beacon_power: read_f64(payload, 66),
        beacon_polarisation: read_u16(payload, 74),
        antenna_id: read_u16(payload, 76),
        antenna_latitude: read_f64(payload, 78),
        antenna_longitude: read_f64(payload, 86),
        antenna_altitude: read_f64(payload, 94),
        antenna_azimuth: read_f64(payload, 102),
        antenna_elevation: read_f64(payload, 110),
        beacon_code: payload[118..124].try_into().unwrap(),
        observer_code: payload[124..130].try_into().unwrap(),
        station_code: payload[130..136].try_into().unwrap(),
        description: payload[136..370].try_into().unwrap(),
        reserved: payload[370..626].try_into().unwrap(),
    }
}

fn encode_bra1(b: &Bra1Chunk, out: &mut Vec<u8>) {
    out.extend_from_slice(&b.version.to_le_bytes());
    out.extend_from_slice(&b.sample_rate.to_le_bytes());
    out.extend_from_slice(&b.lo_freq.to_le_bytes());
    out.extend_from_slice(&b.start_us.to_le_bytes());
    out.extend_from_slice(&b.pps_count.to_le_bytes());
    out.extend_from_slice(&b.beacon_latitude.to_le_bytes());
    out.extend_from_slice(&b.beacon_longitude.to_le_bytes());
    out.extend_from_slice(&b.beacon_altitude.to_le_bytes());
    out.extend_from_slice(&b.beacon_frequency.to_le_bytes());
    out.extend_from_slice(&b.beacon_power.to_le_bytes());
    out.extend_from_slice(&b.beacon_polarisation.to_le_bytes());
    out.extend_from_slice(&b.antenna_id.to_le_bytes());
    out.extend_from_slice(&b.antenna_latitude.to_le_bytes());
    out.extend_from_slice(&b.antenna_longitude.to_le_bytes());
    out.extend_from_slice(&b.antenna_altitude.to_le_bytes());
    out.extend_from_slice(&b.antenna_azimuth.to_le_bytes());
    out.extend_from_slice(&b.antenna_elevation.to_le_bytes());
    out.extend_from_slice(&b.beacon_code);
    out.extend_from_slice(&b.observer_code);
    out.extend_from_slice(&b.station_code);
    out.extend_from_slice(&b.description);
    out.extend_from_slice(&b.reserved);
}
