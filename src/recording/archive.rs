//! One-hour tar archives and BRAMS file-name stamps.
//!
//! Archived recordings are grouped into hour-anchored tar files whose members
//! follow the `RAD_BEDOUR_<YYYYMMDD>_<HHMM>_<STATION>_SYS<NNN>.wav` naming
//! scheme. Selecting a member means matching its minute stamp against the
//! requested instant within a tolerance window.

use super::wav::DecodeError;
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use std::io::Read;

/// Metadata carried by a recording file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStamp {
    pub timestamp: DateTime<Utc>,
    pub station: String,
    pub antenna: u16,
    pub is_wav: bool,
    pub is_tar: bool,
}

impl FileStamp {
    pub fn timestamp_us(&self) -> i64 {
        self.timestamp.timestamp_micros()
    }
}

/// Parse `RAD_BEDOUR_<YYYYMMDD>_<HHMM>_<STATION>_SYS<NNN>.<ext>`.
pub fn parse_stamp(name: &str) -> Option<FileStamp> {
    let base = name.rsplit('/').next().unwrap_or(name);
    let parts: Vec<&str> = base.split('_').collect();
    if parts.len() < 6 {
        return None;
    }

    let date = NaiveDate::parse_from_str(parts[2], "%Y%m%d").ok()?;
    let time = NaiveTime::parse_from_str(parts[3], "%H%M").ok()?;
    let timestamp = NaiveDateTime::new(date, time).and_utc();

    let tail = parts[5];
    let is_wav = tail.ends_with(".wav");
    let is_tar = tail.ends_with(".tar");
    let sys = tail.trim_end_matches(".wav").trim_end_matches(".tar");
    let antenna: u16 = sys.strip_prefix("SYS")?.parse().ok()?;

    Some(FileStamp {
        timestamp,
        station: parts[4].to_string(),
        antenna,
        is_wav,
        is_tar,
    })
}

/// Tolerance around the requested instant when matching archive members.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchWindow {
    /// ±3 minutes, for pinpointing the recording that covers an instant.
    Strict,
    /// ±20 minutes, for interval-walking monitoring runs.
    Relaxed,
}

impl MatchWindow {
    fn tolerance(self) -> Duration {
        match self {
            Self::Strict => Duration::minutes(3),
            Self::Relaxed => Duration::minutes(20),
        }
    }

    pub fn contains(self, stamp: DateTime<Utc>, requested: DateTime<Utc>) -> bool {
        stamp >= requested - self.tolerance() && stamp <= requested + self.tolerance()
    }
}

/// Scan a tar archive for the single wav member whose minute stamp falls
/// inside the window around `requested`, and return its bytes.
pub fn extract_wav<R: Read>(
    reader: R,
    requested: DateTime<Utc>,
    window: MatchWindow,
) -> Result<(Vec<u8>, FileStamp), DecodeError> {
    let mut archive = tar::Archive::new(reader);
    for entry in archive.entries()? {
        let mut entry = entry?;
        let name = entry.path()?.to_string_lossy().into_owned();
        let Some(stamp) = parse_stamp(&name) else {
            continue;
        };
        if !stamp.is_wav || !window.contains(stamp.timestamp, requested) {
            continue;
        }
        let mut bytes = Vec::with_capacity(entry.size() as usize);
        entry.read_to_end(&mut bytes)?;
        return Ok((bytes, stamp));
    }
    Err(DecodeError::NoMatchInArchive)
}
