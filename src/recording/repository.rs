//! File discovery over the BRAMS archive layout.
//!
//! Recordings live under `<root>/<STATION>/<YYYY>/<MM>/<DD>/`, either as
//! individual five-minute wav files or as one-hour tar archives. The
//! repository only discovers and opens byte sources; decoding and archive
//! member selection stay with the recording decoder.

use super::archive::{MatchWindow, parse_stamp};
use chrono::{DateTime, Duration, Utc};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

const WAV_NOMINAL_MINUTES: i64 = 5;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("recording directory not found: {0}")]
    DirectoryNotFound(PathBuf),
    #[error("i/o: {0}")]
    Io(#[from] std::io::Error),
}

/// One discoverable recording source. `end_us` is nominal (five minutes for a
/// wav, one hour for a tar); the decoded recording carries the exact end.
#[derive(Debug, Clone)]
pub struct CoverageEntry {
    pub station: String,
    pub antenna: u16,
    pub start_us: i64,
    pub end_us: i64,
    pub path: PathBuf,
    pub is_tar: bool,
}

pub trait RecordingRepository {
    /// All `(station, antenna)` sources that cover `instant`.
    fn list_covering(
        &self,
        instant: DateTime<Utc>,
        stations: &[String],
    ) -> Result<Vec<CoverageEntry>, RepositoryError>;

    /// The single source for one system around `instant`, if present.
    fn locate(
        &self,
        station: &str,
        antenna: u16,
        instant: DateTime<Utc>,
        window: MatchWindow,
    ) -> Result<Option<CoverageEntry>, RepositoryError>;

    fn open(&self, path: &Path) -> Result<Vec<u8>, RepositoryError>;
}

pub struct FsRepository {
    root: PathBuf,
    wav_tree: bool,
}

impl FsRepository {
    pub fn new(root: impl Into<PathBuf>, wav_tree: bool) -> Self {
        Self {
            root: root.into(),
            wav_tree,
        }
    }

    fn day_dir(&self, station: &str, instant: DateTime<Utc>) -> PathBuf {
        let date = instant.date_naive();
        self.root
            .join(station)
            .join(date.format("%Y").to_string())
            .join(date.format("%m").to_string())
            .join(date.format("%d").to_string())
    }

    fn scan_day(
        &self,
        station: &str,
        instant: DateTime<Utc>,
    ) -> Result<Vec<CoverageEntry>, RepositoryError> {
        let dir = self.day_dir(station, instant);
        if !dir.is_dir() {
            return Err(RepositoryError::DirectoryNotFound(dir));
        }

        let mut entries = Vec::new();
        for dir_entry in fs::read_dir(&dir)? {
            let path = dir_entry?.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let Some(stamp) = parse_stamp(name) else {
                continue;
            };
            if stamp.station != station {
                continue;
            }
            let wanted = if self.wav_tree {
                stamp.is_wav
            } else {
                stamp.is_tar
            };
            if !wanted {
                continue;
            }
            let minutes = if stamp.is_tar { 60 } else { WAV_NOMINAL_MINUTES };
            let start_us = stamp.timestamp_us();
            entries.push(CoverageEntry {
                station: stamp.station,
                antenna: stamp.antenna,
                start_us,
                end_us: (stamp.timestamp + Duration::minutes(minutes)).timestamp_micros(),
                path,
                is_tar: stamp.is_tar,
            });
        }
        entries.sort_by_key(|e| (e.antenna, e.start_us));
        Ok(entries)
    }
}

fn covers(entry: &CoverageEntry, instant: DateTime<Utc>, window: MatchWindow) -> bool {
    if entry.is_tar {
        let us = instant.timestamp_micros();
        entry.start_us <= us && us < entry.end_us
    } else {
        let stamp = DateTime::from_timestamp_micros(entry.start_us).unwrap_or(instant);
        window.contains(stamp, instant)
    }
}

impl RecordingRepository for FsRepository {
    fn list_covering(
        &self,
        instant: DateTime<Utc>,
        stations: &[String],
    ) -> Result<Vec<CoverageEntry>, RepositoryError> {
        let mut out = Vec::new();
        for station in stations {
            match self.scan_day(station, instant) {
                Ok(entries) => out.extend(
                    entries
                        .into_iter()
                        .filter(|e| covers(e, instant, MatchWindow::Strict)),
                ),
                Err(RepositoryError::DirectoryNotFound(dir)) => {
                    debug!("no archive directory for {station}: {}", dir.display());
                }
                Err(err) => return Err(err),
            }
        }
        Ok(out)
    }

    fn locate(
        &self,
        station: &str,
        antenna: u16,
        instant: DateTime<Utc>,
        window: MatchWindow,
    ) -> Result<Option<CoverageEntry>, RepositoryError> {
        let entries = self.scan_day(station, instant)?;
        Ok(entries
            .into_iter()
            .find(|e| e.antenna == antenna && covers(e, instant, window)))
    }

    fn open(&self, path: &Path) -> Result<Vec<u8>, RepositoryError> {
        Ok(fs::read(path)?)
    }
}
