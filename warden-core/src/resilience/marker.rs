//! Durable kill switch marker
//!
//! The marker's existence is the cross-process ENGAGED flag. Its content is a
//! small JSON document naming the reason, time and engaging entity. Creation
//! goes through a synced temp file and an atomic no-clobber rename, so a
//! reader sees either no marker or a complete one, and when two processes race
//! the first one to land wins.

use crate::core::KillSwitchError;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

/// Reason recorded when a marker exists but cannot be parsed
pub const UNREADABLE_MARKER_REASON: &str = "unreadable marker";

/// Marker content
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkerRecord {
    pub reason: String,
    pub engaged_at_ns: u64,
    pub engaged_by: String,
}

impl MarkerRecord {
    fn unreadable() -> Self {
        Self {
            reason: UNREADABLE_MARKER_REASON.to_string(),
            engaged_at_ns: 0,
            engaged_by: "unknown".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MarkerFile {
    path: PathBuf,
}

impl MarkerFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Single stat call. Errors other than NotFound count as present.
    pub fn is_present(&self) -> bool {
        match fs::symlink_metadata(&self.path) {
            Ok(_) => true,
            Err(e) if e.kind() == ErrorKind::NotFound => false,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Cannot stat kill switch marker, assuming engaged");
                true
            }
        }
    }

    /// `None` when no marker exists. A marker that exists but does not parse
    /// is reported as engaged with reason "unreadable marker".
    pub fn read(&self) -> Result<Option<MarkerRecord>, KillSwitchError> {
        match fs::read(&self.path) {
            Ok(bytes) => match serde_json::from_slice::<MarkerRecord>(&bytes) {
                Ok(record) => Ok(Some(record)),
                Err(e) => {
                    warn!(path = %self.path.display(), error = %e, "Kill switch marker unreadable, treating as engaged");
                    Ok(Some(MarkerRecord::unreadable()))
                }
            },
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(self.error(e)),
        }
    }

    /// Create the marker unless one exists; returns the record now on disk
    /// (ours, or the one another process got in first with).
    pub fn create(&self, record: &MarkerRecord) -> Result<MarkerRecord, KillSwitchError> {
        let dir = self.dir();
        fs::create_dir_all(dir).map_err(|e| self.error(e))?;

        let mut tmp = NamedTempFile::new_in(dir).map_err(|e| self.error(e))?;
        write_synced(&mut tmp, record).map_err(|e| self.error(e))?;

        match tmp.persist_noclobber(&self.path) {
            Ok(_) => {
                sync_dir(dir);
                Ok(record.clone())
            }
            Err(e) if e.error.kind() == ErrorKind::AlreadyExists => {
                debug!(path = %self.path.display(), "Kill switch marker already present, adopting it");
                Ok(self.read()?.unwrap_or_else(|| record.clone()))
            }
            Err(e) => Err(self.error(e.error)),
        }
    }

    /// Remove the marker. Already gone is fine.
    pub fn remove(&self) -> Result<(), KillSwitchError> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                sync_dir(self.dir());
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(self.error(e)),
        }
    }

    fn dir(&self) -> &Path {
        self.path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."))
    }

    fn error(&self, source: io::Error) -> KillSwitchError {
        KillSwitchError::Marker {
            path: self.path.clone(),
            source,
        }
    }
}

fn write_synced(tmp: &mut NamedTempFile, record: &MarkerRecord) -> io::Result<()> {
    serde_json::to_writer(&mut *tmp, record)?;
    tmp.write_all(b"\n")?;
    tmp.as_file().sync_all()
}

/// Persist the directory entry itself. Best effort: not every platform
/// allows opening a directory for sync.
fn sync_dir(dir: &Path) {
    if let Err(e) = File::open(dir).and_then(|d| d.sync_all()) {
        debug!(dir = %dir.display(), error = %e, "Directory sync skipped");
    }
}
