//! Append-only forensic log
//!
//! Exactly one record per processed tick, plus one per kill switch
//! transition. Records are JSON lines appended by a dedicated writer thread so
//! the pipeline never waits on disk, but a full buffer applies backpressure
//! instead of dropping: the log is a regulatory artifact and must be complete.

use crate::core::now_ns;
use crate::risk::AccountState;
use crossbeam::channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use tracing::{error, info};

/// Writer buffer; senders block when it is full
const BUFFER_CAPACITY: usize = 4096;

/// What happened to a tick, or which kill switch transition occurred
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    /// Order accepted by the terminal
    Emitted,
    /// Gates passed but the signal source had nothing to send
    NoSignal,
    /// Kill switch engaged before signal construction
    BlockedPreSignal,
    /// Kill switch engaged between signal construction and submit
    BlockedPreOrder,
    /// Risk evaluation exceeded the processing budget
    BlockedTimeout,
    /// Signal failed validation
    InvalidSignal,
    /// Terminal answered with an error retcode
    Rejected,
    /// Command channel failed (timeout, disconnect, protocol)
    SubmitFailed,
    KillSwitchEngaged,
    KillSwitchDisengaged,
    /// Marker written by another process (or a previous run) picked up
    KillSwitchAdopted,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Emitted => "EMITTED",
            Action::NoSignal => "NO_SIGNAL",
            Action::BlockedPreSignal => "BLOCKED_PRE_SIGNAL",
            Action::BlockedPreOrder => "BLOCKED_PRE_ORDER",
            Action::BlockedTimeout => "BLOCKED_TIMEOUT",
            Action::InvalidSignal => "INVALID_SIGNAL",
            Action::Rejected => "REJECTED",
            Action::SubmitFailed => "SUBMIT_FAILED",
            Action::KillSwitchEngaged => "KILL_SWITCH_ENGAGED",
            Action::KillSwitchDisengaged => "KILL_SWITCH_DISENGAGED",
            Action::KillSwitchAdopted => "KILL_SWITCH_ADOPTED",
        }
    }

    /// Outcomes where a tick did not reach the terminal because of a gate
    pub fn is_blocked(&self) -> bool {
        matches!(
            self,
            Action::BlockedPreSignal | Action::BlockedPreOrder | Action::BlockedTimeout
        )
    }
}

/// One line of the forensic log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForensicRecord {
    pub timestamp_ns: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tick_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
    pub action: Action,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account: Option<AccountState>,
}

impl ForensicRecord {
    /// Per-tick decision record
    pub fn tick(
        tick_id: u64,
        symbol: &str,
        action: Action,
        reason: impl Into<String>,
        account: AccountState,
    ) -> Self {
        Self {
            timestamp_ns: now_ns(),
            tick_id: Some(tick_id),
            symbol: Some(symbol.to_string()),
            action,
            reason: reason.into(),
            account: Some(account),
        }
    }

    /// Kill switch transition record
    pub fn transition(action: Action, reason: impl Into<String>) -> Self {
        Self {
            timestamp_ns: now_ns(),
            tick_id: None,
            symbol: None,
            action,
            reason: reason.into(),
            account: None,
        }
    }
}

enum Sink {
    File(FileSink),
    Memory(Mutex<Vec<ForensicRecord>>),
    Disabled,
}

struct FileSink {
    path: PathBuf,
    sender: Option<Sender<ForensicRecord>>,
    thread_handle: Option<thread::JoinHandle<()>>,
}

impl Drop for FileSink {
    fn drop(&mut self) {
        // Sender must go first or the writer never sees the disconnect
        let _ = self.sender.take();
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}

/// Cloneable handle to the forensic log; the writer thread is joined when the
/// last handle drops, after every queued record is on disk.
#[derive(Clone)]
pub struct ForensicLog {
    sink: Arc<Sink>,
}

impl ForensicLog {
    /// Append to a JSONL file, creating it (and its directory) if needed
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }
        // Opened here so a bad path fails startup instead of the writer thread
        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        let (sender, receiver) = bounded(BUFFER_CAPACITY);
        let writer_path = path.clone();
        let handle = thread::Builder::new()
            .name("forensic-writer".to_string())
            .spawn(move || Self::writer_loop(writer_path, file, receiver))?;

        info!(path = %path.display(), "Forensic log opened");
        Ok(Self {
            sink: Arc::new(Sink::File(FileSink {
                path,
                sender: Some(sender),
                thread_handle: Some(handle),
            })),
        })
    }

    /// Keep records in memory; `records()` returns them
    pub fn in_memory() -> Self {
        Self {
            sink: Arc::new(Sink::Memory(Mutex::new(Vec::new()))),
        }
    }

    /// Discard every record
    pub fn disabled() -> Self {
        Self {
            sink: Arc::new(Sink::Disabled),
        }
    }

    fn writer_loop(path: PathBuf, file: File, receiver: Receiver<ForensicRecord>) {
        let mut writer = BufWriter::new(file);

        while let Ok(record) = receiver.recv() {
            Self::write_record(&mut writer, &record);
            // Drain whatever queued up behind it, then flush once
            while let Ok(record) = receiver.try_recv() {
                Self::write_record(&mut writer, &record);
            }
            if let Err(e) = writer.flush() {
                error!("Failed to flush forensic log {:?}: {}", path, e);
            }
        }

        if let Err(e) = writer.flush() {
            error!("Failed to flush forensic log {:?}: {}", path, e);
        }
        info!("Forensic writer thread stopping");
    }

    fn write_record(writer: &mut BufWriter<File>, record: &ForensicRecord) {
        match serde_json::to_string(record) {
            Ok(json) => {
                if let Err(e) = writeln!(writer, "{}", json) {
                    error!("Failed to write forensic record: {}", e);
                }
            }
            Err(e) => error!("Failed to serialize forensic record: {}", e),
        }
    }

    /// Append a record. Blocks if the writer is behind.
    pub fn record(&self, record: ForensicRecord) {
        match self.sink.as_ref() {
            Sink::File(sink) => {
                if let Some(sender) = &sink.sender {
                    if let Err(e) = sender.send(record) {
                        error!("Forensic writer gone, record lost: {:?}", e.into_inner());
                    }
                }
            }
            Sink::Memory(records) => records.lock().push(record),
            Sink::Disabled => {}
        }
    }

    /// Snapshot of records held by an in-memory log
    pub fn records(&self) -> Vec<ForensicRecord> {
        match self.sink.as_ref() {
            Sink::Memory(records) => records.lock().clone(),
            _ => Vec::new(),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        match self.sink.as_ref() {
            Sink::File(sink) => Some(&sink.path),
            _ => None,
        }
    }
}

/// Read a forensic JSONL file back (post-incident analysis, tests)
pub fn read_log(path: impl AsRef<Path>) -> io::Result<Vec<ForensicRecord>> {
    use std::io::BufRead;

    let file = File::open(path)?;
    let mut records = Vec::new();
    for line in io::BufReader::new(file).lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        records.push(serde_json::from_str(&line)?);
    }
    Ok(records)
}
