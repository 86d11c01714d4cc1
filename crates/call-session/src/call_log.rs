//! Call log
//!
//! One [`CallLog`] per session attempt, created with the session and flushed
//! to a [`CallLogStore`] exactly once during release processing.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use strum::Display;
use tracing::{debug, warn};

use crate::errors::{SessionError, SessionResult};
use crate::reason::{Reason, ReasonKind};
use crate::types::CallDirection;

/// Terminal status of a call attempt
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize, Display)]
pub enum CallLogStatus {
    Success,
    Aborted,
    Missed,
    Declined,
    /// Another device of the callee answered first
    AcceptedElsewhere,
    /// Another device of the callee declined for everyone
    DeclinedElsewhere,
}

impl CallLogStatus {
    pub fn is_elsewhere(&self) -> bool {
        matches!(
            self,
            CallLogStatus::AcceptedElsewhere | CallLogStatus::DeclinedElsewhere
        )
    }
}

/// Historical record of one session attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallLog {
    pub call_id: String,
    pub direction: CallDirection,
    pub from: String,
    pub to: String,
    pub started_at: DateTime<Utc>,
    pub connected_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub status: CallLogStatus,
    /// Outcome as recorded; its kind may differ from the session reason
    pub reason: Option<Reason>,
    pub ref_key: Option<String>,
    pub recording_path: Option<PathBuf>,
    status_final: bool,
}

impl CallLog {
    pub fn new(
        direction: CallDirection,
        from: impl Into<String>,
        to: impl Into<String>,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            call_id: uuid::Uuid::new_v4().to_string(),
            direction,
            from: from.into(),
            to: to.into(),
            started_at,
            connected_at: None,
            ended_at: None,
            status: CallLogStatus::Aborted,
            reason: None,
            ref_key: None,
            recording_path: None,
            status_final: false,
        }
    }

    /// Seconds between connection and end, zero if never connected
    pub fn duration_secs(&self) -> i64 {
        match (self.connected_at, self.ended_at) {
            (Some(connected), Some(ended)) if ended > connected => {
                (ended - connected).num_seconds()
            }
            _ => 0,
        }
    }

    pub fn was_connected(&self) -> bool {
        self.connected_at.is_some()
    }

    pub fn is_final(&self) -> bool {
        self.status_final
    }

    pub(crate) fn mark_connected(&mut self, now: DateTime<Utc>) {
        if self.connected_at.is_none() {
            self.connected_at = Some(now);
            self.status = CallLogStatus::Success;
        }
    }

    /// Record the terminal status and reason; later calls are ignored
    pub(crate) fn finalize(
        &mut self,
        status: CallLogStatus,
        reason: &Reason,
        logged_kind: ReasonKind,
        now: DateTime<Utc>,
    ) {
        if self.status_final {
            debug!(
                "Call log {} already final ({}), ignoring {}",
                self.call_id, self.status, status
            );
            return;
        }
        self.status = status;
        self.reason = Some(reason.clone().with_kind(logged_kind));
        self.ended_at = Some(now);
        self.status_final = true;
    }

    /// Replace the recorded reason once a deferred outcome resolves
    pub(crate) fn refine_reason(&mut self, reason: &Reason, logged_kind: ReasonKind) {
        self.reason = Some(reason.clone().with_kind(logged_kind));
    }

    /// Forking statuses may replace an optimistic Success
    pub(crate) fn mark_elsewhere(&mut self, status: CallLogStatus, reason: &Reason, now: DateTime<Utc>) {
        debug_assert!(status.is_elsewhere());
        self.status = status;
        self.reason = Some(reason.clone());
        if self.ended_at.is_none() {
            self.ended_at = Some(now);
        }
        self.status_final = true;
    }

    /// Flat record with the persisted field layout
    pub fn to_record(&self) -> CallLogRecord {
        CallLogRecord {
            call_id: self.call_id.clone(),
            direction: self.direction,
            from: self.from.clone(),
            to: self.to.clone(),
            start_timestamp: self.started_at.timestamp(),
            connect_timestamp: self.connected_at.map(|t| t.timestamp()).unwrap_or(0),
            duration_secs: self.duration_secs(),
            status: self.status,
            reason_kind: self.reason.as_ref().map(|r| r.kind),
            reason_code: self.reason.as_ref().map(|r| r.code).unwrap_or(0),
            reason_phrase: self.reason.as_ref().map(|r| r.phrase.clone()),
            ref_key: self.ref_key.clone(),
            recording_path: self.recording_path.clone(),
        }
    }
}

/// Persisted call log layout
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallLogRecord {
    pub call_id: String,
    pub direction: CallDirection,
    pub from: String,
    pub to: String,
    pub start_timestamp: i64,
    /// 0 if never connected
    pub connect_timestamp: i64,
    /// 0 if never connected
    pub duration_secs: i64,
    pub status: CallLogStatus,
    pub reason_kind: Option<ReasonKind>,
    pub reason_code: u16,
    pub reason_phrase: Option<String>,
    pub ref_key: Option<String>,
    pub recording_path: Option<PathBuf>,
}

/// Destination for finished call logs
pub trait CallLogStore: Send + Sync {
    fn flush(&self, log: &CallLog) -> SessionResult<()>;

    fn load_all(&self) -> SessionResult<Vec<CallLogRecord>>;
}

/// Keeps records in memory
#[derive(Debug, Default)]
pub struct MemoryCallLogStore {
    records: Mutex<Vec<CallLogRecord>>,
}

impl MemoryCallLogStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CallLogStore for MemoryCallLogStore {
    fn flush(&self, log: &CallLog) -> SessionResult<()> {
        self.records.lock().push(log.to_record());
        Ok(())
    }

    fn load_all(&self) -> SessionResult<Vec<CallLogRecord>> {
        Ok(self.records.lock().clone())
    }
}

/// Appends one JSON object per line to a file
#[derive(Debug)]
pub struct JsonLinesCallLogStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonLinesCallLogStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CallLogStore for JsonLinesCallLogStore {
    fn flush(&self, log: &CallLog) -> SessionResult<()> {
        let _guard = self.write_lock.lock();
        let line = serde_json::to_string(&log.to_record())?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{}", line)?;
        Ok(())
    }

    fn load_all(&self) -> SessionResult<Vec<CallLogRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let file = std::fs::File::open(&self.path)?;
        let mut records = Vec::new();
        for (number, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<CallLogRecord>(&line) {
                Ok(record) => records.push(record),
                Err(e) => {
                    warn!("Skipping malformed call log line {}: {}", number + 1, e);
                }
            }
        }
        if records.is_empty() && std::fs::metadata(&self.path)?.len() > 0 {
            return Err(SessionError::call_log(format!(
                "no readable record in {}",
                self.path.display()
            )));
        }
        Ok(records)
    }
}
