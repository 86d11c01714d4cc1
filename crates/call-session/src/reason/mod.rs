//! Reason mapping
//!
//! Maps terminal signaling outcomes (rejection codes, local failures,
//! timeouts, lost dialogs) to an abstract [`Reason`], a persisted-log status
//! and the terminal path the session takes. Pure and stateless: the
//! rejection matrix lives in [`table`].

pub mod table;

use serde::{Deserialize, Serialize};
use std::fmt;
use strum::{Display, EnumIter};

use crate::call_log::CallLogStatus;

/// Abstract, protocol-independent cause of an outcome
#[derive(
    Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize, Display, EnumIter,
)]
pub enum ReasonKind {
    Success,
    NoResponse,
    Forbidden,
    Declined,
    NotFound,
    NotAnswered,
    Busy,
    UnsupportedContent,
    IOError,
    DoNotDisturb,
    Unauthorized,
    NotAcceptable,
    NoMatch,
    MovedPermanently,
    Gone,
    TemporarilyUnavailable,
    AddressIncomplete,
    NotImplemented,
    BadGateway,
    SessionIntervalTooSmall,
    ServerTimeout,
    Unknown,
}

impl ReasonKind {
    /// Response code sent when the application rejects with this kind
    pub fn to_code(&self) -> u16 {
        match self {
            ReasonKind::Success => 200,
            ReasonKind::NoResponse => 408,
            ReasonKind::Forbidden => 403,
            ReasonKind::Declined => 603,
            ReasonKind::NotFound => 404,
            ReasonKind::NotAnswered => 408,
            ReasonKind::Busy => 486,
            ReasonKind::UnsupportedContent => 415,
            ReasonKind::IOError => 503,
            ReasonKind::DoNotDisturb => 600,
            ReasonKind::Unauthorized => 401,
            ReasonKind::NotAcceptable => 488,
            ReasonKind::NoMatch => 481,
            ReasonKind::MovedPermanently => 301,
            ReasonKind::Gone => 410,
            ReasonKind::TemporarilyUnavailable => 480,
            ReasonKind::AddressIncomplete => 484,
            ReasonKind::NotImplemented => 501,
            ReasonKind::BadGateway => 502,
            ReasonKind::SessionIntervalTooSmall => 422,
            ReasonKind::ServerTimeout => 504,
            ReasonKind::Unknown => 500,
        }
    }
}

/// Chained cause carried under a reason (e.g. a device cause under a SIP decline)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubReason {
    pub protocol: String,
    pub code: u16,
    pub phrase: String,
}

impl SubReason {
    pub fn new(protocol: impl Into<String>, code: u16, phrase: impl Into<String>) -> Self {
        Self {
            protocol: protocol.into(),
            code,
            phrase: phrase.into(),
        }
    }

    /// SIP-domain sub-reason, as carried by a Reason header
    pub fn sip(code: u16, phrase: impl Into<String>) -> Self {
        Self::new("SIP", code, phrase)
    }
}

/// Outcome attached to a session or to a failed operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reason {
    pub kind: ReasonKind,
    /// Protocol-level code (0 when the outcome never reached the wire)
    pub code: u16,
    pub phrase: String,
    pub retry_after: Option<u32>,
    pub sub_reason: Option<SubReason>,
}

impl Reason {
    pub fn new(kind: ReasonKind, code: u16, phrase: impl Into<String>) -> Self {
        Self {
            kind,
            code,
            phrase: phrase.into(),
            retry_after: None,
            sub_reason: None,
        }
    }

    /// Reason for a rejection code, using the table's kind and phrase
    pub fn from_code(code: u16) -> Self {
        let row = table::lookup(code);
        Self::new(row.kind, code, row.phrase)
    }

    /// Reason for a bare kind, using its canonical code
    pub fn from_kind(kind: ReasonKind) -> Self {
        Self::from_code(kind.to_code()).with_kind(kind)
    }

    /// Normal termination
    pub fn normal(phrase: impl Into<String>) -> Self {
        Self::new(ReasonKind::Success, 200, phrase)
    }

    pub fn with_kind(mut self, kind: ReasonKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_retry_after(mut self, seconds: u32) -> Self {
        self.retry_after = Some(seconds);
        self
    }

    pub fn with_sub_reason(mut self, sub_reason: SubReason) -> Self {
        self.sub_reason = Some(sub_reason);
        self
    }

    /// Whether a later, more concrete outcome may replace this one
    pub fn is_provisional(&self) -> bool {
        matches!(self.kind, ReasonKind::NoResponse | ReasonKind::Unknown)
    }
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} {})", self.kind, self.code, self.phrase)?;
        if let Some(sub) = &self.sub_reason {
            write!(f, " [{};cause={};text=\"{}\"]", sub.protocol, sub.code, sub.phrase)?;
        }
        Ok(())
    }
}

/// Which end of the invitation the session is
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize, Display)]
pub enum Leg {
    Caller,
    Callee,
}

/// How the session reaches Released
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize, Display)]
pub enum TerminalPath {
    /// End notification, Released on the next release processing
    End,
    /// Error notification, Released on the next release processing
    Error,
    /// Error and Released in the same step, nothing sent on the wire
    ErrorReleasedImmediately,
}

/// A terminal outcome as observed by the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalOutcome {
    /// Final rejection received (caller) or sent (callee)
    Rejection {
        code: u16,
        phrase: Option<String>,
        retry_after: Option<u32>,
        sub_reason: Option<SubReason>,
    },
    /// Request could not be sent before any dialog existed
    SendFailure,
    /// No response to a request
    TransactionTimeout,
    /// Established dialog lost at the transport level
    DialogLost,
    /// No media keep-alive within the configured window
    NoMedia,
}

impl TerminalOutcome {
    pub fn rejection(code: u16) -> Self {
        TerminalOutcome::Rejection {
            code,
            phrase: None,
            retry_after: None,
            sub_reason: None,
        }
    }
}

/// Structured result of mapping one outcome
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappedOutcome {
    pub reason: Reason,
    /// Kind recorded in the persisted log
    pub logged_kind: ReasonKind,
    /// Log status for a session that never connected
    pub log_status: CallLogStatus,
    pub path: TerminalPath,
}

/// Map a terminal outcome for the given leg
pub fn map_outcome(outcome: &TerminalOutcome, leg: Leg) -> MappedOutcome {
    match outcome {
        TerminalOutcome::Rejection {
            code,
            phrase,
            retry_after,
            sub_reason,
        } => {
            let row = table::lookup(*code);
            let mut reason = Reason::new(
                row.kind,
                *code,
                phrase.clone().unwrap_or_else(|| row.phrase.to_string()),
            );
            reason.retry_after = *retry_after;
            reason.sub_reason = sub_reason.clone();
            let (log_status, path) = match leg {
                Leg::Caller => (row.caller_status, row.caller_path),
                Leg::Callee => (row.callee_status, TerminalPath::End),
            };
            MappedOutcome {
                logged_kind: row.logged_kind.unwrap_or(row.kind),
                reason,
                log_status,
                path,
            }
        }
        TerminalOutcome::SendFailure => local(
            Reason::new(ReasonKind::IOError, 0, "I/O error"),
            TerminalPath::ErrorReleasedImmediately,
        ),
        TerminalOutcome::TransactionTimeout => local(
            Reason::new(ReasonKind::NoResponse, 408, "Request Timeout"),
            TerminalPath::Error,
        ),
        TerminalOutcome::DialogLost => local(
            Reason::new(ReasonKind::IOError, 0, "Dialog lost"),
            TerminalPath::End,
        ),
        TerminalOutcome::NoMedia => local(
            Reason::new(ReasonKind::IOError, 0, "No RTP received"),
            TerminalPath::End,
        ),
    }
}

fn local(reason: Reason, path: TerminalPath) -> MappedOutcome {
    MappedOutcome {
        logged_kind: reason.kind,
        reason,
        log_status: CallLogStatus::Aborted,
        path,
    }
}
