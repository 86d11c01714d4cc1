//! Declarative rejection table
//!
//! One row per protocol rejection code. Rows are looked up by code; codes not
//! listed fall back to their response class.

use super::{ReasonKind, TerminalPath};
use crate::call_log::CallLogStatus;

use CallLogStatus::{Aborted, Declined, Missed};
use TerminalPath::{End, Error};

/// Outcome record for one rejection code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RejectionRow {
    pub code: u16,
    pub kind: ReasonKind,
    pub phrase: &'static str,
    /// Kind written into the persisted log when it differs from `kind`
    pub logged_kind: Option<ReasonKind>,
    pub caller_status: CallLogStatus,
    pub caller_path: TerminalPath,
    pub callee_status: CallLogStatus,
}

const fn row(
    code: u16,
    kind: ReasonKind,
    phrase: &'static str,
    caller_status: CallLogStatus,
    caller_path: TerminalPath,
    callee_status: CallLogStatus,
) -> RejectionRow {
    RejectionRow {
        code,
        kind,
        phrase,
        logged_kind: None,
        caller_status,
        caller_path,
        callee_status,
    }
}

const fn logged_as(mut r: RejectionRow, kind: ReasonKind) -> RejectionRow {
    r.logged_kind = Some(kind);
    r
}

pub const REJECTIONS: &[RejectionRow] = &[
    row(301, ReasonKind::MovedPermanently, "Moved Permanently", Aborted, Error, Declined),
    row(400, ReasonKind::Unknown, "Bad Request", Aborted, Error, Declined),
    row(401, ReasonKind::Unauthorized, "Unauthorized", Aborted, Error, Declined),
    row(403, ReasonKind::Forbidden, "Forbidden", Aborted, Error, Declined),
    logged_as(
        row(404, ReasonKind::NotFound, "Not Found", Aborted, Error, Declined),
        ReasonKind::NoResponse,
    ),
    row(407, ReasonKind::Unauthorized, "Proxy Authentication Required", Aborted, Error, Declined),
    row(408, ReasonKind::NotAnswered, "Request Timeout", Aborted, Error, Missed),
    row(410, ReasonKind::Gone, "Gone", Aborted, Error, Declined),
    row(415, ReasonKind::UnsupportedContent, "Unsupported Media Type", Aborted, Error, Aborted),
    row(422, ReasonKind::SessionIntervalTooSmall, "Session Interval Too Small", Aborted, Error, Aborted),
    row(480, ReasonKind::TemporarilyUnavailable, "Temporarily Unavailable", Aborted, Error, Missed),
    row(481, ReasonKind::NoMatch, "Call/Transaction Does Not Exist", Aborted, Error, Aborted),
    row(484, ReasonKind::AddressIncomplete, "Address Incomplete", Aborted, Error, Declined),
    row(486, ReasonKind::Busy, "Busy Here", Aborted, Error, Declined),
    row(487, ReasonKind::Success, "Request Terminated", Aborted, End, Missed),
    row(488, ReasonKind::NotAcceptable, "Not Acceptable Here", Aborted, Error, Aborted),
    row(491, ReasonKind::TemporarilyUnavailable, "Request Pending", Aborted, Error, Aborted),
    row(500, ReasonKind::Unknown, "Server Internal Error", Aborted, Error, Aborted),
    row(501, ReasonKind::NotImplemented, "Not Implemented", Aborted, Error, Aborted),
    row(502, ReasonKind::BadGateway, "Bad Gateway", Aborted, Error, Aborted),
    row(503, ReasonKind::IOError, "Service Unavailable", Aborted, Error, Aborted),
    row(504, ReasonKind::ServerTimeout, "Server Time-out", Aborted, Error, Aborted),
    row(600, ReasonKind::DoNotDisturb, "Busy Everywhere", Aborted, Error, Declined),
    row(603, ReasonKind::Declined, "Decline", Declined, End, Declined),
    logged_as(
        row(604, ReasonKind::NotFound, "Does Not Exist Anywhere", Aborted, Error, Declined),
        ReasonKind::NoResponse,
    ),
    row(606, ReasonKind::NotAcceptable, "Not Acceptable", Aborted, Error, Aborted),
];

/// Find the row for `code`, or derive one from the response class
pub fn lookup(code: u16) -> RejectionRow {
    if let Some(found) = REJECTIONS.iter().find(|r| r.code == code) {
        return *found;
    }
    match code {
        300..=399 => row(code, ReasonKind::MovedPermanently, "Redirection", Aborted, Error, Declined),
        600..=699 => row(code, ReasonKind::Declined, "Global Failure", Aborted, Error, Declined),
        _ => row(code, ReasonKind::Unknown, "Unknown Error", Aborted, Error, Declined),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_table_codes_are_unique() {
        let codes: HashSet<u16> = REJECTIONS.iter().map(|r| r.code).collect();
        assert_eq!(codes.len(), REJECTIONS.len());
    }

    #[test]
    fn test_not_found_logs_no_response() {
        assert_eq!(lookup(404).logged_kind, Some(ReasonKind::NoResponse));
        assert_eq!(lookup(604).logged_kind, Some(ReasonKind::NoResponse));
        assert_eq!(lookup(486).logged_kind, None);
    }

    #[test]
    fn test_class_fallback() {
        assert_eq!(lookup(499).kind, ReasonKind::Unknown);
        assert_eq!(lookup(380).kind, ReasonKind::MovedPermanently);
        assert_eq!(lookup(699).kind, ReasonKind::Declined);
        assert_eq!(lookup(699).caller_status, Aborted);
    }
}
