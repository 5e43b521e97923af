//! Fixed status-code tables for the bulk send API.
//!
//! | Table | Used for |
//! |-------|----------|
//! | [`MessageStatus`] | Extended per-item status codes inside an aggregate response |
//! | [`http_error`] | Whole-request HTTP failures reported by a transport |
//! | [`bounce_reason`] | Bounce codes from delivery feedback |
//!
//! ## Example
//!
//! ```rust
//! use bulk_dispatch::status::{describe_message_status, MessageStatus};
//!
//! let status = MessageStatus::from_code(1002).unwrap();
//! assert_eq!(status.description(), "Invalid 'To' email address");
//! assert_eq!(describe_message_status(4242), "unknown error: 4242");
//! ```

use std::fmt;

/// Extended per-item status code reported by the send API.
///
/// A status of `0` (or an absent status) means the item was accepted; every
/// other value identifies a failure reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageStatus {
    /// 1001: catch-all failure
    GeneralFailure,
    /// 1002: recipient address rejected
    InvalidToAddress,
    /// 1003: sender address rejected
    InvalidFromAddress,
    /// 1004: subject line missing
    MissingSubject,
    /// 1006: malformed Message-ID header
    InvalidMessageId,
    /// 1007: unknown template key
    InvalidTemplateKey,
    /// 1008: merge field could not be resolved
    InvalidMergeField,
}

impl MessageStatus {
    /// Looks up a known status code. Unknown codes return `None`.
    pub fn from_code(code: u32) -> Option<Self> {
        let status = match code {
            1001 => Self::GeneralFailure,
            1002 => Self::InvalidToAddress,
            1003 => Self::InvalidFromAddress,
            1004 => Self::MissingSubject,
            1006 => Self::InvalidMessageId,
            1007 => Self::InvalidTemplateKey,
            1008 => Self::InvalidMergeField,
            _ => return None,
        };
        Some(status)
    }

    /// Returns the numeric wire code.
    #[inline]
    pub fn code(&self) -> u32 {
        match self {
            Self::GeneralFailure => 1001,
            Self::InvalidToAddress => 1002,
            Self::InvalidFromAddress => 1003,
            Self::MissingSubject => 1004,
            Self::InvalidMessageId => 1006,
            Self::InvalidTemplateKey => 1007,
            Self::InvalidMergeField => 1008,
        }
    }

    /// Returns the human-readable reason.
    #[inline]
    pub fn description(&self) -> &'static str {
        match self {
            Self::GeneralFailure => "General Failure",
            Self::InvalidToAddress => "Invalid 'To' email address",
            Self::InvalidFromAddress => "Invalid 'From' email address",
            Self::MissingSubject => "Missing Subject",
            Self::InvalidMessageId => "Invalid Message-ID header",
            Self::InvalidTemplateKey => "Invalid Template-Key",
            Self::InvalidMergeField => "Invalid Merge-Field",
        }
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Human-readable reason for a per-item status code.
///
/// Codes missing from the table degrade to `"unknown error: <code>"`.
pub fn describe_message_status(code: u32) -> String {
    match MessageStatus::from_code(code) {
        Some(status) => status.description().to_string(),
        None => format!("unknown error: {}", code),
    }
}

/// Reason for an HTTP status the send API treats as a request failure.
///
/// Returns `None` for statuses outside the table (including 2xx).
pub fn http_error(status: u16) -> Option<&'static str> {
    let reason = match status {
        400 => "Invalid Request (format or parameters not correct)",
        401 => "Unauthorized-Missing API Key",
        403 => "Unauthorized-Invalid API Key",
        404 => "Incorrect URL (or object not found)",
        405 => "Method not allowed",
        406 => "Format not acceptable",
        408 => "Request Timeout",
        409 => "Conflict",
        410 => "Object missing or deleted",
        413 => "Too many messages in request",
        415 => "POST JSON data invalid",
        422 => "Unprocessable Entity",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        503 => "Service Unavailable",
        507 => "Insufficient Storage",
        _ => return None,
    };
    Some(reason)
}

/// Reason for a bounce code reported by delivery feedback.
pub fn bounce_reason(code: u16) -> Option<&'static str> {
    let reason = match code {
        0 => "UNDETERMINED - (ie. Recipient Reply or not a bounce)",
        10 => "HARD BOUNCE - (ie. User Unknown)",
        20 => "SOFT BOUNCE - General",
        21 => "SOFT BOUNCE - Dns Failure",
        22 => "SOFT BOUNCE - Mailbox Full",
        23 => "SOFT BOUNCE - Message Too Large",
        30 => "BOUNCE - no email address",
        40 => "GENERAL BOUNCE",
        50 => "MAIL BLOCK - General",
        51 => "MAIL BLOCK - Known Spammer",
        52 => "MAIL BLOCK - Spam Detected",
        53 => "MAIL BLOCK - Attachment Detected",
        54 => "MAIL BLOCK - Relay Denied",
        60 => "AUTO REPLY - (ie. Out Of Office)",
        70 => "TRANSIENT BOUNCE",
        80 => "SUBSCRIBE Request",
        90 => "UNSUBSCRIBE/REMOVE Request",
        100 => "CHALLENGE-RESPONSE",
        _ => return None,
    };
    Some(reason)
}

/// Whether a bounce code is permanent (hard bounce, missing address or block).
pub fn is_permanent_bounce(code: u16) -> bool {
    matches!(code, 10 | 30 | 50..=54)
}
