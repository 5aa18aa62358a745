// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::fmt;

/// Errors surfaced by the analytics client and its delivery backends.
#[derive(Debug, thiserror::Error)]
pub enum AnalyticsError {
    /// Backend configuration is missing or unparseable (bad server URL, etc).
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The event failed validation before any I/O was attempted.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// Connection or timeout failure talking to the collector. Retryable.
    #[error("transport failure: {0}")]
    Transport(#[from] reqwest::Error),

    /// The collector received the payload and rejected it. Permanent:
    /// retrying the same batch will not succeed.
    #[error("rejected by server: {0}")]
    Rejected(RejectionReason),

    /// Operation attempted after `close`.
    #[error("consumer is closed")]
    Closed,

    /// Filesystem failure in the log backend.
    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),
}

impl AnalyticsError {
    /// True for permanent server-side rejections. `flush_all` and `close`
    /// skip past these instead of aborting shutdown.
    pub fn is_rejection(&self) -> bool {
        matches!(self, AnalyticsError::Rejected(_))
    }
}

/// Classification of a non-zero collector response code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectionReason {
    InvalidDataFormat,
    AppIdNotFound,
    InvalidIpTransmission,
    /// Non-zero code outside the known set, or a non-200 HTTP status.
    Unknown,
    /// Non-zero `errorLevel` reported by the debug receiver.
    ErrorLevel(i64),
}

impl RejectionReason {
    pub(crate) fn from_code(code: i64) -> Self {
        match code {
            1 | -1 => RejectionReason::InvalidDataFormat,
            -2 => RejectionReason::AppIdNotFound,
            -3 => RejectionReason::InvalidIpTransmission,
            _ => RejectionReason::Unknown,
        }
    }
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectionReason::InvalidDataFormat => write!(f, "invalid data format"),
            RejectionReason::AppIdNotFound => write!(f, "app id doesn't exist"),
            RejectionReason::InvalidIpTransmission => write!(f, "invalid ip transmission"),
            RejectionReason::Unknown => write!(f, "unknown error"),
            RejectionReason::ErrorLevel(level) => {
                write!(f, "debug receiver returned error level {level}")
            }
        }
    }
}
