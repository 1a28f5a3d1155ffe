//! Outcome classification for observed HTTP responses.
//!
//! The thresholds mirror Cloud Logging's severity conventions and are fixed:
//! anything below 400 is [`Severity::Info`], 4xx is [`Severity::Warning`],
//! 5xx and above is [`Severity::Error`]. Only the latter two are eligible for
//! error reporting.

use std::fmt;

use axum::http::StatusCode;
use serde::Serialize;

/// Severity attached to every emitted log record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl Severity {
    /// Classify a raw status code.
    pub fn from_code(code: u16) -> Self {
        match code {
            0..=399 => Self::Info,
            400..=499 => Self::Warning,
            _ => Self::Error,
        }
    }

    /// Classify a finalized response status.
    pub fn from_status(status: StatusCode) -> Self {
        Self::from_code(status.as_u16())
    }

    /// Whether records of this severity go to the error-reporting sink
    /// (subject to the production gate).
    pub fn is_reportable(self) -> bool {
        self != Self::Info
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Info => "INFO",
            Self::Warning => "WARNING",
            Self::Error => "ERROR",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_below_400_are_info() {
        for code in [100, 200, 204, 301, 304, 399] {
            assert_eq!(Severity::from_code(code), Severity::Info, "code {code}");
        }
    }

    #[test]
    fn client_errors_are_warnings() {
        for code in [400, 401, 404, 422, 429, 499] {
            assert_eq!(Severity::from_code(code), Severity::Warning, "code {code}");
        }
    }

    #[test]
    fn server_errors_and_above_are_errors() {
        for code in [500, 502, 503, 599, 600, 999] {
            assert_eq!(Severity::from_code(code), Severity::Error, "code {code}");
        }
    }

    #[test]
    fn classification_is_stable_across_calls() {
        let first = Severity::from_status(StatusCode::NOT_FOUND);
        let second = Severity::from_status(StatusCode::NOT_FOUND);
        assert_eq!(first, second);
    }

    #[test]
    fn only_info_is_not_reportable() {
        assert!(!Severity::Info.is_reportable());
        assert!(Severity::Warning.is_reportable());
        assert!(Severity::Error.is_reportable());
    }

    #[test]
    fn serializes_as_platform_severity_names() {
        assert_eq!(serde_json::to_string(&Severity::Info).unwrap(), "\"INFO\"");
        assert_eq!(serde_json::to_string(&Severity::Warning).unwrap(), "\"WARNING\"");
        assert_eq!(serde_json::to_string(&Severity::Error).unwrap(), "\"ERROR\"");
        assert_eq!(Severity::Warning.to_string(), "WARNING");
    }
}
