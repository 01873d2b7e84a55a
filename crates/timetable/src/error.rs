//! Error types shared by every timetable component.

use std::fmt;
use thiserror::Error;

/// Which kind of entity caused a booking conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictKind {
    Group,
    Teacher,
    Room,
    /// A teacher placed in too many rooms within one slot.
    TeacherRooms,
}

impl fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ConflictKind::Group => "group",
            ConflictKind::Teacher => "teacher",
            ConflictKind::Room => "room",
            ConflictKind::TeacherRooms => "teacher room count",
        };
        f.write_str(label)
    }
}

/// Errors that can occur while parsing, expanding, storing or downloading schedules.
#[derive(Debug, Error)]
pub enum TimetableError {
    /// The source bytes could not be decoded
    #[error("Parse error in {source_name}: {message}")]
    Parse {
        source_name: String,
        message: String,
    },

    /// No parser exists for the given file extension
    #[error("Unsupported file format: {extension}")]
    UnsupportedFormat { extension: String },

    /// A required field is missing or malformed
    #[error("Validation error: {message}")]
    Validation { message: String },

    /// The slot is already taken by the named entity
    #[error("Conflict: {kind} {name} is already booked for this slot")]
    Conflict { kind: ConflictKind, name: String },

    /// A referenced day, lesson or snapshot does not exist
    #[error("Not found: {what}")]
    NotFound { what: String },

    /// SQLite failure
    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// JSON encoding/decoding failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Network/HTTP request failed
    #[error("Network error: {message}")]
    Network { message: String },

    /// Server returned something we did not expect
    #[error("Unexpected response: {message}")]
    UnexpectedResponse { message: String },

    /// Filesystem failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration could not be loaded
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Every group in a bulk download failed
    #[error("No schedules could be downloaded ({failed} groups failed)")]
    NothingDownloaded { failed: usize },

    /// The caller cancelled the operation
    #[error("Operation cancelled")]
    Cancelled,
}

impl TimetableError {
    pub(crate) fn parse(source_name: impl Into<String>, message: impl Into<String>) -> Self {
        TimetableError::Parse {
            source_name: source_name.into(),
            message: message.into(),
        }
    }

    pub(crate) fn validation(message: impl Into<String>) -> Self {
        TimetableError::Validation {
            message: message.into(),
        }
    }

    pub(crate) fn not_found(what: impl Into<String>) -> Self {
        TimetableError::NotFound { what: what.into() }
    }

    /// Returns true if this error is potentially transient and retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TimetableError::Network { .. } | TimetableError::UnexpectedResponse { .. }
        )
    }

    /// Returns true if the error came from the caller's input rather than the environment.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            TimetableError::Parse { .. }
                | TimetableError::UnsupportedFormat { .. }
                | TimetableError::Validation { .. }
                | TimetableError::Conflict { .. }
                | TimetableError::NotFound { .. }
        )
    }
}

impl From<reqwest::Error> for TimetableError {
    fn from(err: reqwest::Error) -> Self {
        TimetableError::Network {
            message: err.to_string(),
        }
    }
}

impl From<url::ParseError> for TimetableError {
    fn from(err: url::ParseError) -> Self {
        TimetableError::Config {
            message: format!("invalid URL: {}", err),
        }
    }
}

impl From<zip::result::ZipError> for TimetableError {
    fn from(err: zip::result::ZipError) -> Self {
        TimetableError::parse("xlsx container", err.to_string())
    }
}

impl From<quick_xml::Error> for TimetableError {
    fn from(err: quick_xml::Error) -> Self {
        TimetableError::parse("xlsx xml", err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_network_errors_retry() {
        let network = TimetableError::Network {
            message: "connection reset".to_string(),
        };
        assert!(network.is_retryable());

        let conflict = TimetableError::Conflict {
            kind: ConflictKind::Group,
            name: "КМБО-01-22".to_string(),
        };
        assert!(!conflict.is_retryable());
        assert!(conflict.is_client_error());
        assert!(!TimetableError::validation("pair 9").is_retryable());
    }

    #[test]
    fn test_conflict_message_names_entity() {
        let err = TimetableError::Conflict {
            kind: ConflictKind::Room,
            name: "А-309".to_string(),
        };
        assert_eq!(err.to_string(), "Conflict: room А-309 is already booked for this slot");
    }
}
