//! Error types for pulse-core operations.
//!
//! Scanners never return these; a failing signal source degrades to an empty
//! observation list. Errors surface only from startup work (config, patterns)
//! and from the low-level command runner, whose callers log and swallow them.

use std::path::PathBuf;

/// All errors that can occur in pulse-core operations.
#[derive(Debug, thiserror::Error)]
pub enum PulseError {
    // ─────────────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Home directory not found")]
    HomeDirNotFound,

    #[error("Configuration file malformed: {path}: {details}")]
    ConfigMalformed { path: PathBuf, details: String },

    #[error("Invalid pattern {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("Invalid configuration value for {field}: {reason}")]
    InvalidConfig { field: String, reason: String },

    // ─────────────────────────────────────────────────────────────────────
    // I/O Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("I/O error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    // ─────────────────────────────────────────────────────────────────────
    // External Command Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Command execution failed: {command}: {details}")]
    CommandFailed { command: String, details: String },

    #[error("Command timed out after {timeout_ms}ms: {command}")]
    CommandTimedOut { command: String, timeout_ms: u64 },
}

/// Convenience type alias for Results using PulseError.
pub type Result<T> = std::result::Result<T, PulseError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_display_names_command() {
        let err = PulseError::CommandTimedOut {
            command: "ps".to_string(),
            timeout_ms: 3000,
        };
        let message = err.to_string();
        assert!(message.contains("3000ms"));
        assert!(message.contains("ps"));
    }

    #[test]
    fn test_invalid_pattern_keeps_source() {
        let source = regex::Regex::new("(unclosed").expect_err("bad regex");
        let err = PulseError::InvalidPattern {
            pattern: "(unclosed".to_string(),
            source,
        };
        assert!(std::error::Error::source(&err).is_some());
        assert!(err.to_string().contains("(unclosed"));
    }
}
