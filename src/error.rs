//! Error types for `raidboss`
//!
//! This module provides the error hierarchy for raid operations,
//! configuration loading and reward delivery, plus CLI exit codes.

use std::path::PathBuf;
use thiserror::Error;

// ============================================================================
// Exit Codes
// ============================================================================

/// Exit codes for `raidboss` CLI operations.
///
/// These codes follow Unix conventions.
pub struct ExitCode;

impl ExitCode {
    /// Successful execution
    pub const SUCCESS: i32 = 0;

    /// General error
    pub const ERROR: i32 = 1;

    /// Configuration error (invalid YAML, validation failure)
    pub const CONFIG_ERROR: i32 = 2;

    /// I/O error (file not found, permission denied)
    pub const IO_ERROR: i32 = 3;

    /// Raid operation error (unknown instance, rejected lifecycle operation)
    pub const RAID_ERROR: i32 = 5;

    /// Reward delivery error (sink unreachable, retries exhausted)
    pub const DELIVERY_ERROR: i32 = 6;

    /// Usage error (invalid arguments, missing required options)
    pub const USAGE_ERROR: i32 = 64;

    /// Interrupted by SIGINT (Ctrl+C)
    pub const INTERRUPTED: i32 = 130;

    /// Terminated by SIGTERM
    pub const TERMINATED: i32 = 143;
}

// ============================================================================
// Top-Level Error
// ============================================================================

/// Top-level error type for `raidboss` operations.
///
/// Aggregates all domain-specific errors and maps them to exit codes.
#[derive(Debug, Error)]
pub enum RaidBossError {
    /// Configuration loading or validation error
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Raid lifecycle error
    #[error(transparent)]
    Raid(#[from] RaidError),

    /// Reward delivery error
    #[error(transparent)]
    Delivery(#[from] DeliveryError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parsing error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Invalid command-line usage
    #[error("usage error: {0}")]
    Usage(String),
}

impl RaidBossError {
    /// Returns the appropriate exit code for this error.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) | Self::Json(_) | Self::Yaml(_) => ExitCode::CONFIG_ERROR,
            Self::Raid(_) => ExitCode::RAID_ERROR,
            Self::Delivery(_) => ExitCode::DELIVERY_ERROR,
            Self::Io(_) => ExitCode::IO_ERROR,
            Self::Usage(_) => ExitCode::USAGE_ERROR,
        }
    }
}

// ============================================================================
// Configuration Errors
// ============================================================================

/// Boss catalog loading and validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// YAML parsing failed
    #[error("parse error in {path}: {message}")]
    ParseError {
        /// Path to the catalog file
        path: PathBuf,
        /// Line number where the error occurred (if available)
        line: Option<usize>,
        /// Error message from the parser
        message: String,
    },

    /// Catalog validation failed
    #[error("validation failed for {path}")]
    ValidationError {
        /// Path to the catalog file
        path: String,
        /// List of validation issues found
        errors: Vec<ValidationIssue>,
    },

    /// Referenced catalog file not found
    #[error("file not found: {path}")]
    MissingFile {
        /// Path to the missing file
        path: PathBuf,
    },

    /// Catalog file exceeds the configured size limit
    #[error("catalog too large: {size} bytes (limit: {limit})")]
    TooLarge {
        /// Actual file size in bytes
        size: usize,
        /// Configured size limit in bytes
        limit: usize,
    },

    /// Environment variable referenced in the catalog is not set
    #[error("environment variable '{var}' not set (referenced at {location})")]
    EnvVarNotSet {
        /// Name of the environment variable
        var: String,
        /// Location in the catalog where it was referenced
        location: String,
    },
}

// ============================================================================
// Validation Types
// ============================================================================

/// A single validation issue found during catalog validation.
#[derive(Debug, Clone)]
pub struct ValidationIssue {
    /// Path to the problematic field (e.g., "bosses[0].phases[2].hp_threshold")
    pub path: String,
    /// Description of the validation issue
    pub message: String,
    /// Severity level of the issue
    pub severity: Severity,
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let prefix = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        write!(f, "{}: {} at {}", prefix, self.message, self.path)
    }
}

/// Severity level for validation issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Error - prevents the definition from being used
    Error,
    /// Warning - potential issue that does not prevent loading
    Warning,
}

// ============================================================================
// Raid Errors
// ============================================================================

/// Raid lifecycle errors.
///
/// Declined attacks are reported through `AttackResponse::reason` rather
/// than as an `Err`; these variants are returned by every other operation
/// and by the contribution ledger.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RaidError {
    /// Boss definition missing or failed validation
    #[error("invalid boss definition '{boss_id}': {reason}")]
    ConfigInvalid {
        /// Requested boss definition id
        boss_id: String,
        /// Why the definition was refused
        reason: String,
    },

    /// Unknown raid instance id
    #[error("raid instance not found: {0}")]
    InstanceNotFound(String),

    /// Raid is not accepting attacks yet
    #[error("raid instance {0} is not active")]
    RaidNotActive(String),

    /// Raid window has closed
    #[error("raid instance {0} has expired")]
    RaidExpired(String),

    /// Boss was already defeated
    #[error("raid instance {0} boss already defeated")]
    RaidAlreadyDefeated(String),

    /// Participant has no attempts left
    #[error("player {player_id} has used all {limit} attempts")]
    AttemptLimitExceeded {
        /// Participant that was refused
        player_id: String,
        /// Per-participant attempt limit of the boss
        limit: u32,
    },

    /// Too many requests are already waiting on the instance
    #[error("raid instance {instance_id} is busy ({pending} requests pending)")]
    RaidBusy {
        /// Instance that refused the request
        instance_id: String,
        /// Number of requests waiting when the request was refused
        pending: usize,
    },

    /// Operation requires a finalized instance
    #[error("raid instance {0} has not been finalized")]
    RaidNotFinalized(String),
}

// ============================================================================
// Delivery Errors
// ============================================================================

/// Reward delivery errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeliveryError {
    /// Reward sink could not be reached
    #[error("reward sink unavailable: {0}")]
    SinkUnavailable(String),

    /// Reward sink refused the bundle
    #[error("reward sink rejected delivery: {0}")]
    Rejected(String),

    /// All delivery attempts failed
    #[error("delivery for {instance_id} failed after {attempts} attempts: {last_error}")]
    Exhausted {
        /// Finalized instance whose rewards were not delivered
        instance_id: String,
        /// Number of attempts made
        attempts: u32,
        /// Last error reported by the sink
        last_error: String,
    },
}

// ============================================================================
// Result Type Alias
// ============================================================================

/// Result type alias for `raidboss` operations.
pub type Result<T> = std::result::Result<T, RaidBossError>;

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(ExitCode::SUCCESS, 0);
        assert_eq!(ExitCode::ERROR, 1);
        assert_eq!(ExitCode::CONFIG_ERROR, 2);
        assert_eq!(ExitCode::IO_ERROR, 3);
        assert_eq!(ExitCode::RAID_ERROR, 5);
        assert_eq!(ExitCode::DELIVERY_ERROR, 6);
        assert_eq!(ExitCode::USAGE_ERROR, 64);
    }

    #[test]
    fn test_raid_error_exit_code() {
        let err: RaidBossError = RaidError::InstanceNotFound("abc".to_string()).into();
        assert_eq!(err.exit_code(), ExitCode::RAID_ERROR);
    }

    #[test]
    fn test_delivery_error_exit_code() {
        let err: RaidBossError = DeliveryError::SinkUnavailable("down".to_string()).into();
        assert_eq!(err.exit_code(), ExitCode::DELIVERY_ERROR);
    }

    #[test]
    fn test_config_error_exit_code() {
        let err: RaidBossError = ConfigError::MissingFile {
            path: PathBuf::from("/test"),
        }
        .into();
        assert_eq!(err.exit_code(), ExitCode::CONFIG_ERROR);
    }

    #[test]
    fn test_io_error_exit_code() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "not found");
        let err: RaidBossError = io_err.into();
        assert_eq!(err.exit_code(), ExitCode::IO_ERROR);
    }

    #[test]
    fn test_usage_error_exit_code() {
        let err = RaidBossError::Usage("missing --boss".to_string());
        assert_eq!(err.exit_code(), ExitCode::USAGE_ERROR);
    }

    #[test]
    fn test_validation_issue_display() {
        let issue = ValidationIssue {
            path: "bosses[0].max_hp".to_string(),
            message: "must be greater than zero".to_string(),
            severity: Severity::Error,
        };
        assert_eq!(
            issue.to_string(),
            "error: must be greater than zero at bosses[0].max_hp"
        );
    }

    #[test]
    fn test_attempt_limit_display() {
        let err = RaidError::AttemptLimitExceeded {
            player_id: "p1".to_string(),
            limit: 3,
        };
        assert_eq!(err.to_string(), "player p1 has used all 3 attempts");
    }

    #[test]
    fn test_exhausted_display() {
        let err = DeliveryError::Exhausted {
            instance_id: "i-1".to_string(),
            attempts: 4,
            last_error: "timeout".to_string(),
        };
        let text = err.to_string();
        assert!(text.contains("i-1"));
        assert!(text.contains("4 attempts"));
        assert!(text.contains("timeout"));
    }
}
