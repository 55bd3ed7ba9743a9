//! Verification error types
//!
//! Errors are split in two groups. *Check failures* (transport, timeout,
//! action failure, parse) are an expected verification outcome: the check
//! executor turns them into a FAIL partial and carries on. Everything else is
//! fatal and aborts the verifier before, or instead of, producing a verdict.

use std::time::Duration;
use thiserror::Error;

/// Result type alias for verification operations
pub type VerifyResult<T> = Result<T, VerifyError>;

/// Errors that can occur while verifying units
///
/// `Clone` because a failed action is cached and handed to every caller that
/// asks for the same action within a session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerifyError {
    /// The remote call could not be completed
    #[error("{target}: remote call failed: {message}")]
    Transport { target: String, message: String },

    /// The remote call did not complete in time
    #[error("{unit}: action `{action}` timed out after {}s", .timeout.as_secs())]
    Timeout {
        unit: String,
        action: String,
        timeout: Duration,
    },

    /// The action ran but reported a non-completed status
    #[error(
        "Action {action} (ID: {id}) failed to complete on unit {unit} (status: {status}). \
         For more info see 'juju show-task {id}'"
    )]
    ActionFailed {
        unit: String,
        action: String,
        id: String,
        status: String,
    },

    /// Expected data is missing or malformed in remote output
    #[error("failed to parse {context}: {message}")]
    Parse { context: String, message: String },

    /// Invalid target set, mapping or verifier construction
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Platform version could not be determined
    #[error("Version error: {message}")]
    Version { message: String },

    /// Defect inside the engine
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl VerifyError {
    pub fn transport(target: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transport {
            target: target.into(),
            message: message.into(),
        }
    }

    pub fn timeout(unit: impl Into<String>, action: impl Into<String>, timeout: Duration) -> Self {
        Self::Timeout {
            unit: unit.into(),
            action: action.into(),
            timeout,
        }
    }

    pub fn parse(context: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Parse {
            context: context.into(),
            message: message.into(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn version(message: impl Into<String>) -> Self {
        Self::Version {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether this error is a verification outcome the check executor
    /// converts into a FAIL partial.
    pub fn is_check_failure(&self) -> bool {
        matches!(
            self,
            Self::Transport { .. }
                | Self::Timeout { .. }
                | Self::ActionFailed { .. }
                | Self::Parse { .. }
        )
    }

    /// Machine-readable error code for reports
    pub fn code(&self) -> &'static str {
        match self {
            Self::Transport { .. } => "TRANSPORT",
            Self::Timeout { .. } => "TIMEOUT",
            Self::ActionFailed { .. } => "ACTION_FAILED",
            Self::Parse { .. } => "PARSE",
            Self::Configuration { .. } => "CONFIGURATION",
            Self::Version { .. } => "VERSION",
            Self::Internal { .. } => "INTERNAL",
        }
    }
}

impl From<serde_json::Error> for VerifyError {
    fn from(err: serde_json::Error) -> Self {
        Self::parse("JSON action output", err.to_string())
    }
}

impl From<serde_yaml::Error> for VerifyError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::parse("YAML action output", err.to_string())
    }
}
