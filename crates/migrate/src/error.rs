//! Error taxonomy for migrations
//!
//! Remote collaborators fail with [`ProviderError`]; the retry executor and
//! engine lift those into [`MigrationError`], which carries the propagation
//! policy: message-level failures are recorded and skipped, account-level
//! failures abort one account, configuration failures abort the invocation.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Whether a failure is worth retrying
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    /// Quota exhaustion or a temporary network/server problem
    Transient,
    /// Invalid request, missing resource, or insufficient permission
    Permanent,
}

/// Failure reported by a remote provider (message source or archive)
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("rate limited: {message}")]
    RateLimited {
        message: String,
        /// Server-provided hint for how long to back off
        retry_after: Option<Duration>,
    },
    #[error("transient error: {0}")]
    Transient(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl ProviderError {
    /// Shorthand for a rate limit error without a retry hint
    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::RateLimited {
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn class(&self) -> FailureClass {
        match self {
            Self::RateLimited { .. } | Self::Transient(_) => FailureClass::Transient,
            Self::NotFound(_) | Self::PermissionDenied(_) | Self::InvalidArgument(_) => {
                FailureClass::Permanent
            }
        }
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// Credential acquisition failed (consent denied, refresh token revoked, ...)
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("authentication failed for {label}: {message}")]
pub struct AuthError {
    /// Which credential was being acquired ("gmail", "admin", ...)
    pub label: String,
    pub message: String,
}

impl AuthError {
    pub fn new(label: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            message: message.into(),
        }
    }
}

/// Invalid or missing configuration, detected before any remote call
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(String),
    #[error("missing required configuration: {0}")]
    Missing(&'static str),
    #[error("invalid value for {field}: {reason}")]
    Invalid { field: String, reason: String },
    #[error("account {0} is listed more than once")]
    DuplicateAccount(String),
    #[error("user {0} not found in batch configuration")]
    UnknownUser(String),
    #[error("no users found in batch configuration")]
    NoUsers,
}

impl ConfigError {
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Errors surfaced by the retry executor and the migration engine
#[derive(Debug, thiserror::Error)]
pub enum MigrationError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("{operation} failed permanently: {source}")]
    PermanentFailure {
        operation: String,
        source: ProviderError,
    },

    #[error("{operation} still failing after {attempts} attempts: {source}")]
    TransientFailure {
        operation: String,
        attempts: u32,
        source: ProviderError,
    },

    #[error("rate limit exceeded for {operation} after {attempts} attempts: {source}")]
    RateLimitExceeded {
        operation: String,
        attempts: u32,
        source: ProviderError,
    },

    #[error("checkpoint I/O error for {account}: {message}")]
    CheckpointIo { account: String, message: String },

    #[error(transparent)]
    Configuration(#[from] ConfigError),

    #[error("destination {archive} is not accessible: {reason}")]
    DestinationUnavailable { archive: String, reason: String },

    #[error("message enumeration failed: {0}")]
    Enumeration(#[source] Box<MigrationError>),

    #[error("interrupted by user")]
    Interrupted,
}

impl MigrationError {
    /// Wrap a storage error for `account`
    pub fn checkpoint_io(account: &str, err: anyhow::Error) -> Self {
        Self::CheckpointIo {
            account: account.to_string(),
            message: format!("{:#}", err),
        }
    }

    /// Stable identifier used in reports
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Auth(_) => "auth",
            Self::PermanentFailure { .. } => "permanent_failure",
            Self::TransientFailure { .. } => "transient_failure",
            Self::RateLimitExceeded { .. } => "rate_limit_exceeded",
            Self::CheckpointIo { .. } => "checkpoint_io",
            Self::Configuration(_) => "configuration",
            Self::DestinationUnavailable { .. } => "destination_unavailable",
            Self::Enumeration(_) => "enumeration",
            Self::Interrupted => "interrupted",
        }
    }

    /// Classification used when a message-level failure is recorded
    pub fn failure_class(&self) -> FailureClass {
        match self {
            Self::TransientFailure { .. } | Self::RateLimitExceeded { .. } => {
                FailureClass::Transient
            }
            _ => FailureClass::Permanent,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_error_classes() {
        assert_eq!(ProviderError::rate_limited("slow down").class(), FailureClass::Transient);
        assert_eq!(ProviderError::Transient("503".into()).class(), FailureClass::Transient);
        assert_eq!(ProviderError::NotFound("m1".into()).class(), FailureClass::Permanent);
        assert_eq!(
            ProviderError::PermissionDenied("nope".into()).class(),
            FailureClass::Permanent
        );
        assert_eq!(
            ProviderError::InvalidArgument("bad".into()).class(),
            FailureClass::Permanent
        );
    }

    #[test]
    fn test_retry_after_only_on_rate_limit() {
        let limited = ProviderError::RateLimited {
            message: "quota".into(),
            retry_after: Some(Duration::from_secs(30)),
        };
        assert_eq!(limited.retry_after(), Some(Duration::from_secs(30)));
        assert_eq!(ProviderError::Transient("x".into()).retry_after(), None);
    }

    #[test]
    fn test_migration_error_kind_and_class() {
        let exhausted = MigrationError::RateLimitExceeded {
            operation: "insert message".into(),
            attempts: 5,
            source: ProviderError::rate_limited("quota"),
        };
        assert_eq!(exhausted.kind(), "rate_limit_exceeded");
        assert_eq!(exhausted.failure_class(), FailureClass::Transient);

        let denied = MigrationError::PermanentFailure {
            operation: "fetch message".into(),
            source: ProviderError::PermissionDenied("m7".into()),
        };
        assert_eq!(denied.failure_class(), FailureClass::Permanent);
        assert!(denied.to_string().contains("fetch message"));
    }

    #[test]
    fn test_auth_error_converts() {
        let err: MigrationError = AuthError::new("admin", "consent denied").into();
        assert_eq!(err.kind(), "auth");
        assert_eq!(err.to_string(), "authentication failed for admin: consent denied");
    }
}
