#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![forbid(unsafe_code)]

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CrewError>;

/// Protocol error code constants surfaced through the JSON-RPC envelope.
pub mod code {
    pub const UNAUTHENTICATED: &str = "UNAUTHENTICATED";
    pub const FORBIDDEN: &str = "FORBIDDEN";
    pub const RATE_LIMITED: &str = "RATE_LIMITED";
    pub const INVALID_ARGUMENT: &str = "INVALID_ARGUMENT";
    pub const NOT_FOUND: &str = "NOT_FOUND";
    pub const CONFLICT: &str = "CONFLICT";
    pub const MISCONFIGURED: &str = "MISCONFIGURED";
    pub const UNAVAILABLE: &str = "UNAVAILABLE";
    pub const DEADLINE_EXCEEDED: &str = "DEADLINE_EXCEEDED";
    pub const CANCELLED: &str = "CANCELLED";
    pub const INTERNAL: &str = "INTERNAL";
}

#[derive(Error, Debug)]
pub enum CrewError {
    #[error("Authentication required: {0}")]
    Unauthenticated(String),

    #[error("Permission denied: {0}")]
    Forbidden(String),

    #[error("Rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: i64 },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Misconfigured: {0}")]
    Misconfigured(String),

    #[error("Unavailable: {0}")]
    Unavailable(String),

    #[error("Deadline exceeded: {0}")]
    DeadlineExceeded(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("SQLx error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CrewError {
    /// Returns the protocol error code for this error.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Unauthenticated(_) => code::UNAUTHENTICATED,
            Self::Forbidden(_) => code::FORBIDDEN,
            Self::RateLimited { .. } => code::RATE_LIMITED,
            Self::InvalidArgument(_) => code::INVALID_ARGUMENT,
            Self::NotFound(_) => code::NOT_FOUND,
            Self::Conflict(_) => code::CONFLICT,
            Self::Misconfigured(_) | Self::Config(_) => code::MISCONFIGURED,
            Self::Unavailable(_) => code::UNAVAILABLE,
            Self::DeadlineExceeded(_) => code::DEADLINE_EXCEEDED,
            Self::Cancelled(_) => code::CANCELLED,
            Self::Store(_)
            | Self::Sqlx(_)
            | Self::Io(_)
            | Self::Serialization(_)
            | Self::Internal(_) => code::INTERNAL,
        }
    }

    /// JSON-RPC numeric error code (server-defined range).
    #[must_use]
    pub const fn rpc_code(&self) -> i64 {
        match self {
            Self::Unauthenticated(_) => -32001,
            Self::Forbidden(_) => -32002,
            Self::RateLimited { .. } => -32003,
            Self::InvalidArgument(_) => -32602,
            Self::NotFound(_) => -32004,
            Self::Conflict(_) => -32005,
            Self::Misconfigured(_) | Self::Config(_) => -32006,
            Self::Unavailable(_) => -32007,
            Self::DeadlineExceeded(_) => -32008,
            Self::Cancelled(_) => -32009,
            Self::Store(_)
            | Self::Sqlx(_)
            | Self::Io(_)
            | Self::Serialization(_)
            | Self::Internal(_) => -32000,
        }
    }

    /// Returns the process exit code when this error aborts startup.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) | Self::Misconfigured(_) | Self::InvalidArgument(_) => 2,
            Self::Store(_) | Self::Sqlx(_) | Self::Unavailable(_) => 3,
            _ => 1,
        }
    }

    /// True for errors a client may retry after a backoff.
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::Unavailable(_) | Self::DeadlineExceeded(_) | Self::RateLimited { .. }
        )
    }

    /// A client-facing message with internal detail stripped.
    ///
    /// Store, IO, and serialization failures carry paths and driver detail
    /// that must not leak through the wire protocol.
    #[must_use]
    pub fn sanitized_message(&self) -> String {
        match self {
            Self::Store(_) | Self::Sqlx(_) | Self::Io(_) | Self::Serialization(_) => {
                "internal storage failure".to_string()
            }
            Self::Internal(_) => "internal error".to_string(),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{code, CrewError};

    #[test]
    fn exit_code_mapping_is_stable() {
        assert_eq!(CrewError::Config("x".into()).exit_code(), 2);
        assert_eq!(CrewError::Store("x".into()).exit_code(), 3);
        assert_eq!(CrewError::Internal("x".into()).exit_code(), 1);
    }

    #[test]
    fn sanitized_message_hides_storage_detail() {
        let err = CrewError::Store("/var/lib/crewd/crewd.db is locked".into());
        assert!(!err.sanitized_message().contains("/var/lib"));
        assert_eq!(err.code(), code::INTERNAL);
    }

    #[test]
    fn rate_limited_is_retriable() {
        assert!(CrewError::RateLimited {
            retry_after_secs: 60
        }
        .is_retriable());
        assert!(!CrewError::Forbidden("x".into()).is_retriable());
    }
}
