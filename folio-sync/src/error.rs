//! Backend and sync errors.
//!
//! Backend failures carry a structured [`ErrorCode`] so the retry policy can
//! tell connectivity problems (worth retrying) from everything else.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::query::QueryError;

/// Failure class reported by a collection backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorCode {
    /// Service temporarily unreachable.
    Unavailable,
    /// Transport-level failure (connect, reset, DNS).
    Network,
    /// Operation timed out.
    DeadlineExceeded,
    Cancelled,
    PermissionDenied,
    Unauthenticated,
    /// Malformed request (bad collection name, bad query).
    InvalidArgument,
    NotFound,
    FailedPrecondition,
    ResourceExhausted,
    Internal,
    /// No structured code available; classification falls back to the
    /// message text.
    Unknown,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unavailable => "unavailable",
            Self::Network => "network",
            Self::DeadlineExceeded => "deadline-exceeded",
            Self::Cancelled => "cancelled",
            Self::PermissionDenied => "permission-denied",
            Self::Unauthenticated => "unauthenticated",
            Self::InvalidArgument => "invalid-argument",
            Self::NotFound => "not-found",
            Self::FailedPrecondition => "failed-precondition",
            Self::ResourceExhausted => "resource-exhausted",
            Self::Internal => "internal",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failure reported by a backend, either when a subscription is requested
/// or later on an open listener.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{code}: {message}")]
pub struct BackendError {
    pub code: ErrorCode,
    pub message: String,
}

impl BackendError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unavailable, message)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Network, message)
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidArgument, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }

    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::PermissionDenied, message)
    }

    /// Whether a retry is likely to succeed.
    ///
    /// Connectivity codes are transient. An [`ErrorCode::Unknown`] error is
    /// transient when its message mentions "network" or "unavailable".
    pub fn is_transient(&self) -> bool {
        match self.code {
            ErrorCode::Unavailable | ErrorCode::Network | ErrorCode::DeadlineExceeded => true,
            ErrorCode::Unknown => {
                let text = self.message.to_lowercase();
                text.contains("network") || text.contains("unavailable")
            }
            _ => false,
        }
    }
}

/// Errors raised while setting up a subscription.
#[derive(Debug, Clone, Error)]
pub enum SyncError {
    #[error("Collection name must not be empty")]
    EmptyCollection,
    #[error("Invalid query: {0}")]
    InvalidQuery(#[from] QueryError),
    #[error("Subscription rejected: {0}")]
    Backend(#[from] BackendError),
}
