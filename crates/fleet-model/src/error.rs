//! The `CoreError` kind enum and its propagation-relevant metadata.
//!
//! Kinds are not language exceptions layered over one another — they are a
//! flat classification, each carrying an HTTP status and a wire error code
//! so the Coordinator API can render the uniform envelope
//! `{error:{code, message, details?}}` without re-deriving either from the
//! variant.

use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// One of the nine failure classes the Core distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conflict,
    OwnershipError,
    PreconditionFailed,
    Stale,
    Transient,
    Corruption,
    Internal,
}

impl ErrorKind {
    /// The wire code used in the HTTP error envelope (`VALIDATION`, `NOT_FOUND`, ...).
    pub fn code(self) -> &'static str {
        match self {
            ErrorKind::Validation => "VALIDATION",
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::Conflict => "CONFLICT",
            ErrorKind::OwnershipError => "OWNERSHIP_ERROR",
            ErrorKind::PreconditionFailed => "PRECONDITION_FAILED",
            ErrorKind::Stale => "STALE",
            ErrorKind::Transient => "TRANSIENT",
            ErrorKind::Corruption => "CORRUPTION",
            ErrorKind::Internal => "INTERNAL",
        }
    }

    /// The HTTP status the Coordinator API maps this kind to.
    pub fn http_status(self) -> u16 {
        match self {
            ErrorKind::Validation => 400,
            ErrorKind::NotFound => 404,
            ErrorKind::Conflict => 409,
            ErrorKind::OwnershipError => 403,
            ErrorKind::PreconditionFailed => 412,
            ErrorKind::Stale => 409,
            ErrorKind::Transient => 503,
            ErrorKind::Corruption => 500,
            ErrorKind::Internal => 500,
        }
    }

    /// Whether the Event Log / Store layer may retry this class internally
    /// with bounded backoff before surfacing it.
    pub fn retryable(self) -> bool {
        matches!(self, ErrorKind::Transient)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// A classified Core error. Carries an optional structured `details` payload
/// for the error envelope's `details` field.
#[derive(Debug, Clone, Error, Serialize)]
#[error("{kind}: {message}")]
pub struct CoreError {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl CoreError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, message)
    }

    pub fn ownership_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::OwnershipError, message)
    }

    pub fn precondition_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::PreconditionFailed, message)
    }

    pub fn stale(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Stale, message)
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transient, message)
    }

    pub fn corruption(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Corruption, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
