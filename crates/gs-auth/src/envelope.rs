use serde::{Deserialize, Serialize};
use tracing::error;

use crate::errors::AuthError;

/// Outcome tag of an [`Envelope`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    Error,
}

/// Normalized error detail carried across the IPC boundary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

/// Uniform success/error wrapper returned by every boundary-crossing
/// operation.
///
/// Downstream callers only ever see this shape, never a raw [`AuthError`];
/// the fault is logged exactly once, here, when it is wrapped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub status: Status,
    pub data: Option<T>,
    pub error: Option<ErrorDetail>,
}

impl<T> Envelope<T> {
    pub fn success(data: T) -> Self {
        Self {
            status: Status::Success,
            data: Some(data),
            error: None,
        }
    }

    /// Wrap a failure, logging it once tagged with the failing operation.
    pub fn failure(operation: &str, err: &AuthError) -> Self {
        error!(operation, error = %err, "operation failed");
        Self {
            status: Status::Error,
            data: None,
            error: Some(ErrorDetail {
                message: err.to_string(),
                code: err.code(),
            }),
        }
    }

    /// Like [`Envelope::failure`], but with caller-supplied fallback data
    /// where a sensible default beats `None` (e.g. an empty cached table).
    pub fn failure_with(operation: &str, err: &AuthError, fallback: impl FnOnce() -> T) -> Self {
        let mut envelope = Self::failure(operation, err);
        envelope.data = Some(fallback());
        envelope
    }

    pub fn from_result(operation: &str, result: crate::errors::Result<T>) -> Self {
        match result {
            Ok(data) => Self::success(data),
            Err(err) => Self::failure(operation, &err),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == Status::Success
    }

    /// Consume the envelope, yielding the payload of a success.
    pub fn into_data(self) -> Option<T> {
        self.data
    }
}
