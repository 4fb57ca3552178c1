//! Typed errors that callers need to branch on.
//!
//! Everything else flows through `anyhow::Error`. A [`ValidationError`]
//! wrapped in an `anyhow::Error` can be recovered with
//! `err.downcast_ref::<ValidationError>()`, which is how the HTTP layer
//! maps it to a 400 response.

use thiserror::Error;

/// A request was missing a required field or produced no usable input.
///
/// Validation errors are reported to the caller immediately and never
/// retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct ValidationError(pub String);

impl ValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }

    pub fn message(&self) -> &str {
        &self.0
    }
}

/// Returns the validation message if `err` wraps a [`ValidationError`].
pub fn validation_message(err: &anyhow::Error) -> Option<&str> {
    err.downcast_ref::<ValidationError>().map(|v| v.message())
}
