//! Errors stored on cache entries.

use thiserror::Error;

/// Where a failed load went wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchErrorKind {
    /// Transport failure or non-success HTTP status.
    Network,
    /// The body could not be decoded into the expected shape.
    Decode,
    /// The API answered with `success: false`.
    Api,
}

/// A settled load failure.
///
/// Cloneable so that every caller joined on a deduplicated request, and the
/// entry itself, can hold the same error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct FetchError {
    pub kind: FetchErrorKind,
    pub message: String,
}

impl FetchError {
    pub fn network(message: impl Into<String>) -> Self {
        Self {
            kind: FetchErrorKind::Network,
            message: message.into(),
        }
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self {
            kind: FetchErrorKind::Decode,
            message: message.into(),
        }
    }

    pub fn api(message: impl Into<String>) -> Self {
        Self {
            kind: FetchErrorKind::Api,
            message: message.into(),
        }
    }
}
