use thiserror::Error;

use crate::cache::FetchError;
use crate::infra::client::ClientError;
use crate::infra::error::InfraError;
use crate::infra::preferences::PreferenceError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Infra(#[from] InfraError),
    /// A create/update/delete call failed; the cache was left untouched.
    #[error("mutation `{action}` failed: {message}")]
    Mutation { action: &'static str, message: String },
    /// A read could not be served.
    #[error("load failed: {0}")]
    Load(#[from] FetchError),
    /// A query settled without data.
    #[error("query failed: {0}")]
    Query(String),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn mutation(action: &'static str, message: impl Into<String>) -> Self {
        Self::Mutation {
            action,
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }
}

impl From<ClientError> for AppError {
    fn from(error: ClientError) -> Self {
        Self::Infra(InfraError::from(error))
    }
}

impl From<PreferenceError> for AppError {
    fn from(error: PreferenceError) -> Self {
        Self::Infra(InfraError::from(error))
    }
}
