use std::error::Error as StdError;

use thiserror::Error;

use crate::{cache::CacheError, infra::error::InfraError};

/// Error chain flattened to one message per source, outermost first.
#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub messages: Vec<String>,
}

impl ErrorReport {
    pub fn from_error(error: &dyn StdError) -> Self {
        let mut messages = vec![error.to_string()];
        let mut current = error.source();
        while let Some(inner) = current {
            messages.push(inner.to_string());
            current = inner.source();
        }
        Self { messages }
    }

    pub fn summary(&self) -> String {
        self.messages.join(": ")
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }

    /// Short, operator-facing description of the failure class.
    pub fn presentation_message(&self) -> &'static str {
        match self {
            AppError::Infra(InfraError::Configuration { .. }) => "Service misconfigured",
            AppError::Infra(InfraError::Telemetry(_)) => "Logging subsystem could not start",
            AppError::Infra(InfraError::Io { .. }) => "I/O failure",
            AppError::Cache(CacheError::OutsideRoot { .. }) => {
                "Refused to touch a path outside the cache root"
            }
            AppError::Cache(_) => "Cache maintenance failed",
            AppError::Unexpected(_) => "Unexpected error occurred",
        }
    }
}
