use reqwest::StatusCode;
use thiserror::Error;

use crate::{endpoints::RegistryError, pattern::PatternError};

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("invalid stream pattern: {0}")]
    Pattern(#[from] PatternError),
    #[error("stream requests need at least one pattern")]
    MissingPatterns,
    #[error("request {field} `{value}` cannot be used as a path segment")]
    InvalidSegment { field: &'static str, value: String },
    #[error("invalid api base url `{url}`: {reason}")]
    ApiBase { url: String, reason: String },
    #[error("docker api rejected the session credentials")]
    Unauthorized,
    #[error("docker api returned {status}: {message}")]
    Status { status: StatusCode, message: String },
    #[error("docker api transport failure: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("request was cancelled")]
    Cancelled,
}

impl GatewayError {
    /// Errors that indicate a bug in the caller rather than a runtime
    /// condition.
    pub fn is_caller_bug(&self) -> bool {
        matches!(
            self,
            Self::Registry(_)
                | Self::Pattern(_)
                | Self::MissingPatterns
                | Self::InvalidSegment { .. }
        )
    }

    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Unauthorized => Some(StatusCode::UNAUTHORIZED),
            Self::Status { status, .. } => Some(*status),
            Self::Transport(err) => err.status(),
            _ => None,
        }
    }
}
