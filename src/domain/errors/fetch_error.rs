//! Network fetch error types.

use thiserror::Error;

/// Errors reported by an image fetcher.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[allow(missing_docs)]
pub enum FetchError {
    #[error("request timed out")]
    Timeout,

    #[error("failed to connect: {message}")]
    Connect { message: String },

    #[error("HTTP {status}")]
    Status { status: u16 },

    #[error("transport error: {message}")]
    Transport { message: String },
}

impl FetchError {
    /// Creates connect error.
    #[must_use]
    pub fn connect(message: impl Into<String>) -> Self {
        Self::Connect {
            message: message.into(),
        }
    }

    /// Creates transport error.
    #[must_use]
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Returns whether retrying the request could succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::Timeout | Self::Connect { .. } | Self::Transport { .. } => true,
            Self::Status { status } => *status == 429 || *status >= 500,
        }
    }
}
