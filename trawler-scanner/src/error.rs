use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, ScanError>;

/// Why a single fetch attempt did not produce a usable page.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AttemptFailure {
    /// Timeout, connection reset, 5xx gateway errors.
    #[error("transient network error: {0}")]
    TransientNetwork(String),

    /// Explicit 429 from the server.
    #[error("rate limited (HTTP {status})")]
    RateLimited { status: u16 },

    /// Body arrived but is missing one or more required markers.
    #[error("response missing validation markers: {missing:?}")]
    ValidationFailure { missing: Vec<String> },

    /// The classifier recognised a bot-challenge page.
    #[error("blocked: {0}")]
    Blocked(String),

    /// Non-retryable HTTP status such as 404.
    #[error("HTTP status {0}")]
    HttpStatus(u16),
}

impl AttemptFailure {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AttemptFailure::TransientNetwork(_)
                | AttemptFailure::RateLimited { .. }
                | AttemptFailure::ValidationFailure { .. }
        )
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, AttemptFailure::RateLimited { .. })
    }
}
