use std::error::Error;
use std::fmt::{self, Display, Formatter};

/// Error emitted by an adapter's send path.
///
/// The retryable flag separates "rejected by the platform" (permanent,
/// do not retry) from "transport failed" (retryable, optionally with a
/// backoff hint the platform supplied).
#[derive(Debug)]
pub struct SendError {
    code: String,
    message: String,
    retryable: bool,
    backoff_ms: Option<u64>,
    source: Option<anyhow::Error>,
}

impl SendError {
    /// Creates a non-retryable error with the provided code and message.
    pub fn permanent(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            retryable: false,
            backoff_ms: None,
            source: None,
        }
    }

    /// Creates a retryable error with an optional backoff hint in milliseconds.
    pub fn retryable(
        code: impl Into<String>,
        message: impl Into<String>,
        backoff_ms: Option<u64>,
    ) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            retryable: true,
            backoff_ms,
            source: None,
        }
    }

    /// Attaches a source error for debugging purposes.
    pub fn with_source(mut self, source: impl Into<anyhow::Error>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Returns the machine-readable error code.
    pub fn code(&self) -> &str {
        &self.code
    }

    /// Returns the descriptive error message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Indicates whether the failure should be retried.
    pub fn is_retryable(&self) -> bool {
        self.retryable
    }

    /// Optional backoff hint in milliseconds.
    pub fn backoff_ms(&self) -> Option<u64> {
        self.backoff_ms
    }
}

impl Display for SendError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl Error for SendError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.source
            .as_ref()
            .map(|err| err.as_ref() as &(dyn Error + 'static))
    }
}

/// Error emitted while normalizing a webhook body.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("failed to decode webhook payload")]
    Decode(#[from] serde_json::Error),
    #[error("unsupported webhook payload: {0}")]
    Unsupported(String),
}
