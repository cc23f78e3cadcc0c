//! Error types for the relay core.

use thiserror::Error;

/// Errors from a single upstream completion attempt, or from the whole
/// rotation loop once it gives up.
#[derive(Debug, Error)]
pub enum CompletionError {
    /// The key pool is empty.
    #[error("no API keys configured")]
    NoKeys,

    /// The upstream rejected the credential (401/403).
    #[error("credential rejected with status {status}")]
    CredentialRejected { status: u16 },

    /// The upstream throttled the credential (429).
    #[error("upstream rate limited the credential")]
    RateLimited,

    /// Any other non-200 status.
    #[error("upstream returned status {status}: {body}")]
    Status { status: u16, body: String },

    /// The HTTP client's request timeout elapsed.
    #[error("request timed out")]
    Timeout,

    /// Connection or protocol failure before a status was received.
    #[error("transport error: {0}")]
    Transport(String),

    /// 200 response whose body had no usable `choices[0].message.content`.
    #[error("malformed response: {0}")]
    Malformed(String),

    /// Every attempt allowed by the retry policy failed.
    #[error("all {attempts} attempts failed, last error: {last}")]
    Exhausted {
        attempts: usize,
        #[source]
        last: Box<CompletionError>,
    },
}

impl CompletionError {
    /// Buckets a non-200 status code.
    pub fn from_status(status: u16, body: impl Into<String>) -> Self {
        match status {
            401 | 403 => CompletionError::CredentialRejected { status },
            429 => CompletionError::RateLimited,
            _ => CompletionError::Status {
                status,
                body: body.into(),
            },
        }
    }

    /// Whether another attempt (with the next key) may succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            CompletionError::NoKeys | CompletionError::Exhausted { .. }
        )
    }

    /// Whether the retry loop should wait before the next attempt.
    ///
    /// Rejected credentials and malformed bodies rotate immediately; throttling,
    /// server errors and transport failures back off.
    pub fn wants_backoff(&self) -> bool {
        matches!(
            self,
            CompletionError::RateLimited
                | CompletionError::Status { .. }
                | CompletionError::Timeout
                | CompletionError::Transport(_)
        )
    }
}

impl From<reqwest::Error> for CompletionError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            CompletionError::Timeout
        } else if e.is_decode() {
            CompletionError::Malformed(e.to_string())
        } else {
            CompletionError::Transport(e.to_string())
        }
    }
}

/// Errors raised while reading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// No OpenRouter key was found in the environment.
    #[error("no API keys configured. Set OPENROUTER_API_KEYS (comma separated) or OPENROUTER_API_KEY.")]
    NoApiKeys,

    /// A variable was set but could not be parsed.
    #[error("invalid value for {var}: {value:?} ({reason})")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// Result type for completion operations.
pub type Result<T> = std::result::Result<T, CompletionError>;
