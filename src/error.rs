// src/error.rs
//! Error taxonomy. Fetch errors stay below the orchestrator; configuration
//! errors are the only ones allowed to abort a run.

use thiserror::Error;

/// Failure of a single upstream call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("request timed out")]
    Timeout,
    #[error("upstream returned HTTP {code}")]
    Status { code: u16 },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("malformed payload: {0}")]
    Malformed(String),
    #[error("source misconfigured: {0}")]
    Misconfigured(String),
}

impl FetchError {
    /// Timeouts, connection failures, 5xx and 429 are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Timeout | FetchError::Transport(_) => true,
            FetchError::Status { code } => *code == 429 || (500..600).contains(code),
            FetchError::Malformed(_) | FetchError::Misconfigured(_) => false,
        }
    }

    /// Short label used as a metrics dimension.
    pub fn kind(&self) -> &'static str {
        match self {
            FetchError::Timeout => "timeout",
            FetchError::Status { .. } => "status",
            FetchError::Transport(_) => "transport",
            FetchError::Malformed(_) => "malformed",
            FetchError::Misconfigured(_) => "misconfigured",
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            FetchError::Timeout
        } else if let Some(status) = e.status() {
            FetchError::Status {
                code: status.as_u16(),
            }
        } else if e.is_decode() {
            FetchError::Malformed(e.to_string())
        } else {
            FetchError::Transport(e.to_string())
        }
    }
}

/// Invalid engine or pipeline configuration. Fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("scoring weights must sum to 1.0 (got {sum:.3})")]
    WeightsSum { sum: f32 },
    #[error("scoring weight `{name}` must be within [0,1] (got {value})")]
    WeightRange { name: &'static str, value: f32 },
    #[error("`{name}` must be within {range} (got {value})")]
    OutOfRange {
        name: &'static str,
        range: &'static str,
        value: f64,
    },
    #[error("spam pattern `{pattern}` is not a valid regex: {reason}")]
    SpamPattern { pattern: String, reason: String },
    #[error("innovation family `{family}` does not compile: {reason}")]
    SignalPattern { family: String, reason: String },
    #[error("thematic vocabulary is empty")]
    EmptyVocabulary,
    #[error("duplicate source id `{0}`")]
    DuplicateSource(String),
}
