use std::time::Duration;
use thiserror::Error;

/// Fatal errors detected before a load test starts.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigurationError {
    #[error("stage plan is empty")]
    EmptyPlan,

    #[error("stage plan has a total duration of zero")]
    ZeroDuration,

    #[error("stage plan total duration exceeds {max:?}")]
    PlanTooLong { max: Duration },

    #[error("invalid stage `{input}`: {reason}")]
    InvalidStage { input: String, reason: String },

    #[error("invalid base url `{url}`: {reason}")]
    InvalidBaseUrl { url: String, reason: String },

    #[error("invalid header `{name}`: {reason}")]
    InvalidHeader { name: String, reason: String },

    #[error("invalid threshold `{input}`: {reason}")]
    InvalidThreshold { input: String, reason: String },

    #[error("think time minimum {min:?} exceeds maximum {max:?}")]
    InvalidThinkTime { min: Duration, max: Duration },

    #[error("{0} must be greater than zero")]
    ZeroInterval(&'static str),

    #[error("failed to build http client: {0}")]
    HttpClient(String),
}
