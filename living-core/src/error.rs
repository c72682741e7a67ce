//! Error types for the realtime feed

use thiserror::Error;

/// Feed-wide error type
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LivingError {
    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Server rejected message (rt_cd={code}): {message}")]
    Rejected { code: String, message: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl LivingError {
    pub fn parse(msg: impl Into<String>) -> Self {
        LivingError::Parse(msg.into())
    }

    pub fn rejected(code: impl Into<String>, message: impl Into<String>) -> Self {
        LivingError::Rejected {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        LivingError::Transport(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        LivingError::Config(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        LivingError::Internal(msg.into())
    }
}

impl From<serde_json::Error> for LivingError {
    fn from(err: serde_json::Error) -> Self {
        LivingError::Parse(err.to_string())
    }
}

/// Result type alias for feed operations
pub type LivingResult<T> = Result<T, LivingError>;
