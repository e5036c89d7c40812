use serde_json::Value as JsonValue;
use thiserror::Error;

use crate::message::RequestId;

#[derive(Error, Debug)]
pub enum AdapterError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A fan-in request expired before every expected peer answered.
    #[error("timeout reached: only {current} responses received out of {expected}")]
    Timeout {
        current: usize,
        expected: usize,
        responses: Vec<JsonValue>,
    },

    #[error("Request {0} was dropped before completion")]
    RequestDropped(RequestId),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl AdapterError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, AdapterError::Timeout { .. })
    }

    /// Responses collected before a timeout, empty for every other error.
    pub fn partial_responses(&self) -> &[JsonValue] {
        match self {
            AdapterError::Timeout { responses, .. } => responses,
            _ => &[],
        }
    }
}

pub type AdapterResult<T> = Result<T, AdapterError>;
