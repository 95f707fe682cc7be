use thiserror::Error;

/// Unified error types for the battle reporter
#[derive(Error, Debug)]
pub enum ReporterError {
    #[error("Redis operation failed: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("JSON serialization/deserialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Screeps API error: {body} ({status}, at {url})")]
    Api {
        status: u16,
        url: String,
        body: String,
    },

    #[error("{operation} timeout after {seconds}s")]
    Timeout { operation: String, seconds: u64 },

    #[error("No battle state stored for room {room}")]
    MissingState { room: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Result type alias for reporter operations
pub type ReporterResult<T> = Result<T, ReporterError>;

impl ReporterError {
    pub fn api(status: u16, url: impl Into<String>, body: impl Into<String>) -> Self {
        Self::Api {
            status,
            url: url.into(),
            body: body.into(),
        }
    }

    pub fn missing_state(room: impl Into<String>) -> Self {
        Self::MissingState { room: room.into() }
    }

    pub fn configuration_error(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

impl From<config::ConfigError> for ReporterError {
    fn from(error: config::ConfigError) -> Self {
        Self::configuration_error(error.to_string())
    }
}
