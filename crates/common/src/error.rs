use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Gateway unavailable: {0}")]
    Gateway(String),

    #[error("Gateway rejected request (retcode {retcode}): {message}")]
    GatewayRejected { retcode: i64, message: String },

    #[error("Insufficient candle history: {0}")]
    InsufficientHistory(String),

    #[error("News source unavailable: {0}")]
    NewsSource(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Validation failure: {0}")]
    Validation(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Retryable failures are worth another attempt within the same cycle:
    /// transient transport errors and the broker's "market closed" retcode.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Gateway(_) | Error::Http(_) => true,
            Error::GatewayRejected { retcode, .. } => *retcode == 10018,
            _ => false,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
