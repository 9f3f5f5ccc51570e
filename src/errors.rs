use std::io;

use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Database(#[from] rusqlite::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("provider returned status {0}")]
    ProviderStatus(u16),
    #[error("{0}")]
    Config(String),
    #[error("{0}")]
    Input(String),
}

impl AppError {
    /// Whether a retry can plausibly succeed: rate limiting, server-side
    /// failures and network-layer errors. Other 4xx responses are definitive.
    pub fn is_transient(&self) -> bool {
        match self {
            AppError::Http(err) => {
                err.is_timeout() || err.is_connect() || err.is_request() || err.is_body()
            }
            AppError::ProviderStatus(status) => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}
