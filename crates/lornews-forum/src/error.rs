use thiserror::Error;

#[derive(Debug, Error)]
pub enum ForumError {
    #[error("{0}")]
    Transport(#[from] reqwest::Error),

    #[error("HTTP {code} {reason}", code = .0.as_u16(), reason = .0.canonical_reason().unwrap_or("error"))]
    Status(reqwest::StatusCode),

    #[error("invalid base URL: {0}")]
    BadBaseUrl(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cookie jar: {0}")]
    JarFormat(#[from] serde_json::Error),
}
