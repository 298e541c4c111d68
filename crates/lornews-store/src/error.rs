use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("HOME is not set")]
    NoHome,

    #[error("newsgroup catalog not found: {0}")]
    CatalogNotFound(PathBuf),

    #[error("catalog line {line}: {message}")]
    CatalogSyntax { line: usize, message: String },

    #[error("no password for user {0}")]
    NoPassword(String),

    #[error("broken index for {group}: {message}")]
    BrokenIndex { group: PathBuf, message: String },

    #[error("no index for group {0}")]
    NoIndex(String),

    #[error("index for {0} opened read-only")]
    ReadOnly(String),

    #[error("malformed message-id: {0}")]
    BadMessageId(String),

    #[error("malformed article: {0}")]
    BadArticle(String),

    #[error("malformed overview record: {0}")]
    BadOverview(String),

    #[error("creation date record is malformed: {0}")]
    BadCreationDate(String),

    #[error("invalid pattern: {0}")]
    BadPattern(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("index serialization: {0}")]
    Serde(#[from] serde_json::Error),
}
