use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PostError {
    #[error("From must contain exactly one address")]
    BadFrom,

    #[error("anonymous posting is not allowed")]
    Anonymous,

    #[error("Newsgroups must name exactly one group")]
    BadNewsgroups,

    #[error("no such newsgroup: {0}")]
    UnknownGroup(String),

    #[error("Subject is required")]
    NoSubject,

    #[error("bad References: {0}")]
    BadReferences(String),

    #[error("image file not found: {0}")]
    NoImage(PathBuf),

    #[error("login failed: {0}")]
    LoginFailed(String),

    #[error("no session cookie after login")]
    NoSession,

    /// The forum rejected the submission; the extracted page text is the
    /// whole diagnostic.
    #[error("{0}")]
    Rejected(String),

    /// Non-2xx response, reported as the HTTP status line.
    #[error("{0}")]
    Http(String),

    #[error(transparent)]
    Store(#[from] lornews_store::StoreError),

    #[error(transparent)]
    Forum(#[from] lornews_forum::ForumError),
}
