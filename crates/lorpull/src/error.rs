use thiserror::Error;

#[derive(Debug, Error)]
pub enum PullError {
    /// The page markup no longer has the shape the parser expects; a human
    /// must update the parser.
    #[error("the forum changed its layout: {0}")]
    Layout(String),

    #[error(transparent)]
    Store(#[from] lornews_store::StoreError),

    #[error(transparent)]
    Forum(#[from] lornews_forum::ForumError),

    #[error("interrupted")]
    Interrupted,
}
