//! HTTP client layer for the lornews gateway.
//!
//! Provides the cookie-jar-backed [`Forum`] client shared by `lorpull` and
//! `lorpost`: page retrieval, login, form and multipart submission against
//! `http://www.linux.org.ru`.

mod client;
mod cookies;
mod error;

pub use crate::client::{BASE_URL, DEFAULT_TIMEOUT_SECS, Forum, Page};
pub use crate::cookies::{CookieJar, StoredCookie};
pub use crate::error::ForumError;
