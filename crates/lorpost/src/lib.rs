//! `lorpost`: the forum poster of the lornews gateway.
//!
//! Reads one fully-formed news article on stdin, validates it, refreshes the
//! user's forum session and submits the topic or comment as an HTTP form.

pub mod cli;
pub mod error;
pub mod message;
pub mod submit;

pub use crate::error::PostError;
pub use crate::message::{Submission, validate};
