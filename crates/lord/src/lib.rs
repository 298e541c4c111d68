//! `lord`: the NNTP server of the lornews gateway.
//!
//! Serves reading commands out of the shared article store and hands `POST`
//! submissions to the `lorpost` subprocess.

pub mod post;
pub mod session;
pub mod wire;

pub use crate::session::{ServerConfig, VERSION, serve};
