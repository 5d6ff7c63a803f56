//! Remote command execution channel for podpull.
//!
//! The transfer engine never talks to a transport directly. It consumes an
//! [`ExecChannel`]: two generic primitives — run a short command and capture
//! its output, or run a long command and stream its stdout — that any
//! shell-capable target (SSH session, container exec API, local subprocess)
//! can provide. The engine builds everything else on top of these.

mod channel;
pub mod command;

pub use channel::{CapturedOutput, ExecChannel, ExecStream, StreamExit, StreamHandle};

/// Errors produced by an exec channel implementation.
#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to start remote command: {0}")]
    Spawn(String),

    #[error("remote command failed: {command}: {stderr}")]
    Remote { command: String, stderr: String },

    #[error("channel closed")]
    Closed,
}
