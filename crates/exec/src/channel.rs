//! The `ExecChannel` capability trait.

use std::io::Read;

use crate::ExecError;

/// Captured output of a short, bounded remote command.
#[derive(Debug, Clone, Default)]
pub struct CapturedOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl CapturedOutput {
    /// Returns stdout as trimmed UTF-8 (lossy).
    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).trim().to_string()
    }

    /// Returns stderr as trimmed UTF-8 (lossy).
    pub fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr).trim().to_string()
    }
}

/// Final state of a finished stream command.
///
/// Stderr is surfaced separately from the byte payload so transport errors
/// can never be mistaken for file content.
#[derive(Debug, Clone, Default)]
pub struct StreamExit {
    pub stderr: Vec<u8>,
}

/// Handle to a running stream command.
///
/// `close` waits for the remote command to terminate and releases the
/// underlying process/connection. It must be called exactly once per stream;
/// the consuming side owns that guarantee.
pub trait StreamHandle: Send {
    fn close(&mut self) -> Result<StreamExit, ExecError>;
}

/// A long-running remote command exposed as a byte stream.
pub struct ExecStream {
    /// Remote stdout. Consumed by exactly one reader.
    pub reader: Box<dyn Read + Send>,
    /// Releases the remote command; see [`StreamHandle`].
    pub handle: Box<dyn StreamHandle>,
}

/// Abstract connection to a shell-capable execution target.
///
/// Implemented by the embedding application on top of its real transport.
/// Using a trait keeps the transfer engine decoupled from the transport and
/// testable with scripted fakes.
///
/// Implementations must observe the caller's cancellation mechanism: a
/// cancelled transfer expects blocked `capture`/`reader.read` calls to
/// return promptly with an error rather than block past the caller's
/// lifetime.
pub trait ExecChannel: Send + Sync {
    /// Runs `command` to completion and captures stdout/stderr.
    fn capture(&self, command: &str) -> Result<CapturedOutput, ExecError>;

    /// Starts `command` and returns its stdout as a stream.
    fn stream(&self, command: &str) -> Result<ExecStream, ExecError>;
}
