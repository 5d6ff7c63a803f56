//! Resumable single-file copy over a shell exec channel.
//!
//! The engine pulls one file out of a remote, shell-capable target that
//! offers no file-transfer protocol of its own — only "run a command and
//! capture output" and "run a command and stream output"
//! ([`podpull_exec::ExecChannel`]). It resumes from the last confirmed byte
//! after stalls and drops, verifies integrity with md5 and restarts from
//! scratch on a mismatch, and bounds retries by *attempts without forward
//! progress* rather than total attempts.

mod attempt;
mod copier;
mod fault;
mod options;
mod probe;
mod progress;
mod stream;
mod verify;

pub use copier::{FileCopier, TransferOutcome, copy_file_blocking};
pub use fault::{FaultInjector, NoFaults};
pub use options::{
    BATCH_PROGRESS_INTERVAL, DEFAULT_MAX_NO_PROGRESS_ATTEMPTS, INTERACTIVE_PROGRESS_INTERVAL,
    TransferOptions,
};
pub use probe::RemoteProbe;
pub use progress::{NullSink, ProgressSink, ProgressWriter, human_bytes};
pub use stream::{OffsetStream, STREAM_BLOCK_SIZE};
pub use verify::local_checksum;

/// Errors produced by the transfer engine.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    /// Local I/O failure (open, write, delete). Retrying will not change
    /// local disk state, so these are terminal.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("exec channel error: {0}")]
    Exec(#[from] podpull_exec::ExecError),

    /// The remote file could not be stat'd or checksummed. A missing or
    /// unreadable file will not appear on retry.
    #[error("remote probe failed for {path}: {reason}")]
    Probe { path: String, reason: String },

    /// Transport failure while streaming remote bytes.
    #[error("remote stream error: {0}")]
    Stream(#[source] std::io::Error),

    /// The compressed stream ended before a valid gzip trailer.
    #[error("compressed stream truncated")]
    TruncatedStream,

    #[error("cancelled")]
    Cancelled,

    /// Terminal failure: the no-progress retry budget was exhausted.
    #[error(
        "transferred {transferred} of {total} bytes, giving up after {attempts} attempts without progress"
    )]
    Stalled {
        transferred: u64,
        total: u64,
        attempts: u32,
        #[source]
        source: Box<TransferError>,
    },
}

impl TransferError {
    /// Whether the orchestrator may retry after this error.
    ///
    /// Only transport-side failures are worth retrying; probe errors,
    /// local I/O errors and cancellation are terminal.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Exec(_) | Self::Stream(_) | Self::TruncatedStream
        )
    }
}
