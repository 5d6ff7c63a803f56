//! The transfer orchestrator: retry state machine and public entry point.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use podpull_exec::ExecChannel;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::attempt::{AttemptContext, TransferState, run_attempt};
use crate::fault::{FaultInjector, NoFaults};
use crate::options::TransferOptions;
use crate::probe::RemoteProbe;
use crate::progress::{NullSink, ProgressSink, human_bytes};
use crate::verify::local_checksum;
use crate::TransferError;

/// How a successful transfer ended.
///
/// `Unverified` means neither checksum could be computed, so the copy is
/// assumed good: failing to *check* integrity is not the same as detecting
/// a problem. Callers that need the stronger guarantee can treat it
/// differently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferOutcome {
    Verified,
    Unverified,
}

/// Copies single files out of a remote exec target, resuming across
/// transport failures.
///
/// One copier handles one transfer at a time; a `copy_file` call blocks
/// (asynchronously) until success or terminal failure. Callers loop it per
/// file.
pub struct FileCopier {
    channel: Arc<dyn ExecChannel>,
    options: TransferOptions,
    sink: Arc<dyn ProgressSink>,
    fault: Arc<dyn FaultInjector>,
    cancel: CancellationToken,
}

impl FileCopier {
    pub fn new(channel: Arc<dyn ExecChannel>) -> Self {
        Self {
            channel,
            options: TransferOptions::default(),
            sink: Arc::new(NullSink),
            fault: Arc::new(NoFaults),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_options(mut self, options: TransferOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_fault_injector(mut self, fault: Arc<dyn FaultInjector>) -> Self {
        self.fault = fault;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Token that aborts the in-flight transfer when cancelled. Deadlines
    /// and manual aborts are layered on top of this by the caller.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Copies `remote_path` to `local_path`, resuming as needed.
    ///
    /// Creates or overwrites `local_path`. On terminal failure any partial
    /// file is deleted, so callers never observe a half-written artifact.
    pub async fn copy_file(
        &self,
        remote_path: &str,
        local_path: impl AsRef<Path>,
    ) -> Result<TransferOutcome, TransferError> {
        let channel = Arc::clone(&self.channel);
        let sink = Arc::clone(&self.sink);
        let fault = Arc::clone(&self.fault);
        let options = self.options.clone();
        let cancel = self.cancel.clone();
        let remote: String = remote_path.to_string();
        let local: PathBuf = local_path.as_ref().to_path_buf();

        tokio::task::spawn_blocking(move || {
            copy_file_blocking(&*channel, &remote, &local, &options, &*sink, &*fault, &cancel)
        })
        .await
        .map_err(|e| TransferError::Io(std::io::Error::other(e)))?
    }
}

/// Synchronous core of [`FileCopier::copy_file`].
///
/// State machine: Probing → Transferring → Verifying → {Done, Restarting,
/// Failed}. The retry budget bounds *stalled* attempts only: a link that
/// keeps inching forward is retried indefinitely, one that fails without
/// advancing a byte is cut off after `max_no_progress_attempts`.
pub fn copy_file_blocking(
    channel: &dyn ExecChannel,
    remote_path: &str,
    local_path: &Path,
    options: &TransferOptions,
    sink: &dyn ProgressSink,
    fault: &dyn FaultInjector,
    cancel: &CancellationToken,
) -> Result<TransferOutcome, TransferError> {
    let max_stalled = options.max_no_progress_attempts.max(1);
    let probe = RemoteProbe::new(channel);

    // Probing: any error here is terminal.
    let file_size = probe.size(remote_path)?;
    sink.set_header(&[format!(
        "Downloading {} ({})",
        remote_path,
        human_bytes(file_size)
    )]);
    info!(path = remote_path, size = file_size, compress = options.use_compression, "starting transfer");

    let mut state = TransferState {
        file_size,
        bytes_transferred: 0,
    };
    let mut stalled: u32 = 0;
    let mut attempt: u32 = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(fail(local_path, &state, TransferError::Cancelled));
        }

        attempt += 1;
        let before = state.bytes_transferred;
        let started = Instant::now();

        let ctx = AttemptContext {
            channel,
            remote_path,
            local_path,
            options,
            sink,
            cancel,
            fault,
        };
        // A clean EOF short of the probed size is a transport failure too:
        // verification only makes sense for a byte-complete file.
        let outcome = run_attempt(&ctx, &mut state).and_then(|copied| {
            if state.bytes_transferred < state.file_size {
                Err(TransferError::Stream(std::io::Error::new(
                    ErrorKind::UnexpectedEof,
                    "remote stream ended before end of file",
                )))
            } else {
                Ok(copied)
            }
        });

        match outcome {
            Ok(copied) => {
                debug!(
                    attempt,
                    copied,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "attempt complete"
                );

                match verify_transfer(&probe, remote_path, local_path) {
                    Verification::Match => {
                        info!(
                            path = remote_path,
                            size = state.file_size,
                            attempts = attempt,
                            "transfer complete and verified"
                        );
                        return Ok(TransferOutcome::Verified);
                    }
                    Verification::Mismatch { local, remote } => {
                        // Silent corruption: the tail cannot be trusted, so
                        // resuming from it is unsafe. Start over.
                        warn!(
                            path = remote_path,
                            local_md5 = %local,
                            remote_md5 = %remote,
                            "checksum mismatch, restarting transfer from scratch"
                        );
                        sink.report_line(&format!(
                            "checksum mismatch for {remote_path}, restarting transfer"
                        ));
                        if let Err(e) = std::fs::remove_file(local_path) {
                            return Err(fail(local_path, &state, TransferError::Io(e)));
                        }
                        state.bytes_transferred = 0;
                        stalled = 0;
                    }
                    Verification::Skipped(reason) => {
                        warn!(
                            path = remote_path,
                            reason = %reason,
                            "cannot verify transfer, assuming success"
                        );
                        return Ok(TransferOutcome::Unverified);
                    }
                }
            }
            Err(e) if e.is_recoverable() => {
                if state.bytes_transferred > before {
                    // Forward progress: the retry budget resets.
                    stalled = 0;
                    info!(
                        attempt,
                        offset = state.bytes_transferred,
                        error = %e,
                        "stream interrupted, resuming"
                    );
                    sink.report_line(&format!(
                        "connection interrupted, resuming from {}",
                        human_bytes(state.bytes_transferred)
                    ));
                } else {
                    stalled += 1;
                    warn!(attempt, stalled, error = %e, "attempt made no progress");
                    if stalled >= max_stalled {
                        let err = TransferError::Stalled {
                            transferred: state.bytes_transferred,
                            total: state.file_size,
                            attempts: stalled,
                            source: Box::new(e),
                        };
                        return Err(fail(local_path, &state, err));
                    }
                }
            }
            Err(e) => return Err(fail(local_path, &state, e)),
        }
    }
}

enum Verification {
    Match,
    Mismatch { local: String, remote: String },
    Skipped(String),
}

/// Compares local and remote checksums. Inability to compute either one
/// downgrades to a skip rather than a failure.
fn verify_transfer(
    probe: &RemoteProbe<'_>,
    remote_path: &str,
    local_path: &Path,
) -> Verification {
    let local = match local_checksum(local_path) {
        Ok(c) => c,
        Err(e) => return Verification::Skipped(format!("local checksum: {e}")),
    };
    let remote = match probe.checksum(remote_path) {
        Ok(c) => c,
        Err(e) => return Verification::Skipped(format!("remote checksum: {e}")),
    };
    if local == remote {
        Verification::Match
    } else {
        Verification::Mismatch { local, remote }
    }
}

/// Terminal-failure cleanup: never leave a partial file behind.
fn fail(local_path: &Path, state: &TransferState, err: TransferError) -> TransferError {
    if let Err(e) = std::fs::remove_file(local_path) {
        if e.kind() != ErrorKind::NotFound {
            warn!(path = %local_path.display(), error = %e, "failed to remove partial file");
        }
    }
    error!(
        transferred = state.bytes_transferred,
        total = state.file_size,
        error = %err,
        "transfer failed"
    );
    err
}
