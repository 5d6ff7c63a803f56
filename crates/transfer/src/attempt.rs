//! One offset-resumed copy attempt.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

use podpull_exec::ExecChannel;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::fault::FaultInjector;
use crate::options::TransferOptions;
use crate::progress::{ProgressSink, ProgressWriter};
use crate::stream::OffsetStream;
use crate::TransferError;

const COPY_BUF_SIZE: usize = 32 * 1024;

/// Resume state for one transfer session.
///
/// Owned by the orchestrator; each attempt receives it by reference and
/// commits `bytes_transferred` only after bytes have actually reached disk.
/// It never decreases except on an explicit full restart.
#[derive(Debug, Clone, Copy)]
pub(crate) struct TransferState {
    pub file_size: u64,
    pub bytes_transferred: u64,
}

/// Everything an attempt needs, borrowed from the orchestrator.
pub(crate) struct AttemptContext<'a> {
    pub channel: &'a dyn ExecChannel,
    pub remote_path: &'a str,
    pub local_path: &'a Path,
    pub options: &'a TransferOptions,
    pub sink: &'a dyn ProgressSink,
    pub cancel: &'a CancellationToken,
    pub fault: &'a dyn FaultInjector,
}

/// Runs exactly one copy attempt from the current resume offset.
///
/// On every exit path, success or failure, `state.bytes_transferred` is set
/// to `offset + bytes copied this attempt`: partial bytes already reached
/// disk and must not be re-fetched.
pub(crate) fn run_attempt(
    ctx: &AttemptContext<'_>,
    state: &mut TransferState,
) -> Result<u64, TransferError> {
    let mut offset = state.bytes_transferred;

    // Resume is best-effort: if the partial file vanished between attempts,
    // fall back to a fresh copy from zero.
    let file = if offset > 0 {
        match OpenOptions::new().append(true).open(ctx.local_path) {
            Ok(f) => f,
            Err(e) => {
                warn!(
                    path = %ctx.local_path.display(),
                    error = %e,
                    "cannot reopen partial file, restarting from zero"
                );
                offset = 0;
                state.bytes_transferred = 0;
                File::create(ctx.local_path)?
            }
        }
    } else {
        File::create(ctx.local_path)?
    };

    let mut stream = OffsetStream::open_from(
        ctx.channel,
        ctx.remote_path,
        offset,
        ctx.options.use_compression,
    )?;

    let mut dest = ProgressWriter::new(
        file,
        format!("downloading {}", ctx.remote_path),
        state.file_size,
        offset,
        ctx.options.progress_interval,
        ctx.sink,
    );

    let mut copied: u64 = 0;
    let result = copy_stream(ctx, state.file_size, offset, &mut stream, &mut dest, &mut copied);

    // Commit before any error propagates.
    state.bytes_transferred = offset + copied;
    debug!(
        offset,
        copied,
        transferred = state.bytes_transferred,
        "attempt finished copying"
    );

    let flushed = dest.flush();
    drop(dest);
    let closed = stream.close();

    result?;
    flushed?;
    closed?;
    Ok(copied)
}

fn copy_stream(
    ctx: &AttemptContext<'_>,
    file_size: u64,
    offset: u64,
    stream: &mut OffsetStream,
    dest: &mut ProgressWriter<'_, File>,
    copied: &mut u64,
) -> Result<(), TransferError> {
    let mut buf = [0u8; COPY_BUF_SIZE];
    loop {
        if ctx.cancel.is_cancelled() {
            return Err(TransferError::Cancelled);
        }
        let position = offset + *copied;
        ctx.fault.before_read(position).map_err(TransferError::Stream)?;

        // Never read past the probed size: resume depends on the local file
        // holding exactly the confirmed bytes.
        let want = (buf.len() as u64).min(file_size - position) as usize;
        if want == 0 {
            return Ok(());
        }
        let n = stream.read(&mut buf[..want])?;
        if n == 0 {
            return Ok(());
        }
        dest.write_all(&buf[..n])?;
        *copied += n as u64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fault::NoFaults;
    use crate::progress::NullSink;
    use podpull_test_utils::{Fault, ScriptedChannel};
    use std::time::Duration;

    fn options() -> TransferOptions {
        TransferOptions {
            use_compression: false,
            progress_interval: Duration::ZERO,
            max_no_progress_attempts: 3,
        }
    }

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    struct Fixture {
        channel: ScriptedChannel,
        dir: tempfile::TempDir,
        data: Vec<u8>,
    }

    impl Fixture {
        fn new(len: usize) -> Self {
            let data = pattern(len);
            let mut channel = ScriptedChannel::new();
            channel.add_file("/data/f", data.clone());
            Self {
                channel,
                dir: tempfile::TempDir::new().unwrap(),
                data,
            }
        }

        fn local(&self) -> std::path::PathBuf {
            self.dir.path().join("f")
        }

        fn run(&self, state: &mut TransferState) -> Result<u64, TransferError> {
            let opts = options();
            let cancel = CancellationToken::new();
            let ctx = AttemptContext {
                channel: &self.channel,
                remote_path: "/data/f",
                local_path: &self.local(),
                options: &opts,
                sink: &NullSink,
                cancel: &cancel,
                fault: &NoFaults,
            };
            run_attempt(&ctx, state)
        }
    }

    #[test]
    fn full_copy_from_zero() {
        let fx = Fixture::new(10_000);
        let mut state = TransferState {
            file_size: 10_000,
            bytes_transferred: 0,
        };
        assert_eq!(fx.run(&mut state).unwrap(), 10_000);
        assert_eq!(state.bytes_transferred, 10_000);
        assert_eq!(std::fs::read(fx.local()).unwrap(), fx.data);
    }

    #[test]
    fn failure_commits_partial_progress() {
        let fx = Fixture::new(10_000);
        fx.channel.push_fault(Fault::CutAt { offset: 2500 });
        let mut state = TransferState {
            file_size: 10_000,
            bytes_transferred: 0,
        };
        let err = fx.run(&mut state).unwrap_err();
        assert!(err.is_recoverable());
        assert_eq!(state.bytes_transferred, 2500);
        // Local file length matches the committed offset exactly.
        assert_eq!(std::fs::metadata(fx.local()).unwrap().len(), 2500);
    }

    #[test]
    fn resume_appends_from_offset() {
        let fx = Fixture::new(10_000);
        fx.channel.push_fault(Fault::CutAt { offset: 2500 });
        let mut state = TransferState {
            file_size: 10_000,
            bytes_transferred: 0,
        };
        fx.run(&mut state).unwrap_err();
        assert_eq!(fx.run(&mut state).unwrap(), 7500);
        assert_eq!(state.bytes_transferred, 10_000);
        assert_eq!(std::fs::read(fx.local()).unwrap(), fx.data);
    }

    #[test]
    fn missing_partial_file_falls_back_to_fresh_copy() {
        let fx = Fixture::new(5000);
        // State claims progress but the file does not exist.
        let mut state = TransferState {
            file_size: 5000,
            bytes_transferred: 3000,
        };
        assert_eq!(fx.run(&mut state).unwrap(), 5000);
        assert_eq!(state.bytes_transferred, 5000);
        assert_eq!(std::fs::read(fx.local()).unwrap(), fx.data);
    }

    #[test]
    fn cancelled_before_first_read() {
        let fx = Fixture::new(1000);
        let opts = options();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut state = TransferState {
            file_size: 1000,
            bytes_transferred: 0,
        };
        let ctx = AttemptContext {
            channel: &fx.channel,
            remote_path: "/data/f",
            local_path: &fx.local(),
            options: &opts,
            sink: &NullSink,
            cancel: &cancel,
            fault: &NoFaults,
        };
        assert!(matches!(
            run_attempt(&ctx, &mut state),
            Err(TransferError::Cancelled)
        ));
        assert_eq!(state.bytes_transferred, 0);
    }

    #[test]
    fn injected_fault_aborts_at_offset() {
        struct FailPast(u64);
        impl FaultInjector for FailPast {
            fn before_read(&self, offset: u64) -> std::io::Result<()> {
                if offset >= self.0 {
                    Err(std::io::Error::other("injected"))
                } else {
                    Ok(())
                }
            }
        }

        let fx = Fixture::new(100_000);
        let opts = options();
        let cancel = CancellationToken::new();
        let mut state = TransferState {
            file_size: 100_000,
            bytes_transferred: 0,
        };
        let ctx = AttemptContext {
            channel: &fx.channel,
            remote_path: "/data/f",
            local_path: &fx.local(),
            options: &opts,
            sink: &NullSink,
            cancel: &cancel,
            fault: &FailPast(COPY_BUF_SIZE as u64),
        };
        let err = run_attempt(&ctx, &mut state).unwrap_err();
        assert!(matches!(err, TransferError::Stream(_)));
        // One buffer made it to disk before the injector fired.
        assert_eq!(state.bytes_transferred, COPY_BUF_SIZE as u64);
    }

    #[test]
    fn compressed_attempt_copies_exactly() {
        let data = pattern(300_000);
        let mut channel = ScriptedChannel::new();
        channel.add_file("/data/f", data.clone());
        let dir = tempfile::TempDir::new().unwrap();
        let local = dir.path().join("f");

        let opts = TransferOptions {
            use_compression: true,
            ..options()
        };
        let cancel = CancellationToken::new();
        let mut state = TransferState {
            file_size: 300_000,
            bytes_transferred: 0,
        };
        let ctx = AttemptContext {
            channel: &channel,
            remote_path: "/data/f",
            local_path: &local,
            options: &opts,
            sink: &NullSink,
            cancel: &cancel,
            fault: &NoFaults,
        };
        assert_eq!(run_attempt(&ctx, &mut state).unwrap(), 300_000);
        assert_eq!(std::fs::read(&local).unwrap(), data);
    }
}
