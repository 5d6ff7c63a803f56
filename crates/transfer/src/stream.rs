//! Byte-offset streaming of a remote file over the exec channel.
//!
//! `dd` can only seek in whole input blocks, so the remote command skips
//! `offset / BLOCK` blocks and the remainder is read and discarded locally
//! (after decompression, when enabled). Callers see a stream that starts at
//! the exact byte offset they asked for.

use std::io::{ErrorKind, Read};

use flate2::read::GzDecoder;
use podpull_exec::{ExecChannel, ExecError, ExecStream, StreamExit, StreamHandle, command};
use tracing::debug;

use crate::TransferError;

/// `dd` input block size used for remote seeking.
pub const STREAM_BLOCK_SIZE: u64 = 64 * 1024;

/// A remote file stream positioned at an exact byte offset.
pub struct OffsetStream {
    reader: Box<dyn Read + Send>,
    handle: Option<Box<dyn StreamHandle>>,
    compressed: bool,
}

impl std::fmt::Debug for OffsetStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OffsetStream")
            .field("compressed", &self.compressed)
            .finish_non_exhaustive()
    }
}

impl OffsetStream {
    /// Starts streaming `path` from `offset`, optionally gzip-compressed on
    /// the wire.
    pub fn open_from(
        channel: &dyn ExecChannel,
        path: &str,
        offset: u64,
        compress: bool,
    ) -> Result<Self, TransferError> {
        let skip_blocks = offset / STREAM_BLOCK_SIZE;
        let discard = offset % STREAM_BLOCK_SIZE;
        let cmd = command::stream_command(path, skip_blocks, STREAM_BLOCK_SIZE, compress);
        debug!(path, offset, skip_blocks, discard, compress, "opening remote stream");

        let ExecStream { reader, handle } = channel.stream(&cmd)?;
        let reader: Box<dyn Read + Send> = if compress {
            Box::new(GzDecoder::new(reader))
        } else {
            reader
        };
        let mut stream = Self {
            reader,
            handle: Some(handle),
            compressed: compress,
        };

        if discard > 0 {
            if let Err(e) = stream.discard(discard) {
                let _ = stream.close();
                return Err(e);
            }
        }
        Ok(stream)
    }

    /// Reads into `buf`, classifying transport errors.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransferError> {
        self.reader.read(buf).map_err(|e| self.classify(e))
    }

    /// Releases the remote command. Must run on every exit path; `Drop`
    /// covers the paths that do not call it explicitly.
    pub fn close(mut self) -> Result<StreamExit, ExecError> {
        match self.handle.take() {
            Some(mut handle) => handle.close(),
            None => Ok(StreamExit::default()),
        }
    }

    /// Reads and drops `n` bytes to reach the exact requested offset.
    fn discard(&mut self, n: u64) -> Result<(), TransferError> {
        let mut sink = std::io::sink();
        let copied = std::io::copy(&mut self.reader.by_ref().take(n), &mut sink)
            .map_err(|e| self.classify(e))?;
        if copied < n {
            return Err(TransferError::Stream(std::io::Error::new(
                ErrorKind::UnexpectedEof,
                "stream ended inside the skipped block remainder",
            )));
        }
        Ok(())
    }

    /// A compressed stream that ends without a valid trailer means the
    /// transport cut out, which is distinct from ordinary read errors.
    fn classify(&self, e: std::io::Error) -> TransferError {
        if self.compressed
            && matches!(
                e.kind(),
                ErrorKind::UnexpectedEof | ErrorKind::InvalidInput | ErrorKind::InvalidData
            )
        {
            TransferError::TruncatedStream
        } else {
            TransferError::Stream(e)
        }
    }
}

impl Drop for OffsetStream {
    fn drop(&mut self) {
        if let Some(mut handle) = self.handle.take() {
            let _ = handle.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use podpull_test_utils::{Fault, ScriptedChannel};

    fn channel_with(path: &str, data: &[u8]) -> ScriptedChannel {
        let mut ch = ScriptedChannel::new();
        ch.add_file(path, data.to_vec());
        ch
    }

    fn read_to_end(stream: &mut OffsetStream) -> Result<Vec<u8>, TransferError> {
        let mut out = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            let n = stream.read(&mut buf)?;
            if n == 0 {
                return Ok(out);
            }
            out.extend_from_slice(&buf[..n]);
        }
    }

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn reads_from_zero() {
        let data = pattern(1000);
        let ch = channel_with("/data/f", &data);
        let mut s = OffsetStream::open_from(&ch, "/data/f", 0, false).unwrap();
        assert_eq!(read_to_end(&mut s).unwrap(), data);
        s.close().unwrap();
    }

    #[test]
    fn block_aligned_offset_skips_remotely() {
        let len = 3 * STREAM_BLOCK_SIZE as usize;
        let data = pattern(len);
        let ch = channel_with("/data/f", &data);
        let offset = 2 * STREAM_BLOCK_SIZE;
        let mut s = OffsetStream::open_from(&ch, "/data/f", offset, false).unwrap();
        assert_eq!(read_to_end(&mut s).unwrap(), data[offset as usize..]);

        let req = &ch.stream_requests()[0];
        assert_eq!(req.skip_blocks, 2);
        assert_eq!(req.start_offset(), offset);
    }

    #[test]
    fn unaligned_offset_discards_remainder() {
        let len = 2 * STREAM_BLOCK_SIZE as usize;
        let data = pattern(len);
        let ch = channel_with("/data/f", &data);
        let offset = STREAM_BLOCK_SIZE + 12_345;
        let mut s = OffsetStream::open_from(&ch, "/data/f", offset, false).unwrap();
        assert_eq!(read_to_end(&mut s).unwrap(), data[offset as usize..]);

        // Only one whole block was skipped remotely.
        assert_eq!(ch.stream_requests()[0].skip_blocks, 1);
    }

    #[test]
    fn small_offset_within_first_block() {
        let data = pattern(100);
        let ch = channel_with("/data/f", &data);
        let mut s = OffsetStream::open_from(&ch, "/data/f", 37, false).unwrap();
        assert_eq!(read_to_end(&mut s).unwrap(), data[37..]);
        assert_eq!(ch.stream_requests()[0].skip_blocks, 0);
    }

    #[test]
    fn compressed_roundtrip_with_offset() {
        let len = STREAM_BLOCK_SIZE as usize + 5000;
        let data = pattern(len);
        let ch = channel_with("/data/f", &data);
        let mut s = OffsetStream::open_from(&ch, "/data/f", 70_000, true).unwrap();
        assert_eq!(read_to_end(&mut s).unwrap(), data[70_000..]);
    }

    #[test]
    fn cut_mid_stream_is_stream_error() {
        let data = pattern(10_000);
        let ch = channel_with("/data/f", &data);
        ch.push_fault(Fault::CutAt { offset: 4000 });
        let mut s = OffsetStream::open_from(&ch, "/data/f", 0, false).unwrap();
        let mut got = Vec::new();
        let mut buf = [0u8; 1024];
        let err = loop {
            match s.read(&mut buf) {
                Ok(0) => panic!("expected a stream error"),
                Ok(n) => got.extend_from_slice(&buf[..n]),
                Err(e) => break e,
            }
        };
        assert!(matches!(err, TransferError::Stream(_)));
        assert!(err.is_recoverable());
        assert_eq!(got, data[..4000]);
    }

    #[test]
    fn truncated_gzip_is_classified_as_truncation() {
        let data = vec![9u8; 200_000];
        let ch = channel_with("/data/f", &data);
        ch.push_fault(Fault::CutCompressedAt { bytes: 60 });
        let mut s = OffsetStream::open_from(&ch, "/data/f", 0, true).unwrap();
        let err = read_to_end(&mut s).unwrap_err();
        assert!(matches!(err, TransferError::TruncatedStream));
        assert!(err.is_recoverable());
    }

    #[test]
    fn open_failure_propagates_as_exec_error() {
        let ch = channel_with("/data/f", b"x");
        ch.push_fault(Fault::FailOpen);
        let err = OffsetStream::open_from(&ch, "/data/f", 0, false).unwrap_err();
        assert!(matches!(err, TransferError::Exec(_)));
    }

    #[test]
    fn eof_inside_discard_is_an_error() {
        // File shorter than the requested offset: the remainder cannot be
        // skipped.
        let data = pattern(100);
        let ch = channel_with("/data/f", &data);
        let err = OffsetStream::open_from(&ch, "/data/f", 500, false).unwrap_err();
        assert!(matches!(err, TransferError::Stream(_)));
    }
}
