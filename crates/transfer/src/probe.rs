//! Remote file probes over the exec channel's capture primitive.

use podpull_exec::{ExecChannel, command};

use crate::TransferError;

/// Issues short `stat`/`md5sum` commands against the remote target.
///
/// Probe failures are not retried here: a file that cannot be stat'd will
/// not appear by re-running the same command, so the orchestrator surfaces
/// them immediately.
pub struct RemoteProbe<'a> {
    channel: &'a dyn ExecChannel,
}

impl<'a> RemoteProbe<'a> {
    pub fn new(channel: &'a dyn ExecChannel) -> Self {
        Self { channel }
    }

    /// Returns the remote file size in bytes.
    pub fn size(&self, path: &str) -> Result<u64, TransferError> {
        let out = self
            .channel
            .capture(&command::size_command(path))
            .map_err(|e| probe_err(path, e.to_string()))?;
        let text = out.stdout_text();
        text.parse()
            .map_err(|_| probe_err(path, format!("unexpected stat output: {text:?}")))
    }

    /// Returns the remote file's md5 as a hex string.
    pub fn checksum(&self, path: &str) -> Result<String, TransferError> {
        let out = self
            .channel
            .capture(&command::checksum_command(path))
            .map_err(|e| probe_err(path, e.to_string()))?;
        let text = out.stdout_text();
        // md5sum prints `<digest>  <path>`.
        let digest = text.split_whitespace().next().unwrap_or_default();
        if digest.len() != 32 || !digest.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(probe_err(path, format!("unexpected md5sum output: {text:?}")));
        }
        Ok(digest.to_ascii_lowercase())
    }
}

fn probe_err(path: &str, reason: String) -> TransferError {
    TransferError::Probe {
        path: path.to_string(),
        reason,
    }
}
