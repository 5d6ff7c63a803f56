//! Engine configuration.

use std::time::Duration;

/// Minimum interval between progress lines for interactive reporting
/// (spinner/terminal).
pub const INTERACTIVE_PROGRESS_INTERVAL: Duration = Duration::from_millis(100);

/// Minimum interval between progress lines for non-interactive reporting.
/// Log files should not get ten updates a second.
pub const BATCH_PROGRESS_INTERVAL: Duration = Duration::from_secs(5);

/// Default cap on consecutive attempts that advance zero bytes.
pub const DEFAULT_MAX_NO_PROGRESS_ATTEMPTS: u32 = 3;

/// Options for a file transfer.
#[derive(Debug, Clone)]
pub struct TransferOptions {
    /// Pipe the remote stream through `gzip -c`. Trades remote CPU for
    /// transfer size.
    pub use_compression: bool,
    /// Minimum time between progress emissions (completion always reports).
    pub progress_interval: Duration,
    /// Consecutive zero-progress attempts tolerated before giving up.
    /// Attempts that advance at least one byte do not count against this.
    /// Clamped to at least 1.
    pub max_no_progress_attempts: u32,
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self {
            use_compression: true,
            progress_interval: INTERACTIVE_PROGRESS_INTERVAL,
            max_no_progress_attempts: DEFAULT_MAX_NO_PROGRESS_ATTEMPTS,
        }
    }
}

impl TransferOptions {
    /// Defaults tuned for non-interactive (log file) reporting.
    pub fn batch() -> Self {
        Self {
            progress_interval: BATCH_PROGRESS_INTERVAL,
            ..Self::default()
        }
    }
}
