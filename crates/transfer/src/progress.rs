//! Throttled progress reporting from the write path.

use std::io::Write;
use std::time::{Duration, Instant};

/// Abstract, append-only reporting surface.
///
/// The engine has no idea whether lines end up on a spinner, a TTY or a log
/// file; the sink decides.
pub trait ProgressSink: Send + Sync {
    fn report_line(&self, line: &str);
    fn set_header(&self, lines: &[String]);
}

/// Sink that discards everything.
pub struct NullSink;

impl ProgressSink for NullSink {
    fn report_line(&self, _line: &str) {}
    fn set_header(&self, _lines: &[String]) {}
}

/// Formats a byte count for humans (`512B`, `1.5MiB`).
pub fn human_bytes(n: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = n as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{n}B")
    } else {
        format!("{value:.1}{}", UNITS[unit])
    }
}

/// Destination writer that counts bytes and emits throttled progress lines.
///
/// A line is emitted when the transfer completes (always, exactly once), or
/// when the configured interval has elapsed *and* the percentage strictly
/// increased since the last emission. The dual condition avoids flooding
/// fast links without letting slow ones look stuck.
///
/// Seed `processed` with the resume offset so mid-resume percentages carry
/// on from where the previous attempt stopped.
pub struct ProgressWriter<'a, W: Write> {
    dest: W,
    label: String,
    processed: u64,
    total: u64,
    interval: Duration,
    last_percent: Option<u64>,
    last_update: Instant,
    completed: bool,
    sink: &'a dyn ProgressSink,
}

impl<'a, W: Write> ProgressWriter<'a, W> {
    pub fn new(
        dest: W,
        label: impl Into<String>,
        total: u64,
        processed: u64,
        interval: Duration,
        sink: &'a dyn ProgressSink,
    ) -> Self {
        Self {
            dest,
            label: label.into(),
            processed,
            total,
            interval,
            last_percent: None,
            last_update: Instant::now(),
            completed: false,
            sink,
        }
    }

    /// Bytes written through this writer plus the seed offset.
    pub fn processed(&self) -> u64 {
        self.processed
    }

    fn percent(&self) -> u64 {
        if self.total == 0 {
            return 100;
        }
        (self.processed * 100 / self.total).min(100)
    }

    fn advance(&mut self, n: u64) {
        self.processed += n;
        let percent = self.percent();

        if self.processed >= self.total {
            // Completion always reports, regardless of the interval.
            if !self.completed {
                self.completed = true;
                self.emit(percent);
            }
            return;
        }

        let increased = self.last_percent.is_none_or(|last| percent > last);
        if increased && self.last_update.elapsed() > self.interval {
            self.emit(percent);
        }
    }

    fn emit(&mut self, percent: u64) {
        self.sink.report_line(&format!(
            "{}: {}% ({} of {})",
            self.label,
            percent,
            human_bytes(self.processed),
            human_bytes(self.total)
        ));
        self.last_percent = Some(percent);
        self.last_update = Instant::now();
    }
}

impl<W: Write> Write for ProgressWriter<'_, W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.dest.write(buf)?;
        self.advance(n as u64);
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.dest.flush()
    }
}
