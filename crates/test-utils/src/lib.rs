//! Scripted in-memory [`ExecChannel`] for exercising the transfer engine.
//!
//! `ScriptedChannel` holds a fake remote filesystem and answers the exact
//! command dialect from `podpull_exec::command`. A fault script injects
//! failures at controlled byte offsets, which is what the resume and
//! retry-budget tests need.

use std::collections::{HashMap, VecDeque};
use std::io::{Read, Write};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use flate2::Compression;
use flate2::write::GzEncoder;
use podpull_exec::{CapturedOutput, ExecChannel, ExecError, ExecStream, StreamExit, StreamHandle};

/// One scripted failure. Faults are consumed front-to-back, one per
/// triggering call.
#[derive(Debug, Clone)]
pub enum Fault {
    /// The stream errors when it would deliver this absolute file offset.
    /// Bytes before the offset are served normally.
    CutAt { offset: u64 },
    /// Truncates the compressed byte stream after `bytes` gzip bytes, then
    /// ends cleanly — the missing trailer is the only truncation signal,
    /// as when a remote pipe closes mid-transfer.
    CutCompressedAt { bytes: usize },
    /// Serves bit-flipped file content (drives the checksum-mismatch path).
    GarbleStream,
    /// The `stream()` call itself fails.
    FailOpen,
    /// The next `md5sum` capture fails.
    DenyChecksum,
}

/// A recorded `stream()` request, for offset assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamRequest {
    pub path: String,
    pub skip_blocks: u64,
    pub block_size: u64,
    pub compress: bool,
}

impl StreamRequest {
    /// The byte offset the remote side actually started at.
    pub fn start_offset(&self) -> u64 {
        self.skip_blocks * self.block_size
    }
}

/// In-memory exec channel with a scripted fault plan.
#[derive(Default)]
pub struct ScriptedChannel {
    files: HashMap<String, Vec<u8>>,
    faults: Mutex<VecDeque<Fault>>,
    always_fail_streams: AtomicBool,
    requests: Mutex<Vec<StreamRequest>>,
}

impl ScriptedChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a file to the fake remote filesystem.
    pub fn add_file(&mut self, path: &str, data: Vec<u8>) {
        self.files.insert(path.to_string(), data);
    }

    /// Appends a fault to the script.
    pub fn push_fault(&self, fault: Fault) {
        self.faults.lock().unwrap().push_back(fault);
    }

    /// When set, every `stream()` call fails before producing a byte.
    pub fn fail_all_streams(&self, on: bool) {
        self.always_fail_streams.store(on, Ordering::SeqCst);
    }

    /// All stream requests seen so far, in order.
    pub fn stream_requests(&self) -> Vec<StreamRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Number of `stream()` calls made (including failed opens).
    pub fn stream_attempts(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    fn pop_fault_if(&self, pred: impl Fn(&Fault) -> bool) -> Option<Fault> {
        let mut faults = self.faults.lock().unwrap();
        if faults.front().is_some_and(&pred) {
            faults.pop_front()
        } else {
            None
        }
    }
}

impl ExecChannel for ScriptedChannel {
    fn capture(&self, command: &str) -> Result<CapturedOutput, ExecError> {
        if let Some(path) = parse_size_command(command) {
            let data = self.files.get(&path).ok_or_else(|| ExecError::Remote {
                command: command.to_string(),
                stderr: format!("stat: cannot statx '{path}': No such file or directory"),
            })?;
            return Ok(CapturedOutput {
                stdout: format!("{}\n", data.len()).into_bytes(),
                stderr: Vec::new(),
            });
        }

        if let Some(path) = parse_checksum_command(command) {
            if self
                .pop_fault_if(|f| matches!(f, Fault::DenyChecksum))
                .is_some()
            {
                return Err(ExecError::Remote {
                    command: command.to_string(),
                    stderr: "sh: md5sum: command not found".to_string(),
                });
            }
            let data = self.files.get(&path).ok_or_else(|| ExecError::Remote {
                command: command.to_string(),
                stderr: format!("md5sum: {path}: No such file or directory"),
            })?;
            let digest = md5::compute(data);
            return Ok(CapturedOutput {
                stdout: format!("{digest:x}  {path}\n").into_bytes(),
                stderr: Vec::new(),
            });
        }

        Err(ExecError::Remote {
            command: command.to_string(),
            stderr: "unrecognized command".to_string(),
        })
    }

    fn stream(&self, command: &str) -> Result<ExecStream, ExecError> {
        let req = parse_stream_command(command).ok_or_else(|| ExecError::Remote {
            command: command.to_string(),
            stderr: "unrecognized command".to_string(),
        })?;
        self.requests.lock().unwrap().push(req.clone());

        if self.always_fail_streams.load(Ordering::SeqCst)
            || self
                .pop_fault_if(|f| matches!(f, Fault::FailOpen))
                .is_some()
        {
            return Err(ExecError::Remote {
                command: command.to_string(),
                stderr: "connection reset by peer".to_string(),
            });
        }

        let data = self.files.get(&req.path).ok_or_else(|| ExecError::Remote {
            command: command.to_string(),
            stderr: format!("dd: failed to open '{}': No such file or directory", req.path),
        })?;

        let start = (req.start_offset() as usize).min(data.len());
        let mut tail = data[start..].to_vec();

        if self
            .pop_fault_if(|f| matches!(f, Fault::GarbleStream))
            .is_some()
        {
            for b in &mut tail {
                *b ^= 0xAA;
            }
        }

        let mut cut_plain: Option<usize> = None;
        if let Some(Fault::CutAt { offset }) = self.pop_fault_if(|f| {
            matches!(f, Fault::CutAt { offset } if *offset >= start as u64)
        }) {
            cut_plain = Some((offset as usize - start).min(tail.len()));
        }

        let (served, fail_at_end) = if req.compress {
            let mut enc = GzEncoder::new(Vec::new(), Compression::fast());
            enc.write_all(&tail).expect("in-memory gzip write");
            let mut gz = enc.finish().expect("in-memory gzip finish");
            if let Some(Fault::CutCompressedAt { bytes }) =
                self.pop_fault_if(|f| matches!(f, Fault::CutCompressedAt { .. }))
            {
                gz.truncate(bytes.min(gz.len()));
            }
            (gz, false)
        } else if let Some(cut) = cut_plain {
            tail.truncate(cut);
            (tail, true)
        } else {
            (tail, false)
        };

        Ok(ExecStream {
            reader: Box::new(ScriptReader {
                data: served,
                pos: 0,
                fail_at_end,
            }),
            handle: Box::new(ScriptHandle),
        })
    }
}

struct ScriptReader {
    data: Vec<u8>,
    pos: usize,
    fail_at_end: bool,
}

impl Read for ScriptReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let remaining = self.data.len() - self.pos;
        if remaining == 0 {
            if self.fail_at_end {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::ConnectionReset,
                    "connection reset by peer",
                ));
            }
            return Ok(0);
        }
        let n = remaining.min(buf.len());
        buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

struct ScriptHandle;

impl StreamHandle for ScriptHandle {
    fn close(&mut self) -> Result<StreamExit, ExecError> {
        Ok(StreamExit::default())
    }
}

// ---------------------------------------------------------------------------
// Command parsing (inverse of podpull_exec::command)
// ---------------------------------------------------------------------------

fn unquote(s: &str) -> Option<String> {
    let s = s.strip_prefix('\'')?.strip_suffix('\'')?;
    Some(s.replace("'\\''", "'"))
}

fn parse_size_command(command: &str) -> Option<String> {
    command.strip_prefix("stat -c %s -- ").and_then(unquote)
}

fn parse_checksum_command(command: &str) -> Option<String> {
    command.strip_prefix("md5sum -- ").and_then(unquote)
}

fn parse_stream_command(command: &str) -> Option<StreamRequest> {
    let (dd, compress) = match command.strip_suffix(" | gzip -c") {
        Some(dd) => (dd, true),
        None => (command, false),
    };
    let rest = dd.strip_prefix("dd if=")?;
    let rest = rest.strip_suffix(" status=none")?;
    // rest: '<path>' bs=<n> skip=<k>
    let bs_pos = rest.rfind(" bs=")?;
    let (quoted, params) = rest.split_at(bs_pos);
    let path = unquote(quoted)?;
    let params = params.strip_prefix(" bs=")?;
    let (bs, skip) = params.split_once(" skip=")?;
    Some(StreamRequest {
        path,
        skip_blocks: skip.parse().ok()?,
        block_size: bs.parse().ok()?,
        compress,
    })
}
