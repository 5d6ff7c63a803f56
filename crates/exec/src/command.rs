//! Shell command dialect shared by the transfer engine and its test fakes.
//!
//! The remote side is assumed to have only generic POSIX tools: `stat`,
//! `md5sum`, `dd` and optionally `gzip`. Everything the engine needs is
//! phrased in terms of those.

/// Quotes `arg` for a POSIX shell (single quotes, `'\''` escaping).
pub fn quote(arg: &str) -> String {
    let mut out = String::with_capacity(arg.len() + 2);
    out.push('\'');
    for c in arg.chars() {
        if c == '\'' {
            out.push_str("'\\''");
        } else {
            out.push(c);
        }
    }
    out.push('\'');
    out
}

/// Command that prints the file size in bytes on stdout.
pub fn size_command(path: &str) -> String {
    format!("stat -c %s -- {}", quote(path))
}

/// Command that prints `<md5-hex>  <path>` on stdout.
pub fn checksum_command(path: &str) -> String {
    format!("md5sum -- {}", quote(path))
}

/// Command that streams the file from `skip_blocks * block_size` bytes on.
///
/// `dd` can only seek in whole input blocks; callers discard the remainder
/// locally to reach an exact byte offset. With `compress`, stdout is a gzip
/// stream of the emitted bytes.
pub fn stream_command(path: &str, skip_blocks: u64, block_size: u64, compress: bool) -> String {
    let dd = format!(
        "dd if={} bs={} skip={} status=none",
        quote(path),
        block_size,
        skip_blocks
    );
    if compress {
        format!("{dd} | gzip -c")
    } else {
        dd
    }
}
