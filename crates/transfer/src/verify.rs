//! Local integrity verification.

use std::io::Read;
use std::path::Path;

/// Computes the md5 of a local file and returns the hex-encoded digest.
///
/// md5 matches the remote side's `md5sum`; this is an integrity check
/// against transport corruption, not a security boundary.
pub fn local_checksum(path: &Path) -> std::io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut ctx = md5::Context::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        ctx.consume(&buf[..n]);
    }
    Ok(format!("{:x}", ctx.compute()))
}
