//! MD5 integrity checks against published `.md5` side-files

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use md5::{Digest, Md5};

use crate::stream::{StreamError, fetch_text};

/// Block size for hashing (1 MiB)
const BLOCK_SIZE: usize = 1 << 20;

/// Hex MD5 of a file, read in fixed-size blocks.
pub fn compute_checksum(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Md5::new();
    let mut buf = vec![0u8; BLOCK_SIZE];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex(&hasher.finalize()))
}

fn hex(bytes: &[u8]) -> String {
    use std::fmt::Write;
    bytes.iter().fold(String::with_capacity(32), |mut s, b| {
        let _ = write!(s, "{b:02x}");
        s
    })
}

/// Parse `"<hexdigest> <filename>"`: the digest is everything before the first whitespace.
pub fn parse_checksum_line(body: &str) -> Option<String> {
    body.split_whitespace()
        .next()
        .map(|d| d.to_ascii_lowercase())
        .filter(|d| !d.is_empty())
}

/// URL of the checksum side-file published next to `artifact_url`.
pub fn checksum_url(artifact_url: &str) -> String {
    format!("{artifact_url}.md5")
}

/// Fetch and parse the remote digest for `artifact_url`.
pub async fn fetch_remote_checksum(artifact_url: &str) -> Result<String, StreamError> {
    let body = fetch_text(&checksum_url(artifact_url)).await?;
    parse_checksum_line(&body).ok_or_else(|| StreamError::Http {
        status: None,
        message: format!("empty checksum file for {artifact_url}"),
    })
}

/// Digest equality. Case-insensitive since publishers differ on hex case.
pub fn verify(actual: &str, expected: &str) -> bool {
    actual.eq_ignore_ascii_case(expected)
}

/// Hash `path` and compare with `expected`; a missing file never verifies.
pub fn verify_file(path: &Path, expected: &str) -> io::Result<bool> {
    if !path.is_file() {
        return Ok(false);
    }
    Ok(verify(&compute_checksum(path)?, expected))
}
