//! Manifest-driven integrity verification.
//!
//! The fetch container writes a `checksums.sha512` manifest in coreutils
//! `sha512sum` format covering every artifact it downloaded. Verification
//! recomputes SHA-512 in-process for each listed file; integrity is binary,
//! so a missing file, a mismatched digest, or a malformed line aborts the
//! pipeline.

use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use sha2::{Digest, Sha512};

/// Manifest file the fetch container writes at the scratch root.
pub const CHECKSUM_MANIFEST: &str = "checksums.sha512";

/// Verify every file the manifest lists, relative to `dir`.
///
/// Returns the number of verified files. An empty manifest is an error; it
/// would verify nothing.
pub fn verify_dir(dir: &Path) -> Result<usize> {
    let manifest = dir.join(CHECKSUM_MANIFEST);
    let text = fs::read_to_string(&manifest)
        .with_context(|| format!("reading checksum manifest '{}'", manifest.display()))?;

    let mut checked = 0usize;
    for (index, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        let (expected, relative) = parse_manifest_line(line).ok_or_else(|| {
            anyhow!(
                "malformed line {} in '{}': {}",
                index + 1,
                manifest.display(),
                raw
            )
        })?;

        let file = dir.join(relative);
        if !file.is_file() {
            bail!(
                "manifest lists '{}' but it is missing from '{}'",
                relative,
                dir.display()
            );
        }
        let actual = sha512_file(&file)?;
        if !actual.eq_ignore_ascii_case(expected) {
            bail!(
                "checksum mismatch for '{}': expected {}, got {}",
                relative,
                expected,
                actual
            );
        }
        checked += 1;
    }

    if checked == 0 {
        bail!("checksum manifest '{}' lists no files", manifest.display());
    }

    println!("[verify] {} file(s) match {}", checked, CHECKSUM_MANIFEST);
    Ok(checked)
}

/// Parse one `sha512sum` output line: a 128-hex-digit digest, whitespace,
/// then the relative path (`*` binary-mode marker accepted).
fn parse_manifest_line(line: &str) -> Option<(&str, &str)> {
    let (digest, rest) = line.split_once(char::is_whitespace)?;
    if digest.len() != 128 || !digest.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    let path = rest.trim_start();
    let path = path.strip_prefix('*').unwrap_or(path);
    if path.is_empty() {
        return None;
    }
    Some((digest, path))
}

pub(crate) fn sha512_file(path: &Path) -> Result<String> {
    let file =
        File::open(path).with_context(|| format!("opening '{}' for hashing", path.display()))?;
    let mut reader = BufReader::new(file);
    let mut hasher = Sha512::new();
    let mut buf = [0u8; 1024 * 1024];
    loop {
        let n = reader
            .read(&mut buf)
            .with_context(|| format!("reading '{}'", path.display()))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}
