//! Scratch directory ownership.
//!
//! Each pipeline invocation owns exactly one uniquely-named scratch
//! directory for fetched, unverified artifacts. [`ScratchDir`] ties its
//! lifetime to a value: dropping the guard removes the directory, so every
//! error path cleans up without trap-style ambient state. `prepare` calls
//! [`ScratchDir::keep`] on success to hand the directory to the user.
//!
//! Interrupt and termination signals remove the registered directory
//! before exiting, mirroring the drop path.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, Once};

use anyhow::{bail, Context, Result};

/// Single-line file recording the resolved release version.
pub const VERSION_FILE: &str = "VERSION";

const SCRATCH_PREFIX: &str = "prepare-branch-";

static ACTIVE_SCRATCH: Mutex<Option<PathBuf>> = Mutex::new(None);
static HANDLER: Once = Once::new();

fn install_signal_cleanup() {
    HANDLER.call_once(|| {
        let _ = ctrlc::set_handler(|| {
            if let Ok(active) = ACTIVE_SCRATCH.lock() {
                if let Some(path) = active.as_ref() {
                    let _ = fs::remove_dir_all(path);
                }
            }
            std::process::exit(130);
        });
    });
}

fn register(path: &Path) {
    if let Ok(mut active) = ACTIVE_SCRATCH.lock() {
        *active = Some(path.to_path_buf());
    }
}

fn deregister(path: &Path) {
    if let Ok(mut active) = ACTIVE_SCRATCH.lock() {
        if active.as_deref() == Some(path) {
            *active = None;
        }
    }
}

/// An exclusively-owned per-run scratch directory.
///
/// Removed on drop unless [`keep`](Self::keep) was called.
#[derive(Debug)]
pub struct ScratchDir {
    path: Option<PathBuf>,
}

impl ScratchDir {
    /// Create a uniquely-named scratch directory under `parent`.
    pub fn create(parent: &Path) -> Result<Self> {
        install_signal_cleanup();
        let dir = tempfile::Builder::new()
            .prefix(SCRATCH_PREFIX)
            .tempdir_in(parent)
            .with_context(|| {
                format!("creating scratch directory under '{}'", parent.display())
            })?;
        // Ownership moves to this guard; tempfile only picks the unique name.
        let path = dir.keep();
        register(&path);
        Ok(Self { path: Some(path) })
    }

    pub fn path(&self) -> &Path {
        self.path.as_deref().expect("scratch path taken")
    }

    /// Persist the directory past this guard's lifetime.
    pub fn keep(mut self) -> PathBuf {
        let path = self.path.take().expect("scratch path taken");
        deregister(&path);
        path
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        if let Some(path) = self.path.take() {
            deregister(&path);
            if let Err(err) = fs::remove_dir_all(&path) {
                if path.exists() {
                    eprintln!(
                        "[scratch] warning: failed to remove '{}': {}",
                        path.display(),
                        err
                    );
                }
            }
        }
    }
}

/// Read and validate the version marker inside a scratch directory.
///
/// The marker must exist and be non-empty before organizing may proceed.
pub fn read_version_marker(dir: &Path) -> Result<String> {
    let marker = dir.join(VERSION_FILE);
    if !marker.is_file() {
        bail!(
            "version marker '{}' not found in '{}'; directory contains:\n{}",
            VERSION_FILE,
            dir.display(),
            dir_listing(dir)
        );
    }
    let version = fs::read_to_string(&marker)
        .with_context(|| format!("reading version marker '{}'", marker.display()))?
        .trim()
        .to_string();
    if version.is_empty() {
        bail!("version marker '{}' is empty", marker.display());
    }
    Ok(version)
}

/// One entry per line, for failure diagnostics.
pub fn dir_listing(dir: &Path) -> String {
    let mut names: Vec<String> = match fs::read_dir(dir) {
        Ok(entries) => entries
            .filter_map(|entry| entry.ok())
            .map(|entry| {
                let suffix = if entry.path().is_dir() { "/" } else { "" };
                format!("  {}{}", entry.file_name().to_string_lossy(), suffix)
            })
            .collect(),
        Err(err) => return format!("  (unreadable: {err})"),
    };
    if names.is_empty() {
        return "  (empty)".to_string();
    }
    names.sort();
    names.join("\n")
}
