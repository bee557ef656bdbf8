//! Fetching upstream release artifacts.
//!
//! A throwaway helper image does the actual downloading: it is built from
//! the `fetcher/` context in the repository and run with the scratch
//! directory bind-mounted at `/out`. On success the scratch directory holds
//! one subdirectory per architecture, the `VERSION` marker, and the
//! checksum manifest. There is no partial-success state; a failed fetch is
//! discarded wholesale by the caller.

use std::env;
use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};

use crate::runtime::{ContainerRuntime, RunSpec};

/// Tag for the throwaway download image.
pub const FETCH_IMAGE_TAG: &str = "alpine-prepare-fetch:latest";

/// Build context for the download image, relative to the repository root.
pub const FETCH_CONTEXT_DIR: &str = "fetcher";

/// Optional upstream mirror override, forwarded into the fetch container
/// only when set on the host.
pub const MIRROR_ENV: &str = "MIRROR";

/// Fetch `branch` into `out_dir`.
///
/// `out_dir` must already exist and be writable; some container backends
/// reject unwritable mount sources with opaque errors, so this is probed
/// up front.
pub fn fetch_release(
    runtime: &dyn ContainerRuntime,
    repo_root: &Path,
    branch: &str,
    out_dir: &Path,
) -> Result<()> {
    ensure_writable(out_dir)?;

    let context = repo_root.join(FETCH_CONTEXT_DIR);
    if !context.is_dir() {
        bail!(
            "fetcher build context '{}' not found; run from the repository root",
            context.display()
        );
    }

    println!("[fetch] building helper image {}", FETCH_IMAGE_TAG);
    runtime
        .build(&context, FETCH_IMAGE_TAG)
        .with_context(|| format!("building fetch helper image from '{}'", context.display()))?;

    let mut spec = RunSpec {
        mounts: vec![(out_dir.to_path_buf(), "/out".to_string())],
        env: Vec::new(),
        args: vec![branch.to_string()],
    };
    if let Ok(mirror) = env::var(MIRROR_ENV) {
        if !mirror.trim().is_empty() {
            spec.env.push((MIRROR_ENV.to_string(), mirror));
        }
    }

    println!(
        "[fetch] downloading {} artifacts into '{}'",
        branch,
        out_dir.display()
    );
    runtime
        .run(FETCH_IMAGE_TAG, &spec)
        .map_err(|err| err.context(fetch_failure_hints(runtime.name())))?;

    Ok(())
}

fn ensure_writable(dir: &Path) -> Result<()> {
    if !dir.is_dir() {
        bail!("output directory '{}' does not exist", dir.display());
    }
    let probe = dir.join(".write-probe");
    fs::write(&probe, b"").with_context(|| {
        format!(
            "output directory '{}' is not writable; the container cannot mount it",
            dir.display()
        )
    })?;
    let _ = fs::remove_file(&probe);
    Ok(())
}

fn fetch_failure_hints(runtime: &str) -> String {
    format!(
        "fetch container failed under {runtime}; \
         if the bind mount was rejected: rootless {runtime} cannot mount some host paths \
         (keep the scratch directory inside the repository), and SELinux hosts may \
         require relabeled volumes"
    )
}
