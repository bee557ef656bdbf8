//! Behavioral smoke tests against a freshly generated Dockerfile.
//!
//! Only runs when `bats` is installed; `prepare` treats an absent test tool
//! as a deliberate degraded mode and skips with an informational line. The
//! temporary image is always removed afterwards, pass or fail, so failed
//! runs never accumulate test artifacts.

use std::path::Path;
use std::process::Command;

use anyhow::{anyhow, bail, Context, Result};

use crate::preflight::TEST_TOOL;
use crate::runtime::ContainerRuntime;
use crate::scratch::dir_listing;

/// The fixed suite executed against the temporary image, relative to the
/// repository root.
pub const SUITE_PATH: &str = "smoke/image.bats";

const TEST_IMAGE_REPO: &str = "alpine-prepare-test";

/// Executes the behavioral suite against a built image. Trait-shaped so
/// pipeline tests can substitute a fake instead of invoking real `bats`.
pub trait SuiteRunner {
    fn run(&self, repo_root: &Path, branch: &str, image: &str, runtime_name: &str) -> Result<()>;
}

/// Runs `bats smoke/image.bats` with the branch, image tag, and runtime
/// name exported for the suite.
pub struct BatsRunner;

impl SuiteRunner for BatsRunner {
    fn run(&self, repo_root: &Path, branch: &str, image: &str, runtime_name: &str) -> Result<()> {
        let suite = repo_root.join(SUITE_PATH);
        if !suite.is_file() {
            bail!("smoke-test suite '{}' not found", suite.display());
        }
        let status = Command::new(TEST_TOOL.0)
            .arg(&suite)
            .current_dir(repo_root)
            .env("BRANCH", branch)
            .env("TEST_IMAGE", image)
            .env("RUNTIME", runtime_name)
            .status()
            .with_context(|| format!("running {} for '{}'", TEST_TOOL.0, suite.display()))?;
        if !status.success() {
            bail!("smoke tests failed with {status}");
        }
        Ok(())
    }
}

/// Map the host architecture onto the Alpine arch directory name.
pub fn host_arch() -> Option<&'static str> {
    match std::env::consts::ARCH {
        "x86_64" => Some("x86_64"),
        "x86" => Some("x86"),
        "aarch64" => Some("aarch64"),
        "arm" => Some("armv7"),
        "powerpc64" => Some("ppc64le"),
        "s390x" => Some("s390x"),
        "riscv64" => Some("riscv64"),
        "loongarch64" => Some("loongarch64"),
        _ => None,
    }
}

/// Temporary image tag for a test run. Derived from branch and arch only;
/// concurrent runs against the same branch are serialized by the repo lock.
pub fn test_image_tag(branch: &str, arch: &str) -> String {
    format!("{TEST_IMAGE_REPO}:{branch}-{arch}")
}

/// Build the host architecture's generated Dockerfile and run the suite
/// against it, removing the temporary image regardless of outcome.
pub fn run_suite(
    runtime: &dyn ContainerRuntime,
    suite: &dyn SuiteRunner,
    repo_root: &Path,
    branch: &str,
    scratch: &Path,
) -> Result<()> {
    let arch = host_arch().ok_or_else(|| {
        anyhow!(
            "unsupported host architecture '{}'; cannot pick a test directory",
            std::env::consts::ARCH
        )
    })?;

    let arch_dir = scratch.join(arch);
    if !arch_dir.is_dir() {
        bail!(
            "test directory '{}' not found; '{}' contains:\n{}",
            arch_dir.display(),
            scratch.display(),
            dir_listing(scratch)
        );
    }
    if !arch_dir.join("Dockerfile").is_file() {
        bail!("test directory '{}' has no Dockerfile", arch_dir.display());
    }

    let tag = test_image_tag(branch, arch);
    println!("[test] building {} from '{}'", tag, arch_dir.display());
    runtime
        .build(&arch_dir, &tag)
        .with_context(|| format!("building test image from '{}'", arch_dir.display()))?;

    let outcome = suite.run(repo_root, branch, &tag, runtime.name());

    // Best-effort removal: never let a cleanup failure mask the test result.
    if let Err(err) = runtime.remove_image(&tag) {
        eprintln!("[test] warning: failed to remove temporary image {tag}: {err:#}");
    }

    outcome?;
    println!("[test] smoke tests passed for {branch} ({arch})");
    Ok(())
}
