//! Pipeline sequencing.
//!
//! The stages form a linear state machine with no cycles:
//!
//! ```text
//! detect-runtime -> validate-deps -> fetch -> verify -> [test] -> organize
//! ```
//!
//! Any stage failure aborts the run; the scratch guard removes in-flight
//! artifacts on every exit path. There are no retries anywhere; every
//! fatal error requires a manual rerun.

use std::env;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use fs2::FileExt;

use crate::fetch;
use crate::organize::{self, TtyConfirm, ROLLING_CHANNEL};
use crate::preflight::{self, TEST_TOOL};
use crate::runtime::{self, ContainerRuntime};
use crate::scratch::ScratchDir;
use crate::testsuite::{self, BatsRunner, SuiteRunner};
use crate::verify;

/// Lock file guarding a repository against concurrent invocations.
const LOCK_FILE: &str = ".prepare-branch.lock";

/// Default branch when none is given on the command line.
pub const DEFAULT_BRANCH: &str = ROLLING_CHANNEL;

/// The pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    DetectRuntime,
    ValidateDeps,
    Fetch,
    Verify,
    Test,
    Organize,
}

impl Stage {
    pub fn label(&self) -> &'static str {
        match self {
            Stage::DetectRuntime => "detect-runtime",
            Stage::ValidateDeps => "validate-deps",
            Stage::Fetch => "fetch",
            Stage::Verify => "verify",
            Stage::Test => "test",
            Stage::Organize => "organize",
        }
    }
}

/// Single dispatch point for stage execution: announces the stage and tags
/// its failure with the stage label.
fn run_stage<T>(stage: Stage, f: impl FnOnce() -> Result<T>) -> Result<T> {
    println!("[pipeline] {}", stage.label());
    f().with_context(|| format!("stage '{}' failed", stage.label()))
}

/// Held for the duration of a mutating command. A second invocation in the
/// same repository fails fast instead of racing on the scratch tree or the
/// temporary test-image tag.
#[derive(Debug)]
pub struct RepoLock {
    _file: std::fs::File,
}

pub fn acquire_repo_lock(repo_root: &Path) -> Result<RepoLock> {
    let lock_path = repo_root.join(LOCK_FILE);
    // Never unlink a "stale" lock file; a second process could lock a fresh
    // file at the same path and defeat mutual exclusion.
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(&lock_path)
        .with_context(|| format!("opening lock file '{}'", lock_path.display()))?;
    if file.try_lock_exclusive().is_err() {
        anyhow::bail!(
            "another prepare-branch invocation is already running in '{}'",
            repo_root.display()
        );
    }
    Ok(RepoLock { _file: file })
}

/// Fetch, verify, and (when `bats` is installed) smoke-test a branch.
///
/// Returns the scratch guard still armed: the caller decides whether the
/// directory is kept for a later `organize` or consumed right away.
pub fn prepare(
    runtime: &dyn ContainerRuntime,
    repo_root: &Path,
    branch: &str,
) -> Result<ScratchDir> {
    let suite: Option<&dyn SuiteRunner> = if preflight::command_exists(TEST_TOOL.0) {
        Some(&BatsRunner)
    } else {
        None
    };
    prepare_with(runtime, suite, repo_root, branch)
}

/// [`prepare`] with the smoke-test capability injected. `None` means the
/// test tool is absent and testing is skipped (degraded mode, not failure).
pub fn prepare_with(
    runtime: &dyn ContainerRuntime,
    suite: Option<&dyn SuiteRunner>,
    repo_root: &Path,
    branch: &str,
) -> Result<ScratchDir> {
    run_stage(Stage::ValidateDeps, || {
        preflight::check_required_tools(false)
    })?;

    let scratch = run_stage(Stage::Fetch, || {
        let scratch = ScratchDir::create(repo_root)?;
        fetch::fetch_release(runtime, repo_root, branch, scratch.path())?;
        Ok(scratch)
    })?;

    run_stage(Stage::Verify, || verify::verify_dir(scratch.path()).map(|_| ()))?;

    match suite {
        Some(suite) => run_stage(Stage::Test, || {
            testsuite::run_suite(runtime, suite, repo_root, branch, scratch.path())
        })?,
        None => println!(
            "[pipeline] {} not found on PATH; skipping smoke tests",
            TEST_TOOL.0
        ),
    }

    Ok(scratch)
}

fn repo_root() -> Result<PathBuf> {
    env::current_dir().context("resolving current directory")
}

/// `prepare [branch]`: run the pipeline and keep the scratch directory for
/// a later `organize`.
pub fn cmd_prepare(branch: &str, forced_runtime: Option<&str>) -> Result<()> {
    let root = repo_root()?;
    let _lock = acquire_repo_lock(&root)?;
    let rt = run_stage(Stage::DetectRuntime, || {
        runtime::detect_runtime(forced_runtime)
    })?;

    let scratch = prepare(&rt, &root, branch)?;
    let path = scratch.keep();
    println!("[prepare] branch {} ready in '{}'", branch, path.display());
    println!(
        "[prepare] next: prepare-branch organize {} {}",
        branch,
        path.display()
    );
    Ok(())
}

/// `test <branch> <dir>`: smoke-test an already-fetched directory. Unlike
/// during `prepare`, a missing test tool is an error here.
pub fn cmd_test(branch: &str, dir: &Path, forced_runtime: Option<&str>) -> Result<()> {
    let root = repo_root()?;
    let _lock = acquire_repo_lock(&root)?;
    let rt = run_stage(Stage::DetectRuntime, || {
        runtime::detect_runtime(forced_runtime)
    })?;
    run_stage(Stage::ValidateDeps, || preflight::check_required_tools(true))?;
    run_stage(Stage::Test, || {
        testsuite::run_suite(&rt, &BatsRunner, &root, branch, dir)
    })
}

/// `organize <branch> <dir>`: promote a verified directory into the
/// permanent version tree.
pub fn cmd_organize(branch: &str, dir: &Path) -> Result<()> {
    let root = repo_root()?;
    let _lock = acquire_repo_lock(&root)?;
    run_stage(Stage::Organize, || {
        organize::organize(&root, branch, dir, &TtyConfirm).map(|_| ())
    })
}

/// `all [branch]`: prepare then organize, with the scratch directory
/// threaded through explicitly.
pub fn cmd_all(branch: &str, forced_runtime: Option<&str>) -> Result<()> {
    let root = repo_root()?;
    let _lock = acquire_repo_lock(&root)?;
    let rt = run_stage(Stage::DetectRuntime, || {
        runtime::detect_runtime(forced_runtime)
    })?;

    let scratch = prepare(&rt, &root, branch)?;
    // The guard stays armed: if organize fails, drop removes the scratch
    // tree so nothing is left behind after the organize step.
    run_stage(Stage::Organize, || {
        organize::organize(&root, branch, scratch.path(), &TtyConfirm).map(|_| ())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::testing::FakeRuntime;
    use crate::runtime::RunSpec;
    use crate::scratch::VERSION_FILE;
    use crate::verify::CHECKSUM_MANIFEST;
    use std::fs;
    use tempfile::TempDir;

    fn repo_with_fetcher() -> TempDir {
        let repo = TempDir::new().unwrap();
        fs::create_dir_all(repo.path().join(fetch::FETCH_CONTEXT_DIR)).unwrap();
        repo
    }

    /// A run effect that populates the mounted scratch dir the way the
    /// fetch container would, using the host arch so the test stage can
    /// find its directory.
    fn populate_scratch(spec: &RunSpec) -> Result<()> {
        let out = &spec.mounts[0].0;
        let arch_name = crate::testsuite::host_arch().expect("supported test host");
        fs::write(out.join(VERSION_FILE), "3.19.9\n")?;
        let arch = out.join(arch_name);
        fs::create_dir_all(&arch)?;
        fs::write(arch.join("Dockerfile"), "FROM scratch\n")?;
        let digest = crate::verify::sha512_file(&arch.join("Dockerfile"))?;
        fs::write(
            out.join(CHECKSUM_MANIFEST),
            format!("{digest}  {arch_name}/Dockerfile\n"),
        )?;
        Ok(())
    }

    #[test]
    fn test_prepare_without_test_tool_still_succeeds() {
        let repo = repo_with_fetcher();
        let runtime = FakeRuntime {
            run_effect: Some(Box::new(populate_scratch)),
            ..FakeRuntime::default()
        };

        // Suite absent: testing is skipped, the rest of the pipeline runs.
        let scratch =
            prepare_with(&runtime, None, repo.path(), "v3.19").expect("prepare must succeed");
        let path = scratch.keep();
        let arch = crate::testsuite::host_arch().unwrap();
        assert!(path.join(VERSION_FILE).is_file());
        assert!(path.join(arch).join("Dockerfile").is_file());
    }

    struct PassingSuite;
    impl SuiteRunner for PassingSuite {
        fn run(&self, _root: &Path, _branch: &str, _image: &str, _rt: &str) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_prepare_runs_suite_when_tool_present() {
        let repo = repo_with_fetcher();
        let runtime = FakeRuntime {
            run_effect: Some(Box::new(populate_scratch)),
            ..FakeRuntime::default()
        };

        let scratch = prepare_with(&runtime, Some(&PassingSuite), repo.path(), "v3.19")
            .expect("prepare with passing suite must succeed");
        drop(scratch);

        let calls = runtime.calls.borrow();
        let arch = crate::testsuite::host_arch().unwrap();
        let tag = crate::testsuite::test_image_tag("v3.19", arch);
        assert!(calls.iter().any(|c| c.starts_with(&format!("build {tag}"))));
        assert!(calls.contains(&format!("rmi {tag}")));
    }

    #[test]
    fn test_failed_fetch_leaves_no_scratch_behind() {
        let repo = repo_with_fetcher();
        let runtime = FakeRuntime {
            fail_run: true,
            ..FakeRuntime::default()
        };

        prepare_with(&runtime, None, repo.path(), "edge").expect_err("failed fetch must abort");

        let leftovers: Vec<_> = fs::read_dir(repo.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with("prepare-branch-"))
            .collect();
        assert!(leftovers.is_empty(), "no scratch directory may remain");
    }

    #[test]
    fn test_failed_verification_leaves_no_scratch_behind() {
        let repo = repo_with_fetcher();
        let runtime = FakeRuntime {
            // Container "succeeds" but writes nothing: no manifest, so
            // verification fails.
            ..FakeRuntime::default()
        };

        let err =
            prepare_with(&runtime, None, repo.path(), "edge").expect_err("must fail verification");
        assert!(format!("{err}").contains("verify"));

        let leftovers: Vec<_> = fs::read_dir(repo.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with("prepare-branch-"))
            .collect();
        assert!(leftovers.is_empty(), "no scratch directory may remain");
    }

    #[test]
    fn test_repo_lock_is_exclusive() {
        let repo = TempDir::new().unwrap();
        let first = acquire_repo_lock(repo.path()).expect("first lock must succeed");
        let err = acquire_repo_lock(repo.path()).expect_err("second lock must fail");
        assert!(format!("{err}").contains("already running"));
        drop(first);
        acquire_repo_lock(repo.path()).expect("lock must be reacquirable after release");
    }

    #[test]
    fn test_stage_labels_are_stable() {
        // Stage labels appear in user-facing failure context.
        assert_eq!(Stage::Fetch.label(), "fetch");
        assert_eq!(Stage::Organize.label(), "organize");
    }
}
