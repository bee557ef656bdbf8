//! Promoting verified output into the permanent version tree.
//!
//! The organize step is the only one that touches durable state: it moves
//! a verified scratch directory into `<repo>/<target>/` where `<target>` is
//! either the rolling channel literal or the `major.minor` prefix of the
//! resolved version. The layout it produces (`<target>/VERSION` plus
//! `<target>/<arch>/Dockerfile`) is the contract the image-build CI
//! consumes.
//!
//! Organizing is all-or-nothing from the caller's perspective: any copy
//! failure aborts immediately and a partial target must be inspected or
//! removed by hand before retrying.

use std::fs;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use walkdir::WalkDir;

use crate::scratch::{dir_listing, read_version_marker, VERSION_FILE};

/// The rolling release channel; organizes under a fixed directory name
/// regardless of the concrete version inside `VERSION`.
pub const ROLLING_CHANNEL: &str = "edge";

/// Decides what happens when the target directory already exists.
pub trait OverwriteConfirm {
    /// `Ok(true)` to delete and replace the existing target, `Ok(false)`
    /// to decline, `Err` to refuse outright.
    fn confirm(&self, target: &Path) -> Result<bool>;
}

/// Refuses to overwrite; used whenever the session cannot ask.
pub struct RefuseOverwrite;

impl OverwriteConfirm for RefuseOverwrite {
    fn confirm(&self, target: &Path) -> Result<bool> {
        bail!(
            "target directory '{}' already exists; remove it and rerun, \
             or rerun interactively to confirm the overwrite",
            target.display()
        )
    }
}

/// Prompts on a terminal (default: decline); falls back to
/// [`RefuseOverwrite`] when stdin is not a TTY.
pub struct TtyConfirm;

impl OverwriteConfirm for TtyConfirm {
    fn confirm(&self, target: &Path) -> Result<bool> {
        if !atty::is(atty::Stream::Stdin) {
            return RefuseOverwrite.confirm(target);
        }
        print!(
            "[organize] target '{}' already exists; overwrite? [y/N] ",
            target.display()
        );
        io::stdout().flush().ok();
        let mut answer = String::new();
        io::stdin()
            .lock()
            .read_line(&mut answer)
            .context("reading overwrite confirmation")?;
        Ok(matches!(answer.trim(), "y" | "Y" | "yes"))
    }
}

/// Compute the permanent target directory name for a branch.
///
/// The rolling channel maps to its literal name; versioned branches use
/// the `major.minor` prefix of the resolved version string, falling back
/// to the full string when it doesn't look like a dotted version.
pub fn target_dir_name(branch: &str, version: &str) -> String {
    if branch == ROLLING_CHANNEL {
        return ROLLING_CHANNEL.to_string();
    }
    major_minor(version).unwrap_or_else(|| version.to_string())
}

fn major_minor(version: &str) -> Option<String> {
    let mut parts = version.split('.');
    let major = parts.next()?;
    let minor = parts.next()?;
    if major.is_empty() || minor.is_empty() {
        return None;
    }
    if !major.chars().all(|c| c.is_ascii_digit()) || !minor.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    Some(format!("{major}.{minor}"))
}

/// Promote `scratch` into `<repo_root>/<target>`.
///
/// Preconditions (each its own fatal error with a directory listing):
/// the scratch directory exists, is non-empty, and carries a non-empty
/// `VERSION` marker. On success the scratch directory is removed and the
/// target path returned.
pub fn organize(
    repo_root: &Path,
    branch: &str,
    scratch: &Path,
    confirm: &dyn OverwriteConfirm,
) -> Result<PathBuf> {
    if !scratch.is_dir() {
        bail!("scratch directory '{}' does not exist", scratch.display());
    }
    let entry_count = fs::read_dir(scratch)
        .with_context(|| format!("reading scratch directory '{}'", scratch.display()))?
        .count();
    if entry_count == 0 {
        bail!(
            "scratch directory '{}' is empty; nothing to organize",
            scratch.display()
        );
    }
    let version = read_version_marker(scratch)?;

    let target = repo_root.join(target_dir_name(branch, &version));
    if target.exists() {
        if !confirm.confirm(&target)? {
            bail!(
                "overwrite of '{}' declined; leaving it untouched",
                target.display()
            );
        }
        fs::remove_dir_all(&target)
            .with_context(|| format!("removing existing target '{}'", target.display()))?;
    }

    fs::create_dir_all(&target)
        .with_context(|| format!("creating target directory '{}'", target.display()))?;
    fs::copy(scratch.join(VERSION_FILE), target.join(VERSION_FILE))
        .with_context(|| format!("copying {} into '{}'", VERSION_FILE, target.display()))?;

    let mut arch_dirs: Vec<PathBuf> = fs::read_dir(scratch)
        .with_context(|| format!("reading scratch directory '{}'", scratch.display()))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .collect();
    arch_dirs.sort();

    let mut organized = 0usize;
    for arch_dir in &arch_dirs {
        let Some(name) = arch_dir.file_name().and_then(|n| n.to_str()) else {
            bail!(
                "architecture directory '{}' has a non-UTF-8 name; refusing to organize it",
                arch_dir.display()
            );
        };
        if !arch_dir.join("Dockerfile").is_file() {
            println!("[organize] skipping '{name}' (no Dockerfile)");
            continue;
        }
        copy_dir_recursive(arch_dir, &target.join(name))
            .with_context(|| format!("copying architecture '{name}' into '{}'", target.display()))?;
        println!("[organize] copied {name}");
        organized += 1;
    }

    if organized == 0 {
        bail!(
            "no architecture directory in '{}' contains a Dockerfile; contents:\n{}",
            scratch.display(),
            dir_listing(scratch)
        );
    }

    fs::remove_dir_all(scratch)
        .with_context(|| format!("removing scratch directory '{}'", scratch.display()))?;

    println!(
        "[organize] {} now holds {} ({} architecture(s)):",
        target.display(),
        version,
        organized
    );
    print_tree(&target);
    println!("[organize] review and commit:");
    println!(
        "  git add {}",
        target
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
    );
    println!(
        "  git commit -m \"{}: update to {}\"",
        branch, version
    );

    Ok(target)
}

/// Recursively copy a directory, preserving symlinks.
fn copy_dir_recursive(src: &Path, dst: &Path) -> Result<()> {
    if !dst.exists() {
        fs::create_dir_all(dst)
            .with_context(|| format!("creating directory '{}'", dst.display()))?;
    }

    for entry in
        fs::read_dir(src).with_context(|| format!("reading directory '{}'", src.display()))?
    {
        let entry = entry?;
        let src_path = entry.path();
        let dst_path = dst.join(entry.file_name());
        let file_type = entry.file_type()?;

        if file_type.is_symlink() {
            let link_target = fs::read_link(&src_path)?;
            if dst_path.exists() || dst_path.is_symlink() {
                fs::remove_file(&dst_path)?;
            }
            std::os::unix::fs::symlink(&link_target, &dst_path)
                .with_context(|| format!("creating symlink '{}'", dst_path.display()))?;
        } else if file_type.is_dir() {
            copy_dir_recursive(&src_path, &dst_path)?;
        } else {
            fs::copy(&src_path, &dst_path)
                .with_context(|| format!("copying '{}'", src_path.display()))?;
        }
    }

    Ok(())
}

fn print_tree(root: &Path) {
    for entry in WalkDir::new(root).sort_by_file_name() {
        let Ok(entry) = entry else { continue };
        let indent = "  ".repeat(entry.depth());
        let name = entry.file_name().to_string_lossy();
        let suffix = if entry.file_type().is_dir() { "/" } else { "" };
        println!("  {indent}{name}{suffix}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    struct AllowOverwrite;
    impl OverwriteConfirm for AllowOverwrite {
        fn confirm(&self, _target: &Path) -> Result<bool> {
            Ok(true)
        }
    }

    struct DeclineOverwrite;
    impl OverwriteConfirm for DeclineOverwrite {
        fn confirm(&self, _target: &Path) -> Result<bool> {
            Ok(false)
        }
    }

    fn seed_scratch(repo: &Path, version: &str, arches: &[&str]) -> PathBuf {
        let scratch = repo.join("scratch");
        fs::create_dir_all(&scratch).unwrap();
        fs::write(scratch.join(VERSION_FILE), format!("{version}\n")).unwrap();
        for arch in arches {
            let dir = scratch.join(arch);
            fs::create_dir_all(&dir).unwrap();
            fs::write(dir.join("Dockerfile"), "FROM scratch\nADD rootfs.tar.gz /\n").unwrap();
            fs::write(dir.join("rootfs.tar.gz"), arch.as_bytes()).unwrap();
        }
        scratch
    }

    #[test]
    fn test_versioned_branch_targets_major_minor() {
        let repo = TempDir::new().unwrap();
        let scratch = seed_scratch(repo.path(), "3.19.9", &["x86_64"]);

        let target = organize(repo.path(), "v3.19", &scratch, &RefuseOverwrite)
            .expect("organize must succeed");

        assert_eq!(target, repo.path().join("3.19"));
        assert_eq!(
            fs::read_to_string(target.join(VERSION_FILE)).unwrap().trim(),
            "3.19.9"
        );
        assert!(target.join("x86_64/Dockerfile").is_file());
        assert!(target.join("x86_64/rootfs.tar.gz").is_file());
        assert!(!scratch.exists(), "scratch must be removed on success");
    }

    #[test]
    fn test_rolling_channel_targets_fixed_literal() {
        let repo = TempDir::new().unwrap();
        let scratch = seed_scratch(repo.path(), "3.22.0_alpha20260115", &["aarch64"]);

        let target = organize(repo.path(), ROLLING_CHANNEL, &scratch, &RefuseOverwrite)
            .expect("organize must succeed");

        assert_eq!(target, repo.path().join("edge"));
    }

    #[test]
    fn test_unparseable_version_falls_back_to_full_string() {
        assert_eq!(target_dir_name("v9", "snapshot-20260101"), "snapshot-20260101");
        assert_eq!(target_dir_name("v3.19", "3.19.9"), "3.19");
        assert_eq!(target_dir_name("v3.19", "3.19"), "3.19");
        assert_eq!(target_dir_name("edge", "3.22.0_alpha"), "edge");
    }

    #[test]
    fn test_existing_target_refused_non_interactively() {
        let repo = TempDir::new().unwrap();
        fs::create_dir_all(repo.path().join("3.19")).unwrap();
        let scratch = seed_scratch(repo.path(), "3.19.9", &["x86_64"]);

        let err = organize(repo.path(), "v3.19", &scratch, &RefuseOverwrite)
            .expect_err("existing target must be refused");
        assert!(format!("{err}").contains("already exists"));
        assert!(scratch.exists(), "scratch survives a refused organize");
    }

    #[test]
    fn test_existing_target_replaced_on_confirmation() {
        let repo = TempDir::new().unwrap();
        let old = repo.path().join("3.19");
        fs::create_dir_all(old.join("stale-arch")).unwrap();
        let scratch = seed_scratch(repo.path(), "3.19.9", &["x86_64"]);

        let target = organize(repo.path(), "v3.19", &scratch, &AllowOverwrite)
            .expect("confirmed overwrite must succeed");

        assert!(!target.join("stale-arch").exists(), "old tree must be gone");
        assert!(target.join("x86_64/Dockerfile").is_file());
    }

    #[test]
    fn test_declined_overwrite_is_fatal_cancellation() {
        let repo = TempDir::new().unwrap();
        fs::create_dir_all(repo.path().join("3.19")).unwrap();
        let scratch = seed_scratch(repo.path(), "3.19.9", &["x86_64"]);

        let err = organize(repo.path(), "v3.19", &scratch, &DeclineOverwrite)
            .expect_err("declined overwrite must abort");
        assert!(format!("{err}").contains("declined"));
    }

    #[test]
    fn test_subdirs_without_dockerfile_are_skipped() {
        let repo = TempDir::new().unwrap();
        let scratch = seed_scratch(repo.path(), "3.19.9", &["x86_64"]);
        fs::create_dir_all(scratch.join("incomplete-arch")).unwrap();

        let target = organize(repo.path(), "v3.19", &scratch, &RefuseOverwrite)
            .expect("a skipped subdirectory is not an error");

        assert!(target.join("x86_64").is_dir());
        assert!(!target.join("incomplete-arch").exists());
    }

    #[test]
    fn test_no_valid_architecture_is_fatal() {
        let repo = TempDir::new().unwrap();
        let scratch = repo.path().join("scratch");
        fs::create_dir_all(scratch.join("broken")).unwrap();
        fs::write(scratch.join(VERSION_FILE), "3.19.9\n").unwrap();

        let err = organize(repo.path(), "v3.19", &scratch, &RefuseOverwrite)
            .expect_err("zero valid architectures must fail");
        assert!(format!("{err}").contains("no architecture directory"));
    }

    #[test]
    fn test_missing_scratch_dir_is_fatal() {
        let repo = TempDir::new().unwrap();
        let err = organize(
            repo.path(),
            "v3.19",
            &repo.path().join("nope"),
            &RefuseOverwrite,
        )
        .expect_err("absent scratch must fail");
        assert!(format!("{err}").contains("does not exist"));
    }

    #[test]
    fn test_empty_scratch_dir_is_fatal() {
        let repo = TempDir::new().unwrap();
        let scratch = repo.path().join("scratch");
        fs::create_dir_all(&scratch).unwrap();
        let err = organize(repo.path(), "v3.19", &scratch, &RefuseOverwrite)
            .expect_err("empty scratch must fail");
        assert!(format!("{err}").contains("is empty"));
    }

    #[test]
    fn test_missing_version_marker_lists_contents() {
        let repo = TempDir::new().unwrap();
        let scratch = repo.path().join("scratch");
        fs::create_dir_all(scratch.join("x86_64")).unwrap();
        fs::write(scratch.join("x86_64/Dockerfile"), "FROM scratch\n").unwrap();

        let err = organize(repo.path(), "v3.19", &scratch, &RefuseOverwrite)
            .expect_err("missing VERSION must fail");
        let msg = format!("{err}");
        assert!(msg.contains(VERSION_FILE));
        assert!(msg.contains("x86_64"));
    }

    #[test]
    fn test_non_utf8_arch_dir_name_is_fatal() {
        use std::os::unix::ffi::OsStrExt;

        let repo = TempDir::new().unwrap();
        let scratch = seed_scratch(repo.path(), "3.19.9", &["x86_64"]);
        let weird = scratch.join(std::ffi::OsStr::from_bytes(b"x86_64\xff"));
        fs::create_dir_all(&weird).unwrap();
        fs::write(weird.join("Dockerfile"), "FROM scratch\n").unwrap();

        let err = organize(repo.path(), "v3.19", &scratch, &RefuseOverwrite)
            .expect_err("a non-UTF-8 directory name must abort");
        assert!(format!("{err}").contains("non-UTF-8"));

        let target = repo.path().join("3.19");
        assert!(
            !target.join("Dockerfile").exists(),
            "nothing may land at the target root"
        );
        assert!(scratch.exists(), "scratch survives a failed organize");
    }

    #[test]
    fn test_copy_failure_aborts_and_keeps_scratch() {
        let repo = TempDir::new().unwrap();
        let scratch = seed_scratch(repo.path(), "3.19.9", &["aarch64", "x86_64"]);
        // A socket cannot be copied as a regular file, so the second
        // architecture fails mid-loop.
        std::os::unix::net::UnixListener::bind(scratch.join("x86_64/apk.sock")).unwrap();

        let err = organize(repo.path(), "v3.19", &scratch, &RefuseOverwrite)
            .expect_err("a failing copy must abort the loop");
        assert!(format!("{err:#}").contains("x86_64"));

        let target = repo.path().join("3.19");
        assert!(
            target.join("aarch64/Dockerfile").is_file(),
            "architectures copied before the failure remain in the partial target"
        );
        assert!(scratch.exists(), "scratch survives a failed organize");
    }

    #[test]
    fn test_symlinks_survive_the_copy() {
        let repo = TempDir::new().unwrap();
        let scratch = seed_scratch(repo.path(), "3.19.9", &["x86_64"]);
        std::os::unix::fs::symlink("Dockerfile", scratch.join("x86_64/Dockerfile.link")).unwrap();

        let target = organize(repo.path(), "v3.19", &scratch, &RefuseOverwrite)
            .expect("organize must succeed");

        let link = target.join("x86_64/Dockerfile.link");
        assert!(link.is_symlink());
        assert_eq!(fs::read_link(link).unwrap(), PathBuf::from("Dockerfile"));
    }
}
