//! Preflight checks for host tool validation.
//!
//! Validates that the host system has the required external tools before the
//! pipeline starts. This prevents cryptic mid-run errors from a missing
//! binary after containers have already been built.
//!
//! Missing tools are collected and reported together rather than one per
//! run, so a user needs at most one fix-rerun cycle.

use anyhow::Result;

use crate::errors::MissingToolsError;

/// Check if a command resolves on PATH.
pub fn command_exists(cmd: &str) -> bool {
    which::which(cmd).is_ok()
}

/// Host tools every pipeline command needs.
///
/// Each tuple is (command_name, package_name). `git` is only used for the
/// follow-up commands `organize` prints, but a run without it would leave
/// the user unable to commit the result.
pub const REQUIRED_TOOLS: &[(&str, &str)] = &[("git", "git")];

/// The behavioral smoke-test tool. Optional during `prepare` (tests are
/// skipped when absent), required by the standalone `test` command.
pub const TEST_TOOL: (&str, &str) = ("bats", "bats");

/// Check that the required tools are available.
///
/// With `include_test_tool`, `bats` joins the required set instead of being
/// treated as optional.
///
/// Returns a [`MissingToolsError`] naming every absent tool at once.
pub fn check_required_tools(include_test_tool: bool) -> Result<()> {
    let mut tools: Vec<(&str, &str)> = REQUIRED_TOOLS.to_vec();
    if include_test_tool {
        tools.push(TEST_TOOL);
    }

    let missing: Vec<(String, String)> = tools
        .iter()
        .filter(|(tool, _)| !command_exists(tool))
        .map(|(tool, package)| (tool.to_string(), package.to_string()))
        .collect();

    if !missing.is_empty() {
        return Err(MissingToolsError { missing }.into());
    }

    Ok(())
}
