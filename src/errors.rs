//! Exit-code mapping for pipeline failures.
//!
//! The binary distinguishes three failure classes on exit:
//! - 2: no container runtime available
//! - 3: required host tools missing
//! - 1: everything else fatal
//!
//! Environment failures carry dedicated error types so the dispatcher can
//! recover the class from an `anyhow::Error` chain regardless of how much
//! context was layered on top.

use std::fmt;

pub const EXIT_OK: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_NO_RUNTIME: u8 = 2;
pub const EXIT_MISSING_DEPS: u8 = 3;

/// No container runtime could be resolved on PATH.
#[derive(Debug)]
pub struct NoRuntimeError {
    pub probed: Vec<String>,
}

impl fmt::Display for NoRuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "no container runtime found; probed: {}",
            self.probed.join(", ")
        )
    }
}

impl std::error::Error for NoRuntimeError {}

/// One or more required host tools are missing. Collected in one pass so a
/// user fixes everything in a single install round.
#[derive(Debug)]
pub struct MissingToolsError {
    /// (command, package) pairs.
    pub missing: Vec<(String, String)>,
}

impl fmt::Display for MissingToolsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let list = self
            .missing
            .iter()
            .map(|(tool, package)| format!("  {} (install: {})", tool, package))
            .collect::<Vec<_>>()
            .join("\n");
        write!(f, "missing required host tools:\n{}", list)
    }
}

impl std::error::Error for MissingToolsError {}

/// Resolve the process exit code for a pipeline failure.
pub fn exit_code_for(err: &anyhow::Error) -> u8 {
    for cause in err.chain() {
        if cause.downcast_ref::<NoRuntimeError>().is_some() {
            return EXIT_NO_RUNTIME;
        }
        if cause.downcast_ref::<MissingToolsError>().is_some() {
            return EXIT_MISSING_DEPS;
        }
    }
    EXIT_FAILURE
}
