//! Container runtime discovery and invocation.
//!
//! The pipeline never talks to a container daemon directly; everything goes
//! through the [`ContainerRuntime`] trait so tests can substitute a fake
//! without building real images. The shipped implementation shells out to
//! whichever CLI [`detect_runtime`] resolved.

use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{bail, Context, Result};

use crate::errors::NoRuntimeError;

/// Probe order when no runtime is forced.
pub const RUNTIME_PREFERENCE: &[&str] = &["docker", "podman"];

/// What a `run` invocation mounts, exports, and passes through.
#[derive(Debug, Clone, Default)]
pub struct RunSpec {
    /// (host path, container path) bind mounts.
    pub mounts: Vec<(PathBuf, String)>,
    /// Environment variables exported into the container.
    pub env: Vec<(String, String)>,
    /// Arguments passed to the image entrypoint.
    pub args: Vec<String>,
}

/// The container operations the pipeline needs.
pub trait ContainerRuntime {
    /// Short tool name ("docker" or "podman"), used in logs and forwarded
    /// to the smoke-test suite.
    fn name(&self) -> &str;

    /// Build `context` into an image tagged `tag`.
    fn build(&self, context: &Path, tag: &str) -> Result<()>;

    /// Run `image` once with `--rm` semantics.
    fn run(&self, image: &str, spec: &RunSpec) -> Result<()>;

    /// Remove a local image. Callers decide whether failure is fatal.
    fn remove_image(&self, tag: &str) -> Result<()>;
}

/// A runtime backed by a CLI binary on PATH.
#[derive(Debug, Clone)]
pub struct CliRuntime {
    name: String,
    program: PathBuf,
}

impl CliRuntime {
    pub fn program(&self) -> &Path {
        &self.program
    }
}

/// Resolve a container runtime.
///
/// With `forced`, only that tool is probed; otherwise the tools in
/// [`RUNTIME_PREFERENCE`] are tried in order. Failure carries
/// [`NoRuntimeError`] so the dispatcher exits with the dedicated code.
pub fn detect_runtime(forced: Option<&str>) -> Result<CliRuntime> {
    let candidates: Vec<&str> = match forced {
        Some(tool) => vec![tool],
        None => RUNTIME_PREFERENCE.to_vec(),
    };

    for tool in &candidates {
        if let Ok(program) = which::which(tool) {
            println!("[runtime] using {} ({})", tool, program.display());
            return Ok(CliRuntime {
                name: tool.to_string(),
                program,
            });
        }
    }

    Err(NoRuntimeError {
        probed: candidates.iter().map(|t| t.to_string()).collect(),
    }
    .into())
}

impl ContainerRuntime for CliRuntime {
    fn name(&self) -> &str {
        &self.name
    }

    fn build(&self, context: &Path, tag: &str) -> Result<()> {
        let status = Command::new(&self.program)
            .args(["build", "-t", tag])
            .arg(context)
            .status()
            .with_context(|| {
                format!(
                    "running '{} build' for context '{}'",
                    self.name,
                    context.display()
                )
            })?;
        if !status.success() {
            bail!(
                "'{} build -t {}' failed with {} for context '{}'",
                self.name,
                tag,
                status,
                context.display()
            );
        }
        Ok(())
    }

    fn run(&self, image: &str, spec: &RunSpec) -> Result<()> {
        let mut cmd = Command::new(&self.program);
        cmd.args(["run", "--rm"]);
        for (host, container) in &spec.mounts {
            cmd.arg("-v");
            cmd.arg(format!("{}:{}", host.display(), container));
        }
        for (key, value) in &spec.env {
            cmd.arg("-e");
            cmd.arg(format!("{key}={value}"));
        }
        cmd.arg(image);
        cmd.args(&spec.args);

        let status = cmd
            .status()
            .with_context(|| format!("running '{} run {}'", self.name, image))?;
        if !status.success() {
            bail!("'{} run {}' failed with {}", self.name, image, status);
        }
        Ok(())
    }

    fn remove_image(&self, tag: &str) -> Result<()> {
        let output = Command::new(&self.program)
            .args(["rmi", "-f", tag])
            .output()
            .with_context(|| format!("running '{} rmi {}'", self.name, tag))?;
        if !output.status.success() {
            bail!(
                "'{} rmi {}' failed: {}",
                self.name,
                tag,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(())
    }
}
