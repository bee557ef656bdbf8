use std::path::Path;
use std::process::ExitCode;

use anyhow::{bail, Result};
use prepare_branch::errors;
use prepare_branch::pipeline::{self, DEFAULT_BRANCH};

fn usage() -> &'static str {
    "Usage:\n  \
     prepare-branch prepare [--runtime <tool>] [branch]   fetch, verify, and smoke-test (default branch: edge)\n  \
     prepare-branch test [--runtime <tool>] <branch> <dir> smoke-test an already-fetched directory\n  \
     prepare-branch organize <branch> <dir>                promote verified output into the version tree\n  \
     prepare-branch all [--runtime <tool>] [branch]        prepare then organize\n  \
     prepare-branch help                                   print this message\n\n\
     Environment:\n  \
     MIRROR   upstream mirror URL, forwarded to the fetch container when set"
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::from(errors::EXIT_OK),
        Err(err) => {
            eprintln!("prepare-branch: {:#}", err);
            ExitCode::from(errors::exit_code_for(&err))
        }
    }
}

fn run() -> Result<()> {
    let mut args: Vec<String> = std::env::args().skip(1).collect();
    let forced_runtime = take_runtime_flag(&mut args)?;
    let forced = forced_runtime.as_deref();

    match args.as_slice() {
        [] => {
            println!("{}", usage());
            Ok(())
        }
        [cmd] if cmd == "help" || cmd == "--help" || cmd == "-h" => {
            println!("{}", usage());
            Ok(())
        }
        [cmd] if cmd == "prepare" => pipeline::cmd_prepare(DEFAULT_BRANCH, forced),
        [cmd, branch] if cmd == "prepare" => pipeline::cmd_prepare(branch, forced),
        [cmd, branch, dir] if cmd == "test" => pipeline::cmd_test(branch, Path::new(dir), forced),
        [cmd, ..] if cmd == "test" => {
            bail!("'test' requires <branch> and <dir> arguments\n\n{}", usage())
        }
        [cmd, branch, dir] if cmd == "organize" => pipeline::cmd_organize(branch, Path::new(dir)),
        [cmd, ..] if cmd == "organize" => {
            bail!("'organize' requires <branch> and <dir> arguments\n\n{}", usage())
        }
        [cmd] if cmd == "all" => pipeline::cmd_all(DEFAULT_BRANCH, forced),
        [cmd, branch] if cmd == "all" => pipeline::cmd_all(branch, forced),
        _ => bail!("{}", usage()),
    }
}

/// Peel `--runtime <tool>` (or `--runtime=<tool>`) out of the argument
/// list, wherever it appears.
fn take_runtime_flag(args: &mut Vec<String>) -> Result<Option<String>> {
    for index in 0..args.len() {
        if let Some(value) = args[index].strip_prefix("--runtime=") {
            let value = value.to_string();
            if value.is_empty() {
                bail!("--runtime requires a tool name");
            }
            args.remove(index);
            return Ok(Some(value));
        }
        if args[index] == "--runtime" {
            if index + 1 >= args.len() {
                bail!("--runtime requires a tool name");
            }
            let value = args.remove(index + 1);
            args.remove(index);
            return Ok(Some(value));
        }
    }
    Ok(None)
}
