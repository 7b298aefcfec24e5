//! Implementation of the `clyde run` and `clyde test` commands.
//!
//! Both build first and then hand the terminal to the program; its exit code
//! becomes clyde's.

use std::path::Path;
use std::process::{ExitCode, ExitStatus};

use anyhow::{Context, Result};

use clyde_lib::project::{BuildOptions, Project};

use crate::BuildArgs;
use crate::output::print_error;

pub fn cmd_run(dir: &Path, args: &BuildArgs, program_args: &[String]) -> Result<ExitCode> {
  let project = Project::open(dir).context("Failed to open package")?;
  let status = project
    .run(&BuildOptions::from(args), program_args)
    .with_context(|| format!("Failed to run {}", project.label()))?;
  Ok(exit_code(status, "application"))
}

pub fn cmd_test(dir: &Path, args: &BuildArgs, program_args: &[String]) -> Result<ExitCode> {
  let project = Project::open(dir).context("Failed to open package")?;
  let status = project
    .test(&BuildOptions::from(args), program_args)
    .with_context(|| format!("Failed to run tests of {}", project.label()))?;
  Ok(exit_code(status, "tests"))
}

fn exit_code(status: ExitStatus, what: &str) -> ExitCode {
  if status.success() {
    return ExitCode::SUCCESS;
  }
  print_error(&format!("{what} exited with {status}"));
  // Killed by a signal: no code to forward
  let code = status.code().and_then(|c| u8::try_from(c).ok()).unwrap_or(1);
  ExitCode::from(code)
}
