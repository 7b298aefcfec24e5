//! Implementation of the `clyde build` command.

use std::path::Path;
use std::time::Instant;

use anyhow::{Context, Result};

use clyde_lib::project::{BuildOptions, Project};

use crate::BuildArgs;
use crate::output::{format_duration, print_stat, print_success};

pub fn cmd_build(dir: &Path, args: &BuildArgs) -> Result<()> {
  let start = Instant::now();
  let project = Project::open(dir).context("Failed to open package")?;

  let output = project
    .build(&BuildOptions::from(args))
    .with_context(|| format!("Failed to build {}", project.label()))?;

  print_success("Build complete!");
  if let Some(binary) = &output.binary {
    print_stat("Binary", &binary.display().to_string());
  }
  if let Some(archive) = &output.archive {
    print_stat("Archive", &archive.display().to_string());
  }
  print_stat("Dependencies", &output.dependencies.len().to_string());
  print_stat("Duration", &format_duration(start.elapsed()));
  Ok(())
}
