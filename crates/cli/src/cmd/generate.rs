//! Implementation of the `clyde gen` command.

use std::path::Path;
use std::time::Instant;

use anyhow::{Context, Result};

use clyde_lib::project::{BuildOptions, Project};

use crate::BuildArgs;
use crate::output::{format_duration, print_stat, print_success};

/// Resolve the package's dependencies and write `build.ninja` next to its
/// `config.yaml`, recording the chosen versions in `versions.txt`.
pub fn cmd_generate(dir: &Path, args: &BuildArgs) -> Result<()> {
  let start = Instant::now();
  let project = Project::open(dir).context("Failed to open package")?;
  let options = BuildOptions::from(args);

  let path = project
    .generate(&options)
    .with_context(|| format!("Failed to generate build file for {}", project.label()))?;

  print_success(&format!("Wrote {}", path.display()));
  print_stat("Versions", &project.ledger_path().display().to_string());
  print_stat("Duration", &format_duration(start.elapsed()));
  Ok(())
}
