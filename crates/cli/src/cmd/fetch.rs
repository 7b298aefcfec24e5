//! Implementation of the `clyde fetch` command.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use owo_colors::{OwoColorize, Stream};

use clyde_lib::project::{BuildOptions, Project};

use crate::BuildArgs;
use crate::output::{OutputFormat, print_json, print_success, symbols};

/// Resolve and check out every dependency, writing `versions.txt`.
pub fn cmd_fetch(dir: &Path, args: &BuildArgs, output: OutputFormat) -> Result<()> {
  let project = Project::open(dir).context("Failed to open package")?;
  let resolution = project
    .fetch(&BuildOptions::from(args))
    .with_context(|| format!("Failed to fetch dependencies of {}", project.label()))?;

  let versions: BTreeMap<String, String> = resolution
    .packages()
    .filter(|pkg| pkg.name() != resolution.root_name())
    .map(|pkg| (pkg.name().to_string(), pkg.version_label()))
    .collect();

  if output.is_json() {
    return print_json(&versions);
  }

  print_success(&format!("Fetched {} package(s)", versions.len()));
  for (name, version) in &versions {
    println!(
      "  {} {} {}",
      symbols::ARROW.if_supports_color(Stream::Stdout, |s| s.cyan()),
      name,
      version.if_supports_color(Stream::Stdout, |s| s.dimmed())
    );
  }
  Ok(())
}
