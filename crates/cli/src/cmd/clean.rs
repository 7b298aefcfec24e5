use std::path::Path;

use anyhow::{Context, Result};

use clyde_lib::project::Project;

use crate::output::{print_info, print_success};

pub fn cmd_clean(dir: &Path) -> Result<()> {
  let project = Project::open(dir).context("Failed to open package")?;
  let removed = project.clean().context("Failed to clean build outputs")?;

  if removed.is_empty() {
    print_info("Nothing to clean");
  } else {
    print_success(&format!("Removed {} path(s)", removed.len()));
  }
  Ok(())
}
