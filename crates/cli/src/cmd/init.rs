//! Implementation of the `clyde init` command.

use std::path::Path;

use anyhow::{Context, Result};
use owo_colors::OwoColorize;

use clyde_lib::error::Error;
use clyde_lib::init::{InitOptions, init};
use clyde_lib::package::PackageType;
use clyde_lib::settings::Settings;

use crate::output::symbols;

/// Create a package in `path` with a starter source file.
///
/// The author fields come from `user-name` and `user-email` in the settings.
pub fn cmd_init(path: &Path, package_type: PackageType) -> Result<()> {
  let settings = Settings::load(None).map_err(Error::from).context("Failed to load settings")?;
  let options = InitOptions {
    path: path.to_path_buf(),
    package_type,
    author: settings.user_name,
    author_email: settings.user_email,
  };

  let result = init(&options).map_err(Error::from).context("Failed to create package")?;

  println!(
    "{} {}",
    symbols::SUCCESS.green(),
    format!("Created {package_type} '{}'", result.name).green().bold()
  );
  println!();
  for file in &result.files {
    println!("  {} {}", symbols::INFO.cyan(), file.display());
  }
  println!();
  println!("{}", "Next steps:".bold());
  println!("  1. Edit {} to add dependencies", result.config.display().to_string().cyan());
  println!(
    "  2. Run: {}",
    format!("clyde -C {} build", result.package_dir.display()).cyan()
  );
  Ok(())
}
