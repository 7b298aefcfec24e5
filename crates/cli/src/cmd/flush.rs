use std::path::Path;

use anyhow::{Context, Result};

use clyde_lib::consts::CONFIG_FILE;
use clyde_lib::error::Error;
use clyde_lib::project::flush;
use clyde_lib::settings::Settings;

use crate::output::{print_stat, print_success, print_warning};

/// Empty the artifact store. Works outside a package too; project settings
/// are consulted only when `dir` holds one.
pub fn cmd_flush(dir: &Path) -> Result<()> {
  let project = dir.join(CONFIG_FILE).is_file().then_some(dir);
  let settings = Settings::load(project).map_err(Error::from).context("Failed to load settings")?;
  let store = settings.store_dir();

  let removed = flush(&settings).context("Failed to flush artifact store")?;

  if removed == 0 {
    print_warning("Artifact store was already empty");
  } else {
    print_success("Artifact store flushed");
  }
  print_stat("Store", &store.display().to_string());
  print_stat("Entries removed", &removed.to_string());
  Ok(())
}
