//! A package source backed by configurations held in memory.
//!
//! Used for tests and for offline fixtures where packages already sit on
//! disk at known paths.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use semver::Version;

use super::{PackageSource, SourceError};
use crate::package::{ConfigError, PackageConfig, ResolvedPackage};
use crate::traits::Traits;

#[derive(Debug, Default)]
pub struct MemorySource {
  packages: BTreeMap<String, BTreeMap<Version, (PackageConfig, PathBuf)>>,
  list_calls: HashMap<String, usize>,
}

impl MemorySource {
  pub fn new() -> Self {
    Self::default()
  }

  /// Register a parsed configuration rooted at `path`.
  pub fn add(&mut self, config: PackageConfig, path: impl Into<PathBuf>) {
    self
      .packages
      .entry(config.name.clone())
      .or_default()
      .insert(config.version.clone(), (config, path.into()));
  }

  /// Register the package whose `config.yaml` lives in `dir`.
  pub fn add_dir(&mut self, dir: &Path) -> Result<(), ConfigError> {
    let config = PackageConfig::load(dir)?;
    self.add(config, dir);
    Ok(())
  }

  /// How often the versions of `name` were listed.
  pub fn list_calls(&self, name: &str) -> usize {
    self.list_calls.get(name).copied().unwrap_or(0)
  }
}

impl PackageSource for MemorySource {
  fn list_versions(&mut self, name: &str, _fetch_remote: bool) -> Result<Vec<Version>, SourceError> {
    *self.list_calls.entry(name.to_string()).or_default() += 1;
    self
      .packages
      .get(name)
      .map(|versions| versions.keys().cloned().collect())
      .ok_or_else(|| SourceError::NotFound { name: name.to_string() })
  }

  fn checkout(&mut self, name: &str, version: &Version, traits: &Traits) -> Result<ResolvedPackage, SourceError> {
    let (config, path) = self
      .packages
      .get(name)
      .and_then(|versions| versions.get(version))
      .ok_or_else(|| SourceError::VersionMissing {
        name: name.to_string(),
        version: version.clone(),
      })?;
    Ok(ResolvedPackage::new(config.clone(), path.clone(), traits.clone()))
  }
}
