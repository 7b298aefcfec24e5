//! Where packages come from.
//!
//! A [`PackageSource`] lists the published versions of a package and
//! materializes one of them as a [`ResolvedPackage`]. The resolver only talks
//! to this trait, so the git-backed source and the in-memory source used in
//! tests are interchangeable.

pub mod git;
pub mod memory;

use std::path::{Path, PathBuf};

use semver::Version;
use thiserror::Error;

use crate::package::{ConfigError, ResolvedPackage};
use crate::traits::Traits;
use crate::version::VersionSpec;

pub use git::{GitError, GitPackageSource};
pub use memory::MemorySource;

#[derive(Debug, Error)]
pub enum SourceError {
  #[error("package '{name}' not found anywhere")]
  NotFound { name: String },

  #[error("package '{name}' has no version {version}")]
  VersionMissing { name: String, version: Version },

  #[error("local package at '{path}' not found")]
  LocalMissing { path: PathBuf },

  #[error(transparent)]
  Config(#[from] ConfigError),

  #[error("git operation failed for package '{name}': {source}")]
  Git {
    name: String,
    #[source]
    source: GitError,
  },
}

/// A provider of published package versions.
pub trait PackageSource {
  /// Published versions of `name`, optionally refreshed from a remote first.
  fn list_versions(&mut self, name: &str, fetch_remote: bool) -> Result<Vec<Version>, SourceError>;

  /// Materialize `name` at exactly `version`, bound to `traits`.
  fn checkout(&mut self, name: &str, version: &Version, traits: &Traits) -> Result<ResolvedPackage, SourceError>;

  /// The highest published version of `name` matching `spec`.
  fn best(
    &mut self,
    name: &str,
    spec: &VersionSpec,
    traits: &Traits,
    fetch_remote: bool,
  ) -> Result<Option<ResolvedPackage>, SourceError> {
    let versions = self.list_versions(name, fetch_remote)?;
    match spec.best(&versions) {
      Some(version) => self.checkout(name, &version, traits).map(Some),
      None => Ok(None),
    }
  }

  /// Load the working tree at `path` as a local package.
  fn local(&mut self, path: &Path, traits: &Traits) -> Result<ResolvedPackage, SourceError> {
    if !path.is_dir() {
      return Err(SourceError::LocalMissing {
        path: path.to_path_buf(),
      });
    }
    let path = dunce::canonicalize(path).map_err(|_| SourceError::LocalMissing {
      path: path.to_path_buf(),
    })?;
    Ok(ResolvedPackage::load(&path, traits)?.into_local())
  }
}
