//! The frozen version ledger (`versions.txt`).
//!
//! Every successful resolution records the chosen version of each package,
//! one `name=version` pair per line, sorted by name. A build in frozen mode
//! reads the ledger back instead of resolving again.
//!
//! ```text
//! gizmo=0.4.0
//! log=1.3.0
//! util=local
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::Path;

use semver::Version;
use thiserror::Error;

use crate::consts::LOCAL_VERSION;
use crate::version::{VersionError, parse_version};

#[derive(Debug, Error)]
pub enum FrozenError {
  #[error("failed to read version ledger: {0}")]
  Read(#[source] io::Error),

  #[error("failed to write version ledger: {0}")]
  Write(#[source] io::Error),

  #[error("malformed version ledger line {line}: '{text}' (expected name=version)")]
  Malformed { line: usize, text: String },

  #[error("invalid version on version ledger line {line}: {source}")]
  InvalidVersion {
    line: usize,
    #[source]
    source: VersionError,
  },
}

/// A pinned version: either a published one or a local working tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PinnedVersion {
  Published(Version),
  Local,
}

impl fmt::Display for PinnedVersion {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Published(v) => write!(f, "{v}"),
      Self::Local => f.write_str(LOCAL_VERSION),
    }
  }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrozenVersions {
  pub versions: BTreeMap<String, PinnedVersion>,
}

impl FrozenVersions {
  pub fn new() -> Self {
    Self::default()
  }

  /// Load the ledger at `path`.
  ///
  /// Returns `Ok(None)` if the file doesn't exist.
  pub fn load(path: &Path) -> Result<Option<Self>, FrozenError> {
    let content = match fs::read_to_string(path) {
      Ok(content) => content,
      Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
      Err(e) => return Err(FrozenError::Read(e)),
    };
    Self::parse(&content).map(Some)
  }

  pub fn parse(content: &str) -> Result<Self, FrozenError> {
    let mut versions = BTreeMap::new();
    for (index, raw) in content.lines().enumerate() {
      let line = index + 1;
      let text = raw.trim();
      if text.is_empty() || text.starts_with('#') {
        continue;
      }
      let Some((name, version)) = text.split_once('=') else {
        return Err(FrozenError::Malformed {
          line,
          text: text.to_string(),
        });
      };
      let (name, version) = (name.trim(), version.trim());
      if name.is_empty() || version.is_empty() {
        return Err(FrozenError::Malformed {
          line,
          text: text.to_string(),
        });
      }
      let pinned = if version == LOCAL_VERSION {
        PinnedVersion::Local
      } else {
        PinnedVersion::Published(parse_version(version).map_err(|source| FrozenError::InvalidVersion { line, source })?)
      };
      versions.insert(name.to_string(), pinned);
    }
    Ok(Self { versions })
  }

  pub fn save(&self, path: &Path) -> Result<(), FrozenError> {
    fs::write(path, self.to_string()).map_err(FrozenError::Write)
  }

  pub fn insert(&mut self, name: impl Into<String>, version: PinnedVersion) {
    self.versions.insert(name.into(), version);
  }

  pub fn get(&self, name: &str) -> Option<&PinnedVersion> {
    self.versions.get(name)
  }

  pub fn iter(&self) -> impl Iterator<Item = (&str, &PinnedVersion)> {
    self.versions.iter().map(|(k, v)| (k.as_str(), v))
  }
}

impl fmt::Display for FrozenVersions {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for (name, version) in &self.versions {
      writeln!(f, "{name}={version}")?;
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  #[test]
  fn load_missing_returns_none() {
    let temp = TempDir::new().unwrap();
    assert!(FrozenVersions::load(&temp.path().join("versions.txt")).unwrap().is_none());
  }

  #[test]
  fn output_is_sorted_by_name() {
    let mut ledger = FrozenVersions::new();
    ledger.insert("zlib", PinnedVersion::Published(Version::new(1, 2, 11)));
    ledger.insert("app", PinnedVersion::Local);
    ledger.insert("log", PinnedVersion::Published(Version::new(0, 3, 0)));
    assert_eq!(ledger.to_string(), "app=local\nlog=0.3.0\nzlib=1.2.11\n");
  }

  #[test]
  fn save_then_load() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("versions.txt");
    let mut ledger = FrozenVersions::new();
    ledger.insert("log", PinnedVersion::Published(Version::new(1, 3, 0)));
    ledger.save(&path).unwrap();
    assert_eq!(FrozenVersions::load(&path).unwrap(), Some(ledger));
  }

  #[test]
  fn tolerates_blank_lines_comments_and_partial_versions() {
    let ledger = FrozenVersions::parse("# pinned\n\nlog = 1.3\n").unwrap();
    assert_eq!(
      ledger.get("log"),
      Some(&PinnedVersion::Published(Version::new(1, 3, 0)))
    );
  }

  #[test]
  fn malformed_line_is_reported() {
    let err = FrozenVersions::parse("log=1.0.0\nbroken\n").unwrap_err();
    assert!(matches!(err, FrozenError::Malformed { line: 2, .. }));
  }

  #[test]
  fn invalid_version_is_reported() {
    let err = FrozenVersions::parse("log=banana\n").unwrap_err();
    assert!(matches!(err, FrozenError::InvalidVersion { line: 1, .. }));
  }
}
