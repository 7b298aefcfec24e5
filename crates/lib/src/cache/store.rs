//! The content-addressed artifact store.
//!
//! Layout of one entry:
//!
//! ```text
//! <store>/<digest>/
//!   include/           public headers
//!   lib/               static archives
//!   bin/               linked applications
//!   descriptor.json    the descriptor the digest was computed from
//!   .clyde-complete    marker with the content hash of everything above
//! ```
//!
//! An entry only counts as present when its marker exists and the recorded
//! hash still matches the directory. Entries are built in a staging
//! directory inside the store and renamed into place, so a reader never sees
//! a partial artifact.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::descriptor::{Digest, PackageDescriptor};
use super::hash::HashError;
use super::lock::{DigestLock, LockError, LockMode, StoreLock};
use crate::consts::{BUILD_COMPLETE_MARKER, DESCRIPTOR_FILE};
use crate::util::hash::{DirHashError, hash_directory};

const HASH_EXCLUSIONS: &[&str] = &[BUILD_COMPLETE_MARKER];
const STAGING_PREFIX: &str = ".staging-";

#[derive(Debug, Error)]
pub enum StoreError {
  #[error(transparent)]
  Hash(#[from] HashError),

  #[error(transparent)]
  Lock(#[from] LockError),

  #[error("failed to hash artifact: {0}")]
  DirHash(#[from] DirHashError),

  #[error("store I/O failed at {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("package '{package}' is a local working tree and cannot be cached")]
  LocalNotCacheable { package: String },
}

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> StoreError + '_ {
  move |source| StoreError::Io {
    path: path.to_path_buf(),
    source,
  }
}

#[derive(Debug, Serialize, Deserialize)]
struct StoreMarker {
  version: u32,
  status: String,
  output_hash: String,
}

/// A completed store entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
  pub digest: Digest,
  pub path: PathBuf,
}

impl Artifact {
  pub fn include_dir(&self) -> PathBuf {
    self.path.join("include")
  }

  pub fn lib_dir(&self) -> PathBuf {
    self.path.join("lib")
  }

  pub fn bin_dir(&self) -> PathBuf {
    self.path.join("bin")
  }

  pub fn descriptor(&self) -> Result<PackageDescriptor, StoreError> {
    let path = self.path.join(DESCRIPTOR_FILE);
    let content = fs::read_to_string(&path).map_err(io_err(&path))?;
    serde_json::from_str(&content).map_err(|e| StoreError::Io {
      path,
      source: io::Error::other(e),
    })
  }
}

#[derive(Debug, Clone)]
pub struct ArtifactStore {
  root: PathBuf,
  parent: Option<PathBuf>,
}

impl ArtifactStore {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    ArtifactStore {
      root: root.into(),
      parent: None,
    }
  }

  /// Consult a read-only `parent` store after this one.
  pub fn with_parent(mut self, parent: Option<PathBuf>) -> Self {
    self.parent = parent;
    self
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  pub fn parent(&self) -> Option<&Path> {
    self.parent.as_deref()
  }

  /// Take the store-wide lock.
  pub fn lock(&self, mode: LockMode, command: &str) -> Result<StoreLock, StoreError> {
    Ok(StoreLock::acquire(&self.root, mode, command)?)
  }

  /// Path of a verified entry for `digest`, looking in this store first.
  ///
  /// A corrupted entry in this store is removed; one in the parent store is
  /// only skipped.
  pub fn lookup(&self, digest: &Digest) -> Result<Option<PathBuf>, StoreError> {
    let primary = self.root.join(&digest.0);
    if primary.exists() {
      if verify(&primary) {
        return Ok(Some(primary));
      }
      warn!(digest = %digest, path = %primary.display(), "evicting corrupted store entry");
      fs::remove_dir_all(&primary).map_err(io_err(&primary))?;
    }

    if let Some(parent) = &self.parent {
      let fallback = parent.join(&digest.0);
      if fallback.exists() {
        if verify(&fallback) {
          debug!(digest = %digest, "found artifact in parent store");
          return Ok(Some(fallback));
        }
        warn!(digest = %digest, path = %fallback.display(), "ignoring corrupted entry in parent store");
      }
    }

    Ok(None)
  }

  /// Return the artifact for `descriptor`, building it if no intact entry exists.
  ///
  /// `builder` receives an empty directory with `include/`, `lib/` and `bin/`
  /// and must leave the complete artifact there. It runs at most once per
  /// digest, even across processes sharing the store.
  pub fn get_or_build<F, E>(&self, descriptor: &PackageDescriptor, builder: F) -> Result<Artifact, E>
  where
    F: FnOnce(&Path) -> Result<(), E>,
    E: From<StoreError>,
  {
    if descriptor.is_local() {
      return Err(
        StoreError::LocalNotCacheable {
          package: descriptor.name.clone(),
        }
        .into(),
      );
    }

    let digest = descriptor.digest().map_err(StoreError::from)?;
    if let Some(path) = self.lookup(&digest)? {
      debug!(name = %descriptor.name, version = %descriptor.version, digest = %digest, "cache hit");
      return Ok(Artifact { digest, path });
    }

    fs::create_dir_all(&self.root).map_err(io_err(&self.root))?;
    let _guard = DigestLock::acquire(&self.root, &digest).map_err(StoreError::from)?;

    // Another process may have finished it while we waited
    if let Some(path) = self.lookup(&digest)? {
      debug!(name = %descriptor.name, digest = %digest, "built concurrently");
      return Ok(Artifact { digest, path });
    }

    let staging = tempfile::Builder::new()
      .prefix(STAGING_PREFIX)
      .tempdir_in(&self.root)
      .map_err(io_err(&self.root))?;
    for dir in ["include", "lib", "bin"] {
      let path = staging.path().join(dir);
      fs::create_dir_all(&path).map_err(io_err(&path))?;
    }

    info!(name = %descriptor.name, version = %descriptor.version, digest = %digest, "building package");
    builder(staging.path())?;

    seal(staging.path(), descriptor)?;

    let target = self.root.join(&digest.0);
    let staged = staging.keep();
    fs::rename(&staged, &target).map_err(io_err(&target))?;
    debug!(digest = %digest, path = %target.display(), "stored artifact");

    Ok(Artifact { digest, path: target })
  }

  /// Remove every entry from this store. Returns how many were removed.
  pub fn flush(&self) -> Result<usize, StoreError> {
    if !self.root.exists() {
      return Ok(0);
    }
    let _lock = self.lock(LockMode::Exclusive, "flush")?;

    let mut removed = 0;
    for entry in fs::read_dir(&self.root).map_err(io_err(&self.root))? {
      let entry = entry.map_err(io_err(&self.root))?;
      let path = entry.path();
      let name = entry.file_name();
      let name = name.to_string_lossy();
      if !path.is_dir() || name == ".locks" {
        continue;
      }
      fs::remove_dir_all(&path).map_err(io_err(&path))?;
      if !name.starts_with('.') {
        removed += 1;
      }
    }
    info!(store = %self.root.display(), removed, "flushed artifact store");
    Ok(removed)
  }
}

/// Write the descriptor and the completion marker into a built entry.
fn seal(dir: &Path, descriptor: &PackageDescriptor) -> Result<(), StoreError> {
  let descriptor_path = dir.join(DESCRIPTOR_FILE);
  let json = serde_json::to_string_pretty(descriptor).map_err(|e| StoreError::Io {
    path: descriptor_path.clone(),
    source: io::Error::other(e),
  })?;
  fs::write(&descriptor_path, json).map_err(io_err(&descriptor_path))?;

  let marker = StoreMarker {
    version: 1,
    status: "complete".to_string(),
    output_hash: hash_directory(dir, HASH_EXCLUSIONS)?.0,
  };
  let marker_path = dir.join(BUILD_COMPLETE_MARKER);
  let json = serde_json::to_string(&marker).map_err(|e| StoreError::Io {
    path: marker_path.clone(),
    source: io::Error::other(e),
  })?;
  fs::write(&marker_path, format!("{json}\n")).map_err(io_err(&marker_path))
}

fn verify(dir: &Path) -> bool {
  let Ok(content) = fs::read_to_string(dir.join(BUILD_COMPLETE_MARKER)) else {
    debug!(path = %dir.display(), "store entry has no completion marker");
    return false;
  };
  let Ok(marker) = serde_json::from_str::<StoreMarker>(&content) else {
    warn!(path = %dir.display(), "unreadable completion marker");
    return false;
  };

  match hash_directory(dir, HASH_EXCLUSIONS) {
    Ok(actual) if actual.0 == marker.output_hash => true,
    Ok(actual) => {
      warn!(
        path = %dir.display(),
        expected = %marker.output_hash,
        actual = %actual,
        "store entry corrupted"
      );
      false
    }
    Err(e) => {
      warn!(path = %dir.display(), error = %e, "failed to hash store entry");
      false
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::Form;
  use std::cell::Cell;
  use tempfile::TempDir;
  use tracing_test::traced_test;

  fn descriptor(version: &str) -> PackageDescriptor {
    PackageDescriptor::new("log", version, Form::Binary).with_dependency("fmt", "2.0.0")
  }

  fn write_archive(dir: &Path) -> Result<(), StoreError> {
    fs::write(dir.join("lib").join("log.a"), "archive").map_err(io_err(dir))?;
    fs::create_dir_all(dir.join("include").join("log")).map_err(io_err(dir))?;
    fs::write(dir.join("include").join("log").join("log.h"), "#pragma once\n").map_err(io_err(dir))
  }

  mod get_or_build {
    use super::*;

    #[test]
    fn builds_exactly_once() {
      let temp = TempDir::new().unwrap();
      let store = ArtifactStore::new(temp.path());
      let calls = Cell::new(0);

      let build = |dir: &Path| {
        calls.set(calls.get() + 1);
        write_archive(dir)
      };
      let first = store.get_or_build(&descriptor("1.3.0"), build).unwrap();
      let second = store
        .get_or_build(&descriptor("1.3.0"), |dir: &Path| {
          calls.set(calls.get() + 1);
          write_archive(dir)
        })
        .unwrap();

      assert_eq!(calls.get(), 1);
      assert_eq!(first, second);
      assert_eq!(first.digest, descriptor("1.3.0").digest().unwrap());
      assert!(first.lib_dir().join("log.a").exists());
      assert_eq!(first.descriptor().unwrap(), descriptor("1.3.0"));
    }

    #[test]
    fn distinct_descriptors_build_separately() {
      let temp = TempDir::new().unwrap();
      let store = ArtifactStore::new(temp.path());
      let a = store.get_or_build(&descriptor("1.3.0"), write_archive).unwrap();
      let b = store.get_or_build(&descriptor("1.4.0"), write_archive).unwrap();
      assert_ne!(a.path, b.path);
    }

    #[test]
    fn failed_build_leaves_no_entry() {
      let temp = TempDir::new().unwrap();
      let store = ArtifactStore::new(temp.path());
      let result = store.get_or_build(&descriptor("1.3.0"), |dir: &Path| {
        Err(StoreError::Io {
          path: dir.to_path_buf(),
          source: io::Error::other("compiler exploded"),
        })
      });
      assert!(result.is_err());

      let digest = descriptor("1.3.0").digest().unwrap();
      assert!(store.lookup(&digest).unwrap().is_none());
      let leftovers: Vec<_> = fs::read_dir(temp.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().starts_with(STAGING_PREFIX))
        .collect();
      assert!(leftovers.is_empty());
    }

    #[test]
    fn local_descriptor_is_rejected() {
      let temp = TempDir::new().unwrap();
      let store = ArtifactStore::new(temp.path());
      let local = PackageDescriptor::new("app", "local", Form::Binary);
      let err = store.get_or_build(&local, write_archive).unwrap_err();
      assert!(matches!(err, StoreError::LocalNotCacheable { .. }));
    }
  }

  mod lookup {
    use super::*;

    #[test]
    #[traced_test]
    fn corrupted_entry_is_rebuilt() {
      let temp = TempDir::new().unwrap();
      let store = ArtifactStore::new(temp.path());
      let artifact = store.get_or_build(&descriptor("1.3.0"), write_archive).unwrap();
      fs::write(artifact.lib_dir().join("log.a"), "tampered").unwrap();

      let calls = Cell::new(0);
      store
        .get_or_build(&descriptor("1.3.0"), |dir: &Path| {
          calls.set(calls.get() + 1);
          write_archive(dir)
        })
        .unwrap();

      assert_eq!(calls.get(), 1);
      assert_eq!(fs::read_to_string(artifact.lib_dir().join("log.a")).unwrap(), "archive");
      assert!(logs_contain("store entry corrupted"));
    }

    #[test]
    fn entry_without_marker_is_absent() {
      let temp = TempDir::new().unwrap();
      let store = ArtifactStore::new(temp.path());
      let digest = descriptor("1.3.0").digest().unwrap();
      fs::create_dir_all(temp.path().join(&digest.0).join("lib")).unwrap();

      assert!(store.lookup(&digest).unwrap().is_none());
      assert!(!temp.path().join(&digest.0).exists());
    }

    #[test]
    fn parent_store_is_consulted() {
      let temp = TempDir::new().unwrap();
      let parent = ArtifactStore::new(temp.path().join("parent"));
      let built = parent.get_or_build(&descriptor("1.3.0"), write_archive).unwrap();

      let store = ArtifactStore::new(temp.path().join("user")).with_parent(Some(temp.path().join("parent")));
      let artifact = store
        .get_or_build(&descriptor("1.3.0"), |_: &Path| -> Result<(), StoreError> {
          panic!("parent artifact should have been used")
        })
        .unwrap();
      assert_eq!(artifact.path, built.path);
    }
  }

  #[test]
  fn flush_removes_entries() {
    let temp = TempDir::new().unwrap();
    let store = ArtifactStore::new(temp.path());
    store.get_or_build(&descriptor("1.3.0"), write_archive).unwrap();
    store.get_or_build(&descriptor("1.4.0"), write_archive).unwrap();

    assert_eq!(store.flush().unwrap(), 2);
    assert!(store.lookup(&descriptor("1.3.0").digest().unwrap()).unwrap().is_none());
    assert_eq!(store.flush().unwrap(), 0);
  }

  #[test]
  fn flush_of_missing_store_is_noop() {
    let temp = TempDir::new().unwrap();
    assert_eq!(ArtifactStore::new(temp.path().join("absent")).flush().unwrap(), 0);
  }
}
