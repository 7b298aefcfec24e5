//! Content hashing of artifact directories.
//!
//! Every completed store entry records the hash of its contents so a later
//! lookup can tell an intact artifact from one that was modified or only
//! partially copied.

use std::fs;
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use walkdir::WalkDir;

/// A full 64-character SHA-256 hash, lowercase hex.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentHash(pub String);

impl std::fmt::Display for ContentHash {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.0)
  }
}

#[derive(Debug, Error)]
pub enum DirHashError {
  #[error("failed to walk directory: {message}")]
  WalkDir { message: String },

  #[error("failed to read file {path}: {message}")]
  ReadFile { path: String, message: String },

  #[error("failed to read symlink {path}: {message}")]
  ReadSymlink { path: String, message: String },
}

/// Deterministic hash of a directory tree.
///
/// Covers file contents, directory structure and symlink targets, never
/// timestamps or permissions. Entries whose file name is in `exclude` are
/// skipped along with everything below them.
pub fn hash_directory(path: &Path, exclude: &[&str]) -> Result<ContentHash, DirHashError> {
  let walker = WalkDir::new(path)
    .sort_by_file_name()
    .into_iter()
    .filter_entry(|e| e.file_name().to_str().map(|name| !exclude.contains(&name)).unwrap_or(true));

  let mut hasher = Sha256::new();
  for entry in walker {
    let entry = entry.map_err(|e| DirHashError::WalkDir { message: e.to_string() })?;
    let entry_path = entry.path();

    // Separators are normalized so a store copied between hosts still verifies
    let rel_path = entry_path
      .strip_prefix(path)
      .unwrap_or(entry_path)
      .to_string_lossy()
      .replace('\\', "/");
    if rel_path.is_empty() {
      continue;
    }

    let file_type = entry.file_type();
    let line = if file_type.is_file() {
      format!("F:{}:{}", rel_path, hash_file(entry_path)?)
    } else if file_type.is_dir() {
      format!("D:{rel_path}")
    } else if file_type.is_symlink() {
      let target = fs::read_link(entry_path).map_err(|e| DirHashError::ReadSymlink {
        path: entry_path.display().to_string(),
        message: e.to_string(),
      })?;
      format!("L:{}:{}", rel_path, hash_bytes(target.to_string_lossy().as_bytes()))
    } else {
      continue;
    };

    hasher.update(line.as_bytes());
    hasher.update(b"\n");
  }

  Ok(ContentHash(format!("{:x}", hasher.finalize())))
}

pub fn hash_file(path: &Path) -> Result<ContentHash, DirHashError> {
  let read_err = |e: std::io::Error| DirHashError::ReadFile {
    path: path.display().to_string(),
    message: e.to_string(),
  };
  let mut file = fs::File::open(path).map_err(read_err)?;

  let mut hasher = Sha256::new();
  let mut buffer = [0u8; 8192];
  loop {
    let read = file.read(&mut buffer).map_err(read_err)?;
    if read == 0 {
      break;
    }
    hasher.update(&buffer[..read]);
  }

  Ok(ContentHash(format!("{:x}", hasher.finalize())))
}

pub fn hash_bytes(data: &[u8]) -> ContentHash {
  ContentHash(format!("{:x}", Sha256::digest(data)))
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::tempdir;

  #[test]
  fn identical_trees_hash_identically() {
    let a = tempdir().unwrap();
    let b = tempdir().unwrap();
    for root in [a.path(), b.path()] {
      fs::create_dir_all(root.join("lib")).unwrap();
      fs::write(root.join("lib/libm.a"), "archive").unwrap();
      fs::write(root.join("descriptor.json"), "{}").unwrap();
    }
    assert_eq!(hash_directory(a.path(), &[]).unwrap(), hash_directory(b.path(), &[]).unwrap());
  }

  #[test]
  fn content_change_changes_hash() {
    let temp = tempdir().unwrap();
    fs::write(temp.path().join("libm.a"), "original").unwrap();
    let before = hash_directory(temp.path(), &[]).unwrap();

    fs::write(temp.path().join("libm.a"), "tampered").unwrap();
    assert_ne!(before, hash_directory(temp.path(), &[]).unwrap());
  }

  #[test]
  fn structure_is_part_of_the_hash() {
    let flat = tempdir().unwrap();
    fs::write(flat.path().join("file.h"), "x").unwrap();

    let nested = tempdir().unwrap();
    fs::create_dir(nested.path().join("include")).unwrap();
    fs::write(nested.path().join("include/file.h"), "x").unwrap();

    assert_ne!(
      hash_directory(flat.path(), &[]).unwrap(),
      hash_directory(nested.path(), &[]).unwrap()
    );
  }

  #[test]
  fn excluded_names_are_ignored() {
    let temp = tempdir().unwrap();
    fs::write(temp.path().join("file.txt"), "content").unwrap();
    let before = hash_directory(temp.path(), &[]).unwrap();

    fs::write(temp.path().join(".clyde-complete"), "marker").unwrap();
    assert_eq!(before, hash_directory(temp.path(), &[".clyde-complete"]).unwrap());
  }

  #[test]
  fn file_hash_is_full_sha256() {
    let temp = tempdir().unwrap();
    let path = temp.path().join("hello.txt");
    fs::write(&path, "hello world").unwrap();
    assert_eq!(
      hash_file(&path).unwrap().0,
      "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
    );
  }
}
