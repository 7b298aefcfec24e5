//! File locks over the artifact store.
//!
//! [`StoreLock`] guards the store as a whole: builds hold it shared, `flush`
//! holds it exclusively, and a second process never waits for it but reports
//! who holds it. [`DigestLock`] serializes the build of one digest between
//! processes sharing a store and does block.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use super::descriptor::Digest;

const LOCK_FILENAME: &str = ".lock";
const DIGEST_LOCK_DIR: &str = ".locks";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
  Shared,
  Exclusive,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LockMetadata {
  pub version: u32,
  pub pid: u32,
  pub started_at_unix: u64,
  pub command: String,
  pub store: PathBuf,
}

#[derive(Debug, Error)]
pub enum LockError {
  #[error(
    "artifact store is locked by another process: {command} (PID {pid}, started {started_at})\n\
     If you're sure no clyde process is running, remove the lock file:\n  {lock_path}"
  )]
  Contention {
    command: String,
    pid: u32,
    started_at: String,
    lock_path: PathBuf,
  },

  #[error(
    "artifact store is locked (could not read lock metadata)\n\
     If you're sure no clyde process is running, remove the lock file:\n  {lock_path}"
  )]
  ContentionUnknown { lock_path: PathBuf },

  #[error("failed to create lock directory {path}: {source}")]
  CreateDir {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to open lock file {path}: {source}")]
  OpenFile {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to write lock metadata: {0}")]
  WriteMetadata(#[source] io::Error),

  #[error("failed to acquire lock {path}: {source}")]
  LockFailed {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
}

fn open_lock_file(path: &Path) -> Result<File, LockError> {
  if let Some(parent) = path.parent()
    && !parent.exists()
  {
    fs::create_dir_all(parent).map_err(|source| LockError::CreateDir {
      path: parent.to_path_buf(),
      source,
    })?;
  }
  OpenOptions::new()
    .read(true)
    .write(true)
    .create(true)
    .truncate(false)
    .open(path)
    .map_err(|source| LockError::OpenFile {
      path: path.to_path_buf(),
      source,
    })
}

/// Store-wide lock, released on drop.
pub struct StoreLock {
  file: File,
  lock_path: PathBuf,
}

impl StoreLock {
  pub fn acquire(store: &Path, mode: LockMode, command: &str) -> Result<Self, LockError> {
    let lock_path = store.join(LOCK_FILENAME);
    let file = open_lock_file(&lock_path)?;

    if let Err(err) = lock(&file, mode, false) {
      if err.kind() == io::ErrorKind::WouldBlock {
        return Err(Self::read_contention_error(&lock_path));
      }
      return Err(LockError::LockFailed { path: lock_path, source: err });
    }

    if mode == LockMode::Exclusive {
      Self::write_metadata(&file, command, store)?;
    }
    debug!(path = %lock_path.display(), ?mode, "acquired store lock");

    Ok(StoreLock { file, lock_path })
  }

  /// Read the metadata back through the held handle.
  ///
  /// Opening a second handle would fail on Windows while the lock is held.
  pub fn read_metadata(&self) -> io::Result<LockMetadata> {
    use std::io::{Seek, SeekFrom};

    let mut file = &self.file;
    file.seek(SeekFrom::Start(0))?;
    let mut contents = String::new();
    file.read_to_string(&mut contents)?;
    serde_json::from_str(&contents).map_err(io::Error::other)
  }

  pub fn lock_path(&self) -> &Path {
    &self.lock_path
  }

  fn write_metadata(file: &File, command: &str, store: &Path) -> Result<(), LockError> {
    let metadata = LockMetadata {
      version: 1,
      pid: std::process::id(),
      started_at_unix: SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs(),
      command: command.to_string(),
      store: store.to_path_buf(),
    };

    file.set_len(0).map_err(LockError::WriteMetadata)?;
    let mut writer = io::BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, &metadata).map_err(|e| LockError::WriteMetadata(io::Error::other(e)))?;
    writer.flush().map_err(LockError::WriteMetadata)
  }

  fn read_contention_error(lock_path: &Path) -> LockError {
    if let Ok(mut file) = File::open(lock_path) {
      let mut contents = String::new();
      if file.read_to_string(&mut contents).is_ok()
        && let Ok(metadata) = serde_json::from_str::<LockMetadata>(&contents)
      {
        return LockError::Contention {
          command: metadata.command,
          pid: metadata.pid,
          started_at: format!("Unix timestamp {}", metadata.started_at_unix),
          lock_path: lock_path.to_path_buf(),
        };
      }
    }

    LockError::ContentionUnknown {
      lock_path: lock_path.to_path_buf(),
    }
  }
}

/// Exclusive lock on a single digest, held while it is built and stored.
pub struct DigestLock {
  _file: File,
}

impl DigestLock {
  /// Block until no other process is building `digest`.
  pub fn acquire(store: &Path, digest: &Digest) -> Result<Self, LockError> {
    let path = store.join(DIGEST_LOCK_DIR).join(format!("{digest}.lock"));
    let file = open_lock_file(&path)?;
    lock(&file, LockMode::Exclusive, true).map_err(|source| LockError::LockFailed { path, source })?;
    Ok(DigestLock { _file: file })
  }
}

#[cfg(unix)]
fn lock(file: &File, mode: LockMode, blocking: bool) -> io::Result<()> {
  use rustix::fs::{FlockOperation, flock};
  use std::os::unix::io::AsFd;

  let operation = match (mode, blocking) {
    (LockMode::Shared, false) => FlockOperation::NonBlockingLockShared,
    (LockMode::Exclusive, false) => FlockOperation::NonBlockingLockExclusive,
    (LockMode::Shared, true) => FlockOperation::LockShared,
    (LockMode::Exclusive, true) => FlockOperation::LockExclusive,
  };

  flock(file.as_fd(), operation).map_err(|e| io::Error::from_raw_os_error(e.raw_os_error()))
}

#[cfg(windows)]
fn lock(file: &File, mode: LockMode, blocking: bool) -> io::Result<()> {
  use std::os::windows::io::AsRawHandle;
  use windows_sys::Win32::Foundation::HANDLE;
  use windows_sys::Win32::Storage::FileSystem::{LOCKFILE_EXCLUSIVE_LOCK, LOCKFILE_FAIL_IMMEDIATELY, LockFileEx};

  let handle = file.as_raw_handle() as HANDLE;
  let mut flags = if blocking { 0 } else { LOCKFILE_FAIL_IMMEDIATELY };
  if mode == LockMode::Exclusive {
    flags |= LOCKFILE_EXCLUSIVE_LOCK;
  }

  // SAFETY: OVERLAPPED is plain data and valid zero-initialized; the handle
  // belongs to `file`, which outlives the call.
  let result = unsafe {
    let mut overlapped = std::mem::zeroed();
    LockFileEx(handle, flags, 0, 1, 0, &mut overlapped)
  };

  if result == 0 {
    Err(io::Error::last_os_error())
  } else {
    Ok(())
  }
}
