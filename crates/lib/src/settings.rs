//! User settings (`config.toml`).
//!
//! Settings cascade from the system file to the user file to the project
//! file, each overriding the keys it sets, and environment variables win
//! over all of them:
//!
//! ```toml
//! store = "/var/cache/clyde/store"
//! parent-store = "/opt/clyde/store"
//! git-root = "/home/me/.cache/clyde/git"
//! remote = "ssh://git@example.com/packages/{name}.git"
//! user-name = "Ada"
//! user-email = "ada@example.com"
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::consts::{APP_NAME, ENV_GIT_ROOT, ENV_PARENT_STORE, ENV_REMOTE, ENV_STORE};
use crate::platform::paths::{config_dir, git_dir, store_dir, system_config_dir};

pub const SETTINGS_FILE: &str = "config.toml";

#[derive(Debug, Error)]
pub enum SettingsError {
  #[error("failed to read settings file {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("invalid settings file {path}: {source}")]
  Parse {
    path: PathBuf,
    #[source]
    source: toml::de::Error,
  },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct Settings {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub store: Option<PathBuf>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub parent_store: Option<PathBuf>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub git_root: Option<PathBuf>,
  /// URL template for package repositories; `{name}` is the package name.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub remote: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub user_name: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub user_email: Option<String>,
}

impl Settings {
  /// Settings files consulted for `project`, lowest precedence first.
  pub fn cascade(project: Option<&Path>) -> Vec<PathBuf> {
    let mut files = vec![system_config_dir().join(SETTINGS_FILE), config_dir().join(SETTINGS_FILE)];
    if let Some(project) = project {
      files.push(project.join(format!(".{APP_NAME}")).join(SETTINGS_FILE));
    }
    files
  }

  /// Load the full cascade for `project` and apply environment overrides.
  pub fn load(project: Option<&Path>) -> Result<Self, SettingsError> {
    let mut settings = Self::load_files(&Self::cascade(project))?;
    settings.apply_env();
    Ok(settings)
  }

  /// Merge the files that exist among `files`, later ones winning.
  pub fn load_files(files: &[PathBuf]) -> Result<Self, SettingsError> {
    let mut settings = Settings::default();
    for path in files {
      if let Some(layer) = Self::load_file(path)? {
        debug!(path = %path.display(), "loaded settings");
        settings.merge(layer);
      }
    }
    Ok(settings)
  }

  /// Returns `Ok(None)` if the file doesn't exist.
  pub fn load_file(path: &Path) -> Result<Option<Self>, SettingsError> {
    let content = match fs::read_to_string(path) {
      Ok(content) => content,
      Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
      Err(source) => {
        return Err(SettingsError::Read {
          path: path.to_path_buf(),
          source,
        });
      }
    };
    toml::from_str(&content).map(Some).map_err(|source| SettingsError::Parse {
      path: path.to_path_buf(),
      source,
    })
  }

  /// Take every key `other` sets.
  pub fn merge(&mut self, other: Settings) {
    let Settings {
      store,
      parent_store,
      git_root,
      remote,
      user_name,
      user_email,
    } = other;
    self.store = store.or(self.store.take());
    self.parent_store = parent_store.or(self.parent_store.take());
    self.git_root = git_root.or(self.git_root.take());
    self.remote = remote.or(self.remote.take());
    self.user_name = user_name.or(self.user_name.take());
    self.user_email = user_email.or(self.user_email.take());
  }

  pub fn apply_env(&mut self) {
    let var = |key: &str| std::env::var(key).ok().filter(|v| !v.is_empty());
    if let Some(store) = var(ENV_STORE) {
      self.store = Some(PathBuf::from(store));
    }
    if let Some(parent) = var(ENV_PARENT_STORE) {
      self.parent_store = Some(PathBuf::from(parent));
    }
    if let Some(root) = var(ENV_GIT_ROOT) {
      self.git_root = Some(PathBuf::from(root));
    }
    if let Some(remote) = var(ENV_REMOTE) {
      self.remote = Some(remote);
    }
  }

  pub fn store_dir(&self) -> PathBuf {
    self.store.clone().unwrap_or_else(store_dir)
  }

  pub fn parent_store_dir(&self) -> Option<PathBuf> {
    self.parent_store.clone()
  }

  pub fn git_root(&self) -> PathBuf {
    self.git_root.clone().unwrap_or_else(git_dir)
  }
}
