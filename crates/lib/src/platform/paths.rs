use crate::consts::{APP_NAME, ENV_GIT_ROOT, ENV_STORE};
use std::path::PathBuf;

/// Returns the user's home directory
#[cfg(windows)]
pub fn home_dir() -> PathBuf {
  std::env::var("USERPROFILE").map(PathBuf::from).unwrap_or_else(|_| PathBuf::from("."))
}

/// Returns the user's home directory
#[cfg(not(windows))]
pub fn home_dir() -> PathBuf {
  std::env::var("HOME").map(PathBuf::from).unwrap_or_else(|_| PathBuf::from("/"))
}

/// Returns the system-wide configuration directory
#[cfg(windows)]
pub fn system_config_dir() -> PathBuf {
  let program_data = std::env::var("PROGRAMDATA").unwrap_or_else(|_| "C:\\ProgramData".to_string());
  PathBuf::from(program_data).join(APP_NAME)
}

/// Returns the system-wide configuration directory
#[cfg(not(windows))]
pub fn system_config_dir() -> PathBuf {
  PathBuf::from("/etc").join(APP_NAME)
}

/// Returns the directory for configuration files for the application
#[cfg(windows)]
pub fn config_dir() -> PathBuf {
  let appdata = std::env::var("APPDATA").map(PathBuf::from).unwrap_or_else(|_| home_dir());
  appdata.join(APP_NAME)
}

/// Returns the directory for configuration files for the application
#[cfg(not(windows))]
pub fn config_dir() -> PathBuf {
  let config_home = std::env::var("XDG_CONFIG_HOME")
    .map(PathBuf::from)
    .unwrap_or_else(|_| home_dir().join(".config"));
  config_home.join(APP_NAME)
}

/// Returns the directory for data files for the application
#[cfg(windows)]
pub fn data_dir() -> PathBuf {
  let appdata = std::env::var("APPDATA").map(PathBuf::from).unwrap_or_else(|_| home_dir());
  appdata.join(APP_NAME)
}

/// Returns the directory for data files for the application
#[cfg(not(windows))]
pub fn data_dir() -> PathBuf {
  let data_home = std::env::var("XDG_DATA_HOME")
    .map(PathBuf::from)
    .unwrap_or_else(|_| home_dir().join(".local").join("share"));
  data_home.join(APP_NAME)
}

/// Returns the directory for cache files for the application
#[cfg(windows)]
pub fn cache_dir() -> PathBuf {
  let local_appdata = std::env::var("LOCALAPPDATA").map(PathBuf::from).unwrap_or_else(|_| home_dir());
  local_appdata.join(APP_NAME).join("Cache")
}

/// Returns the directory for cache files for the application
#[cfg(not(windows))]
pub fn cache_dir() -> PathBuf {
  let cache_home = std::env::var("XDG_CACHE_HOME")
    .map(PathBuf::from)
    .unwrap_or_else(|_| home_dir().join(".cache"));
  cache_home.join(APP_NAME)
}

/// Returns the artifact store root.
///
/// `CLYDE_STORE` overrides the default of `<data_dir>/store`.
pub fn store_dir() -> PathBuf {
  std::env::var(ENV_STORE)
    .map(PathBuf::from)
    .unwrap_or_else(|_| data_dir().join("store"))
}

/// Returns the directory holding package repositories and their checkouts.
///
/// `CLYDE_GIT_ROOT` overrides the default of `<cache_dir>/git`.
pub fn git_dir() -> PathBuf {
  std::env::var(ENV_GIT_ROOT)
    .map(PathBuf::from)
    .unwrap_or_else(|_| cache_dir().join("git"))
}

#[cfg(test)]
#[cfg(not(windows))]
mod tests {
  use super::*;
  use serial_test::serial;

  #[test]
  #[serial]
  fn xdg_config_home_takes_precedence() {
    temp_env::with_vars(
      [
        ("XDG_CONFIG_HOME", Some("/custom/config")),
        ("HOME", Some("/home/user")),
      ],
      || {
        assert_eq!(config_dir(), PathBuf::from("/custom/config").join(APP_NAME));
      },
    );
  }

  #[test]
  #[serial]
  fn xdg_fallback_to_home_directories() {
    temp_env::with_vars(
      [
        ("XDG_CONFIG_HOME", None::<&str>),
        ("XDG_DATA_HOME", None::<&str>),
        ("XDG_CACHE_HOME", None::<&str>),
        ("HOME", Some("/home/user")),
      ],
      || {
        assert_eq!(config_dir(), PathBuf::from("/home/user/.config").join(APP_NAME));
        assert_eq!(data_dir(), PathBuf::from("/home/user/.local/share").join(APP_NAME));
        assert_eq!(cache_dir(), PathBuf::from("/home/user/.cache").join(APP_NAME));
      },
    );
  }

  #[test]
  #[serial]
  fn store_env_overrides_default() {
    temp_env::with_vars(
      [(ENV_STORE, Some("/srv/clyde")), ("XDG_DATA_HOME", Some("/data"))],
      || {
        assert_eq!(store_dir(), PathBuf::from("/srv/clyde"));
      },
    );
    temp_env::with_vars([(ENV_STORE, None::<&str>), ("XDG_DATA_HOME", Some("/data"))], || {
      assert_eq!(store_dir(), PathBuf::from("/data/clyde/store"));
    });
  }
}
