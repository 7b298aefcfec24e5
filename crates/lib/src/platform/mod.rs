//! Target platforms and well-known directories.

pub mod paths;

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown platform '{0}' (expected one of: linux, darwin, windows, rtems)")]
pub struct UnknownPlatform(pub String);

/// The platform a package is built for.
///
/// Host platforms build with the host compiler. Embedded platforms need a
/// board support package to describe their toolchain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Platform {
  Linux,
  Darwin,
  Windows,
  Rtems,
}

impl Platform {
  /// Detect the platform of the running system.
  pub fn host() -> Self {
    match std::env::consts::OS {
      "macos" => Self::Darwin,
      "windows" => Self::Windows,
      _ => Self::Linux,
    }
  }

  /// Returns the lowercase identifier used in trait sets and variant clauses.
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Linux => "linux",
      Self::Darwin => "darwin",
      Self::Windows => "windows",
      Self::Rtems => "rtems",
    }
  }

  /// Whether building for this platform requires a board support package.
  pub fn needs_bsp(&self) -> bool {
    matches!(self, Self::Rtems)
  }
}

impl fmt::Display for Platform {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.as_str())
  }
}

impl FromStr for Platform {
  type Err = UnknownPlatform;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "linux" => Ok(Self::Linux),
      "darwin" | "macos" => Ok(Self::Darwin),
      "windows" => Ok(Self::Windows),
      "rtems" => Ok(Self::Rtems),
      other => Err(UnknownPlatform(other.to_string())),
    }
  }
}
