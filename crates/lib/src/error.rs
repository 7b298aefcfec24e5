//! The top-level error type and its user-facing classification.
//!
//! Every module has its own error enum. [`Error`] wraps all of them so the
//! pipeline in [`crate::project`] can use `?` across module boundaries, and
//! [`Error::kind`] sorts any failure into one of a handful of categories the
//! CLI reports.

use std::fmt;

use thiserror::Error;

use crate::build::BuildError;
use crate::cache::{HashError, LockError, StoreError};
use crate::emit::EmitError;
use crate::init::InitError;
use crate::package::{ConfigError, InflateError};
use crate::project::ProjectError;
use crate::resolve::{FrozenError, ResolveError};
use crate::settings::SettingsError;
use crate::source::SourceError;
use crate::toolchain::ToolchainError;
use crate::traits::TraitError;
use crate::tree::TreeError;
use crate::version::VersionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
  /// Malformed package config, settings or command-line input.
  Config,
  /// Requirements that no single version can satisfy, or that never converge.
  Constraint,
  /// A package that no source knows about.
  Lookup,
  /// A compiler, archiver or linker exited with an error.
  Compile,
  /// The artifact store or the descriptor hash failed.
  Cache,
  Io,
}

impl ErrorKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Config => "configuration error",
      Self::Constraint => "constraint error",
      Self::Lookup => "lookup error",
      Self::Compile => "compile error",
      Self::Cache => "cache error",
      Self::Io => "i/o error",
    }
  }
}

impl fmt::Display for ErrorKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

#[derive(Debug, Error)]
pub enum Error {
  #[error(transparent)]
  Config(#[from] ConfigError),

  #[error(transparent)]
  Trait(#[from] TraitError),

  #[error(transparent)]
  Version(#[from] VersionError),

  #[error(transparent)]
  Settings(#[from] SettingsError),

  #[error(transparent)]
  Source(#[from] SourceError),

  #[error(transparent)]
  Resolve(#[from] ResolveError),

  #[error(transparent)]
  Frozen(#[from] FrozenError),

  #[error(transparent)]
  Tree(#[from] TreeError),

  #[error(transparent)]
  Hash(#[from] HashError),

  #[error(transparent)]
  Store(#[from] StoreError),

  #[error(transparent)]
  Lock(#[from] LockError),

  #[error(transparent)]
  Toolchain(#[from] ToolchainError),

  #[error(transparent)]
  Emit(#[from] EmitError),

  #[error(transparent)]
  Build(#[from] BuildError),

  #[error(transparent)]
  Init(#[from] InitError),

  #[error(transparent)]
  Project(#[from] ProjectError),

  #[error("I/O error at {path}: {source}")]
  Io {
    path: std::path::PathBuf,
    #[source]
    source: std::io::Error,
  },
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
  pub fn kind(&self) -> ErrorKind {
    match self {
      Self::Config(_) | Self::Trait(_) | Self::Version(_) | Self::Settings(_) | Self::Frozen(_) => ErrorKind::Config,
      Self::Toolchain(_) | Self::Emit(_) | Self::Init(_) | Self::Project(_) => ErrorKind::Config,
      Self::Source(e) => source_kind(e),
      Self::Resolve(e) => resolve_kind(e),
      Self::Tree(e) => tree_kind(e),
      Self::Hash(_) | Self::Store(_) | Self::Lock(_) => ErrorKind::Cache,
      Self::Build(e) => build_kind(e),
      Self::Io { .. } => ErrorKind::Io,
    }
  }
}

fn source_kind(error: &SourceError) -> ErrorKind {
  match error {
    SourceError::NotFound { .. } | SourceError::VersionMissing { .. } | SourceError::LocalMissing { .. } => {
      ErrorKind::Lookup
    }
    SourceError::Config(_) => ErrorKind::Config,
    SourceError::Git { .. } => ErrorKind::Io,
  }
}

fn resolve_kind(error: &ResolveError) -> ErrorKind {
  match error {
    ResolveError::Conflict { .. }
    | ResolveError::Unsatisfied { .. }
    | ResolveError::LocalConflict { .. }
    | ResolveError::RootCycle { .. }
    | ResolveError::NonConvergent { .. } => ErrorKind::Constraint,
    ResolveError::Source { source, .. } => source_kind(source),
    ResolveError::UnknownLocal { .. } => ErrorKind::Config,
    ResolveError::Inflate(InflateError::Missing { .. }) => ErrorKind::Constraint,
    ResolveError::Inflate(InflateError::AlreadyInflated { .. }) => ErrorKind::Config,
  }
}

fn tree_kind(error: &TreeError) -> ErrorKind {
  match error {
    TreeError::Cycle { .. } => ErrorKind::Constraint,
    TreeError::Config(_) | TreeError::NotInflated { .. } | TreeError::Missing { .. } => ErrorKind::Config,
  }
}

fn build_kind(error: &BuildError) -> ErrorKind {
  match error {
    BuildError::Compile { .. } | BuildError::Spawn { .. } => ErrorKind::Compile,
    BuildError::UnknownSource { .. } => ErrorKind::Config,
    BuildError::Store(_) => ErrorKind::Cache,
    BuildError::Tree(e) => tree_kind(e),
    BuildError::Io { .. } => ErrorKind::Io,
    BuildError::Package { source, .. } => build_kind(source),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::path::PathBuf;

  #[test]
  fn unsatisfiable_requirements_are_constraint_errors() {
    let err: Error = ResolveError::Unsatisfied {
      dependency: "e".to_string(),
      spec: "==2.0.0".to_string(),
      requesters: vec![("app".to_string(), "==1.0".to_string())],
    }
    .into();
    assert_eq!(err.kind(), ErrorKind::Constraint);
    assert!(err.to_string().contains("e"));
  }

  #[test]
  fn unknown_package_is_lookup_even_inside_resolution() {
    let err: Error = ResolveError::Source {
      dependency: "ghost".to_string(),
      source: SourceError::NotFound {
        name: "ghost".to_string(),
      },
    }
    .into();
    assert_eq!(err.kind(), ErrorKind::Lookup);
  }

  #[test]
  fn empty_variant_is_config_error() {
    let err: Error = TreeError::Config(ConfigError::NoSources {
      package: "log".to_string(),
      variant: "test".to_string(),
      dir: PathBuf::from("/pkgs/log/test"),
    })
    .into();
    assert_eq!(err.kind(), ErrorKind::Config);
  }

  #[test]
  fn compiler_failure_is_compile_error() {
    let err: Error = BuildError::Compile {
      package: "log".to_string(),
      command: "cc -c log.c".to_string(),
      stderr: "log.c:1: error".to_string(),
    }
    .into();
    assert_eq!(err.kind(), ErrorKind::Compile);
    assert_eq!(err.kind().to_string(), "compile error");
  }

  #[test]
  fn package_context_keeps_the_inner_kind() {
    let err: Error = BuildError::Package {
      package: "log".to_string(),
      version: "1.2.0".to_string(),
      source: Box::new(BuildError::Compile {
        package: "log".to_string(),
        command: "cc -c log.c".to_string(),
        stderr: String::new(),
      }),
    }
    .into();
    assert_eq!(err.kind(), ErrorKind::Compile);
    assert!(err.to_string().contains("log@1.2.0"));
  }

  #[test]
  fn unsupported_hash_value_is_cache_error() {
    let err: Error = HashError::UnsupportedType { kind: "number" }.into();
    assert_eq!(err.kind(), ErrorKind::Cache);
  }
}
