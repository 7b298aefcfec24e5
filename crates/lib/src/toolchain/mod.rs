//! Compilers and the flags a target needs.
//!
//! Host builds use the compiler named by `CC` (or `gcc`). Embedded targets
//! describe their toolchain in a board support package; a
//! [`ToolchainProvider`] turns a BSP path into a [`Toolchain`].

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;

use thiserror::Error;
use tracing::debug;

use crate::package::DEFAULT_COMPILER;

#[derive(Debug, Error)]
pub enum ToolchainError {
  #[error("board support package not found at {path}")]
  MissingBsp { path: PathBuf },

  #[error("failed to run make for target '{target}': {source}")]
  Spawn {
    target: String,
    #[source]
    source: io::Error,
  },

  #[error("make target '{target}' failed for BSP {bsp}: {stderr}")]
  MakeFailed {
    target: String,
    bsp: PathBuf,
    stderr: String,
  },

  #[error("failed to prepare toolchain query: {0}")]
  Io(#[source] io::Error),
}

/// Commands and flags used to compile and link for one target.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Toolchain {
  /// Cross prefix such as `arm-rtems4.11-`, empty for the host.
  pub prefix: String,
  pub cflags: String,
  pub cpu_cflags: String,
  pub link_libs: String,
  pub link_flags: String,
  /// C compiler command.
  pub compiler_path: String,
}

impl Toolchain {
  /// The host toolchain selected by the value of `CC`.
  ///
  /// Only the first word of `CC` names the compiler; the rest are flags and
  /// are handled with the trait set.
  pub fn host(cc: Option<&str>) -> Self {
    let compiler = compiler_command(cc);
    Toolchain {
      prefix: cross_prefix(&compiler),
      compiler_path: compiler,
      ..Default::default()
    }
  }

  pub fn cc(&self) -> String {
    if self.compiler_path.is_empty() {
      format!("{}{}", self.prefix, DEFAULT_COMPILER)
    } else {
      self.compiler_path.clone()
    }
  }

  /// The C++ compiler matching [`cc`](Self::cc).
  pub fn cxx(&self) -> String {
    let cc = self.cc();
    for (c, cpp) in [("gcc", "g++"), ("clang", "clang++"), ("cc", "c++")] {
      if let Some(stem) = cc.strip_suffix(c) {
        return format!("{stem}{cpp}");
      }
    }
    format!("{}g++", self.prefix)
  }

  pub fn ar(&self) -> String {
    format!("{}ar", self.prefix)
  }

  pub fn ld(&self) -> String {
    format!("{}ld", self.prefix)
  }

  /// Flags every compile step receives ahead of the package's own.
  pub fn compile_flags(&self) -> Vec<String> {
    self
      .cflags
      .split_whitespace()
      .chain(self.cpu_cflags.split_whitespace())
      .map(str::to_string)
      .collect()
  }
}

/// First word of `CC`, or the default compiler.
pub fn compiler_command(cc: Option<&str>) -> String {
  cc.and_then(|cc| cc.split_whitespace().next())
    .unwrap_or(DEFAULT_COMPILER)
    .to_string()
}

/// Everything before `gcc` in the compiler's file name.
pub fn cross_prefix(compiler: &str) -> String {
  let file_name = Path::new(compiler)
    .file_name()
    .and_then(|n| n.to_str())
    .unwrap_or(compiler);
  file_name
    .strip_suffix("gcc")
    .map(str::to_string)
    .unwrap_or_default()
}

/// Version reported by `compiler -dumpversion`, if it runs.
pub fn compiler_version(compiler: &str) -> Option<String> {
  let output = Command::new(compiler).arg("-dumpversion").output().ok()?;
  if !output.status.success() {
    debug!(compiler, status = %output.status, "compiler did not report a version");
    return None;
  }
  let version = String::from_utf8_lossy(&output.stdout).trim().to_string();
  (!version.is_empty()).then_some(version)
}

/// Source of toolchains for board support packages.
pub trait ToolchainProvider {
  fn query(&self, bsp: &Path) -> Result<Toolchain, ToolchainError>;
}

const BSP_MAKEFILE: &str = "\
include $(RTEMS_MAKEFILE_PATH)/Makefile.inc
ifdef RTEMS_CUSTOM
include $(RTEMS_CUSTOM)
endif
ifdef PROJECT_ROOT
-include $(PROJECT_ROOT)/make/leaf.cfg
endif

print-cflags:
\t@echo $(CFLAGS)

print-cpu-cflags:
\t@echo $(CPU_CFLAGS)

print-link:
\t@echo $(LINK.c)

print-link-libs:
\t@echo $(LINK_LIBS)

print-compiler:
\t@echo $(CC)
";

/// Queries an RTEMS-style BSP through its makefile fragments.
#[derive(Debug, Clone)]
pub struct MakefileProvider {
  make: String,
}

impl Default for MakefileProvider {
  fn default() -> Self {
    MakefileProvider { make: "make".to_string() }
  }
}

impl MakefileProvider {
  pub fn new(make: impl Into<String>) -> Self {
    MakefileProvider { make: make.into() }
  }

  fn target(&self, dir: &Path, bsp: &Path, target: &str) -> Result<String, ToolchainError> {
    let output = Command::new(&self.make)
      .args(["-s", "-f", "Makefile", target])
      .current_dir(dir)
      .env("RTEMS_MAKEFILE_PATH", bsp)
      .env_remove("CFLAGS")
      .output()
      .map_err(|source| ToolchainError::Spawn {
        target: target.to_string(),
        source,
      })?;

    if !output.status.success() {
      return Err(ToolchainError::MakeFailed {
        target: target.to_string(),
        bsp: bsp.to_path_buf(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
      });
    }
    let value = String::from_utf8_lossy(&output.stdout).trim().to_string();
    debug!(target, value = %value, "queried BSP");
    Ok(value)
  }
}

impl ToolchainProvider for MakefileProvider {
  fn query(&self, bsp: &Path) -> Result<Toolchain, ToolchainError> {
    if !bsp.is_dir() {
      return Err(ToolchainError::MissingBsp { path: bsp.to_path_buf() });
    }
    let bsp = dunce::canonicalize(bsp).map_err(ToolchainError::Io)?;

    let dir = tempfile::tempdir().map_err(ToolchainError::Io)?;
    fs::write(dir.path().join("Makefile"), BSP_MAKEFILE).map_err(ToolchainError::Io)?;

    let compiler_path = self.target(dir.path(), &bsp, "print-compiler")?;
    // LINK.c starts with the compiler itself
    let link = self.target(dir.path(), &bsp, "print-link")?;
    let link_flags = link.split_whitespace().skip(1).collect::<Vec<_>>().join(" ");

    Ok(Toolchain {
      prefix: cross_prefix(&compiler_path),
      cflags: self.target(dir.path(), &bsp, "print-cflags")?,
      cpu_cflags: self.target(dir.path(), &bsp, "print-cpu-cflags")?,
      link_libs: self.target(dir.path(), &bsp, "print-link-libs")?,
      link_flags,
      compiler_path,
    })
  }
}
