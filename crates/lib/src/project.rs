//! The pipeline behind every build command.
//!
//! A [`Project`] is a package working tree. Each command runs some prefix of
//! the same sequence:
//!
//! 1. derive the trait set and toolchain from the options and environment
//! 2. load the root package as a local package
//! 3. resolve (or read back from `versions.txt` when frozen) and record the
//!    result in `versions.txt`
//! 4. inflate and build the tree
//! 5. emit `build.ninja`, or compile natively through the artifact store

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};

use thiserror::Error;
use tracing::{debug, info};

use crate::build::{BuildOutput, NativeBuilder};
use crate::cache::{ArtifactStore, LockMode};
use crate::consts::{BUILD_DIR, CONFIG_FILE, NINJA_FILE, SRC_VARIANT, TEST_VARIANT, VERSIONS_FILE};
use crate::emit::emit;
use crate::error::Result;
use crate::package::{DEFAULT_COMPILER, PackageConfig, ResolvedPackage};
use crate::platform::Platform;
use crate::resolve::{FrozenVersions, Resolution, resolve, resolve_frozen};
use crate::settings::Settings;
use crate::source::{GitPackageSource, PackageSource};
use crate::toolchain::{MakefileProvider, Toolchain, ToolchainProvider, compiler_version, cross_prefix};
use crate::traits::{TraitKey, Traits};
use crate::tree::{BuildTree, build_tree};

#[derive(Debug, Error)]
pub enum ProjectError {
  #[error("{} is not a package (no {CONFIG_FILE})", path.display())]
  NotAPackage { path: PathBuf },

  #[error("platform '{platform}' needs a board support package; pass --bsp")]
  MissingBsp { platform: Platform },

  #[error("CFLAGS cannot be combined with a board support package; the BSP provides the flags")]
  CflagsWithBsp,

  #[error("--frozen needs {}, which does not exist; run without --frozen first", path.display())]
  MissingLedger { path: PathBuf },

  #[error("'{package}' is a library; only applications can be run")]
  NotAnApplication { package: String },

  #[error("failed to run {}: {source}", program.display())]
  Run {
    program: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("I/O error at {}: {source}", path.display())]
  Io {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
}

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> ProjectError + '_ {
  move |source| ProjectError::Io {
    path: path.to_path_buf(),
    source,
  }
}

/// Flags shared by the build commands.
#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
  /// Variant of the root package; `src` when unset.
  pub variant: Option<String>,
  /// Target platform; the host when unset.
  pub platform: Option<Platform>,
  pub bsp: Option<PathBuf>,
  /// Skip refreshing package repositories from their remotes.
  pub fast: bool,
  /// Use the versions pinned in `versions.txt` instead of resolving.
  pub frozen: bool,
}

/// Compiler settings taken from the environment (`CC`, `CFLAGS`).
#[derive(Debug, Clone, Default)]
pub struct CompilerEnv {
  pub cc: Option<String>,
  pub cflags: Option<String>,
}

impl CompilerEnv {
  pub fn from_env() -> Self {
    let var = |key: &str| std::env::var(key).ok().filter(|v| !v.trim().is_empty());
    CompilerEnv {
      cc: var("CC"),
      cflags: var("CFLAGS"),
    }
  }

  /// Flags given after the compiler in `CC`, followed by `CFLAGS`.
  fn extra_flags(&self) -> String {
    let from_cc = self.cc.iter().flat_map(|cc| cc.split_whitespace().skip(1));
    let from_cflags = self.cflags.iter().flat_map(|f| f.split_whitespace());
    from_cc.chain(from_cflags).collect::<Vec<_>>().join(" ")
  }
}

/// What a build targets: the trait set packages are evaluated against and
/// the tools that compile them.
#[derive(Debug, Clone)]
pub struct Target {
  pub traits: Traits,
  pub toolchain: Toolchain,
}

impl Target {
  pub fn new(options: &BuildOptions, env: &CompilerEnv, provider: &dyn ToolchainProvider) -> Result<Self> {
    let platform = options.platform.unwrap_or_else(Platform::host);
    let mut traits = Traits::new()
      .with(TraitKey::Platform, platform.as_str())
      .with(TraitKey::Variant, options.variant.as_deref().unwrap_or(SRC_VARIANT));

    let toolchain = match &options.bsp {
      Some(bsp) => {
        if env.cflags.is_some() {
          return Err(ProjectError::CflagsWithBsp.into());
        }
        let toolchain = provider.query(bsp)?;
        traits.set(TraitKey::Bsp, bsp.display().to_string());
        toolchain
      }
      None if platform.needs_bsp() => return Err(ProjectError::MissingBsp { platform }.into()),
      None => Toolchain::host(env.cc.as_deref()),
    };

    let cc = toolchain.cc();
    traits.set(TraitKey::Compiler, compiler_name(&cc));
    traits.set(TraitKey::Toolchain, &cc);
    if let Some(version) = compiler_version(&cc) {
      traits.set(TraitKey::CompilerVersion, version);
    }
    let extra = env.extra_flags();
    if !extra.is_empty() {
      traits.set(TraitKey::Cflags, extra);
    }

    debug!(traits = ?traits, compiler = %cc, "target selected");
    Ok(Target { traits, toolchain })
  }
}

/// Compiler family of a compiler command: its file name without the cross
/// prefix, e.g. `gcc` for `/opt/bin/arm-rtems4.11-gcc`.
fn compiler_name(compiler: &str) -> String {
  let file_name = Path::new(compiler)
    .file_name()
    .and_then(|n| n.to_str())
    .unwrap_or(compiler);
  let name = file_name.strip_prefix(cross_prefix(compiler).as_str()).unwrap_or(file_name);
  if name.is_empty() { DEFAULT_COMPILER.to_string() } else { name.to_string() }
}

/// A resolved and inflated project, ready to emit or build.
#[derive(Debug)]
pub struct Plan {
  pub target: Target,
  pub resolution: Resolution,
  pub tree: BuildTree,
}

pub struct Project {
  dir: PathBuf,
  settings: Settings,
  env: CompilerEnv,
}

impl Project {
  /// Open the package in `dir` with the settings cascade and environment.
  pub fn open(dir: &Path) -> Result<Self> {
    let dir = Self::package_dir(dir)?;
    let settings = Settings::load(Some(&dir))?;
    Ok(Project {
      dir,
      settings,
      env: CompilerEnv::from_env(),
    })
  }

  pub fn with_parts(dir: &Path, settings: Settings, env: CompilerEnv) -> Result<Self> {
    Ok(Project {
      dir: Self::package_dir(dir)?,
      settings,
      env,
    })
  }

  fn package_dir(dir: &Path) -> Result<PathBuf> {
    if !dir.join(CONFIG_FILE).is_file() {
      return Err(ProjectError::NotAPackage { path: dir.to_path_buf() }.into());
    }
    Ok(dunce::canonicalize(dir).map_err(io_err(dir))?)
  }

  pub fn dir(&self) -> &Path {
    &self.dir
  }

  pub fn settings(&self) -> &Settings {
    &self.settings
  }

  /// `name version` of the root package, or the directory name when its
  /// config does not load.
  pub fn label(&self) -> String {
    match PackageConfig::load(&self.dir) {
      Ok(config) => format!("{} {}", config.name, config.version),
      Err(err) => {
        debug!(error = %err, "package config unreadable, labelling by directory");
        self.dir.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default()
      }
    }
  }

  pub fn ledger_path(&self) -> PathBuf {
    self.dir.join(VERSIONS_FILE)
  }

  pub fn ninja_path(&self) -> PathBuf {
    self.dir.join(NINJA_FILE)
  }

  /// Where native builds of the root package go.
  pub fn out_dir(&self) -> PathBuf {
    self.dir.join(BUILD_DIR).join("out")
  }

  pub fn store(&self) -> ArtifactStore {
    ArtifactStore::new(self.settings.store_dir()).with_parent(self.settings.parent_store_dir())
  }

  /// The git-backed source configured by the settings.
  pub fn source(&self) -> GitPackageSource {
    GitPackageSource::new(self.settings.git_root(), self.settings.remote.clone())
  }

  pub fn target(&self, options: &BuildOptions) -> Result<Target> {
    Target::new(options, &self.env, &MakefileProvider::default())
  }

  /// Resolve the dependencies of the root package under `traits`, record the
  /// chosen versions and inflate the result.
  pub fn resolve_with<S>(&self, options: &BuildOptions, traits: &Traits, source: &mut S) -> Result<Resolution>
  where
    S: PackageSource + ?Sized,
  {
    let root = ResolvedPackage::load(&self.dir, traits)?.into_local();
    // Only the root is built in the requested variant
    let dep_traits = traits.without(TraitKey::Variant);
    let ledger_path = self.ledger_path();

    let mut resolution = if options.frozen {
      let ledger = FrozenVersions::load(&ledger_path)?.ok_or_else(|| ProjectError::MissingLedger {
        path: ledger_path.clone(),
      })?;
      info!(path = %ledger_path.display(), pinned = ledger.versions.len(), "using frozen versions");
      resolve_frozen(root, &ledger, source, &dep_traits)?
    } else {
      resolve(root, source, &dep_traits, !options.fast)?
    };

    resolution.ledger().save(&ledger_path)?;
    resolution.inflate()?;
    for pkg in resolution.packages() {
      info!(name = %pkg.name(), version = %pkg.version_label(), "resolved package");
    }
    Ok(resolution)
  }

  pub fn plan_with<S>(&self, options: &BuildOptions, source: &mut S) -> Result<Plan>
  where
    S: PackageSource + ?Sized,
  {
    let target = self.target(options)?;
    let resolution = self.resolve_with(options, &target.traits, source)?;
    let tree = build_tree(&resolution)?;
    Ok(Plan {
      target,
      resolution,
      tree,
    })
  }

  /// Write `build.ninja` for the project. Returns its path.
  pub fn generate_with<S>(&self, options: &BuildOptions, source: &mut S) -> Result<PathBuf>
  where
    S: PackageSource + ?Sized,
  {
    let plan = self.plan_with(options, source)?;
    let ninja = emit(&plan.tree, &plan.target.toolchain, &self.dir)?;
    let path = self.ninja_path();
    fs::write(&path, ninja).map_err(io_err(&path))?;
    info!(path = %path.display(), nodes = plan.tree.len(), "wrote build file");
    Ok(path)
  }

  /// Compile the project, taking dependencies from the artifact store.
  pub fn build_with<S>(&self, options: &BuildOptions, source: &mut S) -> Result<BuildOutput>
  where
    S: PackageSource + ?Sized,
  {
    let plan = self.plan_with(options, source)?;
    let store = self.store();
    let _lock = store.lock(LockMode::Shared, "build")?;
    let output = NativeBuilder::new(&store, &plan.target.toolchain).build(&plan.tree, &self.out_dir())?;
    Ok(output)
  }

  /// Build the project and run the resulting application with `args`.
  pub fn run_with<S>(&self, options: &BuildOptions, source: &mut S, args: &[String]) -> Result<ExitStatus>
  where
    S: PackageSource + ?Sized,
  {
    let output = self.build_with(options, source)?;
    let Some(binary) = output.binary else {
      let package = self.dir.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
      return Err(ProjectError::NotAnApplication { package }.into());
    };

    info!(binary = %binary.display(), "running");
    let status = Command::new(&binary)
      .args(args)
      .current_dir(&self.dir)
      .status()
      .map_err(|source| ProjectError::Run {
        program: binary.clone(),
        source,
      })?;
    Ok(status)
  }

  /// Build the `test` variant, which is always an application, and run it.
  pub fn test_with<S>(&self, options: &BuildOptions, source: &mut S, args: &[String]) -> Result<ExitStatus>
  where
    S: PackageSource + ?Sized,
  {
    let options = BuildOptions {
      variant: Some(TEST_VARIANT.to_string()),
      ..options.clone()
    };
    self.run_with(&options, source, args)
  }

  pub fn generate(&self, options: &BuildOptions) -> Result<PathBuf> {
    self.generate_with(options, &mut self.source())
  }

  pub fn build(&self, options: &BuildOptions) -> Result<BuildOutput> {
    self.build_with(options, &mut self.source())
  }

  pub fn run(&self, options: &BuildOptions, args: &[String]) -> Result<ExitStatus> {
    self.run_with(options, &mut self.source(), args)
  }

  pub fn test(&self, options: &BuildOptions, args: &[String]) -> Result<ExitStatus> {
    self.test_with(options, &mut self.source(), args)
  }

  /// Resolve and check out every dependency without building.
  pub fn fetch(&self, options: &BuildOptions) -> Result<Resolution> {
    let target = self.target(options)?;
    self.resolve_with(options, &target.traits, &mut self.source())
  }

  /// Remove build outputs. Returns the paths that existed.
  pub fn clean(&self) -> Result<Vec<PathBuf>> {
    let mut removed = Vec::new();
    for name in [BUILD_DIR, NINJA_FILE, ".ninja_log", ".ninja_deps"] {
      let path = self.dir.join(name);
      let result = if path.is_dir() {
        fs::remove_dir_all(&path)
      } else {
        fs::remove_file(&path)
      };
      match result {
        Ok(()) => removed.push(path),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(io_err(&path)(e).into()),
      }
    }
    debug!(removed = removed.len(), "cleaned project");
    Ok(removed)
  }
}

/// Empty the artifact store named by `settings`. Returns the entries removed.
pub fn flush(settings: &Settings) -> Result<usize> {
  let store = ArtifactStore::new(settings.store_dir());
  Ok(store.flush()?)
}
