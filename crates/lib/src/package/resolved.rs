//! A package bound to a trait set.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use semver::Version;
use thiserror::Error;
use tracing::warn;
use walkdir::WalkDir;

use super::config::{ConfigError, PackageConfig, PackageType, Requirement, VariantClause};
use super::variants::{VariantResolution, resolve_variants};
use crate::consts::LOCAL_VERSION;
use crate::traits::{TraitKey, Traits};

/// Extensions compiled as sources.
pub const SOURCE_EXTENSIONS: &[&str] = &["c", "cc", "cpp", "c++", "cxx", "s", "S"];

/// Extensions treated as public headers.
pub const HEADER_EXTENSIONS: &[&str] = &["h", "hpp", "hh"];

/// Directory holding a package's public headers.
pub const INCLUDE_DIR: &str = "include";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum InflateError {
  #[error("package '{package}' was already inflated")]
  AlreadyInflated { package: String },

  #[error("could not inflate '{package}': required package '{dependency}' was not resolved")]
  Missing { package: String, dependency: String },
}

/// A package configuration evaluated against a concrete trait set.
///
/// Variant resolution happens once at construction; every accessor reads
/// from that result.
#[derive(Debug, Clone)]
pub struct ResolvedPackage {
  config: PackageConfig,
  path: PathBuf,
  traits: Traits,
  version: Version,
  local: bool,
  resolution: VariantResolution,
  dependencies: BTreeMap<String, Requirement>,
  inflated: Option<BTreeMap<String, Version>>,
}

impl ResolvedPackage {
  pub fn new(config: PackageConfig, path: PathBuf, traits: Traits) -> Self {
    let resolution = resolve_variants(&config, &traits);
    let dependencies = resolution.dependencies();
    ResolvedPackage {
      version: config.version.clone(),
      config,
      path,
      traits,
      local: false,
      resolution,
      dependencies,
      inflated: None,
    }
  }

  /// Load the package in `path` and bind it to `traits`.
  pub fn load(path: &Path, traits: &Traits) -> Result<Self, ConfigError> {
    let config = PackageConfig::load(path)?;
    Ok(Self::new(config, path.to_path_buf(), traits.clone()))
  }

  /// Mark this package as a local working tree, which is never cached.
  pub fn into_local(mut self) -> Self {
    self.local = true;
    self
  }

  /// Override the version, e.g. with the tag the package was checked out from.
  pub fn with_version(mut self, version: Version) -> Self {
    self.version = version;
    self
  }

  pub fn name(&self) -> &str {
    &self.config.name
  }

  pub fn version(&self) -> &Version {
    &self.version
  }

  /// Version as recorded in ledgers and descriptors.
  pub fn version_label(&self) -> String {
    if self.local {
      LOCAL_VERSION.to_string()
    } else {
      self.version.to_string()
    }
  }

  pub fn is_local(&self) -> bool {
    self.local
  }

  pub fn package_type(&self) -> PackageType {
    self.config.package_type
  }

  pub fn config(&self) -> &PackageConfig {
    &self.config
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  pub fn traits(&self) -> &Traits {
    &self.traits
  }

  /// The active top-level variant name from the trait set, `src` by default.
  pub fn active_variant(&self) -> &str {
    self.traits.get(TraitKey::Variant).unwrap_or(crate::consts::SRC_VARIANT)
  }

  pub fn enabled_variants(&self) -> &[VariantClause] {
    &self.resolution.enabled
  }

  /// Directory of every enabled variant, keyed by variant name.
  pub fn variant_dirs(&self) -> BTreeMap<String, PathBuf> {
    self
      .resolution
      .names()
      .map(|name| (name.to_string(), self.path.join(name)))
      .collect()
  }

  /// Aggregated dependencies of every enabled variant.
  pub fn dependencies(&self) -> &BTreeMap<String, Requirement> {
    &self.dependencies
  }

  /// Effective cflags: package, variant and trait-level flags in that order.
  pub fn cflags(&self) -> String {
    let mut cflags = self.resolution.cflags.clone();
    if let Some(extra) = self.traits.get(TraitKey::Cflags).filter(|f| !f.is_empty()) {
      if !cflags.is_empty() {
        cflags.push(' ');
      }
      cflags.push_str(extra);
    }
    cflags
  }

  /// Source files of each enabled variant.
  pub fn sources_by_variant(&self) -> BTreeMap<String, BTreeSet<PathBuf>> {
    self
      .variant_dirs()
      .into_iter()
      .map(|(name, dir)| {
        let files = files_with_extensions(&dir, SOURCE_EXTENSIONS);
        (name, files)
      })
      .collect()
  }

  pub fn source_files(&self) -> BTreeSet<PathBuf> {
    self.sources_by_variant().into_values().flatten().collect()
  }

  pub fn header_files(&self) -> BTreeSet<PathBuf> {
    files_with_extensions(&self.path.join(INCLUDE_DIR), HEADER_EXTENSIONS)
  }

  pub fn include_paths(&self) -> BTreeSet<PathBuf> {
    BTreeSet::from([self.path.join(INCLUDE_DIR)])
  }

  /// Bind every dependency name to the version chosen for it.
  ///
  /// This can only happen once per package.
  pub fn inflate(&mut self, resolved: &BTreeMap<String, Version>) -> Result<(), InflateError> {
    if self.inflated.is_some() {
      return Err(InflateError::AlreadyInflated {
        package: self.name().to_string(),
      });
    }

    let mut bound = BTreeMap::new();
    for name in self.dependencies.keys() {
      let version = resolved.get(name).ok_or_else(|| InflateError::Missing {
        package: self.name().to_string(),
        dependency: name.clone(),
      })?;
      bound.insert(name.clone(), version.clone());
    }
    self.inflated = Some(bound);
    Ok(())
  }

  /// Dependency versions bound by [`inflate`](Self::inflate), if it has run.
  pub fn inflated(&self) -> Option<&BTreeMap<String, Version>> {
    self.inflated.as_ref()
  }
}

/// Identity of a resolved package is its name and version.
impl PartialEq for ResolvedPackage {
  fn eq(&self, other: &Self) -> bool {
    self.name() == other.name() && self.version == other.version && self.local == other.local
  }
}

impl Eq for ResolvedPackage {}

fn files_with_extensions(dir: &Path, extensions: &[&str]) -> BTreeSet<PathBuf> {
  if !dir.is_dir() {
    return BTreeSet::new();
  }
  WalkDir::new(dir)
    .sort_by_file_name()
    .into_iter()
    .filter_map(|entry| match entry {
      Ok(entry) => Some(entry),
      Err(err) => {
        warn!(dir = %dir.display(), error = %err, "skipping unreadable entry while collecting files");
        None
      }
    })
    .filter(|entry| entry.file_type().is_file())
    .filter(|entry| {
      entry
        .path()
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| extensions.contains(&ext))
    })
    .map(|entry| entry.into_path())
    .collect()
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::fs;
  use tempfile::TempDir;
  use tracing_test::traced_test;

  fn write_package(dir: &Path, config: &str, files: &[&str]) {
    fs::write(dir.join("config.yaml"), config).unwrap();
    for file in files {
      let path = dir.join(file);
      fs::create_dir_all(path.parent().unwrap()).unwrap();
      fs::write(path, "").unwrap();
    }
  }

  const CONFIG: &str = "name: gizmo\nversion: 0.4.0\ntype: library\ncflags: -O2\nrequires:\n  log: '>=1.0'\nvariants:\n  - test:\n      when: {variant: test}\n";

  #[test]
  fn collects_sources_of_enabled_variants() {
    let temp = TempDir::new().unwrap();
    write_package(
      temp.path(),
      CONFIG,
      &["src/a.c", "src/nested/b.cpp", "src/readme.txt", "test/t.cc", "include/gizmo/g.h"],
    );

    let pkg = ResolvedPackage::load(temp.path(), &Traits::new()).unwrap();
    let sources: Vec<_> = pkg.source_files().into_iter().collect();
    assert_eq!(
      sources,
      vec![temp.path().join("src/a.c"), temp.path().join("src/nested/b.cpp")]
    );

    let with_test = ResolvedPackage::load(temp.path(), &Traits::new().with(TraitKey::Variant, "test")).unwrap();
    assert_eq!(with_test.source_files().len(), 3);
    assert_eq!(with_test.active_variant(), "test");
    assert_eq!(pkg.active_variant(), "src");
  }

  #[test]
  fn headers_and_include_paths() {
    let temp = TempDir::new().unwrap();
    write_package(temp.path(), CONFIG, &["src/a.c", "include/gizmo/g.h", "include/gizmo/g.hpp"]);
    let pkg = ResolvedPackage::load(temp.path(), &Traits::new()).unwrap();
    assert_eq!(pkg.header_files().len(), 2);
    assert_eq!(pkg.include_paths(), BTreeSet::from([temp.path().join("include")]));
  }

  #[test]
  fn missing_variant_dir_has_no_sources() {
    let temp = TempDir::new().unwrap();
    write_package(temp.path(), CONFIG, &[]);
    let pkg = ResolvedPackage::load(temp.path(), &Traits::new()).unwrap();
    assert!(pkg.sources_by_variant()["src"].is_empty());
  }

  #[test]
  fn trait_cflags_follow_package_cflags() {
    let temp = TempDir::new().unwrap();
    write_package(temp.path(), CONFIG, &[]);
    let pkg = ResolvedPackage::load(temp.path(), &Traits::new().with(TraitKey::Cflags, "-g")).unwrap();
    assert_eq!(pkg.cflags(), "-O2 -g");
  }

  mod inflation {
    use super::*;

    fn package() -> ResolvedPackage {
      let config = PackageConfig::parse(CONFIG, Path::new("/pkgs/gizmo")).unwrap();
      ResolvedPackage::new(config, PathBuf::from("/pkgs/gizmo"), Traits::new())
    }

    #[test]
    fn binds_resolved_versions() {
      let mut pkg = package();
      let resolved = BTreeMap::from([("log".to_string(), Version::new(1, 3, 0))]);
      pkg.inflate(&resolved).unwrap();
      assert_eq!(pkg.inflated().unwrap()["log"], Version::new(1, 3, 0));
    }

    #[test]
    fn missing_dependency_fails_loudly() {
      let mut pkg = package();
      let err = pkg.inflate(&BTreeMap::new()).unwrap_err();
      assert_eq!(
        err,
        InflateError::Missing {
          package: "gizmo".to_string(),
          dependency: "log".to_string()
        }
      );
      assert!(pkg.inflated().is_none());
    }

    #[test]
    fn inflation_is_one_shot() {
      let mut pkg = package();
      let resolved = BTreeMap::from([("log".to_string(), Version::new(1, 0, 0))]);
      pkg.inflate(&resolved).unwrap();
      assert!(matches!(pkg.inflate(&resolved), Err(InflateError::AlreadyInflated { .. })));
    }
  }

  #[test]
  fn local_packages_report_local_version() {
    let config = PackageConfig::parse(CONFIG, Path::new("/w")).unwrap();
    let pkg = ResolvedPackage::new(config, PathBuf::from("/w"), Traits::new()).into_local();
    assert_eq!(pkg.version_label(), "local");
  }

  #[cfg(unix)]
  #[test]
  #[traced_test]
  fn unreadable_source_dir_is_reported() {
    use std::os::unix::fs::PermissionsExt;

    let temp = TempDir::new().unwrap();
    let src = temp.path().join("src");
    let locked = src.join("locked");
    fs::create_dir_all(&locked).unwrap();
    fs::write(src.join("a.c"), "").unwrap();
    fs::write(locked.join("b.c"), "").unwrap();
    fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();

    // Privileged users read through the mode bits.
    let readable = fs::read_dir(&locked).is_ok();
    let files = files_with_extensions(&src, SOURCE_EXTENSIONS);
    fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();

    assert!(files.contains(&src.join("a.c")));
    if !readable {
      assert!(!files.contains(&locked.join("b.c")));
      assert!(logs_contain("skipping unreadable entry"));
    }
  }
}
