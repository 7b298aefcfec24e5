//! Package configuration (`config.yaml`).
//!
//! The file is deserialized into a loose raw form first and then validated
//! into [`PackageConfig`], which is what the rest of the crate works with.
//! Validation is where the implicit `src` variant is synthesized and where
//! every `when` clause is checked against the closed set of trait keys.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use semver::Version;
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use thiserror::Error;
use tracing::debug;

use crate::consts::{CONFIG_FILE, LOCAL_VERSION, SRC_VARIANT};
use crate::traits::{TraitClause, TraitError};
use crate::version::{VersionError, VersionSpec, parse_version};

/// Errors raised for malformed package configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("failed to read package config '{path}': {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to parse package config '{path}': {source}")]
  Parse {
    path: PathBuf,
    #[source]
    source: serde_yaml::Error,
  },

  #[error("package config '{path}' is missing required field '{field}'")]
  MissingField { path: PathBuf, field: &'static str },

  #[error(
    "variants of package '{package}' should be specified as a list.\n\
     Hint: Try putting a - character before each variant"
  )]
  VariantsNotList { package: String },

  #[error("invalid variant in package '{package}': {message}")]
  InvalidVariant { package: String, message: String },

  #[error("invalid when clause for variant '{variant}' of package '{package}': {source}")]
  InvalidTrait {
    package: String,
    variant: String,
    #[source]
    source: TraitError,
  },

  #[error("invalid version for package '{package}': {source}")]
  InvalidVersion {
    package: String,
    #[source]
    source: VersionError,
  },

  #[error("package '{package}' has an invalid requirement on '{dependency}': {source}")]
  InvalidRequirement {
    package: String,
    dependency: String,
    #[source]
    source: VersionError,
  },

  #[error("package '{package}' requires '{dependency}' as local but gives no path")]
  MissingLocalPath { package: String, dependency: String },

  #[error("variant '{variant}' of package '{package}' has no source files in {}", .dir.display())]
  NoSources {
    package: String,
    variant: String,
    dir: PathBuf,
  },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageType {
  Library,
  Application,
}

impl PackageType {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Library => "library",
      Self::Application => "application",
    }
  }
}

impl std::fmt::Display for PackageType {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Compiler flags, either shared by every compiler or keyed by compiler name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Cflags {
  Plain(String),
  PerCompiler(BTreeMap<String, String>),
}

impl Cflags {
  pub fn for_compiler(&self, compiler: &str) -> Option<&str> {
    match self {
      Self::Plain(flags) => Some(flags),
      Self::PerCompiler(map) => map.get(compiler).map(String::as_str),
    }
  }
}

/// How a dependency's version is chosen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Requirement {
  /// Any published version inside the range.
  Range(VersionSpec),
  /// The working tree at a path, never published or cached.
  Local(PathBuf),
}

impl std::fmt::Display for Requirement {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Self::Range(spec) => write!(f, "{spec}"),
      Self::Local(path) => write!(f, "local ({})", path.display()),
    }
  }
}

/// One entry of the ordered `variants` list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariantClause {
  pub name: String,
  /// Guard of the clause. A declared variant without one is never enabled.
  pub when: Option<TraitClause>,
  pub requires: BTreeMap<String, Requirement>,
  pub cflags: Option<Cflags>,
  pub replaces: Option<String>,
}

/// A validated package configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageConfig {
  pub name: String,
  pub version: Version,
  pub package_type: PackageType,
  pub cflags: Option<Cflags>,
  /// Declared variants with `src` first.
  pub variants: Vec<VariantClause>,
  pub author: Option<String>,
  pub author_email: Option<String>,
  pub url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct RawConfig {
  name: Option<String>,
  version: Option<Value>,
  #[serde(rename = "type")]
  package_type: Option<PackageType>,
  cflags: Option<Cflags>,
  requires: Option<BTreeMap<String, RawRequirement>>,
  variants: Option<Value>,
  author: Option<String>,
  author_email: Option<String>,
  url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawRequirement {
  Full {
    version: Value,
    #[serde(default)]
    path: Option<PathBuf>,
  },
  Short(Value),
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawVariantBody {
  #[serde(default)]
  when: Option<BTreeMap<String, Value>>,
  #[serde(default)]
  requires: Option<BTreeMap<String, RawRequirement>>,
  #[serde(default)]
  cflags: Option<Cflags>,
  #[serde(default)]
  replaces: Option<String>,
}

impl PackageConfig {
  /// Load `config.yaml` from a package directory.
  pub fn load(dir: &Path) -> Result<Self, ConfigError> {
    let path = dir.join(CONFIG_FILE);
    let text = fs::read_to_string(&path).map_err(|source| ConfigError::Read {
      path: path.clone(),
      source,
    })?;
    Self::parse(&text, dir)
  }

  /// Parse configuration text for a package rooted at `dir`.
  ///
  /// `dir` anchors relative local requirement paths.
  pub fn parse(text: &str, dir: &Path) -> Result<Self, ConfigError> {
    let path = dir.join(CONFIG_FILE);
    let raw: RawConfig = serde_yaml::from_str(text).map_err(|source| ConfigError::Parse {
      path: path.clone(),
      source,
    })?;

    let name = raw
      .name
      .filter(|n| !n.trim().is_empty())
      .ok_or(ConfigError::MissingField {
        path: path.clone(),
        field: "name",
      })?;
    let version_text = raw.version.as_ref().and_then(scalar_to_string).ok_or(ConfigError::MissingField {
      path: path.clone(),
      field: "version",
    })?;
    let version = if version_text == LOCAL_VERSION {
      Version::new(0, 0, 0)
    } else {
      parse_version(&version_text).map_err(|source| ConfigError::InvalidVersion {
        package: name.clone(),
        source,
      })?
    };
    let package_type = raw.package_type.ok_or(ConfigError::MissingField {
      path: path.clone(),
      field: "type",
    })?;

    let top_requires = parse_requires(&name, raw.requires.unwrap_or_default(), dir)?;
    let mut variants = vec![VariantClause {
      name: SRC_VARIANT.to_string(),
      when: Some(TraitClause::default()),
      requires: top_requires,
      cflags: None,
      replaces: None,
    }];
    variants.extend(parse_variants(&name, raw.variants, dir)?);

    debug!(name, version = %version, variants = variants.len(), "loaded package config");

    Ok(PackageConfig {
      name,
      version,
      package_type,
      cflags: raw.cflags,
      variants,
      author: raw.author,
      author_email: raw.author_email,
      url: raw.url,
    })
  }
}

fn parse_variants(package: &str, value: Option<Value>, dir: &Path) -> Result<Vec<VariantClause>, ConfigError> {
  let items = match value {
    None | Some(Value::Null) => return Ok(Vec::new()),
    Some(Value::Sequence(items)) => items,
    Some(_) => {
      return Err(ConfigError::VariantsNotList {
        package: package.to_string(),
      });
    }
  };

  let invalid = |message: String| ConfigError::InvalidVariant {
    package: package.to_string(),
    message,
  };

  let mut clauses: Vec<VariantClause> = Vec::with_capacity(items.len());
  for item in items {
    let Value::Mapping(map) = item else {
      return Err(invalid("each variant must be a mapping of name to details".to_string()));
    };
    if map.len() != 1 {
      return Err(invalid(format!("expected exactly one variant name per entry, found {}", map.len())));
    }
    let Some((key, body)) = map.into_iter().next() else {
      return Err(invalid("empty variant entry".to_string()));
    };
    let name = scalar_to_string(&key).ok_or_else(|| invalid("variant names must be strings".to_string()))?;
    if name == SRC_VARIANT || clauses.iter().any(|c| c.name == name) {
      return Err(invalid(format!("variant '{name}' is declared more than once")));
    }

    let body: RawVariantBody = match body {
      Value::Null => RawVariantBody::default(),
      other => serde_yaml::from_value(other).map_err(|e| invalid(format!("variant '{name}': {e}")))?,
    };

    let when = match body.when {
      Some(conditions) => {
        let pairs = conditions
          .into_iter()
          .map(|(k, v)| {
            scalar_to_string(&v)
              .map(|v| (k.clone(), v))
              .ok_or_else(|| invalid(format!("when condition '{k}' of variant '{name}' must be a scalar")))
          })
          .collect::<Result<Vec<_>, _>>()?;
        let clause = TraitClause::from_pairs(pairs).map_err(|source| ConfigError::InvalidTrait {
          package: package.to_string(),
          variant: name.clone(),
          source,
        })?;
        Some(clause)
      }
      None => {
        debug!(package, variant = %name, "variant has no when clause and stays disabled");
        None
      }
    };

    clauses.push(VariantClause {
      requires: parse_requires(package, body.requires.unwrap_or_default(), dir)?,
      name,
      when,
      cflags: body.cflags,
      replaces: body.replaces,
    });
  }
  Ok(clauses)
}

fn parse_requires(
  package: &str,
  raw: BTreeMap<String, RawRequirement>,
  dir: &Path,
) -> Result<BTreeMap<String, Requirement>, ConfigError> {
  let mut requires = BTreeMap::new();
  for (dependency, raw) in raw {
    let (version, path) = match raw {
      RawRequirement::Short(version) => (version, None),
      RawRequirement::Full { version, path } => (version, path),
    };
    let version = scalar_to_string(&version).ok_or_else(|| ConfigError::InvalidRequirement {
      package: package.to_string(),
      dependency: dependency.clone(),
      source: VersionError::InvalidSpec {
        input: format!("{version:?}"),
        message: "version must be a string or number".to_string(),
      },
    })?;

    let requirement = if version == LOCAL_VERSION {
      let path = path.ok_or_else(|| ConfigError::MissingLocalPath {
        package: package.to_string(),
        dependency: dependency.clone(),
      })?;
      Requirement::Local(dir.join(path))
    } else {
      let spec = VersionSpec::parse(&version).map_err(|source| ConfigError::InvalidRequirement {
        package: package.to_string(),
        dependency: dependency.clone(),
        source,
      })?;
      Requirement::Range(spec)
    };
    requires.insert(dependency, requirement);
  }
  Ok(requires)
}

/// Render a YAML scalar as text. `version: 1.0` arrives as a float.
pub(crate) fn scalar_to_string(value: &Value) -> Option<String> {
  match value {
    Value::String(s) => Some(s.clone()),
    Value::Number(n) => Some(n.to_string()),
    Value::Bool(b) => Some(b.to_string()),
    _ => None,
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn parse(text: &str) -> Result<PackageConfig, ConfigError> {
    PackageConfig::parse(text, Path::new("/pkgs/demo"))
  }

  mod fields {
    use super::*;

    #[test]
    fn minimal_config() {
      let config = parse("name: demo\nversion: 1.2\ntype: library\n").unwrap();
      assert_eq!(config.name, "demo");
      assert_eq!(config.version, Version::new(1, 2, 0));
      assert_eq!(config.package_type, PackageType::Library);
      assert_eq!(config.variants.len(), 1);
      assert_eq!(config.variants[0].name, "src");
    }

    #[test]
    fn missing_type_is_reported() {
      let err = parse("name: demo\nversion: 1.0.0\n").unwrap_err();
      assert!(matches!(err, ConfigError::MissingField { field: "type", .. }));
    }

    #[test]
    fn missing_version_is_reported() {
      let err = parse("name: demo\ntype: application\n").unwrap_err();
      assert!(matches!(err, ConfigError::MissingField { field: "version", .. }));
    }

    #[test]
    fn blank_name_is_missing() {
      let err = parse("name: ''\nversion: 1.0.0\ntype: library\n").unwrap_err();
      assert!(matches!(err, ConfigError::MissingField { field: "name", .. }));
    }

    #[test]
    fn per_compiler_cflags() {
      let config = parse("name: d\nversion: 1.0.0\ntype: library\ncflags:\n  gcc: -std=c++11\n").unwrap();
      let cflags = config.cflags.unwrap();
      assert_eq!(cflags.for_compiler("gcc"), Some("-std=c++11"));
      assert_eq!(cflags.for_compiler("clang"), None);
    }
  }

  mod requires {
    use super::*;

    #[test]
    fn top_level_requires_land_in_src() {
      let config = parse(
        "name: d\nversion: 1.0.0\ntype: library\nrequires:\n  zlib:\n    version: '>=1.2'\n  fmt: '1.0'\n",
      )
      .unwrap();
      let src = &config.variants[0];
      assert_eq!(src.requires.len(), 2);
      assert!(matches!(src.requires.get("zlib"), Some(Requirement::Range(_))));
      match src.requires.get("fmt") {
        Some(Requirement::Range(spec)) => assert!(spec.matches(&Version::new(1, 0, 0))),
        other => panic!("unexpected requirement {other:?}"),
      }
    }

    #[test]
    fn local_requirement_resolves_relative_to_package() {
      let config =
        parse("name: d\nversion: 1.0.0\ntype: library\nrequires:\n  util:\n    version: local\n    path: ../util\n")
          .unwrap();
      assert_eq!(
        config.variants[0].requires.get("util"),
        Some(&Requirement::Local(PathBuf::from("/pkgs/demo/../util")))
      );
    }

    #[test]
    fn local_requirement_needs_path() {
      let err = parse("name: d\nversion: 1.0.0\ntype: library\nrequires:\n  util:\n    version: local\n").unwrap_err();
      assert!(matches!(err, ConfigError::MissingLocalPath { .. }));
    }

    #[test]
    fn malformed_spec_names_dependency() {
      let err = parse("name: d\nversion: 1.0.0\ntype: library\nrequires:\n  zlib:\n    version: '>>1'\n").unwrap_err();
      match err {
        ConfigError::InvalidRequirement { dependency, .. } => assert_eq!(dependency, "zlib"),
        other => panic!("unexpected error {other:?}"),
      }
    }

    #[test]
    fn null_version_is_not_widened_to_any() {
      let err = parse("name: d\nversion: 1.0.0\ntype: library\nrequires:\n  zlib:\n").unwrap_err();
      match err {
        ConfigError::InvalidRequirement { dependency, source, .. } => {
          assert_eq!(dependency, "zlib");
          assert!(matches!(source, VersionError::InvalidSpec { .. }));
        }
        other => panic!("unexpected error {other:?}"),
      }
    }

    #[test]
    fn non_scalar_version_is_rejected() {
      let err =
        parse("name: d\nversion: 1.0.0\ntype: library\nrequires:\n  zlib:\n    version: [1, 2]\n").unwrap_err();
      assert!(matches!(err, ConfigError::InvalidRequirement { .. }));
    }
  }

  mod variants {
    use super::*;

    #[test]
    fn variants_must_be_a_list() {
      let err = parse("name: d\nversion: 1.0.0\ntype: library\nvariants:\n  test:\n    when: {variant: test}\n")
        .unwrap_err();
      assert!(matches!(err, ConfigError::VariantsNotList { .. }));
      assert!(err.to_string().contains("- character"));
    }

    #[test]
    fn declared_variants_follow_src() {
      let config = parse(
        "name: d\nversion: 1.0.0\ntype: library\nvariants:\n  - test:\n      when: {variant: test}\n  - stm32:\n      when: {platform: rtems}\n      replaces: src\n",
      )
      .unwrap();
      let names: Vec<_> = config.variants.iter().map(|v| v.name.as_str()).collect();
      assert_eq!(names, vec!["src", "test", "stm32"]);
      assert_eq!(config.variants[2].replaces.as_deref(), Some("src"));
    }

    #[test]
    fn missing_when_is_kept_as_none() {
      let config = parse("name: d\nversion: 1.0.0\ntype: library\nvariants:\n  - bench:\n      cflags: -DBENCH\n").unwrap();
      assert_eq!(config.variants[0].when, Some(TraitClause::default()));
      assert_eq!(config.variants[1].name, "bench");
      assert_eq!(config.variants[1].when, None);
    }

    #[test]
    fn one_name_per_entry() {
      let err = parse("name: d\nversion: 1.0.0\ntype: library\nvariants:\n  - a: {}\n    b: {}\n").unwrap_err();
      assert!(matches!(err, ConfigError::InvalidVariant { .. }));
    }

    #[test]
    fn reserved_words_rejected_in_when() {
      let err = parse("name: d\nversion: 1.0.0\ntype: library\nvariants:\n  - x:\n      when: {and: yes}\n")
        .unwrap_err();
      assert!(matches!(
        err,
        ConfigError::InvalidTrait {
          source: TraitError::ReservedWord { .. },
          ..
        }
      ));
    }

    #[test]
    fn unknown_trait_rejected_in_when() {
      let err = parse("name: d\nversion: 1.0.0\ntype: library\nvariants:\n  - x:\n      when: {os: linux}\n")
        .unwrap_err();
      assert!(matches!(
        err,
        ConfigError::InvalidTrait {
          source: TraitError::UnknownKey { .. },
          ..
        }
      ));
    }

    #[test]
    fn duplicate_variant_rejected() {
      let err = parse("name: d\nversion: 1.0.0\ntype: library\nvariants:\n  - t: {}\n  - t: {}\n").unwrap_err();
      assert!(matches!(err, ConfigError::InvalidVariant { .. }));
    }

    #[test]
    fn unknown_variant_field_rejected() {
      let err = parse("name: d\nversion: 1.0.0\ntype: library\nvariants:\n  - t:\n      replace: src\n").unwrap_err();
      assert!(matches!(err, ConfigError::InvalidVariant { .. }));
    }
  }
}
