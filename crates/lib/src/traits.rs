//! Typed build traits.
//!
//! A trait set describes the build environment a package is resolved for:
//! target platform, active variant, compiler and so on. The set of keys is
//! closed so that a typo in a `when` clause is reported instead of silently
//! never matching.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while building trait sets or `when` clauses.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TraitError {
  #[error("unknown trait '{key}' (expected one of: platform, variant, compiler, compiler-version, cflags, bsp, toolchain)")]
  UnknownKey { key: String },

  #[error("'{word}' is reserved and cannot be used in a when clause")]
  ReservedWord { word: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TraitKey {
  Platform,
  Variant,
  Compiler,
  CompilerVersion,
  Cflags,
  Bsp,
  /// Full compiler command, cross prefix and path included.
  Toolchain,
}

impl TraitKey {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Platform => "platform",
      Self::Variant => "variant",
      Self::Compiler => "compiler",
      Self::CompilerVersion => "compiler-version",
      Self::Cflags => "cflags",
      Self::Bsp => "bsp",
      Self::Toolchain => "toolchain",
    }
  }
}

impl fmt::Display for TraitKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for TraitKey {
  type Err = TraitError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "platform" => Ok(Self::Platform),
      "variant" => Ok(Self::Variant),
      "compiler" => Ok(Self::Compiler),
      "compiler-version" => Ok(Self::CompilerVersion),
      "cflags" => Ok(Self::Cflags),
      "bsp" => Ok(Self::Bsp),
      "toolchain" => Ok(Self::Toolchain),
      "and" | "or" => Err(TraitError::ReservedWord { word: s.to_string() }),
      other => Err(TraitError::UnknownKey { key: other.to_string() }),
    }
  }
}

/// The trait set a package is resolved against.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Traits(BTreeMap<TraitKey, String>);

impl Traits {
  pub fn new() -> Self {
    Self::default()
  }

  /// Builder-style insert.
  pub fn with(mut self, key: TraitKey, value: impl Into<String>) -> Self {
    self.0.insert(key, value.into());
    self
  }

  pub fn set(&mut self, key: TraitKey, value: impl Into<String>) {
    self.0.insert(key, value.into());
  }

  pub fn get(&self, key: TraitKey) -> Option<&str> {
    self.0.get(&key).map(String::as_str)
  }

  /// A copy of this set with `key` removed.
  pub fn without(&self, key: TraitKey) -> Self {
    let mut traits = self.clone();
    traits.0.remove(&key);
    traits
  }

  pub fn iter(&self) -> impl Iterator<Item = (TraitKey, &str)> {
    self.0.iter().map(|(k, v)| (*k, v.as_str()))
  }

  /// Whether every condition in `clause` holds for this set.
  pub fn satisfies(&self, clause: &TraitClause) -> bool {
    clause
      .0
      .iter()
      .all(|(key, value)| self.0.get(key).is_some_and(|v| v == value))
  }

  /// String-keyed view, used when the set is recorded in a descriptor.
  pub fn to_string_map(&self) -> BTreeMap<String, String> {
    self.0.iter().map(|(k, v)| (k.as_str().to_string(), v.clone())).collect()
  }

  /// Parse a set from string pairs, rejecting unknown keys.
  pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self, TraitError>
  where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: Into<String>,
  {
    let mut traits = Self::new();
    for (key, value) in pairs {
      traits.set(key.as_ref().parse()?, value);
    }
    Ok(traits)
  }
}

/// A `when` clause: the conditions under which a variant is enabled.
///
/// An empty clause always matches.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TraitClause(BTreeMap<TraitKey, String>);

impl TraitClause {
  pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self, TraitError>
  where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: Into<String>,
  {
    let mut conditions = BTreeMap::new();
    for (key, value) in pairs {
      conditions.insert(key.as_ref().parse()?, value.into());
    }
    Ok(Self(conditions))
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }
}
