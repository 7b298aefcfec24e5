//! Package descriptors, the identity of a cached build.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::hash::{HashError, stable_sha_of};
use crate::consts::LOCAL_VERSION;
use crate::traits::{TraitKey, Traits};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Form {
  Source,
  Binary,
}

/// Hex SHA-1 digest naming a store entry.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Digest(pub String);

impl fmt::Display for Digest {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

/// Everything that determines the bytes of a build.
///
/// `dependencies` records the version of every transitive dependency, so a
/// change anywhere below a package yields a new digest for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageDescriptor {
  pub name: String,
  pub version: String,
  pub form: Form,
  pub traits: BTreeMap<String, String>,
  pub dependencies: BTreeMap<String, String>,
}

impl PackageDescriptor {
  pub fn new(name: impl Into<String>, version: impl Into<String>, form: Form) -> Self {
    PackageDescriptor {
      name: name.into(),
      version: version.into(),
      form,
      traits: BTreeMap::new(),
      dependencies: BTreeMap::new(),
    }
  }

  /// Record `traits`, leaving out the top-level variant, which only selects
  /// what the root package builds.
  pub fn with_traits(mut self, traits: &Traits) -> Self {
    self.traits = traits.without(TraitKey::Variant).to_string_map();
    self
  }

  pub fn with_dependency(mut self, name: impl Into<String>, version: impl Into<String>) -> Self {
    self.dependencies.insert(name.into(), version.into());
    self
  }

  /// Local working trees are never cached.
  pub fn is_local(&self) -> bool {
    self.version == LOCAL_VERSION
  }

  pub fn digest(&self) -> Result<Digest, HashError> {
    stable_sha_of(self).map(Digest)
  }
}
