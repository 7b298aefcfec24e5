//! Variant selection.
//!
//! A variant is a directory of sources next to `src/` that is compiled in only
//! when its `when` clause matches the trait set. `src` is always enabled
//! unless a later variant replaces it; a declared variant without a `when`
//! clause never is.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use super::config::{PackageConfig, Requirement, VariantClause};
use crate::consts::SRC_VARIANT;
use crate::traits::{TraitKey, Traits};

/// Compiler assumed when the trait set does not name one.
pub const DEFAULT_COMPILER: &str = "gcc";

/// The outcome of evaluating a package's variants against a trait set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariantResolution {
  /// Enabled clauses, in declaration order.
  pub enabled: Vec<VariantClause>,
  /// Base cflags followed by the cflags of every applied clause.
  pub cflags: String,
}

impl VariantResolution {
  pub fn names(&self) -> impl Iterator<Item = &str> {
    self.enabled.iter().map(|v| v.name.as_str())
  }

  /// Dependencies of all enabled variants; later variants override earlier ones.
  pub fn dependencies(&self) -> BTreeMap<String, Requirement> {
    let mut deps = BTreeMap::new();
    for clause in &self.enabled {
      for (name, requirement) in &clause.requires {
        deps.insert(name.clone(), requirement.clone());
      }
    }
    deps
  }
}

/// Decide which variants of `config` are active under `traits`.
///
/// Clauses are applied in declaration order, so a `replaces` only removes a
/// variant enabled by an earlier clause. The result depends on nothing but its
/// inputs.
pub fn resolve_variants(config: &PackageConfig, traits: &Traits) -> VariantResolution {
  let compiler = traits.get(TraitKey::Compiler).unwrap_or(DEFAULT_COMPILER);

  let mut cflags = config
    .cflags
    .as_ref()
    .and_then(|c| c.for_compiler(compiler))
    .unwrap_or_default()
    .to_string();
  let mut enabled: BTreeSet<&str> = BTreeSet::from([SRC_VARIANT]);

  for clause in config.variants.iter().filter(|c| c.name != SRC_VARIANT) {
    let Some(when) = &clause.when else {
      continue;
    };
    if !traits.satisfies(when) {
      continue;
    }

    if let Some(replaced) = &clause.replaces
      && !enabled.remove(replaced.as_str())
    {
      debug!(
        package = %config.name,
        variant = %clause.name,
        replaced = %replaced,
        "replaced variant was not enabled"
      );
    }
    enabled.insert(&clause.name);

    if let Some(extra) = clause.cflags.as_ref().and_then(|c| c.for_compiler(compiler)) {
      if !cflags.is_empty() {
        cflags.push(' ');
      }
      cflags.push_str(extra);
    }
  }

  let enabled = config
    .variants
    .iter()
    .filter(|c| enabled.contains(c.name.as_str()))
    .cloned()
    .collect();

  VariantResolution { enabled, cflags }
}
