//! Whole-graph version resolution.
//!
//! Resolution is an iterative fixed point rather than a backtracking solver.
//! Starting from the root, every pass collects what each current candidate
//! requires, intersects the requirements per dependency name, asks the
//! package source for the best match and replaces the candidate of that name.
//! Passes repeat until the name to version assignment stops changing.
//!
//! All requirements of a pass are gathered from the candidates as they were
//! at the start of that pass, so the order in which names are visited cannot
//! change the outcome. Replacement is global by name, which is what makes
//! diamond dependencies converge on a single version.

pub mod frozen;

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::PathBuf;

use semver::Version;
use thiserror::Error;
use tracing::{debug, info};

use crate::consts::MAX_RESOLVE_ITERATIONS;
use crate::package::{InflateError, Requirement, ResolvedPackage};
use crate::source::{PackageSource, SourceError};
use crate::traits::Traits;
use crate::version::{VersionError, VersionSpec};

pub use frozen::{FrozenError, FrozenVersions, PinnedVersion};

#[derive(Debug, Error)]
pub enum ResolveError {
  #[error("no single version satisfies '{dependency}' across requesters ({}): {source}", describe(.requesters))]
  Conflict {
    dependency: String,
    requesters: Vec<(String, String)>,
    #[source]
    source: VersionError,
  },

  #[error("could not satisfy {dependency} {spec} (required by {})", describe(.requesters))]
  Unsatisfied {
    dependency: String,
    spec: String,
    requesters: Vec<(String, String)>,
  },

  #[error("'{dependency}' is required from different local paths ({})", describe(.requesters))]
  LocalConflict {
    dependency: String,
    requesters: Vec<(String, String)>,
  },

  #[error("'{requester}' requires the root package '{root}', which would form a cycle")]
  RootCycle { root: String, requester: String },

  #[error("cyclic or non-convergent dependency graph: no fixed point after {iterations} iterations")]
  NonConvergent { iterations: usize },

  #[error("while resolving '{dependency}'")]
  Source {
    dependency: String,
    #[source]
    source: SourceError,
  },

  #[error("frozen ledger pins '{dependency}' as local, but no package requires it from a local path")]
  UnknownLocal { dependency: String },

  #[error(transparent)]
  Inflate(#[from] InflateError),
}

fn describe(requesters: &[(String, String)]) -> String {
  requesters
    .iter()
    .map(|(name, spec)| format!("{name} wants {spec}"))
    .collect::<Vec<_>>()
    .join(", ")
}

/// The outcome of resolution: one package per name reachable from the root.
#[derive(Debug, Clone)]
pub struct Resolution {
  root: String,
  packages: BTreeMap<String, ResolvedPackage>,
}

impl Resolution {
  pub fn root_name(&self) -> &str {
    &self.root
  }

  pub fn root(&self) -> Option<&ResolvedPackage> {
    self.packages.get(&self.root)
  }

  pub fn get(&self, name: &str) -> Option<&ResolvedPackage> {
    self.packages.get(name)
  }

  pub fn packages(&self) -> impl Iterator<Item = &ResolvedPackage> {
    self.packages.values()
  }

  pub fn len(&self) -> usize {
    self.packages.len()
  }

  pub fn is_empty(&self) -> bool {
    self.packages.is_empty()
  }

  /// Chosen version of every package.
  pub fn versions(&self) -> BTreeMap<String, Version> {
    self
      .packages
      .iter()
      .map(|(name, pkg)| (name.clone(), pkg.version().clone()))
      .collect()
  }

  /// The ledger recording this resolution, root included.
  pub fn ledger(&self) -> FrozenVersions {
    let mut ledger = FrozenVersions::new();
    for (name, pkg) in &self.packages {
      let pinned = if pkg.is_local() {
        PinnedVersion::Local
      } else {
        PinnedVersion::Published(pkg.version().clone())
      };
      ledger.insert(name.clone(), pinned);
    }
    ledger
  }

  /// Bind every package's dependency names to the resolved versions.
  pub fn inflate(&mut self) -> Result<(), ResolveError> {
    let versions = self.versions();
    for pkg in self.packages.values_mut() {
      pkg.inflate(&versions)?;
    }
    Ok(())
  }
}

/// Resolve the dependency graph below `root`.
pub fn resolve<S>(
  root: ResolvedPackage,
  source: &mut S,
  traits: &Traits,
  fetch_remote: bool,
) -> Result<Resolution, ResolveError>
where
  S: PackageSource + ?Sized,
{
  resolve_in_order(root, source, traits, fetch_remote, |_| {})
}

/// [`resolve`] with a hook that reorders the names visited in each pass.
pub(crate) fn resolve_in_order<S, F>(
  root: ResolvedPackage,
  source: &mut S,
  traits: &Traits,
  fetch_remote: bool,
  reorder: F,
) -> Result<Resolution, ResolveError>
where
  S: PackageSource + ?Sized,
  F: Fn(&mut Vec<String>),
{
  let root_name = root.name().to_string();
  let mut candidates = BTreeMap::from([(root_name.clone(), root)]);
  let mut seen = HashSet::from([assignment(&candidates)]);

  for iteration in 1..=MAX_RESOLVE_ITERATIONS {
    let mut requesters: Vec<String> = candidates.keys().cloned().collect();
    reorder(&mut requesters);

    let mut requested: BTreeMap<String, Vec<(String, Requirement)>> = BTreeMap::new();
    for requester in &requesters {
      for (dependency, requirement) in candidates[requester].dependencies() {
        if *dependency == root_name {
          return Err(ResolveError::RootCycle {
            root: root_name,
            requester: requester.clone(),
          });
        }
        requested
          .entry(dependency.clone())
          .or_default()
          .push((requester.clone(), requirement.clone()));
      }
    }

    let mut dependencies: Vec<String> = requested.keys().cloned().collect();
    reorder(&mut dependencies);

    let mut next = candidates.clone();
    for dependency in dependencies {
      let chosen = choose(&dependency, &requested[&dependency], source, traits, fetch_remote)?;
      debug!(iteration, name = %dependency, version = %chosen.version_label(), "selected candidate");
      next.insert(dependency, chosen);
    }

    let changed = assignment(&next) != assignment(&candidates);
    candidates = next;
    if !changed {
      let packages = reachable(&root_name, candidates);
      info!(root = %root_name, packages = packages.len(), iterations = iteration, "resolved dependencies");
      return Ok(Resolution {
        root: root_name,
        packages,
      });
    }
    if !seen.insert(assignment(&candidates)) {
      return Err(ResolveError::NonConvergent { iterations: iteration });
    }
  }

  Err(ResolveError::NonConvergent {
    iterations: MAX_RESOLVE_ITERATIONS,
  })
}

/// Load exactly the versions pinned in `ledger`, bypassing resolution.
pub fn resolve_frozen<S>(
  root: ResolvedPackage,
  ledger: &FrozenVersions,
  source: &mut S,
  traits: &Traits,
) -> Result<Resolution, ResolveError>
where
  S: PackageSource + ?Sized,
{
  let root_name = root.name().to_string();
  let mut packages = BTreeMap::from([(root_name.clone(), root)]);
  let mut locals = Vec::new();

  for (name, pinned) in ledger.iter().filter(|(name, _)| *name != root_name) {
    match pinned {
      PinnedVersion::Published(version) => {
        let spec = VersionSpec::exact(version);
        let package = source
          .best(name, &spec, traits, false)
          .map_err(|source| ResolveError::Source {
            dependency: name.to_string(),
            source,
          })?
          .ok_or_else(|| ResolveError::Unsatisfied {
            dependency: name.to_string(),
            spec: spec.to_string(),
            requesters: vec![("versions.txt".to_string(), spec.to_string())],
          })?;
        packages.insert(name.to_string(), package);
      }
      PinnedVersion::Local => locals.push(name.to_string()),
    }
  }

  // Local pins carry no path; take it from whichever package requires them.
  for name in locals {
    let path = packages
      .values()
      .find_map(|pkg| match pkg.dependencies().get(&name) {
        Some(Requirement::Local(path)) => Some(path.clone()),
        _ => None,
      })
      .ok_or_else(|| ResolveError::UnknownLocal { dependency: name.clone() })?;
    let package = source.local(&path, traits).map_err(|source| ResolveError::Source {
      dependency: name.clone(),
      source,
    })?;
    packages.insert(name, package);
  }

  info!(root = %root_name, packages = packages.len(), "loaded frozen versions");
  Ok(Resolution {
    root: root_name,
    packages,
  })
}

fn choose<S>(
  dependency: &str,
  requirements: &[(String, Requirement)],
  source: &mut S,
  traits: &Traits,
  fetch_remote: bool,
) -> Result<ResolvedPackage, ResolveError>
where
  S: PackageSource + ?Sized,
{
  let described = || -> Vec<(String, String)> {
    requirements
      .iter()
      .map(|(requester, requirement)| (requester.clone(), requirement.to_string()))
      .collect()
  };
  let source_err = |source| ResolveError::Source {
    dependency: dependency.to_string(),
    source,
  };

  let local_paths: BTreeSet<&PathBuf> = requirements
    .iter()
    .filter_map(|(_, r)| match r {
      Requirement::Local(path) => Some(path),
      Requirement::Range(_) => None,
    })
    .collect();

  if !local_paths.is_empty() {
    if local_paths.len() > 1 || local_paths.len() != requirements.len() {
      return Err(ResolveError::LocalConflict {
        dependency: dependency.to_string(),
        requesters: described(),
      });
    }
    let path = local_paths.into_iter().next().cloned().unwrap_or_default();
    return source.local(&path, traits).map_err(source_err);
  }

  let mut combined = VersionSpec::any();
  for (_, requirement) in requirements {
    if let Requirement::Range(spec) = requirement {
      combined = combined.intersect(spec).map_err(|source| ResolveError::Conflict {
        dependency: dependency.to_string(),
        requesters: described(),
        source,
      })?;
    }
  }

  source
    .best(dependency, &combined, traits, fetch_remote)
    .map_err(source_err)?
    .ok_or_else(|| ResolveError::Unsatisfied {
      dependency: dependency.to_string(),
      spec: combined.to_string(),
      requesters: described(),
    })
}

fn assignment(candidates: &BTreeMap<String, ResolvedPackage>) -> Vec<(String, String)> {
  candidates
    .iter()
    .map(|(name, pkg)| (name.clone(), pkg.version_label()))
    .collect()
}

/// Drop candidates that an earlier pass pulled in but nothing requires anymore.
fn reachable(root: &str, mut candidates: BTreeMap<String, ResolvedPackage>) -> BTreeMap<String, ResolvedPackage> {
  let mut keep = BTreeSet::new();
  let mut stack = vec![root.to_string()];
  while let Some(name) = stack.pop() {
    if !keep.insert(name.clone()) {
      continue;
    }
    if let Some(pkg) = candidates.get(&name) {
      stack.extend(pkg.dependencies().keys().cloned());
    }
  }
  candidates.retain(|name, _| keep.contains(name));
  candidates
}
