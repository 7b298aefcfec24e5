//! The build tree.
//!
//! The resolved dependency graph is a DAG. The build tree collapses it into a
//! tree by a depth-first walk from the root where the first visit of a name
//! wins: a package that was already placed is not expanded again, and the
//! later parent gets no edge to it.
//!
//! Nodes live in an arena indexed by [`NodeId`], with one node per package
//! name. After the walk, the union of every node's include paths is handed to
//! every node so each library sees every other library's public headers.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::PathBuf;

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use thiserror::Error;
use tracing::debug;

use crate::consts::{SRC_VARIANT, TEST_VARIANT};
use crate::package::{ConfigError, PackageType, ResolvedPackage};
use crate::resolve::Resolution;
use crate::traits::Traits;

pub type NodeId = usize;

#[derive(Debug, Error)]
pub enum TreeError {
  #[error(transparent)]
  Config(#[from] ConfigError),

  #[error("package '{package}' must be inflated before building a tree")]
  NotInflated { package: String },

  #[error("package '{package}' is referenced but was not resolved")]
  Missing { package: String },

  #[error("dependency cycle through '{package}' cannot be linked")]
  Cycle { package: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildNode {
  pub name: String,
  pub package_type: PackageType,
  /// Version label; `local` for working trees.
  pub version: String,
  pub variant: String,
  pub path: PathBuf,
  pub traits: Traits,
  pub sources: BTreeSet<PathBuf>,
  pub headers: BTreeSet<PathBuf>,
  pub include_paths: BTreeSet<PathBuf>,
  pub cflags: String,
  /// Subtrees first placed below this node.
  pub libraries: BTreeMap<String, NodeId>,
  /// Every direct dependency, placed here or elsewhere.
  pub dependencies: BTreeSet<String>,
}

impl BuildNode {
  pub fn is_local(&self) -> bool {
    self.version == crate::consts::LOCAL_VERSION
  }
}

#[derive(Debug, Clone)]
pub struct BuildTree {
  nodes: Vec<BuildNode>,
  index: BTreeMap<String, NodeId>,
  root: NodeId,
}

impl BuildTree {
  pub fn root(&self) -> &BuildNode {
    &self.nodes[self.root]
  }

  pub fn root_id(&self) -> NodeId {
    self.root
  }

  pub fn node(&self, id: NodeId) -> &BuildNode {
    &self.nodes[id]
  }

  pub fn get(&self, name: &str) -> Option<&BuildNode> {
    self.index.get(name).map(|&id| &self.nodes[id])
  }

  pub fn id_of(&self, name: &str) -> Option<NodeId> {
    self.index.get(name).copied()
  }

  pub fn nodes(&self) -> impl Iterator<Item = &BuildNode> {
    self.nodes.iter()
  }

  pub fn len(&self) -> usize {
    self.nodes.len()
  }

  pub fn is_empty(&self) -> bool {
    self.nodes.is_empty()
  }

  /// Names of every package reachable from `id` through direct dependencies.
  pub fn transitive_dependencies(&self, id: NodeId) -> BTreeSet<String> {
    let mut seen = BTreeSet::new();
    let mut stack: Vec<&str> = self.nodes[id].dependencies.iter().map(String::as_str).collect();
    while let Some(name) = stack.pop() {
      if seen.insert(name.to_string())
        && let Some(node) = self.get(name)
      {
        stack.extend(node.dependencies.iter().map(String::as_str));
      }
    }
    seen
  }

  /// Node ids ordered so that every package comes after all of its dependencies.
  pub fn link_order(&self) -> Result<Vec<NodeId>, TreeError> {
    let mut graph: DiGraph<NodeId, ()> = DiGraph::new();
    let indices: Vec<NodeIndex> = (0..self.nodes.len()).map(|id| graph.add_node(id)).collect();

    for (id, node) in self.nodes.iter().enumerate() {
      for dep in &node.dependencies {
        let dep_id = self.id_of(dep).ok_or_else(|| TreeError::Missing { package: dep.clone() })?;
        // Edge from dependency to dependent
        graph.add_edge(indices[dep_id], indices[id], ());
      }
    }

    let sorted = toposort(&graph, None).map_err(|cycle| TreeError::Cycle {
      package: self.nodes[graph[cycle.node_id()]].name.clone(),
    })?;
    Ok(sorted.into_iter().map(|idx| graph[idx]).collect())
  }
}

/// Assemble the build tree of an inflated resolution.
pub fn build_tree(resolution: &Resolution) -> Result<BuildTree, TreeError> {
  let mut builder = TreeBuilder {
    resolution,
    nodes: Vec::new(),
    index: BTreeMap::new(),
    visited: HashSet::new(),
  };
  let root = builder.visit(resolution.root_name(), true)?;

  let mut tree = BuildTree {
    nodes: builder.nodes,
    index: builder.index,
    root,
  };
  propagate_includes(&mut tree);
  debug!(root = %tree.root().name, nodes = tree.len(), "built dependency tree");
  Ok(tree)
}

struct TreeBuilder<'a> {
  resolution: &'a Resolution,
  nodes: Vec<BuildNode>,
  index: BTreeMap<String, NodeId>,
  visited: HashSet<String>,
}

impl TreeBuilder<'_> {
  fn visit(&mut self, name: &str, is_root: bool) -> Result<NodeId, TreeError> {
    self.visited.insert(name.to_string());
    let package = self
      .resolution
      .get(name)
      .ok_or_else(|| TreeError::Missing { package: name.to_string() })?;
    let inflated = package.inflated().ok_or_else(|| TreeError::NotInflated {
      package: name.to_string(),
    })?;

    let mut libraries = BTreeMap::new();
    for dep in inflated.keys() {
      if self.visited.contains(dep) {
        continue;
      }
      let child = self.visit(dep, false)?;
      libraries.insert(dep.clone(), child);
    }

    let node = make_node(package, is_root, libraries)?;
    let id = self.nodes.len();
    self.index.insert(node.name.clone(), id);
    self.nodes.push(node);
    Ok(id)
  }
}

fn make_node(
  package: &ResolvedPackage,
  is_root: bool,
  libraries: BTreeMap<String, NodeId>,
) -> Result<BuildNode, TreeError> {
  let sources_by_variant = package.sources_by_variant();
  for (variant, files) in &sources_by_variant {
    if files.is_empty() {
      return Err(
        ConfigError::NoSources {
          package: package.name().to_string(),
          variant: variant.clone(),
          dir: package.path().join(variant),
        }
        .into(),
      );
    }
  }

  let (variant, package_type) = if is_root {
    let variant = package.active_variant().to_string();
    let package_type = if variant == TEST_VARIANT {
      PackageType::Application
    } else {
      package.package_type()
    };
    (variant, package_type)
  } else {
    (SRC_VARIANT.to_string(), package.package_type())
  };

  Ok(BuildNode {
    name: package.name().to_string(),
    package_type,
    version: package.version_label(),
    variant,
    path: package.path().to_path_buf(),
    traits: package.traits().clone(),
    sources: sources_by_variant.into_values().flatten().collect(),
    headers: package.header_files(),
    include_paths: package.include_paths(),
    cflags: package.cflags(),
    libraries,
    dependencies: package.dependencies().keys().cloned().collect(),
  })
}

/// Give every node the include paths of the whole tree.
fn propagate_includes(tree: &mut BuildTree) {
  let all: BTreeSet<PathBuf> = tree
    .nodes
    .iter()
    .flat_map(|node| node.include_paths.iter().cloned())
    .collect();
  for node in &mut tree.nodes {
    node.include_paths.extend(all.iter().cloned());
  }
}
