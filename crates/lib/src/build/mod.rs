//! Native builds of a build tree.
//!
//! Dependencies are compiled in link order through the artifact store, so a
//! package with an unchanged descriptor is never compiled twice. The root
//! package is the user's working tree and is always rebuilt, into
//! `<project>/build/out`. Packages that are local, or that depend on a local
//! package, bypass the store and are built under `build/out/deps`.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;

use thiserror::Error;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::cache::{ArtifactStore, Form, PackageDescriptor, StoreError};
use crate::package::PackageType;
use crate::package::resolved::INCLUDE_DIR;
use crate::toolchain::Toolchain;
use crate::tree::{BuildNode, BuildTree, NodeId, TreeError};

#[derive(Debug, Error)]
pub enum BuildError {
  #[error("failed to compile '{package}': {command}\n{stderr}")]
  Compile {
    package: String,
    command: String,
    stderr: String,
  },

  #[error("failed to run '{program}' for '{package}': {source}")]
  Spawn {
    package: String,
    program: String,
    #[source]
    source: io::Error,
  },

  #[error("package '{package}' has a source file of unknown type: {path}")]
  UnknownSource { package: String, path: PathBuf },

  #[error(transparent)]
  Store(#[from] StoreError),

  #[error(transparent)]
  Tree(#[from] TreeError),

  #[error("build I/O failed at {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("while building {package}@{version}")]
  Package {
    package: String,
    version: String,
    #[source]
    source: Box<BuildError>,
  },
}

impl BuildError {
  fn within(self, node: &BuildNode) -> Self {
    BuildError::Package {
      package: node.name.clone(),
      version: node.version.clone(),
      source: Box::new(self),
    }
  }

  /// The innermost error, past any package context.
  pub fn root_cause(&self) -> &BuildError {
    match self {
      BuildError::Package { source, .. } => source.root_cause(),
      other => other,
    }
  }
}

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> BuildError + '_ {
  move |source| BuildError::Io {
    path: path.to_path_buf(),
    source,
  }
}

/// What a native build produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOutput {
  pub out_dir: PathBuf,
  /// Archive of a library root.
  pub archive: Option<PathBuf>,
  /// Executable of an application root.
  pub binary: Option<PathBuf>,
  /// Artifact directory of every dependency.
  pub dependencies: BTreeMap<String, PathBuf>,
}

pub struct NativeBuilder<'a> {
  store: &'a ArtifactStore,
  toolchain: &'a Toolchain,
}

impl<'a> NativeBuilder<'a> {
  pub fn new(store: &'a ArtifactStore, toolchain: &'a Toolchain) -> Self {
    NativeBuilder { store, toolchain }
  }

  /// The descriptor identifying the build of node `id`.
  pub fn descriptor(&self, tree: &BuildTree, id: NodeId) -> PackageDescriptor {
    let node = tree.node(id);
    let mut descriptor = PackageDescriptor::new(&node.name, &node.version, Form::Binary).with_traits(&node.traits);
    for dep in tree.transitive_dependencies(id) {
      if let Some(dep_node) = tree.get(&dep) {
        descriptor = descriptor.with_dependency(dep, &dep_node.version);
      }
    }
    descriptor
  }

  pub fn build(&self, tree: &BuildTree, out_dir: &Path) -> Result<BuildOutput, BuildError> {
    let order = tree.link_order()?;
    let mut dependencies = BTreeMap::new();
    fresh_dir(out_dir)?;

    for &id in order.iter().filter(|&&id| id != tree.root_id()) {
      let node = tree.node(id);
      let dir = self.build_dependency(tree, id, out_dir).map_err(|e| e.within(node))?;
      debug!(package = %node.name, dir = %dir.display(), "dependency ready");
      dependencies.insert(node.name.clone(), dir);
    }

    let root = tree.root();
    info!(package = %root.name, variant = %root.variant, "building root package");
    self
      .build_root(tree, &order, out_dir, dependencies)
      .map_err(|e| e.within(root))
  }

  fn build_dependency(&self, tree: &BuildTree, id: NodeId, out_dir: &Path) -> Result<PathBuf, BuildError> {
    let node = tree.node(id);
    let touches_local =
      node.is_local() || tree.transitive_dependencies(id).iter().any(|dep| tree.get(dep).is_some_and(BuildNode::is_local));

    if touches_local {
      let dir = out_dir.join("deps").join(&node.name);
      fresh_dir(&dir)?;
      self.build_library(node, &dir)?;
      Ok(dir)
    } else {
      let descriptor = self.descriptor(tree, id);
      Ok(self.store.get_or_build(&descriptor, |dir| self.build_library(node, dir))?.path)
    }
  }

  fn build_root(
    &self,
    tree: &BuildTree,
    order: &[NodeId],
    out_dir: &Path,
    dependencies: BTreeMap<String, PathBuf>,
  ) -> Result<BuildOutput, BuildError> {
    let root = tree.root();
    let objects = self.compile(root, &out_dir.join("obj"))?;

    let mut output = BuildOutput {
      out_dir: out_dir.to_path_buf(),
      archive: None,
      binary: None,
      dependencies,
    };
    match root.package_type {
      PackageType::Library => {
        let archive = out_dir.join("lib").join(archive_name(&root.name));
        self.archive(root, &objects, &archive)?;
        copy_headers(root, &out_dir.join(INCLUDE_DIR))?;
        output.archive = Some(archive);
      }
      PackageType::Application => {
        // Static archives resolve left to right: dependents before dependencies
        let archives: Vec<PathBuf> = order
          .iter()
          .rev()
          .filter(|&&id| id != tree.root_id())
          .filter_map(|&id| {
            let name = &tree.node(id).name;
            output.dependencies.get(name).map(|dir| dir.join("lib").join(archive_name(name)))
          })
          .collect();
        let binary = out_dir.join("bin").join(&root.name);
        let any_cxx = tree.nodes().any(|node| node.sources.iter().any(|s| is_cxx(s)));
        self.link(root, &objects, &archives, &binary, any_cxx)?;
        output.binary = Some(binary);
      }
    }
    Ok(output)
  }

  /// Compile `node` into an artifact directory with `include/` and `lib/`.
  fn build_library(&self, node: &BuildNode, dir: &Path) -> Result<(), BuildError> {
    let objects_dir = tempfile::tempdir().map_err(io_err(dir))?;
    let objects = self.compile(node, objects_dir.path())?;
    self.archive(node, &objects, &dir.join("lib").join(archive_name(&node.name)))?;
    copy_headers(node, &dir.join(INCLUDE_DIR))
  }

  fn compile(&self, node: &BuildNode, obj_dir: &Path) -> Result<Vec<PathBuf>, BuildError> {
    let mut objects = Vec::with_capacity(node.sources.len());
    for source in &node.sources {
      let compiler = match source.extension().and_then(|e| e.to_str()) {
        Some("c" | "s" | "S") => self.toolchain.cc(),
        _ if is_cxx(source) => self.toolchain.cxx(),
        _ => {
          return Err(BuildError::UnknownSource {
            package: node.name.clone(),
            path: source.clone(),
          });
        }
      };
      let object = obj_dir.join(source.strip_prefix(&node.path).unwrap_or(source)).with_extension("o");
      if let Some(parent) = object.parent() {
        fs::create_dir_all(parent).map_err(io_err(parent))?;
      }

      let mut cmd = Command::new(compiler);
      cmd.args(self.toolchain.compile_flags());
      for include in &node.include_paths {
        cmd.arg(format!("-I{}", include.display()));
      }
      cmd.args(node.cflags.split_whitespace());
      cmd.arg("-c").arg(source).arg("-o").arg(&object);
      run(&node.name, cmd)?;
      objects.push(object);
    }
    Ok(objects)
  }

  fn archive(&self, node: &BuildNode, objects: &[PathBuf], archive: &Path) -> Result<(), BuildError> {
    if let Some(parent) = archive.parent() {
      fs::create_dir_all(parent).map_err(io_err(parent))?;
    }
    let mut cmd = Command::new(self.toolchain.ar());
    cmd.arg("rcs").arg(archive).args(objects);
    run(&node.name, cmd)
  }

  fn link(
    &self,
    node: &BuildNode,
    objects: &[PathBuf],
    archives: &[PathBuf],
    binary: &Path,
    cxx: bool,
  ) -> Result<(), BuildError> {
    if let Some(parent) = binary.parent() {
      fs::create_dir_all(parent).map_err(io_err(parent))?;
    }
    let linker = if cxx { self.toolchain.cxx() } else { self.toolchain.cc() };
    let mut cmd = Command::new(linker);
    cmd.args(self.toolchain.link_flags.split_whitespace());
    cmd.args(self.toolchain.compile_flags());
    cmd.args(node.cflags.split_whitespace());
    cmd.args(objects).args(archives);
    cmd.args(self.toolchain.link_libs.split_whitespace());
    cmd.arg("-o").arg(binary);
    run(&node.name, cmd)
  }
}

fn is_cxx(source: &Path) -> bool {
  matches!(
    source.extension().and_then(|e| e.to_str()),
    Some("cc" | "cpp" | "c++" | "cxx")
  )
}

fn archive_name(name: &str) -> String {
  format!("lib{name}.a")
}

fn run(package: &str, mut cmd: Command) -> Result<(), BuildError> {
  let command = std::iter::once(cmd.get_program())
    .chain(cmd.get_args())
    .map(|s| s.to_string_lossy().into_owned())
    .collect::<Vec<_>>()
    .join(" ");
  debug!(package, command = %command, "running");

  // CFLAGS were folded into the trait set and must not reach the tools again
  let output = cmd.env_remove("CFLAGS").output().map_err(|source| BuildError::Spawn {
    package: package.to_string(),
    program: cmd.get_program().to_string_lossy().into_owned(),
    source,
  })?;
  if !output.status.success() {
    return Err(BuildError::Compile {
      package: package.to_string(),
      command,
      stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    });
  }
  Ok(())
}

fn fresh_dir(dir: &Path) -> Result<(), BuildError> {
  if dir.exists() {
    fs::remove_dir_all(dir).map_err(io_err(dir))?;
  }
  for sub in ["include", "lib", "bin"] {
    let path = dir.join(sub);
    fs::create_dir_all(&path).map_err(io_err(&path))?;
  }
  Ok(())
}

/// Copy the public headers of `node` into `dest`, keeping their layout.
fn copy_headers(node: &BuildNode, dest: &Path) -> Result<(), BuildError> {
  let include = node.path.join(INCLUDE_DIR);
  if !include.is_dir() {
    return Ok(());
  }
  for entry in WalkDir::new(&include) {
    let entry = entry.map_err(|e| BuildError::Io {
      path: include.clone(),
      source: e.into(),
    })?;
    if !entry.file_type().is_file() {
      continue;
    }
    let target = dest.join(entry.path().strip_prefix(&include).unwrap_or(entry.path()));
    if let Some(parent) = target.parent() {
      fs::create_dir_all(parent).map_err(io_err(parent))?;
    }
    fs::copy(entry.path(), &target).map_err(io_err(entry.path()))?;
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::traits::{TraitKey, Traits};
  use crate::tree::tests::{resolve_tree, write_package};
  use tempfile::TempDir;

  fn compiler_available() -> bool {
    Command::new("cc").arg("--version").output().is_ok_and(|o| o.status.success())
  }

  fn toolchain() -> Toolchain {
    Toolchain::host(Some("cc"))
  }

  /// app -> mathx, where mathx provides `twice`.
  fn project(temp: &TempDir, app_body: &str) -> PathBuf {
    let app = write_package(temp.path(), "app", "application", &[("mathx", "*")], &[]);
    fs::create_dir_all(app.join("src")).unwrap();
    fs::write(app.join("src").join("main.c"), app_body).unwrap();

    let lib = write_package(temp.path(), "mathx", "library", &[], &[]);
    fs::create_dir_all(lib.join("src")).unwrap();
    fs::write(lib.join("include").join("mathx").join("mathx.h"), "int twice(int x);\n").unwrap();
    fs::write(
      lib.join("src").join("mathx.c"),
      "#include <mathx/mathx.h>\nint twice(int x) { return 2 * x; }\n",
    )
    .unwrap();
    app
  }

  const MAIN: &str = "#include <mathx/mathx.h>\nint main(void) { return twice(21) == 42 ? 0 : 1; }\n";

  #[test]
  fn descriptor_records_transitive_versions() {
    let temp = TempDir::new().unwrap();
    let app = write_package(temp.path(), "app", "application", &[("b", "*")], &["src"]);
    write_package(temp.path(), "b", "library", &[("d", "*")], &["src"]);
    write_package(temp.path(), "d", "library", &[], &["src"]);
    let traits = Traits::new().with(TraitKey::Compiler, "gcc");
    let tree = resolve_tree(&temp, &app, &traits).unwrap();

    let store = ArtifactStore::new(temp.path().join("store"));
    let toolchain = toolchain();
    let builder = NativeBuilder::new(&store, &toolchain);
    let descriptor = builder.descriptor(&tree, tree.id_of("b").unwrap());

    assert_eq!(descriptor.name, "b");
    assert_eq!(descriptor.version, "1.0.0");
    assert_eq!(descriptor.form, Form::Binary);
    assert_eq!(descriptor.dependencies, BTreeMap::from([("d".to_string(), "1.0.0".to_string())]));
    assert_eq!(descriptor.traits.get("compiler").map(String::as_str), Some("gcc"));
    assert!(!descriptor.traits.contains_key("variant"));
  }

  #[test]
  fn builds_application_and_caches_dependencies() {
    if !compiler_available() {
      return;
    }
    let temp = TempDir::new().unwrap();
    let app = project(&temp, MAIN);
    let tree = resolve_tree(&temp, &app, &Traits::new()).unwrap();

    let store = ArtifactStore::new(temp.path().join("store"));
    let toolchain = toolchain();
    let builder = NativeBuilder::new(&store, &toolchain);
    let output = builder.build(&tree, &app.join("build").join("out")).unwrap();

    let binary = output.binary.clone().unwrap();
    assert!(binary.exists());
    assert!(Command::new(&binary).status().unwrap().success());

    let artifact = &output.dependencies["mathx"];
    assert!(artifact.starts_with(store.root()));
    assert!(artifact.join("lib").join("libmathx.a").exists());
    assert!(artifact.join("include").join("mathx").join("mathx.h").exists());

    // A second build reuses the stored artifact
    let again = builder.build(&tree, &app.join("build").join("out")).unwrap();
    assert_eq!(again.dependencies["mathx"], *artifact);
  }

  #[test]
  fn compiler_failure_carries_stderr() {
    if !compiler_available() {
      return;
    }
    let temp = TempDir::new().unwrap();
    let app = project(&temp, "int main(void) { return undeclared_symbol; }\n");
    let tree = resolve_tree(&temp, &app, &Traits::new()).unwrap();

    let store = ArtifactStore::new(temp.path().join("store"));
    let toolchain = toolchain();
    let err = NativeBuilder::new(&store, &toolchain)
      .build(&tree, &app.join("build").join("out"))
      .unwrap_err();
    assert!(err.to_string().starts_with("while building app@local"), "{err}");
    match err.root_cause() {
      BuildError::Compile { package, command, stderr } => {
        assert_eq!(package, "app");
        assert!(command.contains("main.c"));
        assert!(stderr.contains("undeclared_symbol"));
      }
      other => panic!("unexpected error: {other}"),
    }
  }

  #[test]
  fn library_root_produces_archive_and_headers() {
    if !compiler_available() {
      return;
    }
    let temp = TempDir::new().unwrap();
    let lib = write_package(temp.path(), "solo", "library", &[], &["src"]);
    let tree = resolve_tree(&temp, &lib, &Traits::new()).unwrap();

    let store = ArtifactStore::new(temp.path().join("store"));
    let toolchain = toolchain();
    let output = NativeBuilder::new(&store, &toolchain)
      .build(&tree, &lib.join("build").join("out"))
      .unwrap();
    assert!(output.archive.unwrap().ends_with("lib/libsolo.a"));
    assert!(output.out_dir.join("include").join("solo").join("solo.h").exists());
    assert!(output.binary.is_none());
  }
}
