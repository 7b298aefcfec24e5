//! Emission of a `build.ninja` for a build tree.
//!
//! Each library compiles its sources to objects under `build/<name>/` and
//! merges them, together with the relocatable objects of the subtrees placed
//! below it, into `build/<name>/<name>.o`, which is then archived as
//! `prefix/lib/<name>.a`. An application links its objects and its subtrees
//! into `prefix/bin/<name>`.
//!
//! [`EmitState`] records which libraries were already generated and which
//! were already linked into a parent so neither happens twice. For identical
//! trees the output is byte-identical.

pub mod ninja;

use std::collections::BTreeSet;
use std::path::Path;

use thiserror::Error;

use crate::package::PackageType;
use crate::toolchain::Toolchain;
use crate::tree::{BuildNode, BuildTree, NodeId};

pub use ninja::NinjaWriter;
use ninja::escape;

#[derive(Debug, Error)]
pub enum EmitError {
  #[error("package '{package}' has no source files to build")]
  NoSources { package: String },

  #[error("package '{package}' has a source file of unknown type: {path}")]
  UnknownSource { package: String, path: String },
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct EmitState {
  pub generated: BTreeSet<String>,
  pub linked: BTreeSet<String>,
}

/// Render the ninja file for `tree`, with paths relative to `root_dir`.
pub fn emit(tree: &BuildTree, toolchain: &Toolchain, root_dir: &Path) -> Result<String, EmitError> {
  emit_with_state(tree, toolchain, root_dir, &mut EmitState::default())
}

/// [`emit`] continuing from an existing `state`; libraries already in it
/// are neither generated nor linked again.
pub fn emit_with_state(
  tree: &BuildTree,
  toolchain: &Toolchain,
  root_dir: &Path,
  state: &mut EmitState,
) -> Result<String, EmitError> {
  let mut w = NinjaWriter::new();
  w.comment(&format!("Generated by clyde for {}. Do not edit.", tree.root().name));
  w.newline();
  write_rules(&mut w, toolchain);

  let emitter = Emitter { tree, root_dir };
  let output = emitter.node(&mut w, tree.root_id(), state)?;
  if let Some(output) = output {
    w.newline();
    w.default_targets(&[output]);
  }
  Ok(w.finish())
}

fn write_rules(w: &mut NinjaWriter, toolchain: &Toolchain) {
  let flags = escape(&toolchain.compile_flags().join(" "));
  let flags = if flags.is_empty() { String::new() } else { format!(" {flags}") };
  let compile = |compiler: &str| format!("{compiler} -MMD -MF $out.d{flags} $cflags -c $in -o $out");

  w.comment("Tool definitions");
  w.rule("cc", &compile(&toolchain.cc()), Some("CC $out"), Some("$out.d"));
  w.newline();
  w.rule("cxx", &compile(&toolchain.cxx()), Some("CXX $out"), Some("$out.d"));
  w.newline();
  w.rule("as", &compile(&toolchain.cc()), Some("AS $out"), Some("$out.d"));
  w.newline();
  w.rule("archive", &format!("{} -r -o $out $in", toolchain.ld()), Some("LD -r $out"), None);
  w.newline();
  w.rule("ar", &format!("rm -f $out && {} rcs $out $in", toolchain.ar()), Some("AR $out"), None);
  w.newline();

  let mut link = toolchain.cxx();
  if !toolchain.link_flags.is_empty() {
    link.push(' ');
    link.push_str(&escape(&toolchain.link_flags));
  }
  link.push_str(" $cflags");
  link.push_str(&flags);
  link.push_str(" $in -o $out");
  if !toolchain.link_libs.is_empty() {
    link.push(' ');
    link.push_str(&escape(&toolchain.link_libs));
  }
  w.rule("link_app", &link, Some("LINK $out"), None);
}

struct Emitter<'a> {
  tree: &'a BuildTree,
  root_dir: &'a Path,
}

impl Emitter<'_> {
  fn node(&self, w: &mut NinjaWriter, id: NodeId, state: &mut EmitState) -> Result<Option<String>, EmitError> {
    let node = self.tree.node(id);
    if !state.generated.insert(node.name.clone()) {
      return Ok(None);
    }
    if node.sources.is_empty() {
      return Err(EmitError::NoSources {
        package: node.name.clone(),
      });
    }

    let cflags = self.cflags(node);
    w.newline();
    w.comment(&format!("{} {} ({})", node.name, node.version, node.variant));
    let mut inputs = Vec::with_capacity(node.sources.len() + node.libraries.len());
    for source in &node.sources {
      let rule = rule_for(source).ok_or_else(|| EmitError::UnknownSource {
        package: node.name.clone(),
        path: source.display().to_string(),
      })?;
      let object = object_path(node, source);
      w.build(&[object.clone()], rule, &[self.relative(source)], &[("cflags", cflags.clone())]);
      inputs.push(object);
    }

    for dep in node.libraries.keys() {
      if state.linked.insert(dep.clone()) {
        inputs.push(relocatable_path(dep));
      }
    }

    w.newline();
    let output = match node.package_type {
      PackageType::Library => {
        let relocatable = relocatable_path(&node.name);
        let archive = format!("prefix/lib/{}.a", node.name);
        w.build(&[relocatable.clone()], "archive", &inputs, &[]);
        w.build(&[archive.clone()], "ar", &[relocatable], &[]);
        archive
      }
      PackageType::Application => {
        let binary = format!("prefix/bin/{}", node.name);
        w.build(&[binary.clone()], "link_app", &inputs, &[("cflags", cflags)]);
        binary
      }
    };

    for &child in node.libraries.values() {
      self.node(w, child, state)?;
    }
    Ok(Some(output))
  }

  fn cflags(&self, node: &BuildNode) -> String {
    let mut flags: Vec<String> = node
      .include_paths
      .iter()
      .map(|path| format!("-I{}", self.relative(path)))
      .collect();
    if !node.cflags.is_empty() {
      flags.push(node.cflags.clone());
    }
    escape(&flags.join(" "))
  }

  /// `path` relative to the root directory when it lies inside it.
  fn relative(&self, path: &Path) -> String {
    let shown = path.strip_prefix(self.root_dir).unwrap_or(path);
    let shown = shown.to_string_lossy().replace('\\', "/");
    if shown.is_empty() { ".".to_string() } else { shown }
  }
}

fn rule_for(source: &Path) -> Option<&'static str> {
  match source.extension()?.to_str()? {
    "c" => Some("cc"),
    "cc" | "cpp" | "c++" | "cxx" => Some("cxx"),
    "s" | "S" => Some("as"),
    _ => None,
  }
}

fn object_path(node: &BuildNode, source: &Path) -> String {
  let rel = source.strip_prefix(&node.path).unwrap_or(source).with_extension("o");
  let rel = rel.to_string_lossy().replace('\\', "/");
  format!("build/{}/{}", node.name, rel.trim_start_matches('/'))
}

fn relocatable_path(name: &str) -> String {
  format!("build/{name}/{name}.o")
}
