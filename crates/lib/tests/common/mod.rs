//! Fixtures shared by the pipeline tests: packages written to a temp dir.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use clyde_lib::project::{CompilerEnv, Project};
use clyde_lib::settings::Settings;
use clyde_lib::source::MemorySource;
use tempfile::TempDir;

/// A package about to be written to disk.
pub struct Fixture<'a> {
  pub name: &'a str,
  pub version: &'a str,
  pub package_type: &'a str,
  pub requires: Vec<(&'a str, &'a str)>,
  pub variants: Vec<&'a str>,
}

impl<'a> Fixture<'a> {
  pub fn library(name: &'a str, version: &'a str) -> Self {
    Fixture {
      name,
      version,
      package_type: "library",
      requires: Vec::new(),
      variants: Vec::new(),
    }
  }

  pub fn application(name: &'a str) -> Self {
    Fixture {
      package_type: "application",
      ..Self::library(name, "0.1.0")
    }
  }

  pub fn requires(mut self, dep: &'a str, spec: &'a str) -> Self {
    self.requires.push((dep, spec));
    self
  }

  pub fn variant(mut self, variant: &'a str) -> Self {
    self.variants.push(variant);
    self
  }

  /// Write the package to `<root>/<name>-<version>`.
  pub fn write(&self, root: &Path) -> PathBuf {
    let dir = root.join(format!("{}-{}", self.name, self.version));
    let name = self.name;
    fs::create_dir_all(dir.join("include").join(name)).unwrap();
    fs::write(
      dir.join("include").join(name).join(format!("{name}.h")),
      format!("#pragma once\nint {name}_value(void);\n"),
    )
    .unwrap();

    let mut config = format!("name: {name}\nversion: {}\ntype: {}\n", self.version, self.package_type);
    if !self.requires.is_empty() {
      config.push_str("requires:\n");
      for (dep, spec) in &self.requires {
        config.push_str(&format!("  {dep}:\n    version: '{spec}'\n"));
      }
    }
    if !self.variants.is_empty() {
      config.push_str("variants:\n");
      for variant in &self.variants {
        config.push_str(&format!("  - {variant}:\n      when: {{variant: {variant}}}\n"));
      }
    }
    fs::write(dir.join("config.yaml"), config).unwrap();

    fs::create_dir_all(dir.join("src")).unwrap();
    let source = if self.package_type == "application" {
      "int main(void)\n{\n  return 0;\n}\n".to_string()
    } else {
      format!("int {name}_value(void)\n{{\n  return 1;\n}}\n")
    };
    fs::write(dir.join("src").join(format!("{name}.c")), source).unwrap();
    dir
  }
}

/// A workspace holding a published package pool and a store.
pub struct Workspace {
  pub temp: TempDir,
  pub source: MemorySource,
}

impl Workspace {
  pub fn new() -> Self {
    let temp = TempDir::new().unwrap();
    fs::create_dir_all(temp.path().join("pool")).unwrap();
    Workspace {
      temp,
      source: MemorySource::new(),
    }
  }

  pub fn publish(&mut self, fixture: Fixture<'_>) -> PathBuf {
    let dir = fixture.write(&self.temp.path().join("pool"));
    self.source.add_dir(&dir).unwrap();
    dir
  }

  /// Write the root package, which is not published.
  pub fn root(&self, fixture: Fixture<'_>) -> PathBuf {
    fixture.write(self.temp.path())
  }

  pub fn store(&self) -> PathBuf {
    self.temp.path().join("store")
  }

  pub fn project(&self, dir: &Path, cc: Option<&str>) -> Project {
    let settings = Settings {
      store: Some(self.store()),
      ..Default::default()
    };
    let env = CompilerEnv {
      cc: cc.map(str::to_string),
      cflags: None,
    };
    Project::with_parts(dir, settings, env).unwrap()
  }
}

/// Whether a C compiler can be run as `cc`.
pub fn cc_available() -> bool {
  std::process::Command::new("cc")
    .arg("--version")
    .output()
    .is_ok_and(|o| o.status.success())
}
