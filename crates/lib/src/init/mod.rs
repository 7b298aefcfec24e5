//! Scaffolding of new packages for `clyde init`.
//!
//! A new package gets a `config.yaml`, a `src/` directory with a starter
//! source file and an `include/<name>/` directory for its public headers.

mod templates;

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::info;

use crate::consts::CONFIG_FILE;
use crate::package::PackageType;
use crate::package::resolved::INCLUDE_DIR;

use templates::{
  APPLICATION_SOURCE_TEMPLATE, CONFIG_YAML_TEMPLATE, GITIGNORE_TEMPLATE, LIBRARY_HEADER_TEMPLATE,
  LIBRARY_SOURCE_TEMPLATE,
};

#[derive(Debug, Error)]
pub enum InitError {
  #[error("package already exists at {}", path.display())]
  PackageExists { path: PathBuf },

  #[error("cannot derive a package name from {}", path.display())]
  InvalidName { path: PathBuf },

  #[error("failed to create directory {}: {source}", path.display())]
  CreateDir { path: PathBuf, source: std::io::Error },

  #[error("failed to write file {}: {source}", path.display())]
  WriteFile { path: PathBuf, source: std::io::Error },
}

pub struct InitOptions {
  /// Directory of the new package; its name becomes the package name.
  pub path: PathBuf,
  pub package_type: PackageType,
  pub author: Option<String>,
  pub author_email: Option<String>,
}

#[derive(Debug)]
pub struct InitResult {
  pub name: String,
  pub package_dir: PathBuf,
  pub config: PathBuf,
  /// Every file written, config included.
  pub files: Vec<PathBuf>,
}

pub fn init(options: &InitOptions) -> Result<InitResult, InitError> {
  let dir = &options.path;
  let config = dir.join(CONFIG_FILE);
  if config.exists() {
    return Err(InitError::PackageExists { path: dir.clone() });
  }

  fs::create_dir_all(dir).map_err(|source| InitError::CreateDir {
    path: dir.clone(),
    source,
  })?;
  let dir = dunce::canonicalize(dir).map_err(|source| InitError::CreateDir {
    path: dir.clone(),
    source,
  })?;
  let name = package_name(&dir)?;

  let mut author = String::new();
  if let Some(user) = &options.author {
    author.push_str(&format!("author: {}\n", yaml_quote(user)));
  }
  if let Some(email) = &options.author_email {
    author.push_str(&format!("author-email: {}\n", yaml_quote(email)));
  }
  let guard = format!("{}_H", name.to_uppercase().replace('-', "_"));
  let fill = |template: &str| {
    template
      .replace("{name}", &name)
      .replace("{type}", options.package_type.as_str())
      .replace("{guard}", &guard)
      .replace("{author}", &author)
  };

  let mut files = vec![(config.clone(), fill(CONFIG_YAML_TEMPLATE))];
  files.push((dir.join(".gitignore"), GITIGNORE_TEMPLATE.to_string()));
  match options.package_type {
    PackageType::Library => {
      files.push((
        dir.join(INCLUDE_DIR).join(&name).join(format!("{name}.h")),
        fill(LIBRARY_HEADER_TEMPLATE),
      ));
      files.push((dir.join("src").join(format!("{name}.c")), fill(LIBRARY_SOURCE_TEMPLATE)));
    }
    PackageType::Application => {
      fs::create_dir_all(dir.join(INCLUDE_DIR).join(&name)).map_err(|source| InitError::CreateDir {
        path: dir.join(INCLUDE_DIR),
        source,
      })?;
      files.push((dir.join("src").join("main.c"), fill(APPLICATION_SOURCE_TEMPLATE)));
    }
  }

  for (path, content) in &files {
    if let Some(parent) = path.parent() {
      fs::create_dir_all(parent).map_err(|source| InitError::CreateDir {
        path: parent.to_path_buf(),
        source,
      })?;
    }
    // Existing sources are kept; only config.yaml marks a package
    if path != &config && path.exists() {
      continue;
    }
    fs::write(path, content).map_err(|source| InitError::WriteFile {
      path: path.clone(),
      source,
    })?;
  }

  info!(name = %name, package_type = %options.package_type, dir = %dir.display(), "created package");
  Ok(InitResult {
    name,
    config: dir.join(CONFIG_FILE),
    package_dir: dir,
    files: files.into_iter().map(|(path, _)| path).collect(),
  })
}

fn package_name(dir: &Path) -> Result<String, InitError> {
  dir
    .file_name()
    .and_then(|n| n.to_str())
    .filter(|n| !n.is_empty() && n.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'))
    .map(str::to_string)
    .ok_or_else(|| InitError::InvalidName { path: dir.to_path_buf() })
}

fn yaml_quote(value: &str) -> String {
  format!("'{}'", value.replace('\'', "''"))
}
