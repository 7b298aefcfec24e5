//! Package source backed by one git repository per package.
//!
//! Each package lives in `<git-root>/<name>` with its `.git` directory intact
//! so that later fetches are incremental. Published versions are the
//! repository's tags. A chosen tag is exported (not checked out) into
//! `<git-root>/checkouts/<name>-<version>/`, so several versions of the same
//! package can coexist on disk.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use gix::remote::Direction;
use semver::Version;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::{PackageSource, SourceError};
use crate::consts::{CONFIG_FILE, FETCH_ATTEMPTS};
use crate::package::ResolvedPackage;
use crate::traits::Traits;
use crate::version::parse_version;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum GitError {
  #[error("failed to clone repository '{url}': {source}")]
  Clone {
    url: String,
    #[source]
    source: BoxError,
  },

  #[error("failed to open repository at '{path}': {source}")]
  Open {
    path: PathBuf,
    #[source]
    source: Box<gix::open::Error>,
  },

  #[error("failed to fetch from '{url}': {source}")]
  Fetch {
    url: String,
    #[source]
    source: BoxError,
  },

  #[error("failed to list tags in '{path}': {source}")]
  Tags {
    path: PathBuf,
    #[source]
    source: BoxError,
  },

  #[error("failed to export tag '{tag}': {source}")]
  Export {
    tag: String,
    #[source]
    source: BoxError,
  },

  #[error("I/O error at '{path}': {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
}

/// A published tag and the version parsed from it.
#[derive(Debug, Clone)]
struct Tag {
  name: String,
  version: Version,
}

pub struct GitPackageSource {
  root: PathBuf,
  remote: Option<String>,
  tags: HashMap<String, Vec<Tag>>,
  fetched: HashSet<String>,
  checkouts: HashMap<(String, Version), PathBuf>,
}

impl GitPackageSource {
  /// `remote` is a URL template; `{name}` is replaced with the package name,
  /// otherwise the name is appended as a path segment.
  pub fn new(root: impl Into<PathBuf>, remote: Option<String>) -> Self {
    Self {
      root: root.into(),
      remote,
      tags: HashMap::new(),
      fetched: HashSet::new(),
      checkouts: HashMap::new(),
    }
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  fn repo_path(&self, name: &str) -> PathBuf {
    self.root.join(name)
  }

  fn checkout_path(&self, name: &str, version: &Version) -> PathBuf {
    self.root.join("checkouts").join(format!("{name}-{version}"))
  }

  fn remote_url(&self, name: &str) -> Option<String> {
    self.remote.as_ref().map(|template| {
      if template.contains("{name}") {
        template.replace("{name}", name)
      } else {
        format!("{}/{}", template.trim_end_matches('/'), name)
      }
    })
  }

  /// Open the repository for `name`, cloning it first if needed.
  ///
  /// Returns `Ok(None)` when there is neither a local repository nor a remote.
  fn open_or_clone(&mut self, name: &str, fetch_remote: bool) -> Result<Option<gix::Repository>, GitError> {
    let repo_path = self.repo_path(name);

    if repo_path.join(".git").exists() {
      debug!(name, path = %repo_path.display(), "opening existing repository");
      let repo = gix::open(&repo_path).map_err(|e| GitError::Open {
        path: repo_path.clone(),
        source: Box::new(e),
      })?;

      if fetch_remote && !self.fetched.contains(name) {
        let url = self.remote_url(name).unwrap_or_else(|| repo_path.display().to_string());
        with_retries(&url, || fetch_updates(&repo, &url))?;
        self.fetched.insert(name.to_string());
        self.tags.remove(name);
      }
      return Ok(Some(repo));
    }

    let Some(url) = self.remote_url(name) else {
      return Ok(None);
    };

    fs::create_dir_all(&self.root).map_err(|source| GitError::Io {
      path: self.root.clone(),
      source,
    })?;
    info!(name, url, path = %repo_path.display(), "cloning repository");
    let repo = with_retries(&url, || {
      // A failed attempt may leave a partial clone behind.
      if repo_path.exists() {
        let _ = fs::remove_dir_all(&repo_path);
      }
      clone_repo(&url, &repo_path)
    })?;
    self.fetched.insert(name.to_string());
    Ok(Some(repo))
  }

  fn tags_for(&mut self, name: &str, fetch_remote: bool) -> Result<Option<&[Tag]>, SourceError> {
    let needs_fetch = fetch_remote && !self.fetched.contains(name);
    if !self.tags.contains_key(name) || needs_fetch {
      let git_err = |source| SourceError::Git {
        name: name.to_string(),
        source,
      };
      let Some(repo) = self.open_or_clone(name, fetch_remote).map_err(git_err)? else {
        return Ok(None);
      };
      let tags = list_tags(&repo).map_err(git_err)?;
      debug!(name, count = tags.len(), "listed tags");
      self.tags.insert(name.to_string(), tags);
    }
    Ok(self.tags.get(name).map(Vec::as_slice))
  }
}

impl PackageSource for GitPackageSource {
  fn list_versions(&mut self, name: &str, fetch_remote: bool) -> Result<Vec<Version>, SourceError> {
    let tags = self
      .tags_for(name, fetch_remote)?
      .ok_or_else(|| SourceError::NotFound { name: name.to_string() })?;
    Ok(tags.iter().map(|t| t.version.clone()).collect())
  }

  fn checkout(&mut self, name: &str, version: &Version, traits: &Traits) -> Result<ResolvedPackage, SourceError> {
    let key = (name.to_string(), version.clone());
    if let Some(path) = self.checkouts.get(&key) {
      return Ok(ResolvedPackage::load(path, traits)?.with_version(version.clone()));
    }

    let tag = self
      .tags_for(name, false)?
      .and_then(|tags| tags.iter().find(|t| &t.version == version))
      .map(|t| t.name.clone())
      .ok_or_else(|| SourceError::VersionMissing {
        name: name.to_string(),
        version: version.clone(),
      })?;

    let dest = self.checkout_path(name, version);
    if !dest.join(CONFIG_FILE).exists() {
      let git_err = |source| SourceError::Git {
        name: name.to_string(),
        source,
      };
      let repo_path = self.repo_path(name);
      let repo = gix::open(&repo_path)
        .map_err(|e| GitError::Open {
          path: repo_path.clone(),
          source: Box::new(e),
        })
        .map_err(git_err)?;
      export_tag(&repo, &tag, &dest).map_err(git_err)?;
      info!(name, version = %version, path = %dest.display(), "checked out package");
    }

    self.checkouts.insert(key, dest.clone());
    let package = ResolvedPackage::load(&dest, traits)?;
    if package.version() != version {
      warn!(
        name,
        tag = %tag,
        declared = %package.version(),
        "tag does not match the version declared in config.yaml; using the tag"
      );
    }
    Ok(package.with_version(version.clone()))
  }
}

/// Run a network operation, retrying with exponential backoff.
fn with_retries<T>(url: &str, mut op: impl FnMut() -> Result<T, GitError>) -> Result<T, GitError> {
  let mut attempt = 1;
  loop {
    match op() {
      Ok(value) => return Ok(value),
      Err(err) if attempt < FETCH_ATTEMPTS && matches!(err, GitError::Clone { .. } | GitError::Fetch { .. }) => {
        let delay = Duration::from_millis(250 * 2u64.pow(attempt - 1));
        warn!(url, attempt, error = %err, "network operation failed, retrying");
        thread::sleep(delay);
        attempt += 1;
      }
      Err(err) => return Err(err),
    }
  }
}

fn clone_repo(url: &str, dest: &Path) -> Result<gix::Repository, GitError> {
  let mut prepared = gix::prepare_clone(url, dest).map_err(|e| GitError::Clone {
    url: url.to_string(),
    source: Box::new(e),
  })?;

  let (mut checkout, _outcome) = prepared
    .fetch_then_checkout(gix::progress::Discard, &gix::interrupt::IS_INTERRUPTED)
    .map_err(|e| GitError::Clone {
      url: url.to_string(),
      source: Box::new(e),
    })?;

  let (repo, _outcome) = checkout
    .main_worktree(gix::progress::Discard, &gix::interrupt::IS_INTERRUPTED)
    .map_err(|e| GitError::Clone {
      url: url.to_string(),
      source: Box::new(e),
    })?;

  Ok(repo)
}

fn fetch_updates(repo: &gix::Repository, url: &str) -> Result<(), GitError> {
  debug!(url, "fetching updates");
  let fetch_err = |e: BoxError| GitError::Fetch {
    url: url.to_string(),
    source: e,
  };

  let remote = repo
    .find_default_remote(Direction::Fetch)
    .ok_or_else(|| fetch_err("no remote configured for repository".into()))?
    .map_err(|e| fetch_err(Box::new(e)))?;

  remote
    .connect(Direction::Fetch)
    .map_err(|e| fetch_err(Box::new(e)))?
    .prepare_fetch(gix::progress::Discard, Default::default())
    .map_err(|e| fetch_err(Box::new(e)))?
    .receive(gix::progress::Discard, &gix::interrupt::IS_INTERRUPTED)
    .map_err(|e| fetch_err(Box::new(e)))?;

  Ok(())
}

/// Every tag in `repo` whose name parses as a version.
fn list_tags(repo: &gix::Repository) -> Result<Vec<Tag>, GitError> {
  let tags_err = |e: BoxError| GitError::Tags {
    path: repo.path().to_path_buf(),
    source: e,
  };

  let references = repo.references().map_err(|e| tags_err(Box::new(e)))?;
  let mut tags = Vec::new();
  for reference in references.tags().map_err(|e| tags_err(Box::new(e)))? {
    let reference = reference.map_err(|e| tags_err(e.into()))?;
    let name = reference.name().shorten().to_string();
    match parse_version(&name) {
      Ok(version) => tags.push(Tag { name, version }),
      Err(_) => debug!(tag = %name, "ignoring tag that is not a version"),
    }
  }
  tags.sort_by(|a, b| a.version.cmp(&b.version));
  Ok(tags)
}

/// Write the tree of `tag` into `dest`, replacing whatever was there.
fn export_tag(repo: &gix::Repository, tag: &str, dest: &Path) -> Result<(), GitError> {
  let export_err = |e: BoxError| GitError::Export {
    tag: tag.to_string(),
    source: e,
  };
  let io_err = |path: &Path| {
    let path = path.to_path_buf();
    move |source| GitError::Io { path, source }
  };

  let tree = repo
    .rev_parse_single(format!("refs/tags/{tag}").as_str())
    .map_err(|e| export_err(Box::new(e)))?
    .object()
    .map_err(|e| export_err(Box::new(e)))?
    .peel_to_tree()
    .map_err(|e| export_err(Box::new(e)))?;

  let parent = dest.parent().unwrap_or(dest);
  fs::create_dir_all(parent).map_err(io_err(parent))?;
  let staging = tempfile::Builder::new()
    .prefix(".export-")
    .tempdir_in(parent)
    .map_err(io_err(parent))?;

  write_tree(tree, staging.path()).map_err(|e| match e {
    ExportError::Io(path, source) => GitError::Io { path, source },
    ExportError::Git(source) => export_err(source),
  })?;

  if dest.exists() {
    fs::remove_dir_all(dest).map_err(io_err(dest))?;
  }
  fs::rename(staging.path(), dest).map_err(io_err(dest))?;
  Ok(())
}

enum ExportError {
  Io(PathBuf, io::Error),
  Git(BoxError),
}

fn write_tree(tree: gix::Tree<'_>, dest: &Path) -> Result<(), ExportError> {
  fs::create_dir_all(dest).map_err(|e| ExportError::Io(dest.to_path_buf(), e))?;

  for entry in tree.iter() {
    let entry = entry.map_err(|e| ExportError::Git(Box::new(e)))?;
    let path = dest.join(entry.filename().to_string());
    let mode = entry.mode();

    if mode.is_commit() {
      // Submodules are not part of a package.
      continue;
    }

    let object = entry.object().map_err(|e| ExportError::Git(Box::new(e)))?;
    if mode.is_tree() {
      let subtree = object.peel_to_tree().map_err(|e| ExportError::Git(Box::new(e)))?;
      write_tree(subtree, &path)?;
    } else {
      fs::write(&path, &object.data).map_err(|e| ExportError::Io(path.clone(), e))?;
    }
  }
  Ok(())
}
