//! End-to-end tests: resolve, build the tree, emit and compile.

mod common;

use std::fs;

use clyde_lib::error::{Error, ErrorKind};
use clyde_lib::project::{BuildOptions, ProjectError};
use clyde_lib::resolve::ResolveError;
use semver::Version;

use common::{Fixture, Workspace, cc_available};

/// app -> b, c; b and c both need d with overlapping ranges.
fn diamond(ws: &mut Workspace) -> std::path::PathBuf {
  ws.publish(Fixture::library("b", "1.0.0").requires("d", ">=1.0,<2.0"));
  ws.publish(Fixture::library("c", "1.0.0").requires("d", ">=1.5"));
  for version in ["1.0.0", "1.6.0", "2.0.0"] {
    ws.publish(Fixture::library("d", version));
  }
  ws.root(Fixture::application("app").requires("b", "*").requires("c", "*"))
}

mod generate {
  use super::*;

  #[test]
  fn diamond_converges_and_writes_ledger() {
    let mut ws = Workspace::new();
    let app = diamond(&mut ws);
    let project = ws.project(&app, None);

    let plan = project.plan_with(&BuildOptions::default(), &mut ws.source).unwrap();
    assert_eq!(plan.tree.len(), 4);
    assert_eq!(plan.tree.nodes().filter(|n| n.name == "d").count(), 1);
    assert_eq!(plan.resolution.get("d").unwrap().version(), &Version::new(1, 6, 0));

    let ledger = fs::read_to_string(app.join("versions.txt")).unwrap();
    assert_eq!(ledger, "app=local\nb=1.0.0\nc=1.0.0\nd=1.6.0\n");
  }

  #[test]
  fn build_file_is_reproducible() {
    let mut ws = Workspace::new();
    let app = diamond(&mut ws);
    let project = ws.project(&app, None);

    let path = project.generate_with(&BuildOptions::default(), &mut ws.source).unwrap();
    let first = fs::read_to_string(&path).unwrap();
    project.generate_with(&BuildOptions::default(), &mut ws.source).unwrap();
    let second = fs::read_to_string(&path).unwrap();

    assert_eq!(first, second);
    assert!(first.contains("rule cc"));
    assert!(first.ends_with("default prefix/bin/app\n"), "{first}");
    // One archive per library, d included once
    assert_eq!(first.matches("build prefix/lib/d.a: ar").count(), 1);
  }
}

mod frozen {
  use super::*;

  #[test]
  fn pinned_versions_win_over_newer_releases() {
    let mut ws = Workspace::new();
    let app = diamond(&mut ws);
    let project = ws.project(&app, None);
    project.plan_with(&BuildOptions::default(), &mut ws.source).unwrap();

    ws.publish(Fixture::library("d", "1.9.0"));

    let frozen = BuildOptions {
      frozen: true,
      ..Default::default()
    };
    let plan = project.plan_with(&frozen, &mut ws.source).unwrap();
    assert_eq!(plan.resolution.get("d").unwrap().version(), &Version::new(1, 6, 0));

    let plan = project.plan_with(&BuildOptions::default(), &mut ws.source).unwrap();
    assert_eq!(plan.resolution.get("d").unwrap().version(), &Version::new(1, 9, 0));
  }

  #[test]
  fn missing_ledger_is_config_error() {
    let mut ws = Workspace::new();
    let app = diamond(&mut ws);
    let project = ws.project(&app, None);
    let frozen = BuildOptions {
      frozen: true,
      ..Default::default()
    };

    let err = project.plan_with(&frozen, &mut ws.source).unwrap_err();
    assert!(matches!(err, Error::Project(ProjectError::MissingLedger { .. })));
    assert_eq!(err.kind(), ErrorKind::Config);
  }
}

mod failures {
  use super::*;

  #[test]
  fn incompatible_exact_requirements_name_the_package() {
    let mut ws = Workspace::new();
    ws.publish(Fixture::library("e", "1.0.0"));
    ws.publish(Fixture::library("e", "2.0.0"));
    ws.publish(Fixture::library("f", "1.0.0").requires("e", "==2.0"));
    let app = ws.root(Fixture::application("app").requires("e", "==1.0").requires("f", "*"));
    let project = ws.project(&app, None);

    let err = project.plan_with(&BuildOptions::default(), &mut ws.source).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Constraint);
    assert!(matches!(err, Error::Resolve(ResolveError::Conflict { ref dependency, .. }) if dependency == "e"));
  }

  #[test]
  fn unknown_dependency_is_lookup_error() {
    let mut ws = Workspace::new();
    let app = ws.root(Fixture::application("app").requires("ghost", "*"));
    let project = ws.project(&app, None);

    let err = project.plan_with(&BuildOptions::default(), &mut ws.source).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Lookup);
    assert!(err.to_string().contains("ghost"));
  }

  #[test]
  fn empty_test_variant_is_config_error() {
    let mut ws = Workspace::new();
    let lib = ws.root(Fixture::library("ringbuf", "0.1.0").variant("test"));
    // The test variant directory exists but holds nothing to compile
    fs::create_dir_all(lib.join("test")).unwrap();
    let project = ws.project(&lib, None);

    let options = BuildOptions {
      variant: Some("test".to_string()),
      ..Default::default()
    };
    let err = project.plan_with(&options, &mut ws.source).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Config);
    assert!(err.to_string().contains("no source files"));
  }
}

mod native {
  use super::*;

  fn store_entries(ws: &Workspace) -> usize {
    fs::read_dir(ws.store())
      .unwrap()
      .filter_map(Result::ok)
      .filter(|e| e.path().is_dir() && !e.file_name().to_string_lossy().starts_with('.'))
      .count()
  }

  #[test]
  fn builds_runs_and_reuses_cached_dependencies() {
    if !cc_available() {
      return;
    }
    let mut ws = Workspace::new();
    let app = diamond(&mut ws);
    let project = ws.project(&app, Some("cc"));

    let output = project.build_with(&BuildOptions::default(), &mut ws.source).unwrap();
    let binary = output.binary.unwrap();
    assert!(binary.exists());
    assert_eq!(output.dependencies.len(), 3);
    assert_eq!(store_entries(&ws), 3);

    let status = project.run_with(&BuildOptions::default(), &mut ws.source, &[]).unwrap();
    assert!(status.success());
    assert_eq!(store_entries(&ws), 3);
  }

  #[test]
  fn running_a_library_is_refused() {
    if !cc_available() {
      return;
    }
    let mut ws = Workspace::new();
    let lib = ws.root(Fixture::library("ringbuf", "0.1.0"));
    let project = ws.project(&lib, Some("cc"));

    let err = project.run_with(&BuildOptions::default(), &mut ws.source, &[]).unwrap_err();
    assert!(matches!(err, Error::Project(ProjectError::NotAnApplication { .. })));
  }
}
