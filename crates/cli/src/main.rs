mod cmd;
mod output;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Result;
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use clyde_lib::error::Error as ClydeError;
use clyde_lib::package::PackageType;
use clyde_lib::platform::Platform;
use clyde_lib::project::BuildOptions;

use crate::output::{OutputFormat, print_error};

/// clyde - Source-level package manager for C and C++
#[derive(Parser)]
#[command(name = "clyde")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Enable verbose output
  #[arg(short, long, global = true)]
  verbose: bool,

  /// Run as if started in this directory
  #[arg(short = 'C', long = "directory", global = true, default_value = ".")]
  directory: PathBuf,

  #[command(subcommand)]
  command: Commands,
}

/// Flags shared by every command that resolves the dependency graph.
#[derive(Args, Debug, Clone, Default)]
pub struct BuildArgs {
  /// Variant of the root package to build
  #[arg(long)]
  pub variant: Option<String>,

  /// Target platform (linux, darwin, windows, rtems)
  #[arg(long)]
  pub platform: Option<Platform>,

  /// Board support package providing the cross toolchain
  #[arg(long)]
  pub bsp: Option<PathBuf>,

  /// Do not refresh package repositories from their remotes
  #[arg(long)]
  pub fast: bool,

  /// Use the versions pinned in versions.txt instead of resolving
  #[arg(long)]
  pub frozen: bool,
}

impl From<&BuildArgs> for BuildOptions {
  fn from(args: &BuildArgs) -> Self {
    BuildOptions {
      variant: args.variant.clone(),
      platform: args.platform,
      bsp: args.bsp.clone(),
      fast: args.fast,
      frozen: args.frozen,
    }
  }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum PackageKind {
  Library,
  Application,
}

impl From<PackageKind> for PackageType {
  fn from(kind: PackageKind) -> Self {
    match kind {
      PackageKind::Library => PackageType::Library,
      PackageKind::Application => PackageType::Application,
    }
  }
}

#[derive(Subcommand)]
enum Commands {
  /// Resolve dependencies and write build.ninja
  #[command(name = "gen")]
  Generate {
    #[command(flatten)]
    build: BuildArgs,
  },

  /// Build the package natively, reusing cached dependencies
  Build {
    #[command(flatten)]
    build: BuildArgs,
  },

  /// Build the test variant and run it
  Test {
    #[command(flatten)]
    build: BuildArgs,

    /// Arguments passed to the test runner
    #[arg(last = true)]
    args: Vec<String>,
  },

  /// Build the application and run it
  Run {
    #[command(flatten)]
    build: BuildArgs,

    /// Arguments passed to the application
    #[arg(last = true)]
    args: Vec<String>,
  },

  /// Resolve and check out dependencies without building
  Fetch {
    #[command(flatten)]
    build: BuildArgs,

    /// Output format
    #[arg(short, long, value_enum, default_value_t)]
    output: OutputFormat,
  },

  /// Create a new package
  Init {
    /// Kind of package to create
    #[arg(value_enum)]
    kind: PackageKind,

    /// Package directory; its name becomes the package name
    #[arg(default_value = ".")]
    path: PathBuf,
  },

  /// Remove build outputs of the package
  Clean,

  /// Remove every artifact from the store
  Flush,
}

fn main() -> ExitCode {
  let cli = Cli::parse();
  init_tracing(cli.verbose);

  match run(cli.command, &cli.directory) {
    Ok(code) => code,
    Err(err) => {
      report(&err, cli.verbose);
      ExitCode::FAILURE
    }
  }
}

fn run(command: Commands, dir: &Path) -> Result<ExitCode> {
  match command {
    Commands::Generate { build } => cmd::cmd_generate(dir, &build)?,
    Commands::Build { build } => cmd::cmd_build(dir, &build)?,
    Commands::Test { build, args } => return cmd::cmd_test(dir, &build, &args),
    Commands::Run { build, args } => return cmd::cmd_run(dir, &build, &args),
    Commands::Fetch { build, output } => cmd::cmd_fetch(dir, &build, output)?,
    Commands::Init { kind, path } => cmd::cmd_init(&dir.join(path), kind.into())?,
    Commands::Clean => cmd::cmd_clean(dir)?,
    Commands::Flush => cmd::cmd_flush(dir)?,
  }
  Ok(ExitCode::SUCCESS)
}

fn init_tracing(verbose: bool) {
  let default = if verbose { "debug" } else { "warn" };
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .with_target(false)
    .without_time()
    .init();
}

/// One error line; with `--verbose` every cause on its own line.
fn report(err: &anyhow::Error, verbose: bool) {
  let kind = err.chain().find_map(|e| e.downcast_ref::<ClydeError>()).map(ClydeError::kind);
  let prefix = kind.map(|k| format!("{k}: ")).unwrap_or_default();

  if !verbose {
    print_error(&format!("{prefix}{err:#}"));
    return;
  }
  print_error(&format!("{prefix}{err}"));
  for cause in err.chain().skip(1) {
    eprintln!("    caused by: {cause}");
  }
}
