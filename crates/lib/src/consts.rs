//! Names and limits shared across the crate.

pub const APP_NAME: &str = "clyde";

/// Package descriptor file at the root of every package.
pub const CONFIG_FILE: &str = "config.yaml";

/// Frozen version ledger written next to the root package.
pub const VERSIONS_FILE: &str = "versions.txt";

/// Emitted build graph.
pub const NINJA_FILE: &str = "build.ninja";

/// Build output directory relative to the root package.
pub const BUILD_DIR: &str = "build";

/// Marker written into a store entry once it is complete.
pub const BUILD_COMPLETE_MARKER: &str = ".clyde-complete";

/// Descriptor record written into every store entry.
pub const DESCRIPTOR_FILE: &str = "descriptor.json";

/// Name of the implicit variant every package carries.
pub const SRC_VARIANT: &str = "src";

/// Variant that turns the root package into a test runner.
pub const TEST_VARIANT: &str = "test";

/// Version used for packages built from a local path.
pub const LOCAL_VERSION: &str = "local";

/// Upper bound on resolver passes before giving up.
pub const MAX_RESOLVE_ITERATIONS: usize = 64;

/// Attempts made for a network fetch before failing.
pub const FETCH_ATTEMPTS: u32 = 3;

pub const ENV_STORE: &str = "CLYDE_STORE";
pub const ENV_PARENT_STORE: &str = "CLYDE_PARENT_STORE";
pub const ENV_GIT_ROOT: &str = "CLYDE_GIT_ROOT";
pub const ENV_REMOTE: &str = "CLYDE_REMOTE";
