//! Package descriptors, variants and resolved packages.

pub mod config;
pub mod resolved;
pub mod variants;

pub use config::{Cflags, ConfigError, PackageConfig, PackageType, Requirement, VariantClause};
pub use resolved::{InflateError, ResolvedPackage};
pub use variants::{DEFAULT_COMPILER, VariantResolution, resolve_variants};
