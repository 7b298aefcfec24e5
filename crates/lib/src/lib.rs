//! clyde-lib: Core logic for the clyde package manager
//!
//! clyde fetches C and C++ source packages, resolves a consistent version for
//! every transitive dependency and turns the result into something buildable:
//! - `package`: descriptors, variants and resolved packages
//! - `resolve`: the fixed-point version resolver and the frozen ledger
//! - `tree`: the build tree with propagated include paths
//! - `cache`: the content-addressed artifact store
//! - `emit`: the ninja build-graph emitter
//! - `build`: native compilation through the artifact store

pub mod build;
pub mod cache;
pub mod consts;
pub mod emit;
pub mod error;
pub mod init;
pub mod package;
pub mod platform;
pub mod project;
pub mod resolve;
pub mod settings;
pub mod source;
pub mod toolchain;
pub mod traits;
pub mod tree;
pub mod util;
pub mod version;
