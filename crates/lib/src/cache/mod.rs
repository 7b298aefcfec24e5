//! Content-addressed caching of built packages.
//!
//! A build is identified by its [`PackageDescriptor`]; the [`stable_sha`] of
//! the descriptor names the directory in the [`ArtifactStore`] that holds the
//! result.

pub mod descriptor;
pub mod hash;
pub mod lock;
pub mod store;

pub use descriptor::{Digest, Form, PackageDescriptor};
pub use hash::{HashError, stable_sha, stable_sha_of};
pub use lock::{DigestLock, LockError, LockMode, StoreLock};
pub use store::{Artifact, ArtifactStore, StoreError};
