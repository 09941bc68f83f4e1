//! In-memory front door of the halftone artifact cache.
//!
//! Before the disk or network tier is consulted, request handlers probe this
//! index; after a slow-tier lookup succeeds, they populate it so repeated
//! requests for the same artifact resolve straight from memory.
//!
//! The index itself is a thin orchestration layer: key derivation, policy
//! assembly, and Get/Add/Remove over an injected
//! [`ExpiringStore`](halftone_store::ExpiringStore). It holds no locks and no
//! lifecycle bookkeeping of its own — entry lifetime is exactly what the
//! store's policy dictates.
//!
//! # Lookup keys
//!
//! Keys are derived from path strings by stripping directory components and
//! the final extension (see [`artifact_stem`]). Two paths that share a base
//! filename deliberately collide: handlers can probe the index with a
//! reconstructed filename without knowing the original request path.

mod descriptor;
mod error;
mod index;
mod key;
mod uri;

pub use descriptor::{CachedArtifact, Descriptor};
pub use error::CacheError;
pub use index::{CacheIndex, SLIDING_EXPIRATION};
pub use key::artifact_stem;
pub use uri::local_file_path;
