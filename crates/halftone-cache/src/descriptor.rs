use std::time::SystemTime;

use serde::{Deserialize, Serialize};

/// A cached artifact descriptor the index can store.
///
/// The index only looks at the logical key (insertion) and the artifact
/// location (monitor attachment); everything else the descriptor carries is
/// opaque to it.
pub trait Descriptor: Clone + Send + Sync + 'static {
    /// Canonical identifier, stable across requests for the same artifact.
    fn key(&self) -> &str;

    /// Location of the artifact: a `file:` URI, a plain filesystem path, or a
    /// remote URI.
    fn path(&self) -> &str;
}

/// Stock descriptor for a processed image artifact.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CachedArtifact {
    pub key: String,
    pub path: String,
    /// When the artifact was produced.
    pub created: SystemTime,
}

impl CachedArtifact {
    pub fn new(key: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            path: path.into(),
            created: SystemTime::now(),
        }
    }
}

impl Descriptor for CachedArtifact {
    fn key(&self) -> &str {
        &self.key
    }

    fn path(&self) -> &str {
        &self.path
    }
}
