use std::io;
use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, CacheError>;

/// Errors produced by the cache index.
///
/// "Absent" is not an error: lookups return `Option` and removals return a
/// `bool`. The index adds no retry logic and swallows nothing — a failed add
/// just means the artifact is not cached for that request.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// The artifact's local file could not be set up for change monitoring
    /// (missing, unreadable). Indicates a caller-supplied invalid path.
    #[error("cannot monitor {path} for changes: {source}")]
    Monitor {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}
