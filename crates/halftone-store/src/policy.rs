use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

/// Per-entry expiration policy.
///
/// A policy combines an optional sliding window (each successful read re-arms
/// the entry's deadline) with zero-or-more [`ChangeMonitor`]s that can
/// invalidate the entry independently of the timer.
#[derive(Debug, Default)]
pub struct ExpirationPolicy {
    sliding: Option<Duration>,
    monitors: Vec<Box<dyn ChangeMonitor>>,
}

impl ExpirationPolicy {
    /// Policy with a sliding expiration window and no monitors.
    pub fn sliding(window: Duration) -> Self {
        Self {
            sliding: Some(window),
            monitors: Vec::new(),
        }
    }

    /// Attaches a change monitor to this policy.
    pub fn with_monitor(mut self, monitor: Box<dyn ChangeMonitor>) -> Self {
        self.monitors.push(monitor);
        self
    }

    pub fn sliding_window(&self) -> Option<Duration> {
        self.sliding
    }

    pub fn monitors(&self) -> &[Box<dyn ChangeMonitor>] {
        &self.monitors
    }

    pub fn into_parts(self) -> (Option<Duration>, Vec<Box<dyn ChangeMonitor>>) {
        (self.sliding, self.monitors)
    }
}

/// Invalidation strategy attached to a stored entry.
///
/// Monitors are polled on every read ([`ChangeMonitor::changed`]); a store
/// wired to a file watcher additionally registers [`watch_paths`] for eager,
/// push-based removal. Polling is the correctness backstop, so a monitor must
/// answer `changed` truthfully even when no watcher is attached.
///
///// [`watch_paths`]: ChangeMonitor::watch_paths
pub trait ChangeMonitor: fmt::Debug + Send + Sync {
    /// Whether the monitored resource has changed since the monitor was built.
    ///
    /// Once this returns `true` it must keep returning `true`; entries are
    /// removed on the first changed observation and never resurrected.
    fn changed(&self) -> bool;

    /// Local filesystem paths to register with a push-based watcher, if any.
    fn watch_paths(&self) -> &[PathBuf] {
        &[]
    }
}

/// Monitors a single file for modification or deletion.
///
/// Captures an mtime/length baseline at construction; construction fails if
/// the file cannot be stat'ed, which callers treat as an invalid cache source.
#[derive(Debug)]
pub struct FileChangeMonitor {
    path: [PathBuf; 1],
    baseline: FileStamp,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct FileStamp {
    len: u64,
    modified: Option<SystemTime>,
}

impl FileStamp {
    fn read(path: &Path) -> io::Result<Self> {
        let meta = fs::metadata(path)?;
        Ok(Self {
            len: meta.len(),
            // Not all filesystems report mtime; length alone still catches
            // most rewrites.
            modified: meta.modified().ok(),
        })
    }
}

impl FileChangeMonitor {
    pub fn new(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        let baseline = FileStamp::read(&path)?;
        Ok(Self {
            path: [path],
            baseline,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path[0]
    }
}

impl ChangeMonitor for FileChangeMonitor {
    fn changed(&self) -> bool {
        match FileStamp::read(self.path()) {
            Ok(stamp) => stamp != self.baseline,
            // Deleted, or no longer readable: either way the baseline is gone.
            Err(_) => true,
        }
    }

    fn watch_paths(&self) -> &[PathBuf] {
        &self.path
    }
}
