//! Push-based file watching for eager cache invalidation.
//!
//! [`MemoryStore`](crate::MemoryStore) works without a watcher: change
//! monitors are polled on every read. Attaching a [`FileWatcher`] upgrades
//! invalidation from "on next read" to "as soon as the OS reports a change".
//!
//! The OS backend (currently `notify`) is feature-gated behind `watch-notify`
//! so library consumers don't take on platform watcher dependencies they
//! don't use. Everything above the backend depends only on the
//! [`FileWatcher`] trait and the [`WatchEvent`] model, and tests inject the
//! deterministic [`ManualFileWatcher`] instead of relying on OS timing.
//!
//! Backends may coalesce or drop events. A backend that drops events must
//! emit [`WatchEvent::Rescan`] so the store can conservatively invalidate
//! every monitored entry instead of silently serving stale data.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};

use crossbeam_channel as channel;

/// An event produced by a file watcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    /// The given local paths were created, modified, deleted, or renamed.
    ///
    /// The store does not distinguish the change kind: any activity on a
    /// monitored file invalidates the entries registered for it.
    Paths(Vec<PathBuf>),
    /// The watcher dropped events; every monitored entry must be treated as
    /// potentially changed.
    Rescan,
}

/// Message type delivered by a [`FileWatcher`].
///
/// Backends may surface errors asynchronously; these are delivered on the
/// same stream and handled like [`WatchEvent::Rescan`] by the store.
pub type WatchMessage = io::Result<WatchEvent>;

/// Event-driven watcher abstraction.
///
/// Watches are per-file and non-recursive; the store registers exactly the
/// paths its change monitors name.
pub trait FileWatcher: Send {
    /// Begin watching the file at `path`.
    fn watch_path(&mut self, path: &Path) -> io::Result<()>;

    /// Stop watching the file at `path`.
    ///
    /// Unwatching a path that was never watched is a no-op.
    fn unwatch_path(&mut self, path: &Path) -> io::Result<()>;

    /// Returns the receiver used to consume watcher events.
    fn receiver(&self) -> &channel::Receiver<WatchMessage>;
}

impl<W: ?Sized + FileWatcher> FileWatcher for Box<W> {
    fn watch_path(&mut self, path: &Path) -> io::Result<()> {
        self.as_mut().watch_path(path)
    }

    fn unwatch_path(&mut self, path: &Path) -> io::Result<()> {
        self.as_mut().unwatch_path(path)
    }

    fn receiver(&self) -> &channel::Receiver<WatchMessage> {
        self.as_ref().receiver()
    }
}

const MANUAL_WATCH_QUEUE_CAPACITY: usize = 1024;

/// Deterministic watcher implementation for tests.
///
/// Does not touch the OS. Events are injected via [`ManualFileWatcher::push`]
/// or a [`ManualFileWatcherHandle`], which stays usable after the watcher has
/// been moved into a store.
#[derive(Debug)]
pub struct ManualFileWatcher {
    tx: channel::Sender<WatchMessage>,
    rx: channel::Receiver<WatchMessage>,
    watched: HashMap<PathBuf, usize>,
}

/// Cloneable handle for injecting events into a [`ManualFileWatcher`].
#[derive(Debug, Clone)]
pub struct ManualFileWatcherHandle {
    tx: channel::Sender<WatchMessage>,
}

impl ManualFileWatcherHandle {
    /// Inject a synthetic watcher event.
    pub fn push(&self, event: WatchEvent) -> io::Result<()> {
        self.send(Ok(event))
    }

    /// Inject an asynchronous watcher error.
    pub fn push_error(&self, error: io::Error) -> io::Result<()> {
        self.send(Err(error))
    }

    fn send(&self, msg: WatchMessage) -> io::Result<()> {
        match self.tx.try_send(msg) {
            Ok(()) => Ok(()),
            Err(channel::TrySendError::Full(_)) => Err(io::Error::new(
                io::ErrorKind::WouldBlock,
                "watch queue is full",
            )),
            Err(channel::TrySendError::Disconnected(_)) => Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "watch receiver dropped",
            )),
        }
    }
}

impl Default for ManualFileWatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualFileWatcher {
    pub fn new() -> Self {
        let (tx, rx) = channel::bounded(MANUAL_WATCH_QUEUE_CAPACITY);
        Self {
            tx,
            rx,
            watched: HashMap::new(),
        }
    }

    /// Returns a handle that can inject events after the watcher has been
    /// moved into a store.
    pub fn handle(&self) -> ManualFileWatcherHandle {
        ManualFileWatcherHandle {
            tx: self.tx.clone(),
        }
    }

    /// Inject a synthetic watcher event.
    pub fn push(&self, event: WatchEvent) -> io::Result<()> {
        self.handle().push(event)
    }

    /// Currently watched paths (sorted for determinism).
    pub fn watched_paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self.watched.keys().cloned().collect();
        paths.sort();
        paths
    }
}

impl FileWatcher for ManualFileWatcher {
    fn watch_path(&mut self, path: &Path) -> io::Result<()> {
        *self.watched.entry(path.to_path_buf()).or_insert(0) += 1;
        Ok(())
    }

    fn unwatch_path(&mut self, path: &Path) -> io::Result<()> {
        if let Some(count) = self.watched.get_mut(path) {
            *count -= 1;
            if *count == 0 {
                self.watched.remove(path);
            }
        }
        Ok(())
    }

    fn receiver(&self) -> &channel::Receiver<WatchMessage> {
        &self.rx
    }
}

#[cfg(any(test, feature = "watch-notify"))]
mod notify_impl {
    use super::*;

    use notify::EventKind;

    /// Maps a raw `notify` event onto the store's event model.
    ///
    /// Returns `None` for events the store never cares about (pure access
    /// notifications, path-less noise).
    pub(super) fn normalize_event(event: notify::Event) -> Option<WatchEvent> {
        // `notify` signals dropped/coalesced events with a rescan flag; some
        // backends also emit a path-less `EventKind::Other`.
        if matches!(event.attrs.flag(), Some(notify::event::Flag::Rescan))
            || (matches!(event.kind, EventKind::Other) && event.paths.is_empty())
        {
            return Some(WatchEvent::Rescan);
        }

        match event.kind {
            EventKind::Access(_) => None,
            _ if event.paths.is_empty() => None,
            _ => Some(WatchEvent::Paths(event.paths)),
        }
    }

    #[cfg(feature = "watch-notify")]
    pub use backend::NotifyFileWatcher;

    #[cfg(feature = "watch-notify")]
    mod backend {
        use super::*;

        use std::collections::HashMap;
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::sync::Arc;

        use notify::{RecursiveMode, Watcher};

        const EVENT_QUEUE_CAPACITY: usize = 1024;

        fn notify_error_to_io(err: notify::Error) -> io::Error {
            io::Error::other(err)
        }

        /// Delivers a message over the bounded event queue.
        ///
        /// On overflow the message is dropped and a pending-rescan flag is
        /// set; the next delivery attempt first tries to flush a
        /// [`WatchEvent::Rescan`] so consumers know events were lost.
        fn deliver(
            tx: &channel::Sender<WatchMessage>,
            overflowed: &AtomicBool,
            msg: WatchMessage,
        ) {
            if overflowed.load(Ordering::Acquire) {
                match tx.try_send(Ok(WatchEvent::Rescan)) {
                    Ok(()) => overflowed.store(false, Ordering::Release),
                    // Rescan still pending; the fresh message is subsumed by it.
                    Err(channel::TrySendError::Full(_)) => return,
                    Err(channel::TrySendError::Disconnected(_)) => return,
                }
            }
            if let Err(channel::TrySendError::Full(_)) = tx.try_send(msg) {
                overflowed.store(true, Ordering::Release);
            }
        }

        /// OS file watcher backed by the `notify` crate.
        ///
        /// Watches individual files. If the file itself cannot be watched
        /// (some platforms reject watches on soon-to-be-replaced files), the
        /// watch falls back to the parent directory; events for sibling
        /// files are filtered out by the store's path registry.
        pub struct NotifyFileWatcher {
            watcher: notify::RecommendedWatcher,
            rx: channel::Receiver<WatchMessage>,
            // requested path -> actually watched path
            requested: HashMap<PathBuf, PathBuf>,
            // actually watched path -> refcount
            actual: HashMap<PathBuf, usize>,
        }

        impl NotifyFileWatcher {
            pub fn new() -> io::Result<Self> {
                let (tx, rx) = channel::bounded::<WatchMessage>(EVENT_QUEUE_CAPACITY);
                let overflowed = Arc::new(AtomicBool::new(false));

                let watcher = notify::recommended_watcher(
                    move |res: notify::Result<notify::Event>| match res {
                        Ok(event) => {
                            if let Some(event) = normalize_event(event) {
                                deliver(&tx, &overflowed, Ok(event));
                            }
                        }
                        Err(err) => deliver(&tx, &overflowed, Err(notify_error_to_io(err))),
                    },
                )
                .map_err(notify_error_to_io)?;

                Ok(Self {
                    watcher,
                    rx,
                    requested: HashMap::new(),
                    actual: HashMap::new(),
                })
            }

            fn watch_actual(&mut self, requested: PathBuf, actual: PathBuf) -> io::Result<()> {
                match self.actual.get_mut(&actual) {
                    Some(count) => *count += 1,
                    None => {
                        self.watcher
                            .watch(&actual, RecursiveMode::NonRecursive)
                            .map_err(notify_error_to_io)?;
                        self.actual.insert(actual.clone(), 1);
                    }
                }
                self.requested.insert(requested, actual);
                Ok(())
            }
        }

        impl FileWatcher for NotifyFileWatcher {
            fn watch_path(&mut self, path: &Path) -> io::Result<()> {
                if self.requested.contains_key(path) {
                    return Ok(());
                }
                match self.watch_actual(path.to_path_buf(), path.to_path_buf()) {
                    Ok(()) => Ok(()),
                    Err(_) => {
                        let parent = path.parent().ok_or_else(|| {
                            io::Error::new(io::ErrorKind::InvalidInput, "path has no parent")
                        })?;
                        self.watch_actual(path.to_path_buf(), parent.to_path_buf())
                    }
                }
            }

            fn unwatch_path(&mut self, path: &Path) -> io::Result<()> {
                let Some(actual) = self.requested.remove(path) else {
                    return Ok(());
                };
                let Some(count) = self.actual.get_mut(&actual) else {
                    return Ok(());
                };
                *count -= 1;
                if *count == 0 {
                    self.actual.remove(&actual);
                    self.watcher.unwatch(&actual).map_err(notify_error_to_io)?;
                }
                Ok(())
            }

            fn receiver(&self) -> &channel::Receiver<WatchMessage> {
                &self.rx
            }
        }
    }

}

#[cfg(feature = "watch-notify")]
pub use notify_impl::NotifyFileWatcher;
