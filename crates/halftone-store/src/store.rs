use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Weak};
use std::time::Instant;

use parking_lot::Mutex;

use crate::clock::{Clock, SystemClock};
use crate::policy::{ChangeMonitor, ExpirationPolicy};
use crate::watch::{FileWatcher, WatchEvent};

/// Concurrent associative store with per-entry expiration.
///
/// All three operations are individually atomic per key and non-blocking
/// beyond a brief internal critical section. A value that has been removed or
/// has expired is never returned by a subsequent [`get`](ExpiringStore::get)
/// unless re-inserted.
///
/// The trait is object-safe so callers can hold an `Arc<dyn ExpiringStore<V>>`
/// and swap in deterministic doubles for tests.
pub trait ExpiringStore<V>: Send + Sync {
    /// Returns the value stored under `key`, if present and still valid.
    fn get(&self, key: &str) -> Option<V>;

    /// Inserts `value` under `key`, replacing any previous entry.
    ///
    /// The entry's lifetime is governed entirely by `policy`.
    fn add(&self, key: &str, value: V, policy: ExpirationPolicy);

    /// Removes the entry under `key`. Returns whether an entry was present.
    fn remove(&self, key: &str) -> bool;
}

/// In-memory [`ExpiringStore`] implementation.
///
/// Expiry is enforced lazily: a read that finds an entry past its sliding
/// deadline, or whose change monitor reports a change, removes the entry and
/// reports a miss. With [`MemoryStore::with_watcher`] invalidation is
/// additionally pushed from the watcher thread, so monitored entries
/// disappear without waiting for the next read.
pub struct MemoryStore<V> {
    inner: Arc<Inner<V>>,
    watch: Option<WatchHandle>,
}

struct Inner<V> {
    clock: Arc<dyn Clock>,
    entries: Mutex<EntryMap<V>>,
}

struct EntryMap<V> {
    by_key: HashMap<String, StoredEntry<V>>,
    /// Watched local path -> keys whose monitors registered it.
    by_path: HashMap<PathBuf, HashSet<String>>,
    next_generation: u64,
}

struct StoredEntry<V> {
    value: V,
    window: Option<std::time::Duration>,
    deadline: Option<Instant>,
    /// Distinguishes this insertion from any later insertion under the same
    /// key, so a staleness verdict reached against one entry is never applied
    /// to its replacement.
    generation: u64,
    monitors: Arc<Vec<Box<dyn ChangeMonitor>>>,
    watch_paths: Vec<PathBuf>,
}

impl<V> EntryMap<V> {
    fn new() -> Self {
        Self {
            by_key: HashMap::new(),
            by_path: HashMap::new(),
            next_generation: 0,
        }
    }

    fn alloc_generation(&mut self) -> u64 {
        let generation = self.next_generation;
        self.next_generation += 1;
        generation
    }

    /// Removes `key` and its path registrations.
    ///
    /// Returns the paths that no longer back any entry (candidates for
    /// unwatching), or `None` if the key was absent.
    fn detach(&mut self, key: &str) -> Option<Vec<PathBuf>> {
        let entry = self.by_key.remove(key)?;
        let mut released = Vec::new();
        for path in entry.watch_paths {
            if let Some(keys) = self.by_path.get_mut(&path) {
                keys.remove(key);
                if keys.is_empty() {
                    self.by_path.remove(&path);
                    released.push(path);
                }
            }
        }
        Some(released)
    }

    /// Keys registered for any of `paths`.
    fn keys_for_paths<'a>(&self, paths: impl IntoIterator<Item = &'a PathBuf>) -> Vec<String> {
        let mut keys = Vec::new();
        for path in paths {
            if let Some(registered) = self.by_path.get(path) {
                keys.extend(registered.iter().cloned());
            }
        }
        keys.sort();
        keys.dedup();
        keys
    }

    /// Keys of every entry that carries at least one change monitor.
    fn monitored_keys(&self) -> Vec<String> {
        self.by_key
            .iter()
            .filter(|(_, entry)| !entry.monitors.is_empty())
            .map(|(key, _)| key.clone())
            .collect()
    }
}

impl<V: Clone + Send + Sync + 'static> Default for MemoryStore<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Clone + Send + Sync + 'static> MemoryStore<V> {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(Inner {
                clock,
                entries: Mutex::new(EntryMap::new()),
            }),
            watch: None,
        }
    }

    /// Store with push-based invalidation driven by `watcher`.
    pub fn with_watcher(watcher: Box<dyn FileWatcher>) -> Self {
        Self::with_clock_and_watcher(Arc::new(SystemClock), watcher)
    }

    pub fn with_clock_and_watcher(clock: Arc<dyn Clock>, watcher: Box<dyn FileWatcher>) -> Self {
        let mut store = Self::with_clock(clock);
        let receiver = watcher.receiver().clone();
        let watcher = Arc::new(Mutex::new(watcher));

        let inner = Arc::downgrade(&store.inner);
        let watcher_for_thread = Arc::downgrade(&watcher);
        let thread = std::thread::Builder::new()
            .name("halftone-store-watch".to_string())
            .spawn(move || drain_watch_events(receiver, inner, watcher_for_thread))
            .ok();
        if thread.is_none() {
            tracing::warn!(
                target: "halftone.store",
                "failed to spawn watch drain thread; falling back to poll-only invalidation"
            );
        }

        store.watch = Some(WatchHandle {
            watcher: Some(watcher),
            thread,
        });
        store
    }

    /// Evicts `key`, releasing watches its monitors held.
    ///
    /// Lock order: `entries` is always taken before the watcher lock; the
    /// watcher lock is only taken with `entries` released.
    fn evict(&self, key: &str) -> bool {
        let released = { self.inner.entries.lock().detach(key) };
        match released {
            Some(released) => {
                self.release_watches(&released);
                true
            }
            None => false,
        }
    }

    fn release_watches(&self, paths: &[PathBuf]) {
        let Some(watcher) = self.watch.as_ref().and_then(|watch| watch.watcher.as_ref()) else {
            return;
        };
        let mut watcher = watcher.lock();
        for path in paths {
            if let Err(error) = watcher.unwatch_path(path) {
                tracing::warn!(
                    target: "halftone.store",
                    path = %path.display(),
                    %error,
                    "failed to unwatch path"
                );
            }
        }
    }
}

impl<V: Clone + Send + Sync + 'static> ExpiringStore<V> for MemoryStore<V> {
    fn get(&self, key: &str) -> Option<V> {
        let now = self.inner.clock.now();

        // Snapshot the entry's monitors and generation, then poll the
        // monitors with the lock released: `FileChangeMonitor::changed` stats
        // the filesystem, and a slow stat must not stall unrelated keys.
        let (generation, monitors) = {
            let entries = self.inner.entries.lock();
            let entry = entries.by_key.get(key)?;
            (entry.generation, Arc::clone(&entry.monitors))
        };
        let changed = monitors.iter().any(|monitor| monitor.changed());

        // Staleness decision, eviction, and window re-arm happen in one
        // critical section. The monitor verdict only counts against the
        // generation it was computed for: a racing add under the same key
        // must never lose its fresh entry to this read.
        let mut entries = self.inner.entries.lock();
        let stale = {
            let entry = entries.by_key.get(key)?;
            (changed && entry.generation == generation)
                || entry.deadline.is_some_and(|deadline| now >= deadline)
        };
        if stale {
            let released = entries.detach(key);
            drop(entries);
            if let Some(released) = released {
                self.release_watches(&released);
            }
            tracing::debug!(target: "halftone.store", key, "evicted stale entry on read");
            return None;
        }

        let entry = entries.by_key.get_mut(key)?;
        if let Some(window) = entry.window {
            entry.deadline = Some(now + window);
        }
        Some(entry.value.clone())
    }

    fn add(&self, key: &str, value: V, policy: ExpirationPolicy) {
        let now = self.inner.clock.now();
        let (window, monitors) = policy.into_parts();

        let watch_paths: Vec<PathBuf> = monitors
            .iter()
            .flat_map(|monitor| monitor.watch_paths().iter().cloned())
            .collect();

        let monitors = Arc::new(monitors);

        let released = {
            let mut entries = self.inner.entries.lock();
            let released = entries.detach(key);
            let entry = StoredEntry {
                value,
                window,
                deadline: window.map(|window| now + window),
                generation: entries.alloc_generation(),
                monitors,
                watch_paths: watch_paths.clone(),
            };
            for path in &watch_paths {
                entries
                    .by_path
                    .entry(path.clone())
                    .or_default()
                    .insert(key.to_string());
            }
            entries.by_key.insert(key.to_string(), entry);
            released
        };

        if let Some(released) = released {
            self.release_watches(&released);
        }

        if let Some(watcher) = self.watch.as_ref().and_then(|watch| watch.watcher.as_ref()) {
            let mut watcher = watcher.lock();
            for path in &watch_paths {
                if let Err(error) = watcher.watch_path(path) {
                    // Poll-based monitor checks still cover this entry.
                    tracing::warn!(
                        target: "halftone.store",
                        path = %path.display(),
                        %error,
                        "failed to watch path; entry degrades to poll-only invalidation"
                    );
                }
            }
        }
    }

    fn remove(&self, key: &str) -> bool {
        self.evict(key)
    }
}

struct WatchHandle {
    /// `Some` for the handle's whole life; taken in `drop` so the watcher
    /// (and with it the event channel's sender side) is released before the
    /// drain thread is joined.
    watcher: Option<Arc<Mutex<Box<dyn FileWatcher>>>>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        // The drain thread only holds weak references, so dropping the
        // watcher disconnects its channel and the thread's receive loop ends.
        drop(self.watcher.take());
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn drain_watch_events<V: Clone + Send + Sync + 'static>(
    receiver: crossbeam_channel::Receiver<crate::watch::WatchMessage>,
    inner: Weak<Inner<V>>,
    watcher: Weak<Mutex<Box<dyn FileWatcher>>>,
) {
    while let Ok(msg) = receiver.recv() {
        let Some(inner) = inner.upgrade() else {
            break;
        };

        let keys = match msg {
            Ok(WatchEvent::Paths(paths)) => {
                let entries = inner.entries.lock();
                entries.keys_for_paths(paths.iter())
            }
            Ok(WatchEvent::Rescan) => {
                // Events were dropped; conservatively drop every monitored
                // entry rather than risk serving stale data.
                tracing::warn!(
                    target: "halftone.store",
                    "watcher requested rescan; invalidating all monitored entries"
                );
                let entries = inner.entries.lock();
                entries.monitored_keys()
            }
            Err(error) => {
                tracing::warn!(
                    target: "halftone.store",
                    %error,
                    "watcher error; invalidating all monitored entries"
                );
                let entries = inner.entries.lock();
                entries.monitored_keys()
            }
        };

        let mut released = Vec::new();
        {
            let mut entries = inner.entries.lock();
            for key in &keys {
                if let Some(mut paths) = entries.detach(key) {
                    tracing::debug!(target: "halftone.store", key = %key, "evicted entry on watch event");
                    released.append(&mut paths);
                }
            }
        }

        if !released.is_empty() {
            if let Some(watcher) = watcher.upgrade() {
                let mut watcher = watcher.lock();
                for path in &released {
                    let _ = watcher.unwatch_path(path);
                }
            }
        }
    }
}
