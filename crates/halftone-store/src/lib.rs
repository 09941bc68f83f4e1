//! Expiring key-value store used by the halftone cache index.
//!
//! This crate provides the storage half of the in-memory cache front door:
//!
//! - [`ExpiringStore`]: the object-safe trait the cache index consumes. It is
//!   deliberately small (get / add-with-policy / remove) so production stores
//!   and deterministic test doubles are interchangeable behind an
//!   `Arc<dyn ExpiringStore<V>>`.
//! - [`ExpirationPolicy`]: per-entry lifetime policy, combining an optional
//!   sliding window with zero-or-more [`ChangeMonitor`]s.
//! - [`MemoryStore`]: the production implementation. Expiry is enforced
//!   lazily on read; an optional [`FileWatcher`] upgrades invalidation to
//!   eager, push-based removal.
//!
//! # Testing
//!
//! Anything timing- or watcher-dependent is tested through injected doubles
//! ([`ManualClock`], [`ManualFileWatcher`]) rather than sleeps or OS watcher
//! timing, which are flaky on CI.

mod clock;
mod policy;
mod store;
mod watch;

pub use clock::{Clock, ManualClock, SystemClock};
pub use policy::{ChangeMonitor, ExpirationPolicy, FileChangeMonitor};
pub use store::{ExpiringStore, MemoryStore};
pub use watch::{FileWatcher, ManualFileWatcher, ManualFileWatcherHandle, WatchEvent, WatchMessage};

#[cfg(feature = "watch-notify")]
pub use watch::NotifyFileWatcher;
