use std::sync::Arc;
use std::time::Duration;

use halftone_config::ConfigHandle;
use halftone_store::{ExpirationPolicy, ExpiringStore, FileChangeMonitor};

use crate::descriptor::Descriptor;
use crate::error::{CacheError, Result};
use crate::key::artifact_stem;
use crate::uri::local_file_path;

/// Sliding expiration window applied to every index entry.
///
/// Each successful read re-arms the entry's remaining lifetime to this
/// window; the store enforces it.
pub const SLIDING_EXPIRATION: Duration = Duration::from_secs(60);

/// Concurrent in-memory index of cached artifact descriptors.
///
/// The index derives a normalized lookup key (see
/// [`artifact_stem`](crate::artifact_stem)), assembles the expiration policy,
/// and delegates storage to the injected [`ExpiringStore`]. It keeps no
/// mutable state of its own, so any number of request handlers can share one
/// index (or a clone of it) without coordination.
///
/// Key-derivation targets: [`get`](CacheIndex::get) and
/// [`remove`](CacheIndex::remove) derive from the caller-supplied path
/// string, while [`add`](CacheIndex::add) derives from the descriptor's
/// logical key — the descriptor's storage path may differ from the key
/// callers later reconstruct.
pub struct CacheIndex<D> {
    store: Arc<dyn ExpiringStore<D>>,
    config: ConfigHandle,
}

impl<D> Clone for CacheIndex<D> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            config: self.config.clone(),
        }
    }
}

impl<D: Descriptor> CacheIndex<D> {
    pub fn new(store: Arc<dyn ExpiringStore<D>>, config: ConfigHandle) -> Self {
        Self { store, config }
    }

    /// Looks up the descriptor cached for `cached_path`.
    ///
    /// Returns `None` when no entry exists (or its policy has invalidated
    /// it); never an error. No side effects beyond the store's own
    /// sliding-window refresh.
    pub fn get(&self, cached_path: &str) -> Option<D> {
        let key = artifact_stem(cached_path);
        let found = self.store.get(&key);
        tracing::trace!(target: "halftone.cache", %key, hit = found.is_some(), "index lookup");
        found
    }

    /// Removes the entry cached for `cached_path`.
    ///
    /// Returns whether an entry was present. Racing removals are idempotent:
    /// the second one returns `false`.
    pub fn remove(&self, cached_path: &str) -> bool {
        let key = artifact_stem(cached_path);
        let removed = self.store.remove(&key);
        tracing::debug!(target: "halftone.cache", %key, removed, "index remove");
        removed
    }

    /// Inserts `artifact` under the key derived from its logical key, and
    /// returns it.
    ///
    /// Every entry gets the fixed [`SLIDING_EXPIRATION`] window. When the
    /// artifact lives on local disk and `cache.monitor_file_changes` is
    /// currently enabled, a file-change monitor is attached so the entry is
    /// dropped as soon as the file is modified or deleted; the flag is read
    /// from the live configuration on every call. Remote artifacts are
    /// governed by the timer alone.
    ///
    /// Fails only when the monitor cannot be constructed over the artifact's
    /// file; the caller may retry with monitoring disabled or simply serve
    /// the request uncached.
    pub fn add(&self, artifact: D) -> Result<D> {
        let mut policy = ExpirationPolicy::sliding(SLIDING_EXPIRATION);

        let mut monitored = false;
        if let Some(file) = local_file_path(artifact.path()) {
            if self.config.monitor_file_changes() {
                let monitor =
                    FileChangeMonitor::new(&file).map_err(|source| CacheError::Monitor {
                        path: file.clone(),
                        source,
                    })?;
                policy = policy.with_monitor(Box::new(monitor));
                monitored = true;
            }
        }

        let key = artifact_stem(artifact.key());
        tracing::debug!(target: "halftone.cache", %key, monitored, "index insert");
        self.store.add(&key, artifact.clone(), policy);
        Ok(artifact)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::fs;
    use std::sync::Mutex;

    use halftone_config::Config;

    use crate::descriptor::CachedArtifact;

    /// Store double that records every call and the policy it carried.
    #[derive(Default)]
    struct RecordingStore {
        adds: Mutex<Vec<RecordedAdd>>,
        gets: Mutex<Vec<String>>,
        removes: Mutex<Vec<String>>,
    }

    struct RecordedAdd {
        key: String,
        value: CachedArtifact,
        window: Option<Duration>,
        monitor_count: usize,
    }

    impl ExpiringStore<CachedArtifact> for RecordingStore {
        fn get(&self, key: &str) -> Option<CachedArtifact> {
            self.gets.lock().unwrap().push(key.to_string());
            None
        }

        fn add(&self, key: &str, value: CachedArtifact, policy: ExpirationPolicy) {
            self.adds.lock().unwrap().push(RecordedAdd {
                key: key.to_string(),
                value,
                window: policy.sliding_window(),
                monitor_count: policy.monitors().len(),
            });
        }

        fn remove(&self, key: &str) -> bool {
            self.removes.lock().unwrap().push(key.to_string());
            false
        }
    }

    fn monitoring_enabled() -> ConfigHandle {
        let handle = ConfigHandle::new(Config::default());
        let mut config = handle.snapshot();
        config.cache.monitor_file_changes = true;
        handle.replace(config);
        handle
    }

    fn index_over(
        store: Arc<RecordingStore>,
        config: ConfigHandle,
    ) -> CacheIndex<CachedArtifact> {
        CacheIndex::new(store, config)
    }

    #[test]
    fn operations_share_one_key_derivation() {
        let store = Arc::new(RecordingStore::default());
        let index = index_over(Arc::clone(&store), ConfigHandle::default());

        index
            .add(CachedArtifact::new("img1", "https://cdn.example.com/img1.jpg"))
            .unwrap();
        index.get("/cache/img1.png");
        index.remove(r"C:\cache\img1.webp");

        assert_eq!(store.adds.lock().unwrap()[0].key, "img1");
        assert_eq!(store.gets.lock().unwrap()[0], "img1");
        assert_eq!(store.removes.lock().unwrap()[0], "img1");
    }

    #[test]
    fn add_derives_key_from_descriptor_key_not_path() {
        let store = Arc::new(RecordingStore::default());
        let index = index_over(Arc::clone(&store), ConfigHandle::default());

        index
            .add(CachedArtifact::new(
                "logical-key.jpg",
                "https://cdn.example.com/storage-name.jpg",
            ))
            .unwrap();

        assert_eq!(store.adds.lock().unwrap()[0].key, "logical-key");
    }

    #[test]
    fn add_returns_the_descriptor_and_applies_the_sliding_window() {
        let store = Arc::new(RecordingStore::default());
        let index = index_over(Arc::clone(&store), ConfigHandle::default());

        let artifact = CachedArtifact::new("img1", "https://cdn.example.com/img1.jpg");
        let returned = index.add(artifact.clone()).unwrap();
        assert_eq!(returned, artifact);

        let adds = store.adds.lock().unwrap();
        assert_eq!(adds[0].value, artifact);
        assert_eq!(adds[0].window, Some(SLIDING_EXPIRATION));
    }

    #[test]
    fn local_artifact_gets_a_monitor_when_enabled() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("img1.jpg");
        fs::write(&file, b"jpeg bytes").unwrap();

        let store = Arc::new(RecordingStore::default());
        let index = index_over(Arc::clone(&store), monitoring_enabled());

        index
            .add(CachedArtifact::new("img1", file.to_str().unwrap()))
            .unwrap();

        assert_eq!(store.adds.lock().unwrap()[0].monitor_count, 1);
    }

    #[test]
    fn local_artifact_gets_no_monitor_when_disabled() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("img1.jpg");
        fs::write(&file, b"jpeg bytes").unwrap();

        let store = Arc::new(RecordingStore::default());
        let index = index_over(Arc::clone(&store), ConfigHandle::default());

        index
            .add(CachedArtifact::new("img1", file.to_str().unwrap()))
            .unwrap();

        assert_eq!(store.adds.lock().unwrap()[0].monitor_count, 0);
    }

    #[test]
    fn remote_artifact_gets_no_monitor_even_when_enabled() {
        let store = Arc::new(RecordingStore::default());
        let index = index_over(Arc::clone(&store), monitoring_enabled());

        index
            .add(CachedArtifact::new("img1", "https://cdn.example.com/img1.jpg"))
            .unwrap();

        assert_eq!(store.adds.lock().unwrap()[0].monitor_count, 0);
    }

    #[test]
    fn monitoring_flag_is_read_on_every_add() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("img1.jpg");
        fs::write(&file, b"jpeg bytes").unwrap();

        let store = Arc::new(RecordingStore::default());
        let config = ConfigHandle::default();
        let index = index_over(Arc::clone(&store), config.clone());
        let artifact = CachedArtifact::new("img1", file.to_str().unwrap());

        index.add(artifact.clone()).unwrap();

        let mut enabled = config.snapshot();
        enabled.cache.monitor_file_changes = true;
        config.replace(enabled);
        index.add(artifact.clone()).unwrap();

        let mut disabled = config.snapshot();
        disabled.cache.monitor_file_changes = false;
        config.replace(disabled);
        index.add(artifact).unwrap();

        let counts: Vec<usize> = store
            .adds
            .lock()
            .unwrap()
            .iter()
            .map(|add| add.monitor_count)
            .collect();
        assert_eq!(counts, vec![0, 1, 0]);
    }

    #[test]
    fn unwatchable_file_fails_the_add() {
        let tmp = tempfile::tempdir().unwrap();
        let missing = tmp.path().join("missing.jpg");

        let store = Arc::new(RecordingStore::default());
        let index = index_over(Arc::clone(&store), monitoring_enabled());

        let err = index
            .add(CachedArtifact::new("img1", missing.to_str().unwrap()))
            .unwrap_err();

        match err {
            CacheError::Monitor { path, .. } => assert_eq!(path, missing),
        }
        // Nothing was inserted for the failed add.
        assert!(store.adds.lock().unwrap().is_empty());
    }
}
