//! Persistence Module
//!
//! Contract for the durable key-value store behind the memory tier, two
//! implementations of it, and the write-behind queue that feeds it.
//!
//! The backing store is best effort. Nothing here ever fails a cache
//! operation: errors go to a [`PersistenceHook`] and are dropped.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::error::{CacheError, Result};

// == Persistent Store Contract ==
/// Async string key-value store used as the persistent tier.
#[async_trait]
pub trait PersistentStore: Send + Sync + 'static {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: String) -> Result<()>;
    async fn delete(&self, key: &str) -> Result<()>;
    async fn keys(&self) -> Result<Vec<String>>;
}

// == Persistence Hook ==
/// Backing-store operation that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistAction {
    Read,
    Write,
    Delete,
    List,
}

/// Receives backing-store failures that were swallowed.
pub trait PersistenceHook: Send + Sync {
    fn on_error(&self, action: PersistAction, key: &str, error: &CacheError);
}

/// Default hook: logs each failure at `warn`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingHook;

impl PersistenceHook for TracingHook {
    fn on_error(&self, action: PersistAction, key: &str, error: &CacheError) {
        warn!(
            action = ?action,
            key = %key,
            error = %error,
            "Backing store operation failed, continuing with memory tier"
        );
    }
}

// == Memory Backing Store ==
/// HashMap-backed store. Can be switched into a failing mode to simulate
/// unavailable device storage.
#[derive(Debug, Default)]
pub struct MemoryBackingStore {
    data: Mutex<HashMap<String, String>>,
    failing: AtomicBool,
}

impl MemoryBackingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// When set, every operation returns `CacheError::Persistence`.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.data.lock().contains_key(key)
    }

    /// Raw stored string for `key`, bypassing failure mode.
    pub fn raw(&self, key: &str) -> Option<String> {
        self.data.lock().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.data.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.lock().is_empty()
    }

    fn check(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            Err(CacheError::Persistence("backing store unavailable".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl PersistentStore for MemoryBackingStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.check()?;
        Ok(self.data.lock().get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> Result<()> {
        self.check()?;
        self.data.lock().insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.check()?;
        self.data.lock().remove(key);
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        self.check()?;
        Ok(self.data.lock().keys().cloned().collect())
    }
}

// == JSON File Store ==
/// Whole store kept as one JSON object on disk.
///
/// Every mutation rewrites the file through a temp file and a rename, so a
/// crash leaves either the old or the new contents.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    lock: tokio::sync::Mutex<()>,
}

impl JsonFileStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<BTreeMap<String, String>> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) if bytes.is_empty() => Ok(BTreeMap::new()),
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(err) => Err(err.into()),
        }
    }

    async fn save(&self, data: &BTreeMap<String, String>) -> Result<()> {
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, serde_json::to_vec(data)?).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl PersistentStore for JsonFileStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let _guard = self.lock.lock().await;
        Ok(self.load().await?.remove(key))
    }

    async fn set(&self, key: &str, value: String) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut data = self.load().await?;
        data.insert(key.to_string(), value);
        self.save(&data).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut data = self.load().await?;
        if data.remove(key).is_some() {
            self.save(&data).await?;
        }
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let _guard = self.lock.lock().await;
        Ok(self.load().await?.into_keys().collect())
    }
}

// == Write-Behind Queue ==
enum PersistOp {
    Write { key: String, payload: String },
    Remove { key: String },
    Purge { prefix: String },
    Flush(oneshot::Sender<()>),
}

/// Single writer task applying backing-store mutations in the order they
/// were submitted.
#[derive(Clone)]
pub(crate) struct WriteBehind {
    tx: mpsc::UnboundedSender<PersistOp>,
    hook: Arc<dyn PersistenceHook>,
}

impl WriteBehind {
    /// Spawns the writer task. Must be called inside a tokio runtime.
    ///
    /// The task exits once every `WriteBehind` handle has been dropped.
    pub(crate) fn spawn(backing: Arc<dyn PersistentStore>, hook: Arc<dyn PersistenceHook>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<PersistOp>();
        let worker_hook = Arc::clone(&hook);

        tokio::spawn(async move {
            while let Some(op) = rx.recv().await {
                match op {
                    PersistOp::Write { key, payload } => {
                        if let Err(err) = backing.set(&key, payload).await {
                            worker_hook.on_error(PersistAction::Write, &key, &err);
                        }
                    }
                    PersistOp::Remove { key } => {
                        if let Err(err) = backing.delete(&key).await {
                            worker_hook.on_error(PersistAction::Delete, &key, &err);
                        }
                    }
                    PersistOp::Purge { prefix } => {
                        purge(backing.as_ref(), worker_hook.as_ref(), &prefix).await;
                    }
                    PersistOp::Flush(done) => {
                        let _ = done.send(());
                    }
                }
            }
            debug!("Write-behind queue closed");
        });

        Self { tx, hook }
    }

    pub(crate) fn write(&self, key: String, payload: String) {
        self.submit(PersistOp::Write { key, payload });
    }

    pub(crate) fn remove(&self, key: String) {
        self.submit(PersistOp::Remove { key });
    }

    pub(crate) fn purge(&self, prefix: String) {
        self.submit(PersistOp::Purge { prefix });
    }

    /// Waits until every operation submitted before this call has been applied.
    pub(crate) async fn flush(&self) {
        let (done, wait) = oneshot::channel();
        if self.tx.send(PersistOp::Flush(done)).is_ok() {
            let _ = wait.await;
        }
    }

    fn submit(&self, op: PersistOp) {
        if let Err(mpsc::error::SendError(op)) = self.tx.send(op) {
            let closed = CacheError::Persistence("write-behind queue closed".to_string());
            match op {
                PersistOp::Write { key, .. } => self.hook.on_error(PersistAction::Write, &key, &closed),
                PersistOp::Remove { key } => self.hook.on_error(PersistAction::Delete, &key, &closed),
                PersistOp::Purge { prefix } => self.hook.on_error(PersistAction::Delete, &prefix, &closed),
                PersistOp::Flush(_) => {}
            }
        }
    }
}

async fn purge(backing: &dyn PersistentStore, hook: &dyn PersistenceHook, prefix: &str) {
    let keys = match backing.keys().await {
        Ok(keys) => keys,
        Err(err) => {
            hook.on_error(PersistAction::List, prefix, &err);
            return;
        }
    };

    for key in keys.into_iter().filter(|k| k.starts_with(prefix)) {
        if let Err(err) = backing.delete(&key).await {
            hook.on_error(PersistAction::Delete, &key, &err);
        }
    }
}

// == Test Support ==
/// Hook that keeps every failure it sees.
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct RecordingHook {
    pub(crate) failures: Mutex<Vec<(PersistAction, String)>>,
}

#[cfg(test)]
impl RecordingHook {
    pub(crate) fn count(&self, action: PersistAction) -> usize {
        self.failures
            .lock()
            .iter()
            .filter(|(a, _)| *a == action)
            .count()
    }
}

#[cfg(test)]
impl PersistenceHook for RecordingHook {
    fn on_error(&self, action: PersistAction, key: &str, _error: &CacheError) {
        self.failures.lock().push((action, key.to_string()));
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store_roundtrip() {
        let store = MemoryBackingStore::new();

        store.set("a", "1".to_string()).await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), Some("1".to_string()));
        assert_eq!(store.keys().await.unwrap(), vec!["a".to_string()]);

        store.delete("a").await.unwrap();
        assert!(store.get("a").await.unwrap().is_none());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_memory_store_failing_mode() {
        let store = MemoryBackingStore::new();
        store.set_failing(true);

        assert!(matches!(
            store.set("a", "1".to_string()).await,
            Err(CacheError::Persistence(_))
        ));
        assert!(store.get("a").await.is_err());

        store.set_failing(false);
        assert!(store.get("a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_json_file_store_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");

        let store = JsonFileStore::new(&path);
        assert!(store.keys().await.unwrap().is_empty());
        store.set("cache:job:1", r#"{"value":1}"#.to_string()).await.unwrap();
        store.set("cache:job:2", r#"{"value":2}"#.to_string()).await.unwrap();
        store.delete("cache:job:2").await.unwrap();

        let reopened = JsonFileStore::new(&path);
        assert_eq!(
            reopened.get("cache:job:1").await.unwrap().as_deref(),
            Some(r#"{"value":1}"#)
        );
        assert_eq!(reopened.keys().await.unwrap(), vec!["cache:job:1".to_string()]);
    }

    #[tokio::test]
    async fn test_json_file_store_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        tokio::fs::write(&path, b"{not json").await.unwrap();

        let store = JsonFileStore::new(&path);
        assert!(matches!(
            store.get("k").await,
            Err(CacheError::Serialization(_))
        ));
    }

    #[tokio::test]
    async fn test_write_behind_applies_in_order() {
        let backing = Arc::new(MemoryBackingStore::new());
        let queue = WriteBehind::spawn(backing.clone(), Arc::new(TracingHook));

        queue.write("cache:a".to_string(), "1".to_string());
        queue.write("cache:b".to_string(), "2".to_string());
        queue.write("other:c".to_string(), "3".to_string());
        queue.remove("cache:a".to_string());
        queue.flush().await;

        assert!(!backing.contains_key("cache:a"));
        assert!(backing.contains_key("cache:b"));

        queue.write("cache:d".to_string(), "4".to_string());
        queue.purge("cache:".to_string());
        queue.flush().await;

        assert_eq!(backing.len(), 1);
        assert!(backing.contains_key("other:c"));
    }

    #[tokio::test]
    async fn test_write_behind_reports_failures() {
        let backing = Arc::new(MemoryBackingStore::new());
        let hook = Arc::new(RecordingHook::default());
        let queue = WriteBehind::spawn(backing.clone(), hook.clone());

        backing.set_failing(true);
        queue.write("cache:a".to_string(), "1".to_string());
        queue.remove("cache:b".to_string());
        queue.purge("cache:".to_string());
        queue.flush().await;

        assert_eq!(hook.count(PersistAction::Write), 1);
        assert_eq!(hook.count(PersistAction::Delete), 1);
        assert_eq!(hook.count(PersistAction::List), 1);
    }
}
