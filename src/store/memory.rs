//! In-process document store
//!
//! Holds documents in a map and pushes every write to listeners through a
//! `watch` channel per document. Can be taken offline to simulate a lost
//! connection: reads, writes and new subscriptions fail, and existing
//! listeners are closed.

use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tracing::{debug, info};

use super::{apply_write, validate_path, Document, DocumentStore, Fields, Subscription};
use crate::clock::Clock;
use crate::error::StoreError;

#[derive(Default)]
struct Inner {
    docs: HashMap<String, Document>,
    listeners: HashMap<String, watch::Sender<Option<Document>>>,
}

pub struct MemoryStore {
    clock: Arc<dyn Clock>,
    inner: Mutex<Inner>,
    available: AtomicBool,
    writes: AtomicU64,
}

impl MemoryStore {
    /// Create an empty store stamping server timestamps from `clock`
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            inner: Mutex::new(Inner::default()),
            available: AtomicBool::new(true),
            writes: AtomicU64::new(0),
        }
    }

    /// Simulate losing or regaining the connection
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
        if !available {
            let dropped = self.lock().listeners.drain().count();
            info!("Memory store offline, closed {} listener channels", dropped);
        } else {
            info!("Memory store back online");
        }
    }

    /// Number of successful writes so far
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// Store a raw document, bypassing field resolution (manual edits in tests)
    pub fn insert_raw(&self, path: &str, doc: Document) {
        let mut inner = self.lock();
        inner.docs.insert(path.to_string(), doc.clone());
        if let Some(tx) = inner.listeners.get(path) {
            tx.send_replace(Some(doc));
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("memory store is offline".to_string()))
        }
    }
}

impl DocumentStore for MemoryStore {
    fn read<'a>(&'a self, path: &'a str) -> BoxFuture<'a, Result<Option<Document>, StoreError>> {
        Box::pin(async move {
            validate_path(path)?;
            self.check_available()?;
            Ok(self.lock().docs.get(path).cloned())
        })
    }

    fn write<'a>(
        &'a self,
        path: &'a str,
        fields: Fields,
        merge: bool,
    ) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            validate_path(path)?;
            self.check_available()?;
            let incoming = fields.resolve(self.clock.now());

            let mut inner = self.lock();
            let doc = apply_write(inner.docs.remove(path), incoming, merge);
            inner.docs.insert(path.to_string(), doc.clone());
            if let Some(tx) = inner.listeners.get(path) {
                tx.send_replace(Some(doc));
            }
            self.writes.fetch_add(1, Ordering::SeqCst);
            debug!("Wrote {} (merge={})", path, merge);
            Ok(())
        })
    }

    fn subscribe(&self, path: &str) -> Result<Subscription, StoreError> {
        validate_path(path)?;
        self.check_available()?;
        let mut inner = self.lock();
        let current = inner.docs.get(path).cloned();
        let rx = match inner.listeners.get(path) {
            Some(tx) => tx.subscribe(),
            None => {
                let (tx, rx) = watch::channel(current);
                inner.listeners.insert(path.to_string(), tx);
                rx
            }
        };
        Ok(Subscription::new(rx, None))
    }

    fn list<'a>(
        &'a self,
        collection: &'a str,
    ) -> BoxFuture<'a, Result<Vec<(String, Document)>, StoreError>> {
        Box::pin(async move {
            validate_path(collection)?;
            self.check_available()?;
            let prefix = format!("{}/", collection);
            let inner = self.lock();
            let mut entries: Vec<(String, Document)> = inner
                .docs
                .iter()
                .filter_map(|(path, doc)| {
                    let id = path.strip_prefix(&prefix)?;
                    (!id.contains('/')).then(|| (id.to_string(), doc.clone()))
                })
                .collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            Ok(entries)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn store() -> MemoryStore {
        MemoryStore::new(Arc::new(ManualClock::at_epoch()))
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let store = store();
        assert!(store.read("meta/timer").await.unwrap().is_none());

        store
            .write("meta/timer", Fields::new().set("state", "stopped"), false)
            .await
            .unwrap();
        let doc = store.read("meta/timer").await.unwrap().unwrap();
        assert_eq!(doc["state"], "stopped");
        assert_eq!(store.write_count(), 1);
    }

    #[tokio::test]
    async fn test_subscribers_see_writes() {
        let store = store();
        let mut sub = store.subscribe("meta/timer").unwrap();
        assert!(sub.changed().await.unwrap().is_none());

        store
            .write("meta/timer", Fields::new().set("state", "running"), false)
            .await
            .unwrap();
        let doc = sub.changed().await.unwrap().unwrap();
        assert_eq!(doc["state"], "running");
        assert_eq!(sub.latest(), Some(doc));
    }

    #[tokio::test]
    async fn test_offline_store_fails_and_closes_listeners() {
        let store = store();
        let mut sub = store.subscribe("meta/timer").unwrap();
        sub.changed().await.unwrap();

        store.set_available(false);
        assert!(matches!(
            store.read("meta/timer").await,
            Err(StoreError::Unavailable(_))
        ));
        assert!(store.subscribe("meta/timer").is_err());
        assert!(sub.changed().await.is_err());

        store.set_available(true);
        assert!(store.subscribe("meta/timer").is_ok());
    }

    #[tokio::test]
    async fn test_list_returns_direct_children_only() {
        let store = store();
        for path in ["questions/a", "questions/b", "questions/a/replies/x", "meta/timer"] {
            store
                .write(path, Fields::new().set("edition", "1"), false)
                .await
                .unwrap();
        }
        let ids: Vec<String> = store
            .list("questions")
            .await
            .unwrap()
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        assert_eq!(ids, vec!["a".to_string(), "b".to_string()]);
    }
}
