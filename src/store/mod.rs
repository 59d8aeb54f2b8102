//! Document store collaborator
//!
//! The timers keep their authoritative state in two singleton documents. This
//! module defines the narrow interface the timer core needs from a document
//! database (read, write with optional merge, change subscription, collection
//! listing) plus two implementations: an in-memory store used by tests and
//! single-process setups, and a file-backed store shared by processes on one
//! machine.

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use chrono::{DateTime, SecondsFormat, Utc};
use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tokio::sync::watch;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::warn;

use crate::error::{SnapshotError, StoreError};

/// A stored document: a JSON object keyed by field name
pub type Document = Map<String, Value>;

/// One field of a pending write
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Value(Value),
    /// Replaced with the store's own clock at write time
    ServerTimestamp,
}

/// Field set for [`DocumentStore::write`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Fields(BTreeMap<String, FieldValue>);

impl Fields {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.0.insert(key.to_string(), FieldValue::Value(value.into()));
        self
    }

    pub fn set_timestamp(self, key: &str, instant: Option<DateTime<Utc>>) -> Self {
        self.set(key, instant.map(timestamp_value))
    }

    pub fn server_timestamp(mut self, key: &str) -> Self {
        self.0.insert(key.to_string(), FieldValue::ServerTimestamp);
        self
    }

    pub fn get(&self, key: &str) -> Option<&FieldValue> {
        self.0.get(key)
    }

    /// Turn the field set into a concrete document using `now` for sentinels
    pub fn resolve(self, now: DateTime<Utc>) -> Document {
        self.0
            .into_iter()
            .map(|(key, field)| {
                let value = match field {
                    FieldValue::Value(v) => v,
                    FieldValue::ServerTimestamp => timestamp_value(now),
                };
                (key, value)
            })
            .collect()
    }
}

/// Encode an instant the way documents store timestamps (RFC 3339, millisecond precision)
pub fn timestamp_value(instant: DateTime<Utc>) -> Value {
    Value::String(instant.to_rfc3339_opts(SecondsFormat::Millis, true))
}

/// Apply an incoming write on top of the current document
pub(crate) fn apply_write(existing: Option<Document>, incoming: Document, merge: bool) -> Document {
    match existing {
        Some(mut doc) if merge => {
            doc.extend(incoming);
            doc
        }
        _ => incoming,
    }
}

/// Reject empty segments and relative components
pub(crate) fn validate_path(path: &str) -> Result<(), StoreError> {
    let valid = !path.is_empty()
        && path
            .split('/')
            .all(|seg| !seg.is_empty() && seg != "." && seg != ".." && !seg.contains('\\'));
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidPath(path.to_string()))
    }
}

/// Decode a snapshot into a typed document
pub fn decode<T: DeserializeOwned>(path: &str, doc: Document) -> Result<T, SnapshotError> {
    serde_json::from_value(Value::Object(doc)).map_err(|source| SnapshotError::Malformed {
        path: path.to_string(),
        source,
    })
}

/// Decode a snapshot, treating a malformed document as absent
pub fn decode_or_absent<T: DeserializeOwned>(path: &str, doc: Option<Document>) -> Option<T> {
    match decode(path, doc?) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("Ignoring document: {}", e);
            None
        }
    }
}

/// Live listener on one document.
///
/// The first call to [`Subscription::changed`] yields the snapshot current at
/// subscribe time; later calls wait for the next change. Dropping the
/// subscription releases the listener.
pub struct Subscription {
    rx: watch::Receiver<Option<Document>>,
    primed: bool,
    _guard: Option<DropGuard>,
}

impl Subscription {
    /// Wrap a receiver; `producer` is cancelled when the subscription is dropped
    pub fn new(rx: watch::Receiver<Option<Document>>, producer: Option<CancellationToken>) -> Self {
        Self {
            rx,
            primed: true,
            _guard: producer.map(CancellationToken::drop_guard),
        }
    }

    /// Latest snapshot without waiting
    pub fn latest(&self) -> Option<Document> {
        self.rx.borrow().clone()
    }

    /// Wait for the next snapshot
    pub async fn changed(&mut self) -> Result<Option<Document>, StoreError> {
        if self.primed {
            self.primed = false;
            return Ok(self.rx.borrow_and_update().clone());
        }
        self.rx
            .changed()
            .await
            .map_err(|_| StoreError::Unavailable("listener closed".to_string()))?;
        Ok(self.rx.borrow_and_update().clone())
    }

    /// Release the listener
    pub fn unsubscribe(self) {}
}

/// Interface the timer core consumes from the document database
pub trait DocumentStore: Send + Sync {
    fn read<'a>(&'a self, path: &'a str) -> BoxFuture<'a, Result<Option<Document>, StoreError>>;

    /// Write `fields` at `path`; with `merge` only the given top-level fields change
    fn write<'a>(
        &'a self,
        path: &'a str,
        fields: Fields,
        merge: bool,
    ) -> BoxFuture<'a, Result<(), StoreError>>;

    fn subscribe(&self, path: &str) -> Result<Subscription, StoreError>;

    /// All documents directly inside `collection`, as `(id, document)` pairs
    fn list<'a>(
        &'a self,
        collection: &'a str,
    ) -> BoxFuture<'a, Result<Vec<(String, Document)>, StoreError>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn test_merge_keeps_untouched_fields() {
        let existing = doc(json!({"state": "running", "deadlineAt": "2024-01-01T00:00:00.000Z"}));
        let incoming = doc(json!({"state": "finished"}));
        let merged = apply_write(Some(existing), incoming, true);
        assert_eq!(merged["state"], "finished");
        assert_eq!(merged["deadlineAt"], "2024-01-01T00:00:00.000Z");
    }

    #[test]
    fn test_replace_drops_untouched_fields() {
        let existing = doc(json!({"state": "running", "deadlineAt": "x"}));
        let incoming = doc(json!({"state": "stopped"}));
        let replaced = apply_write(Some(existing), incoming, false);
        assert!(!replaced.contains_key("deadlineAt"));
    }

    #[test]
    fn test_server_timestamp_resolves_to_now() {
        let now = DateTime::<Utc>::from_timestamp(1_704_067_200, 0).unwrap();
        let resolved = Fields::new()
            .set("updatedBy", "admin")
            .server_timestamp("updatedAt")
            .resolve(now);
        assert_eq!(resolved["updatedAt"], "2024-01-01T00:00:00.000Z");
        assert_eq!(resolved["updatedBy"], "admin");
    }

    #[test]
    fn test_validate_path() {
        assert!(validate_path("meta/timer").is_ok());
        assert!(validate_path("").is_err());
        assert!(validate_path("meta//timer").is_err());
        assert!(validate_path("../etc/passwd").is_err());
    }

    #[tokio::test]
    async fn test_subscription_yields_current_value_first() {
        let (tx, rx) = watch::channel(Some(doc(json!({"state": "paused"}))));
        let mut sub = Subscription::new(rx, None);
        let first = sub.changed().await.unwrap().unwrap();
        assert_eq!(first["state"], "paused");

        tx.send_replace(None);
        assert!(sub.changed().await.unwrap().is_none());

        drop(tx);
        assert!(matches!(sub.changed().await, Err(StoreError::Unavailable(_))));
    }
}
