//! File-backed document store
//!
//! Each document lives at `<root>/<path>.json`. Writes go through a temp file
//! and a rename so readers never observe a partial document. Subscriptions
//! watch the document's directory with `notify` and re-read the file on every
//! event that touches it, which lets an admin process and any number of
//! display processes on the same machine share timer state.

use futures::future::BoxFuture;
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use super::{apply_write, validate_path, Document, DocumentStore, Fields, Subscription};
use crate::clock::Clock;
use crate::error::StoreError;

const DOC_EXTENSION: &str = "json";

pub struct FileStore {
    root: PathBuf,
    clock: Arc<dyn Clock>,
    /// Serializes read-modify-write cycles within this process
    write_lock: Mutex<()>,
}

impl FileStore {
    /// Open (creating if needed) a store rooted at `root`
    pub fn open(root: impl AsRef<Path>, clock: Arc<dyn Clock>) -> Result<Self, StoreError> {
        std::fs::create_dir_all(root.as_ref())?;
        let root = root.as_ref().canonicalize()?;
        debug!("File store opened at {:?}", root);
        Ok(Self {
            root,
            clock,
            write_lock: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn doc_path(&self, path: &str) -> Result<PathBuf, StoreError> {
        validate_path(path)?;
        Ok(self.root.join(format!("{}.{}", path, DOC_EXTENSION)))
    }
}

fn parse_document(bytes: &[u8]) -> Result<Document, StoreError> {
    match serde_json::from_slice::<Value>(bytes)? {
        Value::Object(doc) => Ok(doc),
        other => Err(StoreError::Serialization(serde::de::Error::custom(format!(
            "expected a JSON object, found {}",
            other
        )))),
    }
}

/// Unparseable or non-object contents read as an absent document
fn parse_or_absent(file: &Path, bytes: &[u8]) -> Option<Document> {
    match parse_document(bytes) {
        Ok(doc) => Some(doc),
        Err(e) => {
            warn!("Treating malformed document {:?} as absent: {}", file, e);
            None
        }
    }
}

async fn read_file(file: &Path) -> Result<Option<Document>, StoreError> {
    match tokio::fs::read(file).await {
        Ok(bytes) => Ok(parse_or_absent(file, &bytes)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn read_file_blocking(file: &Path) -> Result<Option<Document>, StoreError> {
    match std::fs::read(file) {
        Ok(bytes) => Ok(parse_or_absent(file, &bytes)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn write_file(file: &Path, doc: &Document) -> Result<(), StoreError> {
    if let Some(parent) = file.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let bytes = serde_json::to_vec_pretty(doc)?;
    let tmp = file.with_extension(format!("{}.tmp", DOC_EXTENSION));
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, file).await?;
    Ok(())
}

impl DocumentStore for FileStore {
    fn read<'a>(&'a self, path: &'a str) -> BoxFuture<'a, Result<Option<Document>, StoreError>> {
        Box::pin(async move {
            let file = self.doc_path(path)?;
            read_file(&file).await
        })
    }

    fn write<'a>(
        &'a self,
        path: &'a str,
        fields: Fields,
        merge: bool,
    ) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            let file = self.doc_path(path)?;
            let _guard = self.write_lock.lock().await;
            let existing = if merge { read_file(&file).await? } else { None };
            let doc = apply_write(existing, fields.resolve(self.clock.now()), merge);
            write_file(&file, &doc).await?;
            debug!("Wrote {:?} (merge={})", file, merge);
            Ok(())
        })
    }

    /// Registers the directory watch and reads the current file before
    /// returning, so this briefly blocks the calling thread on local disk I/O.
    fn subscribe(&self, path: &str) -> Result<Subscription, StoreError> {
        let file = self.doc_path(path)?;
        let dir = file
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| StoreError::InvalidPath(path.to_string()))?;
        std::fs::create_dir_all(&dir)?;

        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| StoreError::Unavailable(format!("no async runtime for listener: {}", e)))?;

        let (event_tx, mut event_rx) = mpsc::unbounded_channel::<notify::Event>();
        let mut watcher: RecommendedWatcher =
            notify::recommended_watcher(move |res: notify::Result<notify::Event>| match res {
                Ok(event) => {
                    let _ = event_tx.send(event);
                }
                Err(e) => error!("File watch error: {}", e),
            })
            .map_err(|e| StoreError::Unavailable(format!("failed to create watcher: {}", e)))?;
        watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .map_err(|e| StoreError::Unavailable(format!("failed to watch {:?}: {}", dir, e)))?;

        let initial = read_file_blocking(&file).unwrap_or_else(|e| {
            warn!("Unreadable document {:?}: {}", file, e);
            None
        });
        let (tx, rx) = watch::channel(initial);

        let cancel = CancellationToken::new();
        let producer = cancel.clone();
        runtime.spawn(async move {
            // Keeps the OS watch alive for the lifetime of the listener
            let _watcher = watcher;
            loop {
                tokio::select! {
                    _ = producer.cancelled() => break,
                    event = event_rx.recv() => {
                        let Some(event) = event else { break };
                        if !event.paths.iter().any(|p| p == &file) {
                            continue;
                        }
                        match read_file(&file).await {
                            Ok(doc) => {
                                tx.send_if_modified(|current| {
                                    if *current != doc {
                                        *current = doc;
                                        true
                                    } else {
                                        false
                                    }
                                });
                            }
                            Err(e) => warn!("Failed to reload {:?}: {}", file, e),
                        }
                    }
                }
            }
            debug!("Listener for {:?} released", file);
        });

        Ok(Subscription::new(rx, Some(cancel)))
    }

    fn list<'a>(
        &'a self,
        collection: &'a str,
    ) -> BoxFuture<'a, Result<Vec<(String, Document)>, StoreError>> {
        Box::pin(async move {
            validate_path(collection)?;
            let dir = self.root.join(collection);
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
                Err(e) => return Err(e.into()),
            };

            let mut docs = Vec::new();
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if path.extension().and_then(|ext| ext.to_str()) != Some(DOC_EXTENSION) {
                    continue;
                }
                let Some(id) = path.file_stem().and_then(|s| s.to_str()).map(str::to_string) else {
                    continue;
                };
                match read_file(&path).await {
                    Ok(Some(doc)) => docs.push((id, doc)),
                    Ok(None) => {}
                    Err(e) => warn!("Skipping unreadable document {:?}: {}", path, e),
                }
            }
            docs.sort_by(|a, b| a.0.cmp(&b.0));
            Ok(docs)
        })
    }
}
