//! Time-boxed cache over a [`QuestionSource`]

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{Question, QuestionSource};
use crate::error::StoreError;

#[derive(Default)]
struct Entry {
    question: Option<Question>,
    fetched_at: Option<Instant>,
}

pub struct ActiveQuestionCache {
    source: Arc<dyn QuestionSource>,
    ttl: Duration,
    entry: Mutex<Entry>,
    tx: watch::Sender<Option<Question>>,
}

impl ActiveQuestionCache {
    pub fn new(source: Arc<dyn QuestionSource>, ttl: Duration) -> Self {
        let (tx, _) = watch::channel(None);
        Self {
            source,
            ttl,
            entry: Mutex::new(Entry::default()),
            tx,
        }
    }

    /// Cached question if fetched within the TTL, otherwise a fresh lookup.
    ///
    /// "No active question" is never served from cache.
    pub async fn get(&self) -> Result<Option<Question>, StoreError> {
        {
            let entry = self.lock();
            if let (Some(question), Some(fetched_at)) = (&entry.question, entry.fetched_at) {
                if fetched_at.elapsed() < self.ttl {
                    return Ok(Some(question.clone()));
                }
            }
        }
        self.refresh().await
    }

    /// Look up now, update the cache and notify observers.
    /// On failure the previously cached question stays in place.
    pub async fn refresh(&self) -> Result<Option<Question>, StoreError> {
        let question = self.source.active_question().await?;
        {
            let mut entry = self.lock();
            entry.question = question.clone();
            entry.fetched_at = Some(Instant::now());
        }
        debug!(
            "Active question refreshed: {:?}",
            question.as_ref().map(|q| q.id.as_str())
        );
        let next = question.clone();
        self.tx.send_if_modified(|current| {
            if *current != next {
                *current = next;
                true
            } else {
                false
            }
        });
        Ok(question)
    }

    /// Force the next [`get`](Self::get) to look up
    pub fn invalidate(&self) {
        self.lock().fetched_at = None;
    }

    /// Last cached question without any lookup
    pub fn cached(&self) -> Option<Question> {
        self.lock().question.clone()
    }

    /// Receiver notified whenever the active question changes
    pub fn subscribe(&self) -> watch::Receiver<Option<Question>> {
        self.tx.subscribe()
    }

    /// Refresh every `interval` until the returned handle is dropped
    pub fn spawn_polling(self: &Arc<Self>, interval: Duration) -> PollingHandle {
        let cache = Arc::clone(self);
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = cache.get().await {
                            warn!("Active question lookup failed: {}", e);
                        }
                    }
                }
            }
        });
        PollingHandle { cancel, task }
    }

    fn lock(&self) -> MutexGuard<'_, Entry> {
        self.entry.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Running poller; dropping it stops the polling task
pub struct PollingHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl PollingHandle {
    pub fn stop(self) {}
}

impl Drop for PollingHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.task.abort();
    }
}
