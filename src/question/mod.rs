//! Active question lookup for the public display
//!
//! The display shows the one submitted question an admin has flagged with
//! `isShow`. Lookups go through [`ActiveQuestionCache`], which serves a
//! fetched question for a short TTL, refreshes on a polling interval and fans
//! the result out to every local observer.

mod cache;

pub use cache::{ActiveQuestionCache, PollingHandle};

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

use crate::error::StoreError;
use crate::store::{decode, DocumentStore};

/// A submitted audience question
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    /// Document id inside the questions collection
    #[serde(default)]
    pub id: String,
    pub edition: String,
    pub question_text: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_show: bool,
}

/// Where the currently displayed question comes from
pub trait QuestionSource: Send + Sync {
    fn active_question(&self) -> BoxFuture<'_, Result<Option<Question>, StoreError>>;
}

/// Reads the questions collection from a document store
pub struct StoreQuestionSource {
    store: Arc<dyn DocumentStore>,
    collection: String,
}

impl StoreQuestionSource {
    pub fn new(store: Arc<dyn DocumentStore>, collection: impl Into<String>) -> Self {
        Self {
            store,
            collection: collection.into(),
        }
    }
}

impl QuestionSource for StoreQuestionSource {
    fn active_question(&self) -> BoxFuture<'_, Result<Option<Question>, StoreError>> {
        Box::pin(async move {
            let docs = self.store.list(&self.collection).await?;
            let active = docs.into_iter().find_map(|(id, doc)| {
                let path = format!("{}/{}", self.collection, id);
                match decode::<Question>(&path, doc) {
                    Ok(question) if question.is_show => Some(Question { id, ..question }),
                    Ok(_) => None,
                    Err(e) => {
                        warn!("Skipping question: {}", e);
                        None
                    }
                }
            });
            Ok(active)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::{Fields, MemoryStore};

    #[tokio::test]
    async fn test_finds_flagged_question() {
        let store = Arc::new(MemoryStore::new(Arc::new(ManualClock::at_epoch())));
        for (id, text, show) in [("a", "first?", false), ("b", "second?", true)] {
            store
                .write(
                    &format!("questions/{}", id),
                    Fields::new()
                        .set("edition", "ep-12")
                        .set("questionText", text)
                        .set("isShow", show)
                        .server_timestamp("createdAt"),
                    false,
                )
                .await
                .unwrap();
        }
        store
            .write("questions/c", Fields::new().set("isShow", true), false)
            .await
            .unwrap();

        let source = StoreQuestionSource::new(store, "questions");
        let question = source.active_question().await.unwrap().unwrap();
        assert_eq!(question.id, "b");
        assert_eq!(question.question_text, "second?");
        assert_eq!(question.edition, "ep-12");
    }

    #[tokio::test]
    async fn test_no_flagged_question() {
        let store = Arc::new(MemoryStore::new(Arc::new(ManualClock::at_epoch())));
        let source = StoreQuestionSource::new(store, "questions");
        assert!(source.active_question().await.unwrap().is_none());
    }
}
