//! Count-up stopwatch engine
//!
//! Only discrete events touch the store. While running, the document holds
//! the instant of the last start and the time banked from earlier runs;
//! pausing folds the current run into `accumulatedMs`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

use super::{Outcome, TimerKind, SYSTEM_ACTOR};
use crate::clock::{millis_between, Clock};
use crate::error::TimerResult;
use crate::store::{decode_or_absent, DocumentStore, Fields};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StopwatchPhase {
    #[default]
    Stopped,
    Running,
    Paused,
}

impl StopwatchPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            StopwatchPhase::Stopped => "stopped",
            StopwatchPhase::Running => "running",
            StopwatchPhase::Paused => "paused",
        }
    }
}

/// Stopwatch singleton document
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopwatchState {
    pub state: StopwatchPhase,
    /// Instant of the last (re)start; set only while running
    #[serde(default)]
    pub start_at: Option<DateTime<Utc>>,
    /// Milliseconds banked from completed runs
    #[serde(default)]
    pub accumulated_ms: u64,
    #[serde(default)]
    pub updated_by: String,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Elapsed milliseconds at `now`. Never touches the store.
pub fn current_elapsed(state: &StopwatchState, now: DateTime<Utc>) -> u64 {
    match (state.state, state.start_at) {
        (StopwatchPhase::Running, Some(start_at)) => {
            state.accumulated_ms.saturating_add(millis_between(start_at, now))
        }
        _ => state.accumulated_ms,
    }
}

/// Issues stopwatch commands against the store
#[derive(Clone)]
pub struct StopwatchEngine {
    store: Arc<dyn DocumentStore>,
    clock: Arc<dyn Clock>,
    path: String,
}

impl StopwatchEngine {
    pub fn new(store: Arc<dyn DocumentStore>, clock: Arc<dyn Clock>, path: impl Into<String>) -> Self {
        Self {
            store,
            clock,
            path: path.into(),
        }
    }

    pub fn kind(&self) -> TimerKind {
        TimerKind::Stopwatch
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Create the document with stopped/zero values if it does not exist.
    /// Returns true when the document was created.
    pub async fn initialize(&self) -> TimerResult<bool> {
        if self.store.read(&self.path).await?.is_some() {
            return Ok(false);
        }
        self.write_full(SYSTEM_ACTOR, StopwatchPhase::Stopped, false, 0).await?;
        info!("Initialized stopwatch document at {}", self.path);
        Ok(true)
    }

    /// Current stored state; absent and malformed documents read as `None`
    pub async fn fetch(&self) -> TimerResult<Option<StopwatchState>> {
        let doc = self.store.read(&self.path).await?;
        Ok(decode_or_absent(&self.path, doc))
    }

    pub async fn start(&self, actor: &str) -> TimerResult<Outcome> {
        let current = self.fetch().await?.unwrap_or_default();
        if current.state == StopwatchPhase::Running {
            debug!("Stopwatch already running, start ignored");
            return Ok(Outcome::Unchanged);
        }

        self.write_full(actor, StopwatchPhase::Running, true, current.accumulated_ms)
            .await?;
        info!(
            "Stopwatch started by {} with {}ms banked",
            actor, current.accumulated_ms
        );
        Ok(Outcome::Applied)
    }

    pub async fn pause(&self, actor: &str) -> TimerResult<Outcome> {
        let current = self.fetch().await?.unwrap_or_default();
        let start_at = match (current.state, current.start_at) {
            (StopwatchPhase::Running, Some(start_at)) => start_at,
            _ => {
                debug!("Stopwatch not running, pause ignored");
                return Ok(Outcome::Unchanged);
            }
        };

        let elapsed = millis_between(start_at, self.clock.now());
        let accumulated = current.accumulated_ms.saturating_add(elapsed);
        self.write_full(actor, StopwatchPhase::Paused, false, accumulated)
            .await?;
        info!("Stopwatch paused by {} at {}ms", actor, accumulated);
        Ok(Outcome::Applied)
    }

    pub async fn reset(&self, actor: &str) -> TimerResult<Outcome> {
        self.write_full(actor, StopwatchPhase::Stopped, false, 0).await?;
        info!("Stopwatch reset by {}", actor);
        Ok(Outcome::Applied)
    }

    async fn write_full(
        &self,
        actor: &str,
        phase: StopwatchPhase,
        stamp_start: bool,
        accumulated_ms: u64,
    ) -> TimerResult<()> {
        let fields = Fields::new()
            .set("state", phase.as_str())
            .set("accumulatedMs", accumulated_ms)
            .set("updatedBy", actor)
            .server_timestamp("updatedAt");
        let fields = if stamp_start {
            fields.server_timestamp("startAt")
        } else {
            fields.set_timestamp("startAt", None)
        };
        self.store.write(&self.path, fields, false).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::{StoreError, TimerError};
    use crate::store::{timestamp_value, MemoryStore};
    use serde_json::json;

    const PATH: &str = "meta/timer";

    fn setup() -> (StopwatchEngine, Arc<MemoryStore>, ManualClock) {
        let clock = ManualClock::at_epoch();
        let store = Arc::new(MemoryStore::new(Arc::new(clock.clone())));
        let engine = StopwatchEngine::new(store.clone(), Arc::new(clock.clone()), PATH);
        (engine, store, clock)
    }

    #[tokio::test]
    async fn test_initialize_only_once() {
        let (engine, store, _) = setup();
        assert!(engine.initialize().await.unwrap());
        assert!(!engine.initialize().await.unwrap());
        assert_eq!(store.write_count(), 1);

        let state = engine.fetch().await.unwrap().unwrap();
        assert_eq!(state.state, StopwatchPhase::Stopped);
        assert_eq!(state.updated_by, SYSTEM_ACTOR);
        assert_eq!(state.start_at, None);
    }

    #[tokio::test]
    async fn test_pause_banks_elapsed_time() {
        let (engine, _, clock) = setup();
        engine.start("admin").await.unwrap();
        clock.advance_ms(5_000);
        engine.pause("admin").await.unwrap();
        assert_eq!(engine.fetch().await.unwrap().unwrap().accumulated_ms, 5_000);

        clock.advance_ms(5_000);
        engine.start("admin").await.unwrap();
        clock.advance_ms(2_000);
        engine.pause("admin").await.unwrap();

        let state = engine.fetch().await.unwrap().unwrap();
        assert_eq!(state.accumulated_ms, 7_000);
        assert_eq!(state.state, StopwatchPhase::Paused);
        assert_eq!(state.start_at, None);
    }

    #[tokio::test]
    async fn test_start_while_running_is_noop() {
        let (engine, store, clock) = setup();
        engine.start("admin").await.unwrap();
        let first = engine.fetch().await.unwrap().unwrap();

        clock.advance_ms(1_000);
        assert_eq!(engine.start("other").await.unwrap(), Outcome::Unchanged);
        assert_eq!(engine.fetch().await.unwrap().unwrap(), first);
        assert_eq!(store.write_count(), 1);
    }

    #[tokio::test]
    async fn test_pause_on_paused_stopwatch_is_noop() {
        let (engine, store, clock) = setup();
        engine.start("admin").await.unwrap();
        clock.advance_ms(3_000);
        engine.pause("admin").await.unwrap();
        let writes = store.write_count();

        clock.advance_ms(10_000);
        let (a, b) = tokio::join!(engine.pause("admin"), engine.pause("other"));
        assert_eq!(a.unwrap(), Outcome::Unchanged);
        assert_eq!(b.unwrap(), Outcome::Unchanged);
        assert_eq!(store.write_count(), writes);
        assert_eq!(engine.fetch().await.unwrap().unwrap().accumulated_ms, 3_000);
    }

    #[tokio::test]
    async fn test_reset_from_any_state() {
        let (engine, _, clock) = setup();
        engine.start("admin").await.unwrap();
        clock.advance_ms(4_000);
        engine.reset("admin").await.unwrap();

        let state = engine.fetch().await.unwrap().unwrap();
        assert_eq!(state.state, StopwatchPhase::Stopped);
        assert_eq!(state.accumulated_ms, 0);
        assert_eq!(state.start_at, None);
        assert_eq!(state.updated_by, "admin");
    }

    #[tokio::test]
    async fn test_start_records_server_timestamp() {
        let (engine, _, clock) = setup();
        let now = clock.now();
        engine.start("admin").await.unwrap();
        let state = engine.fetch().await.unwrap().unwrap();
        assert_eq!(state.start_at, Some(now));
        assert_eq!(state.updated_at, Some(now));
    }

    #[tokio::test]
    async fn test_store_outage_surfaces_error() {
        let (engine, store, _) = setup();
        store.set_available(false);
        assert!(matches!(
            engine.start("admin").await,
            Err(TimerError::StoreUnavailable(StoreError::Unavailable(_)))
        ));
    }

    #[tokio::test]
    async fn test_malformed_document_reads_as_absent() {
        let (engine, store, _) = setup();
        let doc = json!({"state": "sprinting", "accumulatedMs": -4});
        store.insert_raw(PATH, doc.as_object().unwrap().clone());
        assert!(engine.fetch().await.unwrap().is_none());

        // A start over a malformed document begins from zero
        engine.start("admin").await.unwrap();
        let state = engine.fetch().await.unwrap().unwrap();
        assert_eq!(state.accumulated_ms, 0);
    }

    #[test]
    fn test_current_elapsed_frozen_unless_running() {
        let clock = ManualClock::at_epoch();
        let paused = StopwatchState {
            state: StopwatchPhase::Paused,
            accumulated_ms: 42_000,
            ..Default::default()
        };
        let before = current_elapsed(&paused, clock.now());
        clock.advance_ms(3_600_000);
        assert_eq!(before, 42_000);
        assert_eq!(current_elapsed(&paused, clock.now()), 42_000);
    }

    #[test]
    fn test_current_elapsed_running_grows_with_clock() {
        let clock = ManualClock::at_epoch();
        let running = StopwatchState {
            state: StopwatchPhase::Running,
            start_at: Some(clock.now()),
            accumulated_ms: 1_000,
            ..Default::default()
        };
        let mut last = current_elapsed(&running, clock.now());
        assert_eq!(last, 1_000);
        for _ in 0..20 {
            clock.advance_ms(100);
            let next = current_elapsed(&running, clock.now());
            assert!(next >= last);
            last = next;
        }
        assert_eq!(last - running.accumulated_ms, 2_000);
    }

    #[test]
    fn test_current_elapsed_saturates() {
        let clock = ManualClock::at_epoch();
        let running = StopwatchState {
            state: StopwatchPhase::Running,
            start_at: Some(clock.now()),
            accumulated_ms: u64::MAX - 10,
            ..Default::default()
        };
        clock.advance_ms(1_000);
        assert_eq!(current_elapsed(&running, clock.now()), u64::MAX);
    }

    #[tokio::test]
    async fn test_pause_near_limit_saturates() {
        let (engine, store, clock) = setup();
        let start = timestamp_value(clock.now());
        let doc = json!({"state": "running", "startAt": start, "accumulatedMs": u64::MAX - 1});
        store.insert_raw(PATH, doc.as_object().unwrap().clone());

        clock.advance_ms(5_000);
        assert_eq!(engine.pause("admin").await.unwrap(), Outcome::Applied);
        assert_eq!(engine.fetch().await.unwrap().unwrap().accumulated_ms, u64::MAX);
    }
}
