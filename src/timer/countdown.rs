//! Countdown-to-deadline engine
//!
//! The deadline is the countdown's only time reference: while running, the
//! remaining time is `deadlineAt - now` on each observer's clock.
//!
//! Pausing uses "paused snapshot" semantics. The remaining time at the pause
//! instant is stored as `pausedRemainingMs` and is what every observer shows
//! while paused; resuming moves the deadline to `now + pausedRemainingMs`.
//! Setting a new deadline or resetting discards the snapshot.
//!
//! Reaching zero while running moves the document to `finished`. That write is
//! requested by observers on a best-effort basis, see
//! [`CountdownEngine::spawn_finish_if_elapsed`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{Outcome, TimerKind, SYSTEM_ACTOR};
use crate::clock::{millis_between, Clock};
use crate::error::{TimerError, TimerResult};
use crate::store::{decode_or_absent, DocumentStore, Fields};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CountdownPhase {
    #[default]
    Stopped,
    Running,
    Paused,
    Finished,
}

impl CountdownPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            CountdownPhase::Stopped => "stopped",
            CountdownPhase::Running => "running",
            CountdownPhase::Paused => "paused",
            CountdownPhase::Finished => "finished",
        }
    }
}

/// Countdown singleton document
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CountdownState {
    pub state: CountdownPhase,
    #[serde(default)]
    pub deadline_at: Option<DateTime<Utc>>,
    /// Remaining time frozen at the last pause
    #[serde(default)]
    pub paused_remaining_ms: Option<u64>,
    #[serde(default)]
    pub updated_by: String,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Remaining time at an instant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Remaining {
    pub ms: u64,
    /// The deadline has passed and the stored state should become `finished`
    pub expired: bool,
}

/// Remaining milliseconds at `now`; never negative. Pure.
pub fn remaining_time(state: &CountdownState, now: DateTime<Utc>) -> Remaining {
    let Some(deadline_at) = state.deadline_at else {
        return Remaining { ms: 0, expired: false };
    };

    match state.state {
        CountdownPhase::Finished => Remaining { ms: 0, expired: false },
        CountdownPhase::Paused => Remaining {
            ms: state
                .paused_remaining_ms
                .unwrap_or_else(|| millis_between(now, deadline_at)),
            expired: false,
        },
        CountdownPhase::Stopped | CountdownPhase::Running => {
            let ms = millis_between(now, deadline_at);
            Remaining { ms, expired: ms == 0 }
        }
    }
}

/// Issues countdown commands against the store
#[derive(Clone)]
pub struct CountdownEngine {
    store: Arc<dyn DocumentStore>,
    clock: Arc<dyn Clock>,
    path: String,
}

impl CountdownEngine {
    pub fn new(store: Arc<dyn DocumentStore>, clock: Arc<dyn Clock>, path: impl Into<String>) -> Self {
        Self {
            store,
            clock,
            path: path.into(),
        }
    }

    pub fn kind(&self) -> TimerKind {
        TimerKind::Countdown
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

    /// Create the document in the stopped state with no deadline if absent.
    /// Returns true when the document was created.
    pub async fn initialize(&self) -> TimerResult<bool> {
        if self.store.read(&self.path).await?.is_some() {
            return Ok(false);
        }
        self.write_reset(SYSTEM_ACTOR).await?;
        info!("Initialized countdown document at {}", self.path);
        Ok(true)
    }

    /// Current stored state; absent and malformed documents read as `None`
    pub async fn fetch(&self) -> TimerResult<Option<CountdownState>> {
        let doc = self.store.read(&self.path).await?;
        Ok(decode_or_absent(&self.path, doc))
    }

    /// Set the absolute deadline. Always allowed; any run in progress is
    /// invalidated and the countdown returns to `stopped`.
    pub async fn set_deadline(&self, actor: &str, deadline: DateTime<Utc>) -> TimerResult<Outcome> {
        let fields = Fields::new()
            .set_timestamp("deadlineAt", Some(deadline))
            .set("state", CountdownPhase::Stopped.as_str())
            .set("pausedRemainingMs", None::<u64>)
            .set("updatedBy", actor)
            .server_timestamp("updatedAt");
        self.store.write(&self.path, fields, true).await?;
        info!("Countdown deadline set to {} by {}", deadline, actor);
        Ok(Outcome::Applied)
    }

    /// Set the deadline `duration` from now
    pub async fn set_duration(&self, actor: &str, duration: Duration) -> TimerResult<Outcome> {
        let delta = chrono::Duration::from_std(duration)
            .map_err(|_| TimerError::Validation("Countdown duration is too large.".to_string()))?;
        let deadline = self
            .clock
            .now()
            .checked_add_signed(delta)
            .ok_or_else(|| TimerError::Validation("Countdown duration is too large.".to_string()))?;
        self.set_deadline(actor, deadline).await
    }

    pub async fn start(&self, actor: &str) -> TimerResult<Outcome> {
        let current = self.fetch().await?.unwrap_or_default();
        let Some(deadline_at) = current.deadline_at else {
            return Err(TimerError::Validation(
                "No deadline set. Set the deadline before starting the countdown.".to_string(),
            ));
        };
        if current.state == CountdownPhase::Running {
            debug!("Countdown already running, start ignored");
            return Ok(Outcome::Unchanged);
        }

        let mut fields = Fields::new()
            .set("state", CountdownPhase::Running.as_str())
            .set("updatedBy", actor)
            .server_timestamp("updatedAt");

        let resume_from = match current.state {
            CountdownPhase::Paused => current.paused_remaining_ms,
            _ => None,
        };
        if let Some(remaining_ms) = resume_from {
            let deadline = i64::try_from(remaining_ms)
                .ok()
                .and_then(|ms| {
                    self.clock
                        .now()
                        .checked_add_signed(chrono::Duration::milliseconds(ms))
                })
                .ok_or_else(|| {
                    TimerError::Validation(
                        "Stored remaining time is out of range. Reset the countdown.".to_string(),
                    )
                })?;
            fields = fields
                .set_timestamp("deadlineAt", Some(deadline))
                .set("pausedRemainingMs", None::<u64>);
            info!(
                "Countdown resumed by {} with {}ms remaining, deadline moved to {}",
                actor, remaining_ms, deadline
            );
        } else {
            info!("Countdown started by {} towards {}", actor, deadline_at);
        }

        self.store.write(&self.path, fields, true).await?;
        Ok(Outcome::Applied)
    }

    pub async fn pause(&self, actor: &str) -> TimerResult<Outcome> {
        let current = self.fetch().await?.unwrap_or_default();
        if current.state != CountdownPhase::Running {
            debug!("Countdown not running, pause ignored");
            return Ok(Outcome::Unchanged);
        }

        let remaining = remaining_time(&current, self.clock.now());
        let fields = Fields::new()
            .set("state", CountdownPhase::Paused.as_str())
            .set("pausedRemainingMs", remaining.ms)
            .set("updatedBy", actor)
            .server_timestamp("updatedAt");
        self.store.write(&self.path, fields, true).await?;
        info!("Countdown paused by {} with {}ms remaining", actor, remaining.ms);
        Ok(Outcome::Applied)
    }

    pub async fn reset(&self, actor: &str) -> TimerResult<Outcome> {
        self.write_reset(actor).await?;
        info!("Countdown reset by {}", actor);
        Ok(Outcome::Applied)
    }

    /// Mark the countdown `finished` if the stored deadline has passed.
    ///
    /// Re-reads the document first so a stale observer cannot finish a
    /// deadline that an admin has since moved or paused.
    pub async fn finish_if_elapsed(&self) -> TimerResult<Outcome> {
        let Some(current) = self.fetch().await? else {
            return Ok(Outcome::Unchanged);
        };
        if !remaining_time(&current, self.clock.now()).expired {
            return Ok(Outcome::Unchanged);
        }

        let fields = Fields::new().set("state", CountdownPhase::Finished.as_str());
        self.store.write(&self.path, fields, true).await?;
        info!("Countdown reached its deadline, marked finished");
        Ok(Outcome::Applied)
    }

    /// Fire-and-forget [`finish_if_elapsed`](Self::finish_if_elapsed); failures are only logged
    pub fn spawn_finish_if_elapsed(&self) -> JoinHandle<()> {
        let engine = self.clone();
        tokio::spawn(async move {
            if let Err(e) = engine.finish_if_elapsed().await {
                warn!("Failed to mark countdown finished: {}", e);
            }
        })
    }

    async fn write_reset(&self, actor: &str) -> TimerResult<()> {
        let fields = Fields::new()
            .set("state", CountdownPhase::Stopped.as_str())
            .set_timestamp("deadlineAt", None)
            .set("pausedRemainingMs", None::<u64>)
            .set("updatedBy", actor)
            .server_timestamp("updatedAt");
        self.store.write(&self.path, fields, false).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::{timestamp_value, MemoryStore};
    use crate::timer::format::Layout;

    const PATH: &str = "meta/countdownTimer";

    fn setup() -> (CountdownEngine, Arc<MemoryStore>, ManualClock) {
        let clock = ManualClock::at_epoch();
        let store = Arc::new(MemoryStore::new(Arc::new(clock.clone())));
        let engine = CountdownEngine::new(store.clone(), Arc::new(clock.clone()), PATH);
        (engine, store, clock)
    }

    #[tokio::test]
    async fn test_start_without_deadline_fails() {
        let (engine, store, _) = setup();
        engine.initialize().await.unwrap();
        let writes = store.write_count();

        let err = engine.start("admin").await.unwrap_err();
        assert!(matches!(err, TimerError::Validation(_)));
        assert_eq!(store.write_count(), writes);
        assert_eq!(
            engine.fetch().await.unwrap().unwrap().state,
            CountdownPhase::Stopped
        );
    }

    #[tokio::test]
    async fn test_start_on_missing_document_fails() {
        let (engine, store, _) = setup();
        assert!(matches!(
            engine.start("admin").await,
            Err(TimerError::Validation(_))
        ));
        assert_eq!(store.write_count(), 0);
    }

    #[tokio::test]
    async fn test_set_deadline_and_format() {
        let (engine, _, clock) = setup();
        engine
            .set_duration("admin", Duration::from_millis(3_661_000))
            .await
            .unwrap();
        let state = engine.fetch().await.unwrap().unwrap();
        assert_eq!(state.state, CountdownPhase::Stopped);

        let remaining = remaining_time(&state, clock.now());
        assert_eq!(remaining.ms, 3_661_000);
        assert_eq!(Layout::HoursMinutesSeconds.format(remaining.ms), "01:01:01");
        assert_eq!(
            Layout::HoursMinutesSeconds.digits(remaining.ms),
            vec![0, 1, 0, 1, 0, 1]
        );
    }

    #[tokio::test]
    async fn test_set_deadline_forces_stopped() {
        let (engine, _, clock) = setup();
        engine.set_duration("admin", Duration::from_secs(60)).await.unwrap();
        engine.start("admin").await.unwrap();
        clock.advance_ms(10_000);
        engine.pause("admin").await.unwrap();

        let new_deadline = clock.now() + chrono::Duration::minutes(5);
        engine.set_deadline("admin", new_deadline).await.unwrap();
        let state = engine.fetch().await.unwrap().unwrap();
        assert_eq!(state.state, CountdownPhase::Stopped);
        assert_eq!(state.deadline_at, Some(new_deadline));
        assert_eq!(state.paused_remaining_ms, None);
    }

    #[tokio::test]
    async fn test_paused_snapshot_survives_wall_clock() {
        let (engine, _, clock) = setup();
        engine.set_duration("admin", Duration::from_secs(60)).await.unwrap();
        engine.start("admin").await.unwrap();
        clock.advance_ms(15_000);
        engine.pause("admin").await.unwrap();

        clock.advance_ms(120_000);
        let state = engine.fetch().await.unwrap().unwrap();
        assert_eq!(state.state, CountdownPhase::Paused);
        assert_eq!(remaining_time(&state, clock.now()).ms, 45_000);
        assert!(!remaining_time(&state, clock.now()).expired);

        engine.start("admin").await.unwrap();
        let resumed = engine.fetch().await.unwrap().unwrap();
        assert_eq!(resumed.paused_remaining_ms, None);
        assert_eq!(remaining_time(&resumed, clock.now()).ms, 45_000);

        clock.advance_ms(5_000);
        assert_eq!(remaining_time(&resumed, clock.now()).ms, 40_000);
    }

    #[tokio::test]
    async fn test_resume_with_out_of_range_remainder_fails() {
        let (engine, store, clock) = setup();
        for remaining in [9_007_199_254_740_991_u64, u64::MAX] {
            let doc = serde_json::json!({
                "state": "paused",
                "deadlineAt": timestamp_value(clock.now()),
                "pausedRemainingMs": remaining,
            });
            store.insert_raw(PATH, doc.as_object().unwrap().clone());
            let writes = store.write_count();

            let err = engine.start("admin").await.unwrap_err();
            assert!(matches!(err, TimerError::Validation(_)));
            assert_eq!(store.write_count(), writes);
            assert_eq!(
                engine.fetch().await.unwrap().unwrap().state,
                CountdownPhase::Paused
            );
        }
    }

    #[tokio::test]
    async fn test_reset_clears_deadline() {
        let (engine, _, _) = setup();
        engine.set_duration("admin", Duration::from_secs(60)).await.unwrap();
        engine.start("admin").await.unwrap();
        engine.reset("admin").await.unwrap();

        let state = engine.fetch().await.unwrap().unwrap();
        assert_eq!(state.state, CountdownPhase::Stopped);
        assert_eq!(state.deadline_at, None);
        assert!(matches!(
            engine.start("admin").await,
            Err(TimerError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_finish_if_elapsed() {
        let (engine, _, clock) = setup();
        engine.set_duration("admin", Duration::from_secs(2)).await.unwrap();
        engine.start("admin").await.unwrap();
        assert_eq!(engine.finish_if_elapsed().await.unwrap(), Outcome::Unchanged);

        clock.advance_ms(2_500);
        assert_eq!(engine.finish_if_elapsed().await.unwrap(), Outcome::Applied);
        let state = engine.fetch().await.unwrap().unwrap();
        assert_eq!(state.state, CountdownPhase::Finished);
        assert_eq!(state.updated_by, "admin");
        assert_eq!(engine.finish_if_elapsed().await.unwrap(), Outcome::Unchanged);
    }

    #[tokio::test]
    async fn test_failed_finish_write_is_swallowed() {
        let (engine, store, clock) = setup();
        engine.set_duration("admin", Duration::from_secs(1)).await.unwrap();
        engine.start("admin").await.unwrap();
        clock.advance_ms(5_000);
        let state = engine.fetch().await.unwrap().unwrap();

        store.set_available(false);
        engine.spawn_finish_if_elapsed().await.unwrap();
        assert_eq!(remaining_time(&state, clock.now()).ms, 0);
    }

    #[test]
    fn test_remaining_never_negative() {
        let clock = ManualClock::at_epoch();
        let state = CountdownState {
            state: CountdownPhase::Running,
            deadline_at: Some(clock.now() - chrono::Duration::hours(3)),
            ..Default::default()
        };
        let remaining = remaining_time(&state, clock.now());
        assert_eq!(remaining, Remaining { ms: 0, expired: true });
    }

    #[test]
    fn test_remaining_without_deadline_is_zero() {
        let clock = ManualClock::at_epoch();
        let state = CountdownState::default();
        assert_eq!(
            remaining_time(&state, clock.now()),
            Remaining { ms: 0, expired: false }
        );
    }

    #[test]
    fn test_finished_countdown_does_not_request_finish_again() {
        let clock = ManualClock::at_epoch();
        let state = CountdownState {
            state: CountdownPhase::Finished,
            deadline_at: Some(clock.now() - chrono::Duration::seconds(1)),
            ..Default::default()
        };
        assert!(!remaining_time(&state, clock.now()).expired);
    }
}
