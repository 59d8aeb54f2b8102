//! Subscription bridge - turns store snapshots into a live timer reading
//!
//! Each display or admin client runs one bridge per timer. The bridge keeps
//! the latest snapshot, recomputes the displayed duration immediately on
//! every snapshot, and while the timer runs re-derives it on a local tick
//! from the cached snapshot and the local clock without touching the store.

mod live;

pub use live::{BridgeHandle, TimerBridge};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use std::time::Duration;

use crate::config::TimersConfig;
use crate::timer::{
    current_elapsed, remaining_time, CountdownPhase, CountdownState, Layout, StopwatchPhase,
    StopwatchState, TimerKind,
};

/// What a client renders for one timer
#[derive(Debug, Clone, PartialEq)]
pub struct LiveReading<P> {
    /// Phase of the last snapshot (default phase until one arrives)
    pub phase: P,
    pub duration_ms: u64,
    /// Zero-padded display digits of `duration_ms`
    pub digits: Vec<u8>,
    /// No snapshot has been received yet
    pub loading: bool,
    /// Last store failure; the reading keeps showing the last known value
    pub error: Option<String>,
}

impl<P: Default> LiveReading<P> {
    fn initial(layout: Layout) -> Self {
        Self {
            phase: P::default(),
            duration_ms: 0,
            digits: layout.digits(0),
            loading: true,
            error: None,
        }
    }
}

/// Derived duration at one instant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Measurement {
    pub ms: u64,
    /// Countdown deadline passed while the stored state is not yet `finished`
    pub expired: bool,
}

/// A timer document that can be mirrored live
pub trait LiveModel: DeserializeOwned + Default + Clone + Send + Sync + 'static {
    type Phase: Copy + PartialEq + Debug + Default + Send + Sync + 'static;

    const KIND: TimerKind;
    const LAYOUT: Layout;

    fn phase(&self) -> Self::Phase;

    /// Whether the displayed value changes with the clock
    fn is_running(&self) -> bool;

    fn measure(&self, now: DateTime<Utc>) -> Measurement;
}

impl LiveModel for StopwatchState {
    type Phase = StopwatchPhase;

    const KIND: TimerKind = TimerKind::Stopwatch;
    const LAYOUT: Layout = Layout::MinutesSeconds;

    fn phase(&self) -> StopwatchPhase {
        self.state
    }

    fn is_running(&self) -> bool {
        self.state == StopwatchPhase::Running
    }

    fn measure(&self, now: DateTime<Utc>) -> Measurement {
        Measurement {
            ms: current_elapsed(self, now),
            expired: false,
        }
    }
}

impl LiveModel for CountdownState {
    type Phase = CountdownPhase;

    const KIND: TimerKind = TimerKind::Countdown;
    const LAYOUT: Layout = Layout::HoursMinutesSeconds;

    fn phase(&self) -> CountdownPhase {
        self.state
    }

    fn is_running(&self) -> bool {
        self.state == CountdownPhase::Running
    }

    fn measure(&self, now: DateTime<Utc>) -> Measurement {
        let remaining = remaining_time(self, now);
        Measurement {
            ms: remaining.ms,
            expired: remaining.expired,
        }
    }
}

/// Bridge timing knobs
#[derive(Debug, Clone, Copy)]
pub struct BridgeOptions {
    /// Local recomputation period while running
    pub tick_interval: Duration,
    /// Delay between attempts to re-establish a lost subscription
    pub resubscribe_interval: Duration,
}

impl Default for BridgeOptions {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(100),
            resubscribe_interval: Duration::from_secs(2),
        }
    }
}

impl From<&TimersConfig> for BridgeOptions {
    fn from(config: &TimersConfig) -> Self {
        Self {
            tick_interval: Duration::from_millis(config.tick_interval_ms.max(1)),
            resubscribe_interval: Duration::from_millis(config.resubscribe_interval_ms.max(1)),
        }
    }
}
