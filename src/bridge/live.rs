//! Bridge task
//!
//! One task per mirrored timer. It listens to the store, keeps the latest
//! snapshot, and publishes readings on a `watch` channel. A lost listener is
//! re-established on a fixed interval; meanwhile the last known snapshot keeps
//! being rendered (and keeps ticking if it was running).

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{BridgeOptions, LiveModel, LiveReading, Measurement};
use crate::clock::Clock;
use crate::store::{decode_or_absent, Document, DocumentStore, Subscription};
use crate::timer::{CountdownEngine, CountdownState, StopwatchEngine, StopwatchState};

type ExpiryHook = Arc<dyn Fn() + Send + Sync>;

/// Configured, not yet running bridge
pub struct TimerBridge<M: LiveModel> {
    store: Arc<dyn DocumentStore>,
    clock: Arc<dyn Clock>,
    path: String,
    options: BridgeOptions,
    on_expired: Option<ExpiryHook>,
    _model: PhantomData<fn() -> M>,
}

impl TimerBridge<StopwatchState> {
    pub fn stopwatch(engine: &StopwatchEngine, options: BridgeOptions) -> Self {
        Self::new(
            engine.store().clone(),
            engine.clock().clone(),
            engine.path(),
            options,
        )
    }
}

impl TimerBridge<CountdownState> {
    /// Countdown bridge that asks `engine` to mark the countdown finished
    /// once per snapshot whose deadline has passed
    pub fn countdown(engine: &CountdownEngine, options: BridgeOptions) -> Self {
        let finisher = engine.clone();
        let mut bridge = Self::new(
            engine.store().clone(),
            engine.clock().clone(),
            engine.path(),
            options,
        );
        bridge.on_expired = Some(Arc::new(move || {
            finisher.spawn_finish_if_elapsed();
        }));
        bridge
    }
}

impl<M: LiveModel> TimerBridge<M> {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        clock: Arc<dyn Clock>,
        path: impl Into<String>,
        options: BridgeOptions,
    ) -> Self {
        Self {
            store,
            clock,
            path: path.into(),
            options,
            on_expired: None,
            _model: PhantomData,
        }
    }

    /// Start mirroring on the current tokio runtime
    pub fn spawn(self) -> BridgeHandle<M::Phase> {
        let (tx, rx) = watch::channel(LiveReading::initial(M::LAYOUT));
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let path = self.path.clone();
        info!("Mirroring {} from {}", M::KIND, path);
        let task = tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = self.drive(tx, token.clone()) => {}
            }
            debug!("Bridge for {} stopped", path);
        });
        BridgeHandle {
            readings: rx,
            cancel,
            task,
        }
    }

    async fn drive(self, tx: watch::Sender<LiveReading<M::Phase>>, cancel: CancellationToken) {
        let mut mirror = Mirror::<M> {
            snapshot: None,
            error: None,
            expiry_requested: false,
            clock: self.clock.clone(),
            on_expired: self.on_expired.clone(),
            tx,
            cancel,
        };

        let mut subscription = self.connect(&mut mirror);
        let mut retry = subscription
            .is_none()
            .then(|| delayed_interval(self.options.resubscribe_interval));
        let mut ticker: Option<Interval> = None;

        loop {
            tokio::select! {
                next = async {
                    match subscription.as_mut() {
                        Some(sub) => sub.changed().await,
                        None => std::future::pending().await,
                    }
                } => {
                    match next {
                        Ok(doc) => mirror.apply_snapshot(&self.path, doc),
                        Err(e) => {
                            warn!("Lost listener on {}: {}", self.path, e);
                            mirror.error = Some(e.to_string());
                            subscription = None;
                            retry = Some(delayed_interval(self.options.resubscribe_interval));
                        }
                    }
                    mirror.publish();
                    sync_ticker(&mut ticker, mirror.is_running(), self.options.tick_interval);
                }

                _ = async {
                    match ticker.as_mut() {
                        Some(t) => { t.tick().await; }
                        None => std::future::pending::<()>().await,
                    }
                } => {
                    mirror.publish();
                }

                _ = async {
                    match retry.as_mut() {
                        Some(t) => { t.tick().await; }
                        None => std::future::pending::<()>().await,
                    }
                } => {
                    if let Some(sub) = self.connect(&mut mirror) {
                        info!("Listener on {} re-established", self.path);
                        subscription = Some(sub);
                        retry = None;
                    }
                }
            }
        }
    }

    fn connect(&self, mirror: &mut Mirror<M>) -> Option<Subscription> {
        match self.store.subscribe(&self.path) {
            Ok(sub) => Some(sub),
            Err(e) => {
                warn!("Failed to listen on {}: {}", self.path, e);
                mirror.error = Some(e.to_string());
                mirror.publish();
                None
            }
        }
    }
}

/// Interval whose first tick is one period away
fn delayed_interval(period: Duration) -> Interval {
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    interval
}

fn sync_ticker(ticker: &mut Option<Interval>, running: bool, period: Duration) {
    match (running, ticker.is_some()) {
        (true, false) => *ticker = Some(delayed_interval(period)),
        (false, true) => *ticker = None,
        _ => {}
    }
}

/// Client-side projection of one timer document
struct Mirror<M: LiveModel> {
    /// `None` until the first snapshot; an absent document becomes the default state
    snapshot: Option<M>,
    error: Option<String>,
    expiry_requested: bool,
    clock: Arc<dyn Clock>,
    on_expired: Option<ExpiryHook>,
    tx: watch::Sender<LiveReading<M::Phase>>,
    cancel: CancellationToken,
}

impl<M: LiveModel> Mirror<M> {
    fn apply_snapshot(&mut self, path: &str, doc: Option<Document>) {
        let model: M = decode_or_absent(path, doc).unwrap_or_default();
        debug!("Snapshot for {}: {:?}", path, model.phase());
        self.snapshot = Some(model);
        self.error = None;
        self.expiry_requested = false;
    }

    fn is_running(&self) -> bool {
        self.snapshot.as_ref().map(M::is_running).unwrap_or(false)
    }

    /// Recompute from the cached snapshot and publish if anything changed
    fn publish(&mut self) {
        if self.cancel.is_cancelled() {
            return;
        }

        let now = self.clock.now();
        let (phase, measurement) = match &self.snapshot {
            Some(model) => (model.phase(), model.measure(now)),
            None => (M::Phase::default(), Measurement { ms: 0, expired: false }),
        };

        if measurement.expired && !self.expiry_requested {
            if let Some(hook) = &self.on_expired {
                self.expiry_requested = true;
                debug!("{} deadline passed, requesting finish", M::KIND);
                hook();
            }
        }

        let reading = LiveReading {
            phase,
            duration_ms: measurement.ms,
            digits: M::LAYOUT.digits(measurement.ms),
            loading: self.snapshot.is_none(),
            error: self.error.clone(),
        };
        self.tx.send_if_modified(|current| {
            if *current != reading {
                *current = reading;
                true
            } else {
                false
            }
        });
    }
}

/// Running bridge. Dropping it (or calling [`unsubscribe`](Self::unsubscribe))
/// releases the store listener and stops the local tick.
pub struct BridgeHandle<P> {
    readings: watch::Receiver<LiveReading<P>>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl<P: Clone> BridgeHandle<P> {
    /// Latest reading
    pub fn reading(&self) -> LiveReading<P> {
        self.readings.borrow().clone()
    }

    /// Independent receiver for another renderer
    pub fn subscribe(&self) -> watch::Receiver<LiveReading<P>> {
        self.readings.clone()
    }

    /// Wait for the next published reading; `None` once the bridge has stopped
    pub async fn changed(&mut self) -> Option<LiveReading<P>> {
        self.readings.changed().await.ok()?;
        Some(self.readings.borrow_and_update().clone())
    }

    /// Wait until a reading satisfies `predicate`
    pub async fn wait_for(
        &mut self,
        mut predicate: impl FnMut(&LiveReading<P>) -> bool,
    ) -> Option<LiveReading<P>> {
        loop {
            {
                let current = self.readings.borrow_and_update();
                if predicate(&current) {
                    return Some(current.clone());
                }
            }
            self.readings.changed().await.ok()?;
        }
    }

    pub fn unsubscribe(self) {}
}

impl<P> Drop for BridgeHandle<P> {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.task.abort();
    }
}
