//! Cancellable periodic task

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

#[derive(Default)]
struct State {
    token: Option<CancellationToken>,
    shut_down: bool,
}

/// Runs a callback every `period` until stopped
///
/// The first tick fires one full period after [`start`](Self::start). A
/// stopped ticker can be started again with a fresh period, which is how
/// the flush timer is paused around compaction. After
/// [`shutdown`](Self::shutdown) it never starts again.
pub struct Ticker {
    name: &'static str,
    period: Duration,
    on_tick: Arc<dyn Fn() + Send + Sync>,
    state: Mutex<State>,
}

impl Ticker {
    /// Create a stopped ticker
    pub fn new(
        name: &'static str,
        period: Duration,
        on_tick: impl Fn() + Send + Sync + 'static,
    ) -> Self {
        Self {
            name,
            period,
            on_tick: Arc::new(on_tick),
            state: Mutex::new(State::default()),
        }
    }

    /// Start ticking
    ///
    /// Must be called from within a Tokio runtime. Returns `false` if the
    /// ticker was already running or has been shut down.
    pub fn start(&self) -> bool {
        let mut state = self.state.lock();
        if state.shut_down || state.token.is_some() {
            return false;
        }

        let token = CancellationToken::new();
        let cancelled = token.clone();
        let on_tick = self.on_tick.clone();
        let period = self.period;
        let name = self.name;

        tokio::spawn(async move {
            let mut interval = interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = cancelled.cancelled() => break,
                    _ = interval.tick() => {
                        trace!(ticker = name, "Tick");
                        on_tick();
                    }
                }
            }
        });

        state.token = Some(token);
        debug!(ticker = self.name, period_ms = self.period.as_millis() as u64, "Ticker started");
        true
    }

    /// Stop ticking; returns whether the ticker was running
    pub fn stop(&self) -> bool {
        match self.state.lock().token.take() {
            Some(token) => {
                token.cancel();
                debug!(ticker = self.name, "Ticker stopped");
                true
            }
            None => false,
        }
    }

    /// Stop for good
    pub fn shutdown(&self) {
        self.state.lock().shut_down = true;
        self.stop();
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().token.is_some()
    }

    pub fn period(&self) -> Duration {
        self.period
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        if let Some(token) = self.state.get_mut().token.take() {
            token.cancel();
        }
    }
}

impl fmt::Debug for Ticker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ticker")
            .field("name", &self.name)
            .field("period", &self.period)
            .field("running", &self.is_running())
            .finish()
    }
}
