//! Cancellable periodic timers owned by the views that start them.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

#[derive(Clone, Default)]
pub struct Scheduler {
    live: Arc<AtomicUsize>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `task` now and then every `period` until the returned handle is
    /// cancelled or dropped.  A run that overruns delays the next one
    /// instead of bursting.
    pub fn every<F, Fut>(&self, name: &'static str, period: Duration, task: F) -> TimerHandle
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.live.fetch_add(1, Ordering::SeqCst);
        let join = tokio::spawn(async move {
            let mut ticker = time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                tracing::trace!(timer = name, "tick");
                task().await;
            }
        });
        tracing::debug!(timer = name, ?period, "timer started");
        TimerHandle {
            name,
            join: Some(join),
            live: self.live.clone(),
        }
    }

    /// Timers started and not yet cancelled.
    pub fn live_timers(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }
}

#[must_use = "dropping the handle cancels the timer"]
pub struct TimerHandle {
    name: &'static str,
    join: Option<JoinHandle<()>>,
    live: Arc<AtomicUsize>,
}

impl TimerHandle {
    pub fn cancel(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if let Some(join) = self.join.take() {
            join.abort();
            self.live.fetch_sub(1, Ordering::SeqCst);
            tracing::debug!(timer = self.name, "timer cancelled");
        }
    }
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
