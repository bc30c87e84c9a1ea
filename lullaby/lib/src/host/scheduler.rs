//! Wall-clock timers on a tokio runtime.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::AbortHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::trace;

use crate::clock::{Scheduler, TimerId};
use crate::traits::EventSink;

/// A [`Scheduler`] whose timers are tokio interval tasks.
///
/// Each firing is delivered as [`EngineEvent::Timer`](crate::EngineEvent::Timer)
/// through the sink. Missed ticks are skipped rather than bunched up.
#[derive(Debug)]
pub struct TokioScheduler {
    sink: EventSink,
    runtime: Handle,
    next_id: AtomicU64,
    tasks: Mutex<HashMap<TimerId, AbortHandle>>,
}

impl TokioScheduler {
    /// Create a scheduler that spawns its timers on `runtime`.
    pub fn new(sink: EventSink, runtime: Handle) -> Self {
        Self {
            sink,
            runtime,
            next_id: AtomicU64::new(0),
            tasks: Mutex::new(HashMap::new()),
        }
    }

    /// Number of live timers.
    pub fn active(&self) -> usize {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl Scheduler for TokioScheduler {
    fn schedule_repeating(&self, period: Duration) -> TimerId {
        let id = TimerId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let sink = self.sink.clone();
        let period = period.max(Duration::from_millis(1));

        let handle = self.runtime.spawn(async move {
            let mut interval = interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                sink.timer_fired(id);
            }
        });

        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, handle.abort_handle());
        trace!(timer = %id, period_ms = period.as_millis() as u64, "Timer scheduled");
        id
    }

    fn cancel(&self, timer: TimerId) {
        let handle = self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&timer);
        if let Some(handle) = handle {
            handle.abort();
            trace!(%timer, "Timer cancelled");
        }
    }
}

impl Drop for TokioScheduler {
    fn drop(&mut self) {
        let tasks = self.tasks.get_mut().unwrap_or_else(PoisonError::into_inner);
        for (_, handle) in tasks.drain() {
            handle.abort();
        }
    }
}
