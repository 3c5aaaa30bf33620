use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::utils::time;

/// One ticking countdown per attempt. Remaining time is recomputed from the
/// absolute deadline on every tick, so a suspended host that resumes late
/// expires immediately instead of replaying a stale countdown.
pub struct CountdownScheduler {
    tick: Duration,
    next_id: AtomicU64,
    timers: Arc<Mutex<HashMap<Uuid, Timer>>>,
}

/// The id distinguishes a timer from any later one started for the same
/// attempt, so a finished task only ever removes its own entry.
struct Timer {
    id: u64,
    handle: JoinHandle<()>,
}

impl Default for CountdownScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl CountdownScheduler {
    pub fn new() -> Self {
        Self::with_tick(Duration::from_secs(1))
    }

    pub fn with_tick(tick: Duration) -> Self {
        Self {
            tick,
            next_id: AtomicU64::new(0),
            timers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Begins ticking toward `deadline`. Idempotent while a timer for the
    /// same attempt is still live. `on_tick` is display-only; `on_expire`
    /// fires at most once per attempt lifetime.
    pub fn start<T, E, Fut>(
        &self,
        attempt_id: Uuid,
        deadline: DateTime<Utc>,
        on_tick: T,
        on_expire: E,
    ) where
        T: Fn(i64) + Send + 'static,
        E: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let mut timers = self.timers.lock().unwrap();
        if let Some(timer) = timers.get(&attempt_id) {
            if !timer.handle.is_finished() {
                tracing::debug!(%attempt_id, "countdown already running, start ignored");
                return;
            }
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let tick = self.tick;
        let registry = Arc::clone(&self.timers);
        let handle = tokio::spawn(async move {
            let mut on_expire = Some(on_expire);
            let mut interval = tokio::time::interval(tick);
            loop {
                // First tick fires immediately, so a session resumed past
                // its deadline expires on the spot.
                interval.tick().await;
                let remaining_ms = (deadline - time::now()).num_milliseconds();
                if remaining_ms <= 0 {
                    if let Some(expire) = on_expire.take() {
                        tracing::info!(%attempt_id, "countdown reached zero");
                        expire().await;
                    }
                    break;
                }
                // Ceiling, so the display never shows 0 while time remains.
                on_tick((remaining_ms + 999) / 1000);
            }

            let mut timers = registry.lock().unwrap();
            if timers.get(&attempt_id).map(|t| t.id) == Some(id) {
                timers.remove(&attempt_id);
            }
        });
        timers.insert(attempt_id, Timer { id, handle });
        // An immediate expiry can finish before the insert above; it would
        // then miss its own entry, so reap it here instead.
        if timers
            .get(&attempt_id)
            .map(|t| t.handle.is_finished())
            .unwrap_or(false)
        {
            timers.remove(&attempt_id);
        }
    }

    /// Stops the countdown. Safe to call repeatedly or for unknown attempts.
    pub fn cancel(&self, attempt_id: Uuid) {
        let timer = self.timers.lock().unwrap().remove(&attempt_id);
        if let Some(timer) = timer {
            timer.handle.abort();
        }
    }

    pub fn is_running(&self, attempt_id: Uuid) -> bool {
        self.timers
            .lock()
            .unwrap()
            .get(&attempt_id)
            .map(|t| !t.handle.is_finished())
            .unwrap_or(false)
    }
}
