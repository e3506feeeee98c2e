//! One-shot deadline timers.
//!
//! The lifecycle never sleeps itself. It asks a `TimerService` to run a job
//! after a delay under a unique key and cancels that key when the phase the
//! timer guards is over. `TokioTimer` is the runtime-backed implementation.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use log::debug;
use tokio::runtime::Handle;
use tokio::task::AbortHandle;
use uuid::Uuid;

/// Work scheduled on a timer.
pub type TimerJob = Box<dyn FnOnce() + Send + 'static>;

/// Which deadline of a request a timer belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerPhase {
    Dns,
    Request,
}

/// Unique key of a scheduled timer: one per request and phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerKey {
    pub request: Uuid,
    pub phase: TimerPhase,
}

impl TimerKey {
    pub fn new(request: Uuid, phase: TimerPhase) -> Self {
        Self { request, phase }
    }
}

impl fmt::Display for TimerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let phase = match self.phase {
            TimerPhase::Dns => "dns",
            TimerPhase::Request => "request",
        };
        write!(f, "{}:{phase}", self.request)
    }
}

/// Timer registry shared by all requests.
///
/// Implementations must be reentrant: a job may schedule or cancel timers.
pub trait TimerService: Send + Sync {
    /// Runs `job` once after `delay` unless `key` is cancelled first.
    /// Scheduling under a key that is still pending replaces the old job.
    fn after(&self, delay: Duration, key: TimerKey, job: TimerJob);

    /// Drops the job scheduled under `key`. Unknown or already fired keys
    /// are ignored.
    fn cancel(&self, key: TimerKey);
}

/// The request-phase deadline of one in-flight request.
pub struct TimeoutGuard {
    timer: Arc<dyn TimerService>,
    key: TimerKey,
}

impl TimeoutGuard {
    pub fn new(timer: Arc<dyn TimerService>, request: Uuid) -> Self {
        Self {
            timer,
            key: TimerKey::new(request, TimerPhase::Request),
        }
    }

    pub fn key(&self) -> TimerKey {
        self.key
    }

    pub fn start(&self, timeout: Duration, job: TimerJob) {
        self.timer.after(timeout, self.key, job);
    }

    /// Safe to call any number of times, armed or not.
    pub fn cancel(&self) {
        self.timer.cancel(self.key);
    }
}

/// `TimerService` backed by tokio tasks sleeping on the runtime's clock.
#[derive(Clone)]
pub struct TokioTimer {
    handle: Handle,
    pending: Arc<Mutex<HashMap<TimerKey, (u64, AbortHandle)>>>,
    generation: Arc<AtomicU64>,
}

impl TokioTimer {
    pub fn new(handle: Handle) -> Self {
        Self {
            handle,
            pending: Arc::new(Mutex::new(HashMap::new())),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Number of timers scheduled and neither fired nor cancelled.
    pub fn pending(&self) -> usize {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl TimerService for TokioTimer {
    fn after(&self, delay: Duration, key: TimerKey, job: TimerJob) {
        // Registered before the task can run, so a zero delay still finds its entry.
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        let registry = Arc::clone(&self.pending);
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let task = self.handle.spawn(async move {
            tokio::time::sleep(delay).await;
            let due = {
                let mut registry = registry.lock().unwrap_or_else(PoisonError::into_inner);
                // A replacement scheduled under the same key owns the entry now.
                match registry.get(&key) {
                    Some((current, _)) if *current == generation => {
                        registry.remove(&key);
                        true
                    }
                    _ => false,
                }
            };
            if due {
                debug!("timer {key} fired after {delay:?}");
                job();
            }
        });
        if let Some((_, previous)) = pending.insert(key, (generation, task.abort_handle())) {
            previous.abort();
        }
    }

    fn cancel(&self, key: TimerKey) {
        let removed = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&key);
        if let Some((_, task)) = removed {
            task.abort();
        }
    }
}

impl fmt::Debug for TokioTimer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokioTimer")
            .field("pending", &self.pending())
            .finish()
    }
}
