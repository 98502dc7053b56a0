//! Timer engine — runs trigger-driven callbacks on a single process-wide
//! clock.
//!
//! Jobs may be registered before the engine is started; nothing fires until
//! [`TimerEngine::start`] is called, so startup recovery can rebuild every
//! job before the first callback runs. Dispatch order for equal due instants
//! is insertion order (job ids are monotonic and tie-break the due queue).
//! Each job's callback runs to completion before that job's next occurrence
//! is computed; callbacks of different jobs run concurrently.

use chime_core::trigger::Trigger;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Notify;
use tracing::debug;


/// Stable job handle. Ids are never reused within a process run.
pub type JobId = u64;

type JobFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
type JobCallback = Arc<dyn Fn() -> JobFuture + Send + Sync>;

/// The process-wide timer engine.
#[derive(Clone)]
pub struct TimerEngine {
    inner: Arc<Inner>,
}

struct Inner {
    state: Mutex<State>,
    /// Wakes the dispatcher when the earliest due instant may have changed.
    wake: Notify,
}

#[derive(Default)]
struct State {
    next_id: JobId,
    jobs: HashMap<JobId, Job>,
    /// Due index: ordered by (instant, insertion id).
    queue: BTreeMap<(DateTime<Utc>, JobId), ()>,
    started: bool,
}

struct Job {
    trigger: Trigger,
    tz: Tz,
    callback: JobCallback,
    /// Set while the job sits in the due queue; cleared during a fire.
    next_due: Option<DateTime<Utc>>,
}

impl Default for TimerEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl TimerEngine {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::default()),
                wake: Notify::new(),
            }),
        }
    }

    /// Register a job. Never blocks. The job stays dormant until `start`.
    ///
    /// A trigger with no remaining occurrence (an already-exhausted
    /// one-shot) gets an id but is immediately inactive.
    pub fn schedule<F>(&self, trigger: Trigger, tz: Tz, callback: F) -> JobId
    where
        F: Fn() -> JobFuture + Send + Sync + 'static,
    {
        let mut state = self.inner.lock_state();
        let id = state.next_id;
        state.next_id += 1;

        let next_due = trigger.next_occurrence(tz, Utc::now());
        if let Some(due) = next_due {
            state.queue.insert((due, id), ());
            state.jobs.insert(
                id,
                Job {
                    trigger,
                    tz,
                    callback: Arc::new(callback),
                    next_due,
                },
            );
            if state.started {
                self.inner.wake.notify_one();
            }
        }
        id
    }

    /// Remove a job. Idempotent: unknown or already-fired ids are a no-op,
    /// so cancel/fire races need no coordination from callers.
    pub fn cancel(&self, id: JobId) {
        let mut state = self.inner.lock_state();
        if let Some(job) = state.jobs.remove(&id) {
            if let Some(due) = job.next_due {
                state.queue.remove(&(due, id));
            }
            self.inner.wake.notify_one();
        }
    }

    /// Whether the job is still registered. Purely advisory: state can
    /// change between this check and any subsequent call.
    pub fn is_active(&self, id: JobId) -> bool {
        self.inner.lock_state().jobs.contains_key(&id)
    }

    /// The next instant the job is due to fire, if it is queued. Advisory,
    /// for display.
    pub fn next_run(&self, id: JobId) -> Option<DateTime<Utc>> {
        self.inner.lock_state().jobs.get(&id).and_then(|j| j.next_due)
    }

    /// Begin dispatching due jobs. Idempotent.
    pub fn start(&self) {
        {
            let mut state = self.inner.lock_state();
            if state.started {
                return;
            }
            state.started = true;
        }
        let inner = self.inner.clone();
        tokio::spawn(async move {
            dispatch_loop(inner).await;
        });
    }
}

impl Inner {
    fn lock_state(&self) -> MutexGuard<'_, State> {
        self.state.lock().expect("timer engine state poisoned")
    }
}

/// Dispatcher: pops due entries in (instant, id) order and fires them.
///
/// The callback closure itself is invoked synchronously here, in dispatch
/// order, so jobs due at the same instant observe a deterministic order;
/// the returned futures then run concurrently on their own tasks.
async fn dispatch_loop(inner: Arc<Inner>) {
    loop {
        let mut due = Vec::new();
        let next_wakeup = {
            let mut state = inner.lock_state();
            let now = Utc::now();
            while let Some((&(when, id), _)) = state.queue.first_key_value() {
                if when > now {
                    break;
                }
                state.queue.pop_first();
                if let Some(job) = state.jobs.get_mut(&id) {
                    job.next_due = None;
                    due.push((id, job.callback.clone()));
                }
            }
            state.queue.keys().next().map(|&(when, _)| when)
        };

        for (id, callback) in due {
            debug!("firing job {id}");
            let fut = callback();
            let inner = inner.clone();
            tokio::spawn(async move {
                fut.await;
                // Only now may the next occurrence be computed and queued:
                // the fire handler has finished mutating shared state.
                let mut state = inner.lock_state();
                let next = state
                    .jobs
                    .get(&id)
                    .map(|job| job.trigger.next_occurrence(job.tz, Utc::now()));
                match next {
                    Some(Some(next_due)) => {
                        if let Some(job) = state.jobs.get_mut(&id) {
                            job.next_due = Some(next_due);
                        }
                        state.queue.insert((next_due, id), ());
                        inner.wake.notify_one();
                    }
                    Some(None) => {
                        // Exhausted one-shot.
                        state.jobs.remove(&id);
                    }
                    None => {
                        // Cancelled mid-fire; nothing to reschedule.
                    }
                }
            });
        }

        let sleep_for = match next_wakeup {
            Some(when) => (when - Utc::now())
                .to_std()
                .unwrap_or(std::time::Duration::ZERO),
            None => std::time::Duration::from_secs(3600),
        };
        tokio::select! {
            _ = tokio::time::sleep(sleep_for) => {}
            _ = inner.wake.notified() => {}
        }
    }
}
