//! Reminder lifecycle: creation, firing, alarm escalation, cancellation,
//! silencing, and startup recovery.
//!
//! The manager owns the registry and serializes every registry+store
//! mutation behind one async mutex, so a cancel racing a fire (or a create
//! racing either) can never lose an update. Fire handlers for different
//! reminders still run concurrently; the timer engine guarantees a single
//! reminder's handler finishes before its next occurrence is computed.

mod registry;

#[cfg(test)]
mod tests;

use crate::scheduler::{JobId, TimerEngine};
use chime_core::error::ChimeError;
use chime_core::message::Notification;
use chime_core::traits::Messenger;
use chime_core::trigger::{localize_wall_clock, Trigger, TriggerKind};
use chime_store::{Store, StoredReminder};
use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use registry::Registry;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// How often an alarm repeats after its reminder fires, until silenced.
const ALARM_INTERVAL_SECS: i64 = 300;

/// A live reminder: scheduling parameters plus its timer engine handles.
///
/// `alarm_job_id` is set exactly while an alarm is escalating for this
/// reminder; it is cleared together with the alarm-index entry.
pub struct Reminder {
    pub room_id: String,
    pub text: String,
    pub trigger: Trigger,
    pub timezone: Tz,
    pub target_user: Option<String>,
    pub has_alarm: bool,
    main_job_id: JobId,
    alarm_job_id: Option<JobId>,
}

/// Parameters for creating a reminder. The trigger arrives already parsed;
/// free-text time parsing belongs to the command layer.
#[derive(Debug, Clone)]
pub struct NewReminder {
    pub room_id: String,
    pub text: String,
    pub trigger: Trigger,
    pub timezone: Tz,
    pub target_user: Option<String>,
    pub has_alarm: bool,
}

/// Read-only view of a live reminder, for listing.
#[derive(Debug, Clone)]
pub struct ReminderSnapshot {
    pub room_id: String,
    pub text: String,
    pub kind: TriggerKind,
    pub trigger: Trigger,
    pub timezone: Tz,
    pub target_user: Option<String>,
    pub has_alarm: bool,
    /// Whether an alarm is currently escalating.
    pub alarming: bool,
    /// Advisory next fire instant, as reported by the timer engine.
    pub next_fire: Option<DateTime<Utc>>,
}

/// The reminder manager: the façade the command layer talks to.
#[derive(Clone)]
pub struct ReminderManager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    engine: TimerEngine,
    store: Store,
    messenger: Arc<dyn Messenger>,
    registry: Mutex<Registry>,
}

impl ReminderManager {
    pub fn new(engine: TimerEngine, store: Store, messenger: Arc<dyn Messenger>) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                engine,
                store,
                messenger,
                registry: Mutex::new(Registry::default()),
            }),
        }
    }

    /// Rebuild registry and timer jobs from storage. Call before
    /// [`TimerEngine::start`] so no callback can run against a
    /// half-recovered state. Returns the number of reminders restored.
    pub async fn restore(&self) -> Result<usize, ChimeError> {
        let stored = self.inner.store.load_reminders(Utc::now()).await?;
        let mut registry = self.inner.registry.lock().await;

        let mut restored = 0;
        for reminder in stored {
            let k = registry::key(&reminder.room_id, &reminder.text);
            if registry.contains_reminder(&k) {
                warn!(
                    "duplicate stored reminder in {}: {}",
                    reminder.room_id, reminder.text
                );
                continue;
            }
            let new = NewReminder {
                room_id: reminder.room_id,
                text: reminder.text,
                trigger: reminder.trigger,
                timezone: reminder.timezone,
                target_user: reminder.target_user,
                has_alarm: reminder.has_alarm,
            };
            let main_job_id = ManagerInner::schedule_main_job(&self.inner, &new);
            registry.insert_reminder(
                k,
                Reminder {
                    room_id: new.room_id,
                    text: new.text,
                    trigger: new.trigger,
                    timezone: new.timezone,
                    target_user: new.target_user,
                    has_alarm: new.has_alarm,
                    main_job_id,
                    alarm_job_id: None,
                },
            );
            restored += 1;
        }

        if restored > 0 {
            info!("restored {restored} reminders from storage");
        }
        Ok(restored)
    }

    /// Create a reminder: validate, schedule the main job, register, and
    /// persist — all or nothing.
    pub async fn create(&self, new: NewReminder) -> Result<ReminderSnapshot, ChimeError> {
        validate_trigger(&new.trigger, new.timezone, Utc::now())?;

        let k = registry::key(&new.room_id, &new.text);
        let mut registry = self.inner.registry.lock().await;
        if registry.contains_reminder(&k) {
            return Err(ChimeError::DuplicateReminder);
        }

        let main_job_id = ManagerInner::schedule_main_job(&self.inner, &new);
        registry.insert_reminder(
            k.clone(),
            Reminder {
                room_id: new.room_id.clone(),
                text: new.text.clone(),
                trigger: new.trigger.clone(),
                timezone: new.timezone,
                target_user: new.target_user.clone(),
                has_alarm: new.has_alarm,
                main_job_id,
                alarm_job_id: None,
            },
        );

        // Persist last. A reminder that exists only in memory would fire in
        // this process yet vanish on the next restart, so a failed write
        // unwinds the job and the registry entry.
        let stored = StoredReminder {
            room_id: new.room_id.clone(),
            text: new.text.clone(),
            trigger: new.trigger.clone(),
            timezone: new.timezone,
            target_user: new.target_user.clone(),
            has_alarm: new.has_alarm,
        };
        if let Err(e) = self.inner.store.store_reminder(&stored).await {
            registry.remove_reminder(&k);
            self.inner.engine.cancel(main_job_id);
            return Err(e);
        }

        info!(
            "created {} reminder in {}: {}",
            new.trigger.kind().as_str(),
            new.room_id,
            new.text
        );
        Ok(ReminderSnapshot {
            room_id: new.room_id,
            text: new.text,
            kind: new.trigger.kind(),
            trigger: new.trigger,
            timezone: new.timezone,
            target_user: new.target_user,
            has_alarm: new.has_alarm,
            alarming: false,
            next_fire: self.inner.engine.next_run(main_job_id),
        })
    }

    /// Cancel a reminder and any alarm escalating for it.
    pub async fn cancel(&self, room_id: &str, text: &str) -> Result<(), ChimeError> {
        let k = registry::key(room_id, text);
        let mut registry = self.inner.registry.lock().await;
        if !registry.contains_reminder(&k) {
            return Err(ChimeError::UnknownReminder);
        }

        // Storage first: if the delete fails nothing in memory has moved
        // yet, and the operation unwinds to a consistent state.
        self.inner.store.delete_reminder(room_id, text).await?;

        if let Some(reminder) = registry.remove_reminder(&k) {
            self.inner.engine.cancel(reminder.main_job_id);
        }
        if let Some(alarm_job_id) = registry.remove_alarm(&k) {
            self.inner.engine.cancel(alarm_job_id);
        }

        info!("cancelled reminder in {room_id}: {text}");
        Ok(())
    }

    /// Silence a firing alarm without touching its reminder's base schedule.
    ///
    /// With `text`, the alarm for that reminder is stopped; `Ok(false)`
    /// means the reminder exists but is not currently alarming. Without
    /// `text`, some firing alarm in the room is stopped (best-effort pick;
    /// the alarm index is unordered); `Ok(false)` means none were firing.
    pub async fn silence(&self, room_id: &str, text: Option<&str>) -> Result<bool, ChimeError> {
        let mut registry = self.inner.registry.lock().await;

        let found = match text {
            Some(text) => {
                let k = registry::key(room_id, text);
                match registry.remove_alarm(&k) {
                    Some(alarm_job_id) => Some((k, alarm_job_id)),
                    None if registry.contains_reminder(&k) => None,
                    None => return Err(ChimeError::UnknownReminderOrAlarm),
                }
            }
            None => registry.any_alarm_in_room(room_id).map(|(k, alarm_job_id)| {
                registry.remove_alarm(&k);
                (k, alarm_job_id)
            }),
        };

        match found {
            Some((k, alarm_job_id)) => {
                self.inner.engine.cancel(alarm_job_id);
                if let Some(reminder) = registry.get_reminder_mut(&k) {
                    reminder.alarm_job_id = None;
                }
                info!("silenced alarm in {room_id}: {}", k.1);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Snapshot the room's live reminders. Ordered one-shot, cron, interval,
    /// then by text, so callers can render grouped sections directly.
    pub async fn list(&self, room_id: &str) -> Vec<ReminderSnapshot> {
        let registry = self.inner.registry.lock().await;
        let mut snapshots: Vec<ReminderSnapshot> = registry
            .room_reminders(room_id)
            .map(|r| ReminderSnapshot {
                room_id: r.room_id.clone(),
                text: r.text.clone(),
                kind: r.trigger.kind(),
                trigger: r.trigger.clone(),
                timezone: r.timezone,
                target_user: r.target_user.clone(),
                has_alarm: r.has_alarm,
                alarming: r.alarm_job_id.is_some(),
                next_fire: self.inner.engine.next_run(r.main_job_id),
            })
            .collect();
        snapshots.sort_by(|a, b| {
            (kind_rank(a.kind), a.text.to_uppercase()).cmp(&(kind_rank(b.kind), b.text.to_uppercase()))
        });
        snapshots
    }
}

impl ManagerInner {
    /// Schedule the reminder's main job. The callback holds only a weak
    /// manager reference; a fire after shutdown is a no-op.
    fn schedule_main_job(inner: &Arc<Self>, new: &NewReminder) -> JobId {
        let weak = Arc::downgrade(inner);
        let room_id = new.room_id.clone();
        let text = new.text.clone();
        inner
            .engine
            .schedule(new.trigger.clone(), new.timezone, move || {
                let weak = weak.clone();
                let room_id = room_id.clone();
                let text = text.clone();
                Box::pin(async move {
                    let Some(inner) = weak.upgrade() else { return };
                    Self::fire(inner, room_id, text).await;
                })
            })
    }

    /// Schedule the fixed-interval escalation job. Its first fire is one
    /// full interval after escalation starts.
    fn schedule_alarm_job(
        inner: &Arc<Self>,
        room_id: &str,
        text: &str,
        target_user: Option<String>,
        tz: Tz,
    ) -> JobId {
        let every = Duration::seconds(ALARM_INTERVAL_SECS);
        let first_at = Utc::now().with_timezone(&tz).naive_local() + every;
        let trigger = Trigger::Interval { every, first_at };

        let weak = Arc::downgrade(inner);
        let room_id = room_id.to_string();
        let text = text.to_string();
        inner.engine.schedule(trigger, tz, move || {
            let weak = weak.clone();
            let room_id = room_id.clone();
            let text = text.clone();
            let target_user = target_user.clone();
            Box::pin(async move {
                let Some(inner) = weak.upgrade() else { return };
                Self::fire_alarm(inner, room_id, text, target_user).await;
            })
        })
    }

    /// Main-job fire handler.
    async fn fire(inner: Arc<Self>, room_id: String, text: String) {
        let k = registry::key(&room_id, &text);

        let (notification, is_one_shot) = {
            let mut registry = inner.registry.lock().await;
            let Some(reminder) = registry.get_reminder(&k) else {
                // Cancelled between dispatch and fire; tolerated no-op.
                return;
            };

            let target_user = reminder.target_user.clone();
            let mention = target_user.clone().unwrap_or_else(|| "@room".to_string());
            let mut body = format!("{mention} {}", reminder.text);
            let is_one_shot = !reminder.trigger.repeats();
            let has_alarm = reminder.has_alarm;
            let tz = reminder.timezone;
            let original_text = reminder.text.clone();

            if has_alarm {
                body.push_str(" (This reminder has an alarm. It will go off in 5m).");
                // A repeating reminder can fire again while a prior alarm is
                // still escalating; never stack a second alarm job.
                if !registry.contains_alarm(&k) {
                    let alarm_job_id = Self::schedule_alarm_job(
                        &inner,
                        &room_id,
                        &original_text,
                        target_user.clone(),
                        tz,
                    );
                    registry.insert_alarm(k.clone(), alarm_job_id);
                    if let Some(r) = registry.get_reminder_mut(&k) {
                        r.alarm_job_id = Some(alarm_job_id);
                    }
                    info!("alarm escalation started in {room_id}: {original_text}");
                }
            }

            (
                Notification {
                    room_id: room_id.clone(),
                    body,
                    mention_room: target_user.is_none(),
                    mention_user: target_user,
                },
                is_one_shot,
            )
        };

        debug!("reminder fired in {room_id}: {text}");
        if let Err(e) = inner.messenger.send(notification).await {
            // Logged, not retried; a failed send never cancels a repeating
            // reminder or blocks its next occurrence.
            error!("failed to deliver reminder in {room_id}: {e}");
        }

        if is_one_shot {
            // One-shot reminders terminate after their single fire. An
            // alarm started above keeps firing until explicitly silenced.
            if let Err(e) = inner.store.delete_reminder(&room_id, &text).await {
                error!("failed to delete fired reminder in {room_id}: {e}");
            }
            let mut registry = inner.registry.lock().await;
            if let Some(reminder) = registry.remove_reminder(&k) {
                if inner.engine.is_active(reminder.main_job_id) {
                    inner.engine.cancel(reminder.main_job_id);
                }
            }
        }
    }

    /// Alarm-job fire handler. Carries its own copy of text and target so it
    /// keeps working after a one-shot base reminder has terminated.
    async fn fire_alarm(
        inner: Arc<Self>,
        room_id: String,
        text: String,
        target_user: Option<String>,
    ) {
        let k = registry::key(&room_id, &text);
        {
            let registry = inner.registry.lock().await;
            if !registry.contains_alarm(&k) {
                // Silenced between dispatch and fire.
                return;
            }
        }

        let mention = target_user.clone().unwrap_or_else(|| "@room".to_string());
        let notification = Notification {
            room_id: room_id.clone(),
            body: format!("Alarm: {mention} {text} (use the silence command to stop)."),
            mention_room: target_user.is_none(),
            mention_user: target_user,
        };

        debug!("alarm fired in {room_id}: {text}");
        if let Err(e) = inner.messenger.send(notification).await {
            error!("failed to deliver alarm in {room_id}: {e}");
        }
    }
}

/// Create-time validation; no state is mutated on failure.
fn validate_trigger(trigger: &Trigger, tz: Tz, now: DateTime<Utc>) -> Result<(), ChimeError> {
    match trigger {
        Trigger::OneShot { at } => {
            if localize_wall_clock(*at, tz) <= now {
                return Err(ChimeError::PastTime);
            }
        }
        Trigger::Interval { every, .. } => {
            if *every <= Duration::zero() {
                return Err(ChimeError::InvalidInterval);
            }
        }
        // Cron expressions are validated when compiled.
        Trigger::Cron { .. } => {}
    }
    Ok(())
}

/// Listing order: one-time, cron, repeating — the order rooms see them in.
fn kind_rank(kind: TriggerKind) -> u8 {
    match kind {
        TriggerKind::OneShot => 0,
        TriggerKind::Cron => 1,
        TriggerKind::Interval => 2,
    }
}
