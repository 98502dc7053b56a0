//! Reminder row storage and recovery-on-load.

use super::Store;
use chime_core::error::ChimeError;
use chime_core::trigger::{localize_wall_clock, Trigger};
use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use chrono_tz::Tz;
use tracing::{debug, warn};

/// Naive wall-clock storage format. The row's timezone column says how to
/// interpret it.
const WALL_CLOCK_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// A reminder as persisted: everything needed to reconstruct and reschedule
/// it after a restart.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredReminder {
    pub room_id: String,
    pub text: String,
    pub trigger: Trigger,
    pub timezone: Tz,
    pub target_user: Option<String>,
    pub has_alarm: bool,
}

impl Store {
    /// Persist a reminder. The unique `(room_id, text)` index mirrors the
    /// registry's duplicate check at the durability layer.
    pub async fn store_reminder(&self, reminder: &StoredReminder) -> Result<(), ChimeError> {
        let (start_time, recurrence_seconds, cron_expression) = match &reminder.trigger {
            Trigger::OneShot { at } => (Some(format_wall_clock(*at)), None, None),
            Trigger::Interval { every, first_at } => (
                Some(format_wall_clock(*first_at)),
                Some(every.num_seconds()),
                None,
            ),
            Trigger::Cron { schedule } => (None, None, Some(schedule.as_str().to_string())),
        };

        sqlx::query(
            "INSERT INTO reminder \
                 (text, start_time, timezone, recurrence_seconds, cron_expression, \
                  room_id, target_user, has_alarm) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&reminder.text)
        .bind(start_time)
        .bind(reminder.timezone.name())
        .bind(recurrence_seconds)
        .bind(cron_expression)
        .bind(&reminder.room_id)
        .bind(&reminder.target_user)
        .bind(reminder.has_alarm)
        .execute(&self.pool)
        .await
        .map_err(|e| ChimeError::Storage(format!("store reminder failed: {e}")))?;

        Ok(())
    }

    /// Delete a reminder by room and text. Text matches case-insensitively,
    /// like the registry key.
    pub async fn delete_reminder(&self, room_id: &str, text: &str) -> Result<(), ChimeError> {
        sqlx::query("DELETE FROM reminder WHERE room_id = ? AND UPPER(text) = ?")
            .bind(room_id)
            .bind(text.to_uppercase())
            .execute(&self.pool)
            .await
            .map_err(|e| ChimeError::Storage(format!("delete reminder failed: {e}")))?;
        Ok(())
    }

    /// Number of stored reminder rows.
    pub async fn count_reminders(&self) -> Result<i64, ChimeError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM reminder")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| ChimeError::Storage(format!("count reminders failed: {e}")))?;
        Ok(count)
    }

    /// Load every stored reminder for startup recovery.
    ///
    /// One-shot rows whose instant is already past can never fire again:
    /// those are deleted and skipped rather than fired late. Interval and
    /// cron rows always reconstruct — their next occurrence is computable
    /// going forward no matter how old the anchor is. Rows with an
    /// unparseable timezone or timestamp are skipped with a warning but
    /// left in place.
    pub async fn load_reminders(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<StoredReminder>, ChimeError> {
        #[allow(clippy::type_complexity)]
        let rows: Vec<(
            String,
            Option<String>,
            Option<String>,
            Option<i64>,
            Option<String>,
            String,
            Option<String>,
            bool,
        )> = sqlx::query_as(
            "SELECT text, start_time, timezone, recurrence_seconds, cron_expression, \
                    room_id, target_user, has_alarm \
             FROM reminder",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| ChimeError::Storage(format!("load reminders failed: {e}")))?;

        let mut reminders = Vec::with_capacity(rows.len());

        for (text, start_time, timezone, recurrence_seconds, cron_expression, room_id, target_user, has_alarm) in
            rows
        {
            let tz: Tz = match timezone.as_deref().unwrap_or("").parse() {
                Ok(tz) => tz,
                Err(_) => {
                    warn!(
                        "skipping reminder in {room_id} with unknown timezone {timezone:?}: {text}"
                    );
                    continue;
                }
            };

            let start = match start_time.as_deref().map(parse_wall_clock).transpose() {
                Ok(start) => start,
                Err(e) => {
                    warn!("skipping reminder in {room_id} with bad start_time: {text}: {e}");
                    continue;
                }
            };

            let trigger = if let Some(expr) = cron_expression {
                match Trigger::cron(&expr) {
                    Ok(trigger) => trigger,
                    Err(e) => {
                        warn!("skipping reminder in {room_id} with bad cron tab: {text}: {e}");
                        continue;
                    }
                }
            } else if let Some(seconds) = recurrence_seconds {
                let Some(first_at) = start else {
                    warn!("skipping interval reminder in {room_id} without start_time: {text}");
                    continue;
                };
                match Trigger::interval(Duration::seconds(seconds), first_at) {
                    Ok(trigger) => trigger,
                    Err(e) => {
                        warn!("skipping reminder in {room_id} with bad interval: {text}: {e}");
                        continue;
                    }
                }
            } else {
                let Some(at) = start else {
                    warn!("skipping reminder in {room_id} without any trigger fields: {text}");
                    continue;
                };
                if localize_wall_clock(at, tz) <= now {
                    // Missed while the process was down; it will never fire.
                    debug!("deleting missed one-shot reminder in {room_id}: {text} - {at}");
                    self.delete_reminder(&room_id, &text).await?;
                    continue;
                }
                Trigger::OneShot { at }
            };

            reminders.push(StoredReminder {
                room_id,
                text,
                trigger,
                timezone: tz,
                target_user,
                has_alarm,
            });
        }

        Ok(reminders)
    }
}

fn format_wall_clock(naive: NaiveDateTime) -> String {
    naive.format(WALL_CLOCK_FORMAT).to_string()
}

fn parse_wall_clock(s: &str) -> Result<NaiveDateTime, chrono::ParseError> {
    NaiveDateTime::parse_from_str(s, WALL_CLOCK_FORMAT)
}
