//! Trigger values — the rule determining when a reminder fires.
//!
//! A [`Trigger`] is a pure value; [`Trigger::next_occurrence`] maps it plus
//! "now" to the next concrete fire instant. Wall-clock fields are naive and
//! always interpreted in the owning reminder's timezone, which is tracked
//! out-of-band — a stored instant never carries its own offset.

use crate::error::ChimeError;
use chrono::offset::LocalResult;
use chrono::{DateTime, Duration, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use std::fmt;
use std::sync::Arc;

/// When a reminder fires: once, on a fixed interval, or on a cron schedule.
/// Exactly one variant describes any reminder.
#[derive(Debug, Clone, PartialEq)]
pub enum Trigger {
    /// Fires exactly once at a wall-clock instant.
    OneShot { at: NaiveDateTime },
    /// Fires at `first_at`, then every `every` after that.
    Interval {
        every: Duration,
        first_at: NaiveDateTime,
    },
    /// Fires per a five-field cron expression, evaluated in the reminder's
    /// timezone.
    Cron { schedule: CronSchedule },
}

/// Discriminant of [`Trigger`], used for display grouping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TriggerKind {
    OneShot,
    Interval,
    Cron,
}

impl TriggerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OneShot => "one-shot",
            Self::Interval => "interval",
            Self::Cron => "cron",
        }
    }
}

/// A validated cron expression: the raw five-field text plus its compiled
/// form. Compiled once at construction so evaluation can never fail late.
#[derive(Clone)]
pub struct CronSchedule {
    raw: String,
    compiled: Arc<croner::Cron>,
}

impl CronSchedule {
    /// Parse and compile a five-field cron expression
    /// (minute, hour, day-of-month, month, day-of-week).
    pub fn parse(expr: &str) -> Result<Self, ChimeError> {
        let raw = expr.trim().to_string();
        let compiled = raw
            .parse::<croner::Cron>()
            .map_err(|e| ChimeError::InvalidCron(format!("{raw}: {e}")))?;
        Ok(Self {
            raw,
            compiled: Arc::new(compiled),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl fmt::Debug for CronSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CronSchedule").field(&self.raw).finish()
    }
}

impl fmt::Display for CronSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl PartialEq for CronSchedule {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl Trigger {
    /// A one-shot trigger. Rejected unless `at` (read in `tz`) is strictly
    /// after `now`.
    pub fn one_shot(at: NaiveDateTime, tz: Tz, now: DateTime<Utc>) -> Result<Self, ChimeError> {
        if localize_wall_clock(at, tz) <= now {
            return Err(ChimeError::PastTime);
        }
        Ok(Self::OneShot { at })
    }

    /// An interval trigger. `every` must be strictly positive.
    pub fn interval(every: Duration, first_at: NaiveDateTime) -> Result<Self, ChimeError> {
        if every <= Duration::zero() {
            return Err(ChimeError::InvalidInterval);
        }
        Ok(Self::Interval { every, first_at })
    }

    /// A cron trigger. The expression is validated here.
    pub fn cron(expr: &str) -> Result<Self, ChimeError> {
        Ok(Self::Cron {
            schedule: CronSchedule::parse(expr)?,
        })
    }

    pub fn kind(&self) -> TriggerKind {
        match self {
            Self::OneShot { .. } => TriggerKind::OneShot,
            Self::Interval { .. } => TriggerKind::Interval,
            Self::Cron { .. } => TriggerKind::Cron,
        }
    }

    /// Whether this trigger produces more than one occurrence.
    pub fn repeats(&self) -> bool {
        !matches!(self, Self::OneShot { .. })
    }

    /// The next fire instant strictly after `after`, or `None` once a
    /// one-shot is exhausted.
    pub fn next_occurrence(&self, tz: Tz, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Self::OneShot { at } => {
                let at = localize_wall_clock(*at, tz);
                (at > after).then_some(at)
            }
            Self::Interval { every, first_at } => {
                let first = localize_wall_clock(*first_at, tz);
                if first > after {
                    return Some(first);
                }
                // Stay on the first_at + n*every grid: smallest n with
                // first + n*every > after.
                let step_ms = every.num_milliseconds();
                let elapsed_ms = (after - first).num_milliseconds();
                let n = elapsed_ms / step_ms + 1;
                Some(first + Duration::milliseconds(n * step_ms))
            }
            Self::Cron { schedule } => {
                let local = after.with_timezone(&tz);
                schedule
                    .compiled
                    .find_next_occurrence(&local, false)
                    .ok()
                    .map(|next| next.with_timezone(&Utc))
            }
        }
    }
}

/// Interpret a naive wall-clock value in `tz`. Ambiguous times (DST
/// fall-back) resolve to the earlier instant; nonexistent times (the
/// spring-forward gap) shift forward past the gap.
pub fn localize_wall_clock(naive: NaiveDateTime, tz: Tz) -> DateTime<Utc> {
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(dt) => dt.with_timezone(&Utc),
        LocalResult::Ambiguous(earlier, _) => earlier.with_timezone(&Utc),
        LocalResult::None => {
            let shifted = naive + Duration::hours(1);
            match tz.from_local_datetime(&shifted) {
                LocalResult::Single(dt) => dt.with_timezone(&Utc),
                LocalResult::Ambiguous(earlier, _) => earlier.with_timezone(&Utc),
                LocalResult::None => Utc.from_utc_datetime(&naive),
            }
        }
    }
}
