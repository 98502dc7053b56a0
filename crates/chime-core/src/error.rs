use thiserror::Error;

/// Top-level error type for Chime.
#[derive(Debug, Error)]
pub enum ChimeError {
    /// A one-shot trigger was given an instant that is not in the future.
    #[error("the given time is in the past")]
    PastTime,

    /// A cron expression failed to parse.
    #[error("invalid cron expression: {0}")]
    InvalidCron(String),

    /// A recurrence interval was zero or negative.
    #[error("recurrence interval must be a positive duration")]
    InvalidInterval,

    /// An unrecognized IANA timezone name.
    #[error("unknown timezone: {0}")]
    InvalidTimezone(String),

    /// A live reminder with the same room and text already exists.
    #[error("a reminder with that text already exists in this room")]
    DuplicateReminder,

    /// No live reminder matches the given room and text.
    #[error("unknown reminder")]
    UnknownReminder,

    /// Neither a firing alarm nor a reminder matches the given room and text.
    #[error("unknown reminder or alarm")]
    UnknownReminderOrAlarm,

    /// Storage read/write failure. Callers roll back any in-memory
    /// scheduling performed for the failed operation.
    #[error("storage error: {0}")]
    Storage(String),

    /// Error from a messaging channel. Logged, never retried.
    #[error("channel error: {0}")]
    Channel(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
