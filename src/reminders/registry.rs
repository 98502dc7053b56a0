//! In-memory indices of live reminders and firing alarms.
//!
//! Both maps key on `(room_id, uppercased text)`. An entry exists if and
//! only if a corresponding timer engine job is active; the manager
//! re-establishes that invariant from storage before accepting commands.

use super::Reminder;
use crate::scheduler::JobId;
use std::collections::HashMap;

/// Case-insensitive identity key for a reminder within a room.
pub(super) type Key = (String, String);

pub(super) fn key(room_id: &str, text: &str) -> Key {
    (room_id.to_string(), text.to_uppercase())
}

#[derive(Default)]
pub(super) struct Registry {
    reminders: HashMap<Key, Reminder>,
    alarms: HashMap<Key, JobId>,
}

impl Registry {
    pub(super) fn contains_reminder(&self, key: &Key) -> bool {
        self.reminders.contains_key(key)
    }

    pub(super) fn get_reminder(&self, key: &Key) -> Option<&Reminder> {
        self.reminders.get(key)
    }

    pub(super) fn get_reminder_mut(&mut self, key: &Key) -> Option<&mut Reminder> {
        self.reminders.get_mut(key)
    }

    pub(super) fn insert_reminder(&mut self, key: Key, reminder: Reminder) {
        self.reminders.insert(key, reminder);
    }

    pub(super) fn remove_reminder(&mut self, key: &Key) -> Option<Reminder> {
        self.reminders.remove(key)
    }

    pub(super) fn contains_alarm(&self, key: &Key) -> bool {
        self.alarms.contains_key(key)
    }

    pub(super) fn insert_alarm(&mut self, key: Key, job_id: JobId) {
        self.alarms.insert(key, job_id);
    }

    pub(super) fn remove_alarm(&mut self, key: &Key) -> Option<JobId> {
        self.alarms.remove(key)
    }

    /// Some firing alarm in `room_id`, if any. Iteration order is
    /// unordered/best-effort: with several alarms firing at once in one
    /// room, any of them may be returned.
    pub(super) fn any_alarm_in_room(&self, room_id: &str) -> Option<(Key, JobId)> {
        self.alarms
            .iter()
            .find(|((room, _), _)| room == room_id)
            .map(|(key, &job_id)| (key.clone(), job_id))
    }

    /// All live reminders in a room.
    pub(super) fn room_reminders<'a>(
        &'a self,
        room_id: &'a str,
    ) -> impl Iterator<Item = &'a Reminder> + 'a {
        self.reminders
            .iter()
            .filter(move |((room, _), _)| room == room_id)
            .map(|(_, reminder)| reminder)
    }
}
