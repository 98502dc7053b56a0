use super::*;
use async_trait::async_trait;
use chime_core::config::StorageConfig;
use chrono::NaiveDate;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration as StdDuration;

static TEST_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Create a temporary on-disk store for testing (unique per call).
async fn test_store() -> Store {
    let id = TEST_COUNTER.fetch_add(1, Ordering::Relaxed);
    let dir =
        std::env::temp_dir().join(format!("__chime_test_{}_{}__", std::process::id(), id));
    let _ = std::fs::create_dir_all(&dir);
    let db_path = dir.join("test.db").to_string_lossy().to_string();
    let _ = std::fs::remove_file(&db_path);
    let config = StorageConfig { db_path };
    Store::new(&config, "Etc/UTC").await.unwrap()
}

/// Records every notification instead of delivering it.
#[derive(Default)]
struct MockMessenger {
    sent: std::sync::Mutex<Vec<Notification>>,
}

impl MockMessenger {
    fn sent(&self) -> Vec<Notification> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Messenger for MockMessenger {
    fn name(&self) -> &str {
        "mock"
    }

    async fn send(&self, notification: Notification) -> Result<(), ChimeError> {
        self.sent.lock().unwrap().push(notification);
        Ok(())
    }
}

/// Fails every send, counting attempts.
#[derive(Default)]
struct FailingMessenger {
    attempts: AtomicUsize,
}

#[async_trait]
impl Messenger for FailingMessenger {
    fn name(&self) -> &str {
        "failing"
    }

    async fn send(&self, _notification: Notification) -> Result<(), ChimeError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(ChimeError::Channel("wire down".to_string()))
    }
}

async fn test_manager() -> (ReminderManager, TimerEngine, Arc<MockMessenger>, Store) {
    let store = test_store().await;
    let engine = TimerEngine::new();
    let messenger = Arc::new(MockMessenger::default());
    let manager = ReminderManager::new(engine.clone(), store.clone(), messenger.clone());
    (manager, engine, messenger, store)
}

fn one_shot_in(ms: i64) -> Trigger {
    Trigger::OneShot {
        at: Utc::now().naive_utc() + Duration::milliseconds(ms),
    }
}

fn interval_every(every_ms: i64, first_ms: i64) -> Trigger {
    Trigger::Interval {
        every: Duration::milliseconds(every_ms),
        first_at: Utc::now().naive_utc() + Duration::milliseconds(first_ms),
    }
}

fn new_reminder(room_id: &str, text: &str, trigger: Trigger) -> NewReminder {
    NewReminder {
        room_id: room_id.to_string(),
        text: text.to_string(),
        trigger,
        timezone: chrono_tz::UTC,
        target_user: None,
        has_alarm: false,
    }
}

#[tokio::test]
async fn past_one_shot_is_rejected_without_state() {
    let (manager, _engine, _messenger, store) = test_manager().await;

    let err = manager
        .create(new_reminder("!r:x", "too late", one_shot_in(-1_000)))
        .await
        .unwrap_err();
    assert!(matches!(err, ChimeError::PastTime));

    assert!(manager.list("!r:x").await.is_empty());
    assert_eq!(store.count_reminders().await.unwrap(), 0);
}

#[tokio::test]
async fn duplicate_key_is_case_insensitive() {
    let (manager, _engine, _messenger, store) = test_manager().await;

    manager
        .create(new_reminder("!r:x", "Standup", one_shot_in(60_000)))
        .await
        .unwrap();

    let err = manager
        .create(new_reminder("!r:x", "STANDUP", one_shot_in(60_000)))
        .await
        .unwrap_err();
    assert!(matches!(err, ChimeError::DuplicateReminder));

    // The first reminder is unaffected.
    let listed = manager.list("!r:x").await;
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].text, "Standup");
    assert_eq!(store.count_reminders().await.unwrap(), 1);

    // Distinct keys never collide: other text, and same text elsewhere.
    manager
        .create(new_reminder("!r:x", "retro", one_shot_in(60_000)))
        .await
        .unwrap();
    manager
        .create(new_reminder("!other:x", "Standup", one_shot_in(60_000)))
        .await
        .unwrap();
}

#[tokio::test]
async fn one_shot_fires_once_then_disappears() {
    let (manager, engine, messenger, store) = test_manager().await;

    manager
        .create(new_reminder("R1", "standup", one_shot_in(400)))
        .await
        .unwrap();

    let listed = manager.list("R1").await;
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].text, "standup");
    assert!(listed[0].next_fire.is_some(), "scheduled job reports next fire");

    engine.start();

    let mut fired = false;
    for _ in 0..160 {
        if messenger.sent().len() == 1 {
            fired = true;
            break;
        }
        tokio::time::sleep(StdDuration::from_millis(25)).await;
    }
    assert!(fired, "reminder did not fire in time");

    let sent = messenger.sent();
    assert_eq!(sent[0].room_id, "R1");
    assert_eq!(sent[0].body, "@room standup");
    assert!(sent[0].mention_room);
    assert!(sent[0].mention_user.is_none());

    // After the fire handler completes the reminder is gone everywhere.
    let mut gone = false;
    for _ in 0..160 {
        if manager.list("R1").await.is_empty() && store.count_reminders().await.unwrap() == 0 {
            gone = true;
            break;
        }
        tokio::time::sleep(StdDuration::from_millis(25)).await;
    }
    assert!(gone, "one-shot reminder was not cleaned up");

    // And it fires exactly once.
    tokio::time::sleep(StdDuration::from_millis(500)).await;
    assert_eq!(messenger.sent().len(), 1);
}

#[tokio::test]
async fn targeted_reminder_mentions_the_user() {
    let (manager, engine, messenger, _store) = test_manager().await;

    let mut reminder = new_reminder("!r:x", "buy milk", one_shot_in(300));
    reminder.target_user = Some("@alice:example.org".to_string());
    manager.create(reminder).await.unwrap();
    engine.start();

    let mut fired = false;
    for _ in 0..160 {
        if messenger.sent().len() == 1 {
            fired = true;
            break;
        }
        tokio::time::sleep(StdDuration::from_millis(25)).await;
    }
    assert!(fired);

    let sent = messenger.sent();
    assert_eq!(sent[0].body, "@alice:example.org buy milk");
    assert!(!sent[0].mention_room);
    assert_eq!(sent[0].mention_user.as_deref(), Some("@alice:example.org"));
}

#[tokio::test]
async fn interval_repeats_until_cancelled() {
    let (manager, engine, messenger, store) = test_manager().await;

    manager
        .create(new_reminder("!r:x", "hydrate", interval_every(300, 300)))
        .await
        .unwrap();
    engine.start();

    let mut repeated = false;
    for _ in 0..200 {
        if messenger.sent().len() >= 2 {
            repeated = true;
            break;
        }
        tokio::time::sleep(StdDuration::from_millis(25)).await;
    }
    assert!(repeated, "interval reminder did not repeat");

    // The repeating reminder stays registered and stored between fires.
    assert_eq!(manager.list("!r:x").await.len(), 1);
    assert_eq!(store.count_reminders().await.unwrap(), 1);

    manager.cancel("!r:x", "hydrate").await.unwrap();
    let at_cancel = messenger.sent().len();

    tokio::time::sleep(StdDuration::from_millis(800)).await;
    assert_eq!(messenger.sent().len(), at_cancel, "no fires after cancel");
    assert!(manager.list("!r:x").await.is_empty());
    assert_eq!(store.count_reminders().await.unwrap(), 0);
}

#[tokio::test]
async fn cancel_unknown_reminder_is_an_error() {
    let (manager, _engine, _messenger, _store) = test_manager().await;
    let err = manager.cancel("!r:x", "nothing here").await.unwrap_err();
    assert!(matches!(err, ChimeError::UnknownReminder));
}

#[tokio::test]
async fn alarm_escalates_and_silence_keeps_base_schedule() {
    let (manager, engine, messenger, _store) = test_manager().await;

    // Repeating base schedule, far apart so only the first fire happens.
    let mut reminder = new_reminder("!r:x", "take meds", interval_every(3_600_000, 300));
    reminder.has_alarm = true;
    manager.create(reminder).await.unwrap();
    engine.start();

    let mut fired = false;
    for _ in 0..160 {
        if !messenger.sent().is_empty() {
            fired = true;
            break;
        }
        tokio::time::sleep(StdDuration::from_millis(25)).await;
    }
    assert!(fired);

    let sent = messenger.sent();
    assert_eq!(
        sent[0].body,
        "@room take meds (This reminder has an alarm. It will go off in 5m)."
    );

    // The alarm index has an entry now; the snapshot reflects it.
    let mut alarming = false;
    for _ in 0..160 {
        let listed = manager.list("!r:x").await;
        if listed.len() == 1 && listed[0].alarming {
            alarming = true;
            break;
        }
        tokio::time::sleep(StdDuration::from_millis(25)).await;
    }
    assert!(alarming, "alarm escalation did not start");

    // Silencing stops exactly the alarm; the base schedule stays.
    assert!(manager.silence("!r:x", Some("take meds")).await.unwrap());
    let listed = manager.list("!r:x").await;
    assert_eq!(listed.len(), 1);
    assert!(!listed[0].alarming);

    // Silencing again: known reminder, no alarm firing — informational.
    assert!(!manager.silence("!r:x", Some("take meds")).await.unwrap());
}

#[tokio::test]
async fn alarm_outlives_one_shot_base_reminder() {
    let (manager, engine, messenger, store) = test_manager().await;

    let mut reminder = new_reminder("!r:x", "stand up", one_shot_in(300));
    reminder.has_alarm = true;
    manager.create(reminder).await.unwrap();
    engine.start();

    let mut terminated = false;
    for _ in 0..160 {
        if !messenger.sent().is_empty()
            && manager.list("!r:x").await.is_empty()
            && store.count_reminders().await.unwrap() == 0
        {
            terminated = true;
            break;
        }
        tokio::time::sleep(StdDuration::from_millis(25)).await;
    }
    assert!(terminated, "one-shot base did not terminate");

    // The base is gone but its alarm keeps escalating until silenced.
    assert!(manager.silence("!r:x", None).await.unwrap());
    // No alarms left in the room now.
    assert!(!manager.silence("!r:x", None).await.unwrap());
}

#[tokio::test]
async fn silence_unknown_key_is_an_error() {
    let (manager, _engine, _messenger, _store) = test_manager().await;
    let err = manager.silence("!r:x", Some("nothing")).await.unwrap_err();
    assert!(matches!(err, ChimeError::UnknownReminderOrAlarm));

    // Without text it is informational: no alarms firing in the room.
    assert!(!manager.silence("!r:x", None).await.unwrap());
}

#[tokio::test]
async fn delivery_failure_leaves_schedule_intact() {
    let store = test_store().await;
    let engine = TimerEngine::new();
    let messenger = Arc::new(FailingMessenger::default());
    let manager = ReminderManager::new(engine.clone(), store.clone(), messenger.clone());

    manager
        .create(new_reminder("!r:x", "flaky wire", interval_every(300, 300)))
        .await
        .unwrap();
    engine.start();

    let mut attempted = false;
    for _ in 0..200 {
        if messenger.attempts.load(Ordering::SeqCst) >= 2 {
            attempted = true;
            break;
        }
        tokio::time::sleep(StdDuration::from_millis(25)).await;
    }
    assert!(attempted, "failing sends should keep being attempted");

    // Failed sends neither cancel the reminder nor delete its row.
    assert_eq!(manager.list("!r:x").await.len(), 1);
    assert_eq!(store.count_reminders().await.unwrap(), 1);
}

#[tokio::test]
async fn create_unwinds_when_persistence_fails() {
    let (manager, _engine, _messenger, store) = test_manager().await;

    // A row the registry does not know about: the insert below will trip
    // the unique index and force the rollback path.
    store
        .store_reminder(&StoredReminder {
            room_id: "!r:x".to_string(),
            text: "ghost".to_string(),
            trigger: Trigger::OneShot {
                at: NaiveDate::from_ymd_opt(2099, 1, 1)
                    .unwrap()
                    .and_hms_opt(9, 0, 0)
                    .unwrap(),
            },
            timezone: chrono_tz::UTC,
            target_user: None,
            has_alarm: false,
        })
        .await
        .unwrap();

    let err = manager
        .create(new_reminder("!r:x", "ghost", one_shot_in(60_000)))
        .await
        .unwrap_err();
    assert!(matches!(err, ChimeError::Storage(_)));

    // The failed create left no registry entry behind.
    assert!(manager.list("!r:x").await.is_empty());
}

#[tokio::test]
async fn restore_rebuilds_registry_and_jobs() {
    let (manager, _engine, _messenger, store) = test_manager().await;

    store
        .store_reminder(&StoredReminder {
            room_id: "!r:x".to_string(),
            text: "launch".to_string(),
            trigger: Trigger::OneShot {
                at: NaiveDate::from_ymd_opt(2099, 7, 1)
                    .unwrap()
                    .and_hms_opt(12, 0, 0)
                    .unwrap(),
            },
            timezone: chrono_tz::UTC,
            target_user: None,
            has_alarm: false,
        })
        .await
        .unwrap();
    store
        .store_reminder(&StoredReminder {
            room_id: "!r:x".to_string(),
            text: "weekly review".to_string(),
            trigger: Trigger::cron("0 9 * * 1").unwrap(),
            timezone: chrono_tz::UTC,
            target_user: Some("@alice:example.org".to_string()),
            has_alarm: true,
        })
        .await
        .unwrap();

    assert_eq!(manager.restore().await.unwrap(), 2);

    let listed = manager.list("!r:x").await;
    assert_eq!(listed.len(), 2);
    assert!(listed.iter().all(|s| s.next_fire.is_some()));
    let review = listed.iter().find(|s| s.text == "weekly review").unwrap();
    assert!(review.has_alarm);
    assert_eq!(review.target_user.as_deref(), Some("@alice:example.org"));

    // Restored reminders occupy their keys like freshly created ones.
    let err = manager
        .create(new_reminder("!r:x", "LAUNCH", one_shot_in(60_000)))
        .await
        .unwrap_err();
    assert!(matches!(err, ChimeError::DuplicateReminder));
}
