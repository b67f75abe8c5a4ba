use activity_planner_lib::clock::{AnchoredClock, Clock};
use activity_planner_lib::models::{
    ActivityId, ActivityPayload, DeliveryStatus, NotificationMessage, NotificationPermission, Priority,
    ReminderSetting,
};
use activity_planner_lib::notifier::Notifier;
use activity_planner_lib::planner::PlannerCore;
use chrono::{NaiveDate, NaiveDateTime, Timelike};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;

fn at(day: u32, hour: u32, minute: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 3, day)
        .and_then(|date| date.and_hms_opt(hour, minute, 0))
        .expect("valid instant")
}

struct RecordingNotifier {
    clock: Arc<dyn Clock>,
    permission: Mutex<NotificationPermission>,
    shown: Mutex<Vec<(ActivityId, NotificationMessage, NaiveDateTime)>>,
}

impl RecordingNotifier {
    fn shown_at(&self) -> Vec<NaiveDateTime> {
        self.shown.lock().expect("shown").iter().map(|(_, _, at)| *at).collect()
    }

    fn bodies(&self) -> Vec<String> {
        self.shown
            .lock()
            .expect("shown")
            .iter()
            .map(|(_, message, _)| message.body.clone())
            .collect()
    }
}

impl Notifier for RecordingNotifier {
    fn permission(&self) -> NotificationPermission {
        *self.permission.lock().expect("permission")
    }

    fn set_permission(&self, permission: NotificationPermission) {
        *self.permission.lock().expect("permission") = permission;
    }

    fn show(&self, activity_id: ActivityId, message: &NotificationMessage) {
        let now = self.clock.now();
        let now = now.with_nanosecond(0).unwrap_or(now);
        self.shown
            .lock()
            .expect("shown")
            .push((activity_id, message.clone(), now));
    }
}

struct Harness {
    planner: Arc<PlannerCore>,
    notifier: Arc<RecordingNotifier>,
}

fn open(dir: &Path, now: NaiveDateTime) -> Harness {
    let clock: Arc<dyn Clock> = Arc::new(AnchoredClock::new(now));
    let notifier = Arc::new(RecordingNotifier {
        clock: clock.clone(),
        permission: Mutex::new(NotificationPermission::Granted),
        shown: Mutex::new(Vec::new()),
    });
    let (events, _) = broadcast::channel(64);
    let planner = PlannerCore::with_components(dir.to_path_buf(), events, notifier.clone(), clock)
        .expect("planner");
    Harness { planner, notifier }
}

fn standup(reminder_time: ReminderSetting) -> ActivityPayload {
    ActivityPayload {
        name: "Standup".to_string(),
        date: "2024-03-01".to_string(),
        time: "09:00".to_string(),
        category: Some("trabajo".to_string()),
        priority: None,
        reminder_time,
    }
}

fn gym_daily() -> ActivityPayload {
    ActivityPayload {
        name: "Gym".to_string(),
        date: "2024-03-20".to_string(),
        time: "07:00".to_string(),
        category: Some("ejercicio".to_string()),
        priority: Some("low".to_string()),
        reminder_time: ReminderSetting::Daily,
    }
}

#[tokio::test(start_paused = true)]
async fn one_shot_reminder_fires_thirty_minutes_before_standup() {
    let dir = tempfile::tempdir().expect("tempdir");
    let harness = open(dir.path(), at(1, 8, 0));

    let created = harness
        .planner
        .create_activity(standup(ReminderSetting::MinutesBefore(30)))
        .expect("create");
    assert_eq!(created.reminder.expect("planned").fire_at, at(1, 8, 30));

    tokio::time::sleep(Duration::from_secs(2 * 3600)).await;

    assert_eq!(harness.notifier.shown_at(), vec![at(1, 8, 30)]);
    assert_eq!(harness.notifier.bodies(), vec!["En 30 minutos: Standup".to_string()]);
    assert!(harness.planner.armed_reminders().is_empty());

    let deliveries = harness.planner.list_notification_deliveries(None).expect("deliveries");
    assert_eq!(deliveries.len(), 1);
    assert_eq!(deliveries[0].status, DeliveryStatus::Delivered);
    assert_eq!(deliveries[0].fire_at, at(1, 8, 30));
}

#[tokio::test(start_paused = true)]
async fn no_reminder_when_created_after_the_reminder_instant() {
    let dir = tempfile::tempdir().expect("tempdir");
    let harness = open(dir.path(), at(1, 8, 40));

    let created = harness
        .planner
        .create_activity(standup(ReminderSetting::MinutesBefore(30)))
        .expect("create");
    assert!(created.reminder.is_none());
    assert!(harness.planner.armed_reminders().is_empty());

    tokio::time::sleep(Duration::from_secs(3600)).await;
    assert!(harness.notifier.shown_at().is_empty());
}

#[tokio::test(start_paused = true)]
async fn daily_reminder_fires_tomorrow_then_the_day_after() {
    let dir = tempfile::tempdir().expect("tempdir");
    let harness = open(dir.path(), at(1, 7, 5));

    let created = harness.planner.create_activity(gym_daily()).expect("create");
    assert_eq!(created.reminder.expect("planned").fire_at, at(2, 7, 0));

    tokio::time::sleep(Duration::from_secs(24 * 3600)).await;
    assert_eq!(harness.notifier.shown_at(), vec![at(2, 7, 0)]);
    assert_eq!(harness.planner.armed_reminders()[0].fire_at, at(3, 7, 0));

    tokio::time::sleep(Duration::from_secs(24 * 3600)).await;
    assert_eq!(harness.notifier.shown_at(), vec![at(2, 7, 0), at(3, 7, 0)]);
    assert_eq!(harness.notifier.bodies()[0], "Es hora de: Gym");
}

#[tokio::test(start_paused = true)]
async fn edited_activity_suppresses_its_pending_reminder() {
    let dir = tempfile::tempdir().expect("tempdir");
    let harness = open(dir.path(), at(1, 8, 0));

    let created = harness
        .planner
        .create_activity(standup(ReminderSetting::MinutesBefore(30)))
        .expect("create");
    harness
        .planner
        .update_activity(
            created.activity.id,
            ActivityPayload {
                name: "Retro".to_string(),
                ..standup(ReminderSetting::MinutesBefore(30))
            },
        )
        .expect("update");

    tokio::time::sleep(Duration::from_secs(3600)).await;

    assert!(harness.notifier.shown_at().is_empty());
    let deliveries = harness.planner.list_notification_deliveries(Some(10)).expect("deliveries");
    assert_eq!(deliveries.len(), 1);
    assert_eq!(deliveries[0].status, DeliveryStatus::Suppressed);
}

#[tokio::test(start_paused = true)]
async fn deleted_activity_never_notifies() {
    let dir = tempfile::tempdir().expect("tempdir");
    let harness = open(dir.path(), at(1, 6, 0));

    let created = harness.planner.create_activity(gym_daily()).expect("create");
    harness.planner.delete_activity(created.activity.id).expect("delete");

    tokio::time::sleep(Duration::from_secs(3 * 24 * 3600)).await;
    assert!(harness.notifier.shown_at().is_empty());
    assert!(harness
        .planner
        .list_notification_deliveries(None)
        .expect("deliveries")
        .is_empty());
}

#[tokio::test(start_paused = true)]
async fn denied_permission_is_logged_and_granting_resumes_delivery() {
    let dir = tempfile::tempdir().expect("tempdir");
    let harness = open(dir.path(), at(1, 6, 0));
    harness
        .planner
        .set_notification_permission(NotificationPermission::Denied);

    harness.planner.create_activity(gym_daily()).expect("create");
    tokio::time::sleep(Duration::from_secs(2 * 3600)).await;
    assert!(harness.notifier.shown_at().is_empty());

    harness
        .planner
        .set_notification_permission(NotificationPermission::Granted);
    tokio::time::sleep(Duration::from_secs(24 * 3600)).await;
    assert_eq!(harness.notifier.shown_at(), vec![at(2, 7, 0)]);

    let statuses = harness
        .planner
        .list_notification_deliveries(None)
        .expect("deliveries")
        .into_iter()
        .map(|record| record.status)
        .collect::<Vec<_>>();
    assert!(statuses.contains(&DeliveryStatus::PermissionDenied));
    assert!(statuses.contains(&DeliveryStatus::Delivered));
}

#[tokio::test(start_paused = true)]
async fn restart_rearms_reminders_from_persisted_state() {
    let dir = tempfile::tempdir().expect("tempdir");

    let edited_id = {
        let first = open(dir.path(), at(1, 6, 0));
        first.planner.create_activity(gym_daily()).expect("daily");
        first
            .planner
            .create_activity(standup(ReminderSetting::MinutesBefore(30)))
            .expect("one-shot");
        let edited = first
            .planner
            .create_activity(ActivityPayload {
                name: "Review".to_string(),
                time: "10:00".to_string(),
                ..standup(ReminderSetting::MinutesBefore(15))
            })
            .expect("edited");
        first
            .planner
            .update_activity(
                edited.activity.id,
                ActivityPayload {
                    name: "Review v2".to_string(),
                    time: "10:00".to_string(),
                    ..standup(ReminderSetting::MinutesBefore(15))
                },
            )
            .expect("update");
        assert_eq!(first.planner.armed_reminders().len(), 3);
        first.planner.shutdown();
        edited.activity.id
    };

    let second = open(dir.path(), at(1, 6, 30));
    assert_eq!(second.planner.ordered_activities().len(), 3);
    assert_eq!(second.planner.rearm_reminders().expect("rearm"), 2);
    let armed = second.planner.armed_reminders();
    assert_eq!(
        armed.iter().map(|summary| summary.fire_at).collect::<Vec<_>>(),
        vec![at(1, 7, 0), at(1, 8, 30)]
    );
    assert!(armed.iter().all(|summary| summary.activity_id != edited_id));
    assert!(armed.iter().all(|summary| summary.generation == 2));

    tokio::time::sleep(Duration::from_secs(4 * 3600)).await;
    assert_eq!(second.notifier.shown_at(), vec![at(1, 7, 0), at(1, 8, 30)]);
}

#[tokio::test(start_paused = true)]
async fn ordering_and_sweep_follow_the_clock() {
    let dir = tempfile::tempdir().expect("tempdir");
    let harness = open(dir.path(), at(1, 12, 0));

    let entries = [
        ("dentist", "2024-03-04", "16:00", "medium"),
        ("report", "2024-03-02", "09:00", "low"),
        ("deploy", "2024-03-02", "09:00", "high"),
        ("lunch", "2024-03-01", "12:00", "medium"),
        ("breakfast", "2024-03-01", "08:00", "high"),
        ("notes", "2024-03-02", "09:00", "medium"),
    ];
    for (name, date, time, priority) in entries {
        harness
            .planner
            .create_activity(ActivityPayload {
                name: name.to_string(),
                date: date.to_string(),
                time: time.to_string(),
                category: None,
                priority: Some(priority.to_string()),
                reminder_time: ReminderSetting::None,
            })
            .expect("create");
    }

    let names = |activities: Vec<activity_planner_lib::models::Activity>| {
        activities
            .into_iter()
            .map(|activity| activity.name)
            .collect::<Vec<_>>()
    };
    assert_eq!(
        names(harness.planner.ordered_activities()),
        vec!["breakfast", "lunch", "deploy", "notes", "report", "dentist"]
    );

    let report = harness.planner.sweep_expired().expect("sweep");
    assert_eq!(report.removed.len(), 1);
    assert_eq!(report.remaining, 5);
    assert!(report.persisted);
    assert!(harness.planner.sweep_expired().expect("again").removed.is_empty());

    let reopened = open(dir.path(), at(1, 12, 0));
    let stored = reopened.planner.ordered_activities();
    assert_eq!(names(stored.clone())[0], "lunch");
    assert!(stored.iter().all(|activity| !activity.completed));
    assert_eq!(stored[1].priority, Priority::High);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_sweeps_never_drop_persisted_creates() {
    let dir = tempfile::tempdir().expect("tempdir");
    let harness = open(dir.path(), at(1, 12, 0));
    let stop = Arc::new(AtomicBool::new(false));

    let sweeper = tokio::spawn({
        let planner = harness.planner.clone();
        let stop = stop.clone();
        async move {
            while !stop.load(Ordering::Relaxed) {
                planner.sweep_expired().expect("sweep");
                tokio::task::yield_now().await;
            }
        }
    });

    let mut persisted = Vec::new();
    for index in 0..300 {
        let upcoming = harness
            .planner
            .create_activity(ActivityPayload {
                name: format!("upcoming-{index}"),
                date: "2024-06-01".to_string(),
                time: "10:00".to_string(),
                category: None,
                priority: None,
                reminder_time: ReminderSetting::None,
            })
            .expect("upcoming");
        assert!(upcoming.persisted);
        persisted.push(upcoming.activity.id);

        harness
            .planner
            .create_activity(ActivityPayload {
                name: format!("past-{index}"),
                date: "2024-02-01".to_string(),
                time: "10:00".to_string(),
                category: None,
                priority: None,
                reminder_time: ReminderSetting::None,
            })
            .expect("past");
        tokio::task::yield_now().await;
    }

    stop.store(true, Ordering::Relaxed);
    sweeper.await.expect("sweeper task");
    harness.planner.sweep_expired().expect("final sweep");

    let stored = harness.planner.ordered_activities();
    assert_eq!(stored.len(), persisted.len());
    assert!(persisted
        .iter()
        .all(|id| stored.iter().any(|activity| activity.id == *id)));
}
