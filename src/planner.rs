use crate::agenda;
use crate::calendar;
use crate::clock::{Clock, SystemClock};
use crate::db::Database;
use crate::errors::{AppError, AppResult};
use crate::models::{
    Activity, ActivityId, ActivityMutationResponse, ActivityPayload, AppSettings, Category, ChangeCause,
    CreateActivityResponse, DeleteActivityResponse, DeliveryStatus, MonthView, NotificationDeliveryRecord,
    NotificationPermission, PlannerEvent, Priority, ReminderKind, ReminderPlan, ReminderSetting, SweepReport,
};
use crate::notifier::{EventNotifier, Notifier};
use crate::reminders::{
    plan_reminder, reminder_message, ArmedSummary, ReminderCheck, ReminderHooks, ReminderScheduler, ReminderTicket,
};
use crate::store::ActivityStore;
use crate::sweeper;
use crate::timefmt;
use chrono::{NaiveDate, NaiveDateTime};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Duration;

const EVENT_CAPACITY: usize = 256;
const DATABASE_FILE: &str = "planner.sqlite";

pub struct PlannerCore {
    db: Arc<Database>,
    store: ActivityStore,
    reminders: ReminderScheduler,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    events: broadcast::Sender<PlannerEvent>,
    data_dir: PathBuf,
    /// Held across every load-modify-save of the collection.
    collection_lock: Mutex<()>,
}

impl PlannerCore {
    pub fn new(data_dir: PathBuf) -> AppResult<Arc<Self>> {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let notifier = Arc::new(EventNotifier::new(events.clone(), NotificationPermission::Default));
        Self::with_components(data_dir, events, notifier, Arc::new(SystemClock))
    }

    pub fn with_components(
        data_dir: PathBuf,
        events: broadcast::Sender<PlannerEvent>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
    ) -> AppResult<Arc<Self>> {
        let db = Arc::new(Database::new(&data_dir.join(DATABASE_FILE))?);
        let store = ActivityStore::new(db.clone(), clock.clone());
        let reminders = ReminderScheduler::new(notifier.clone(), clock.clone());

        let this = Arc::new(Self {
            db,
            store,
            reminders: reminders.clone(),
            notifier,
            clock,
            events,
            data_dir,
            collection_lock: Mutex::new(()),
        });

        reminders.set_hooks(Arc::new(PlannerReminderHooks {
            planner: Arc::downgrade(&this),
        }));

        Ok(this)
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PlannerEvent> {
        self.events.subscribe()
    }

    /// Starts the periodic expiry sweep.
    pub fn start_sweeper(self: &Arc<Self>) -> AppResult<JoinHandle<()>> {
        let settings = self.db.get_settings()?;
        Ok(sweeper::spawn_sweeper(
            self.clone(),
            Duration::from_secs(settings.sweep_interval_secs.max(1)),
        ))
    }

    pub fn shutdown(&self) {
        self.reminders.disarm_all();
    }

    // ─── Activities ──────────────────────────────────────────────────────────

    pub fn ordered_activities(&self) -> Vec<Activity> {
        agenda::ordered(self.store.load())
    }

    pub fn get_activity(&self, id: ActivityId) -> Option<Activity> {
        self.store.load().into_iter().find(|activity| activity.id == id)
    }

    pub fn create_activity(&self, payload: ActivityPayload) -> AppResult<CreateActivityResponse> {
        let fields = ActivityFields::from_payload(payload)?;

        let _guard = self.lock_collection();
        let mut activities = self.store.load();
        let id = self.next_id(&activities);
        let activity = fields.into_activity(id, false);
        activities.push(activity.clone());

        let persisted = self.store.save(&activities).is_saved();
        if !persisted {
            tracing::warn!(activity_id = id, "created activity was not persisted");
            return Ok(CreateActivityResponse {
                activity,
                persisted,
                reminder: None,
            });
        }

        tracing::info!(activity_id = id, date = %activity.date, time = %activity.time, "activity created");
        let reminder = match plan_reminder(&activity, self.clock.now()) {
            Some(plan) => self.arm_plan(&activity, plan).unwrap_or_else(|error| {
                tracing::warn!(activity_id = id, error = %error, "failed to arm reminder");
                None
            }),
            None => None,
        };
        self.publish(PlannerEvent::ActivitiesChanged {
            cause: ChangeCause::Created,
            activity_ids: vec![id],
        });

        Ok(CreateActivityResponse {
            activity,
            persisted,
            reminder,
        })
    }

    /// Replaces an activity's fields. Reminders are only armed at creation;
    /// one armed for the old fields is suppressed when it fires.
    pub fn update_activity(&self, id: ActivityId, payload: ActivityPayload) -> AppResult<ActivityMutationResponse> {
        let fields = ActivityFields::from_payload(payload)?;

        let _guard = self.lock_collection();
        let mut activities = self.store.load();
        let index = agenda::find_index(&activities, id)
            .ok_or_else(|| AppError::NotFound(format!("activity {id}")))?;
        let updated = fields.into_activity(id, activities[index].completed);
        activities[index] = updated.clone();

        let persisted = self.store.save(&activities).is_saved();
        if persisted {
            tracing::info!(activity_id = id, "activity updated");
            self.publish(PlannerEvent::ActivitiesChanged {
                cause: ChangeCause::Updated,
                activity_ids: vec![id],
            });
        }

        Ok(ActivityMutationResponse {
            activity: updated,
            persisted,
        })
    }

    pub fn delete_activity(&self, id: ActivityId) -> AppResult<DeleteActivityResponse> {
        let _guard = self.lock_collection();
        let mut activities = self.store.load();
        let index = agenda::find_index(&activities, id)
            .ok_or_else(|| AppError::NotFound(format!("activity {id}")))?;
        activities.remove(index);

        let persisted = self.store.save(&activities).is_saved();
        if persisted {
            self.forget_reminder(id);
            tracing::info!(activity_id = id, "activity deleted");
            self.publish(PlannerEvent::ActivitiesChanged {
                cause: ChangeCause::Deleted,
                activity_ids: vec![id],
            });
        }

        Ok(DeleteActivityResponse {
            success: true,
            persisted,
        })
    }

    pub fn toggle_completed(&self, id: ActivityId) -> AppResult<ActivityMutationResponse> {
        let _guard = self.lock_collection();
        let mut activities = self.store.load();
        let index = agenda::find_index(&activities, id)
            .ok_or_else(|| AppError::NotFound(format!("activity {id}")))?;
        activities[index].completed = !activities[index].completed;
        let activity = activities[index].clone();

        let persisted = self.store.save(&activities).is_saved();
        if persisted {
            self.publish(PlannerEvent::ActivitiesChanged {
                cause: ChangeCause::Toggled,
                activity_ids: vec![id],
            });
        }

        Ok(ActivityMutationResponse { activity, persisted })
    }

    /// Removes every activity whose instant is strictly before now.
    pub fn sweep_expired(&self) -> AppResult<SweepReport> {
        let _guard = self.lock_collection();
        let now = self.clock.now();
        self.prune_deliveries(now);
        let (kept, expired) = sweeper::partition_expired(self.store.load(), now);
        if expired.is_empty() {
            return Ok(SweepReport {
                removed: Vec::new(),
                remaining: kept.len(),
                persisted: true,
            });
        }

        let removed = expired.iter().map(|activity| activity.id).collect::<Vec<_>>();
        let persisted = self.store.save(&kept).is_saved();
        if persisted {
            for id in &removed {
                self.forget_reminder(*id);
            }
            self.publish(PlannerEvent::ActivitiesChanged {
                cause: ChangeCause::Swept,
                activity_ids: removed.clone(),
            });
        }

        Ok(SweepReport {
            removed,
            remaining: kept.len(),
            persisted,
        })
    }

    // ─── Calendar ────────────────────────────────────────────────────────────

    pub fn today(&self) -> NaiveDate {
        self.clock.now().date()
    }

    pub fn month_view(&self, year: i32, month: u32) -> AppResult<MonthView> {
        calendar::month_view(year, month, &self.store.load(), self.today())
    }

    pub fn activities_on(&self, date: &str) -> AppResult<Vec<Activity>> {
        let date = timefmt::parse_date(date)
            .ok_or_else(|| AppError::Validation(format!("invalid date '{date}', expected YYYY-MM-DD")))?;
        Ok(agenda::activities_on(&self.store.load(), date))
    }

    // ─── Reminders ───────────────────────────────────────────────────────────

    /// Rebuilds armed reminders from persisted data after a restart.
    ///
    /// Daily reminders are armed for every daily activity, resuming from the
    /// persisted next-fire instant while it is still ahead. One-shot reminders
    /// are armed again only when their persisted row still matches the
    /// activity and the fire instant is still ahead.
    pub fn rearm_reminders(&self) -> AppResult<usize> {
        let _guard = self.lock_collection();
        let activities = self.store.load();
        let records = self
            .db
            .list_reminders()?
            .into_iter()
            .map(|record| (record.activity_id, record))
            .collect::<HashMap<_, _>>();
        let now = self.clock.now();
        let mut armed = 0usize;

        for activity in &activities {
            let record = records.get(&activity.id);
            let matches = record
                .map(|record| record.fingerprint == activity.reminder_fingerprint())
                .unwrap_or(false);

            let plan = match activity.reminder_time {
                ReminderSetting::Daily => match record {
                    Some(record) if matches && record.kind == ReminderKind::Daily && record.next_fire_at >= now => {
                        Some(ReminderPlan {
                            activity_id: activity.id,
                            kind: ReminderKind::Daily,
                            fire_at: record.next_fire_at,
                        })
                    }
                    _ => plan_reminder(activity, now),
                },
                ReminderSetting::MinutesBefore(_) if matches => plan_reminder(activity, now),
                _ => None,
            };

            match plan {
                Some(plan) => {
                    if self.arm_plan(activity, plan)?.is_some() {
                        armed += 1;
                    }
                }
                None if record.is_some() => {
                    self.db.delete_reminder(activity.id)?;
                }
                None => {}
            }
        }

        for id in records.keys() {
            if agenda::find_index(&activities, *id).is_none() {
                self.db.delete_reminder(*id)?;
            }
        }

        tracing::info!(armed, "reminders re-armed");
        Ok(armed)
    }

    pub fn armed_reminders(&self) -> Vec<ArmedSummary> {
        self.reminders.armed()
    }

    fn arm_plan(&self, activity: &Activity, plan: ReminderPlan) -> AppResult<Option<ReminderPlan>> {
        if tokio::runtime::Handle::try_current().is_err() {
            tracing::warn!(activity_id = activity.id, "no async runtime; reminder left for next start");
            return Ok(None);
        }

        let settings = self.db.get_settings()?;
        let record = self.db.upsert_reminder(
            activity.id,
            plan.kind,
            plan.fire_at,
            &activity.reminder_fingerprint(),
        )?;
        self.reminders.arm(ReminderTicket {
            activity_id: activity.id,
            generation: record.generation,
            kind: plan.kind,
            fire_at: plan.fire_at,
            message: reminder_message(activity, plan.kind, settings.notification_icon),
        });
        Ok(Some(plan))
    }

    fn forget_reminder(&self, id: ActivityId) {
        self.reminders.disarm(id);
        if let Err(error) = self.db.delete_reminder(id) {
            tracing::warn!(activity_id = id, error = %error, "failed to delete reminder row");
        }
    }

    // ─── Notifications ───────────────────────────────────────────────────────

    pub fn notification_permission(&self) -> NotificationPermission {
        self.notifier.permission()
    }

    pub fn request_notification_permission(&self) -> NotificationPermission {
        self.notifier.request_permission()
    }

    pub fn set_notification_permission(&self, permission: NotificationPermission) -> NotificationPermission {
        self.notifier.set_permission(permission);
        self.notifier.permission()
    }

    pub fn list_notification_deliveries(&self, limit: Option<u32>) -> AppResult<Vec<NotificationDeliveryRecord>> {
        self.db.list_deliveries(limit.unwrap_or(50))
    }

    // ─── Settings ────────────────────────────────────────────────────────────

    pub fn get_settings(&self) -> AppResult<AppSettings> {
        self.db.get_settings()
    }

    pub fn update_settings(&self, update: serde_json::Value) -> AppResult<AppSettings> {
        let settings = self.db.update_settings(update)?;
        self.store.invalidate();
        Ok(settings)
    }

    fn next_id(&self, activities: &[Activity]) -> ActivityId {
        let mut id = self.clock.epoch_millis();
        while agenda::find_index(activities, id).is_some() {
            id += 1;
        }
        id
    }

    fn prune_deliveries(&self, now: NaiveDateTime) {
        let result = self.db.get_settings().and_then(|settings| {
            let cutoff = now - chrono::Duration::days(i64::from(settings.prune_after_days));
            self.db.prune_deliveries(cutoff)
        });
        match result {
            Ok(0) => {}
            Ok(pruned) => tracing::debug!(pruned, "old notification deliveries pruned"),
            Err(error) => tracing::warn!(error = %error, "failed to prune notification deliveries"),
        }
    }

    fn lock_collection(&self) -> MutexGuard<'_, ()> {
        self.collection_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn publish(&self, event: PlannerEvent) {
        let _ = self.events.send(event);
    }

    fn check_ticket(&self, ticket: &ReminderTicket) -> AppResult<ReminderCheck> {
        let Some(record) = self.db.get_reminder(ticket.activity_id)? else {
            return Ok(ReminderCheck::Stale("reminder removed".to_string()));
        };
        if record.generation != ticket.generation {
            return Ok(ReminderCheck::Stale(format!(
                "superseded by generation {}",
                record.generation
            )));
        }
        let Some(activity) = self.get_activity(ticket.activity_id) else {
            return Ok(ReminderCheck::Stale("activity deleted".to_string()));
        };
        if activity.reminder_fingerprint() != record.fingerprint {
            return Ok(ReminderCheck::Stale("activity changed since arming".to_string()));
        }
        Ok(ReminderCheck::Current)
    }
}

/// Validated form fields.
struct ActivityFields {
    name: String,
    date: String,
    time: String,
    category: Category,
    priority: Priority,
    reminder_time: ReminderSetting,
}

impl ActivityFields {
    fn from_payload(payload: ActivityPayload) -> AppResult<Self> {
        let name = payload.name.trim();
        if name.is_empty() || payload.date.trim().is_empty() || payload.time.trim().is_empty() {
            return Err(AppError::Validation("name, date and time are required".to_string()));
        }
        let date = timefmt::parse_date(&payload.date)
            .ok_or_else(|| AppError::Validation(format!("invalid date '{}', expected YYYY-MM-DD", payload.date)))?;
        let time = timefmt::to_display_time(&payload.time)
            .ok_or_else(|| AppError::Validation(format!("invalid time '{}', expected HH:MM", payload.time)))?;

        let category = payload
            .category
            .as_deref()
            .map(Category::parse)
            .unwrap_or_default();
        let priority = match payload.priority.as_deref().map(str::trim) {
            None | Some("") => Priority::default(),
            Some(value) => Priority::parse(value),
        };

        Ok(Self {
            name: name.to_string(),
            date: date.format("%Y-%m-%d").to_string(),
            time,
            category,
            priority,
            reminder_time: payload.reminder_time,
        })
    }

    fn into_activity(self, id: ActivityId, completed: bool) -> Activity {
        Activity {
            id,
            name: self.name,
            date: self.date,
            time: self.time,
            category: self.category,
            priority: self.priority,
            completed,
            reminder_time: self.reminder_time,
        }
    }
}

struct PlannerReminderHooks {
    planner: Weak<PlannerCore>,
}

impl ReminderHooks for PlannerReminderHooks {
    fn validate(&self, ticket: &ReminderTicket) -> ReminderCheck {
        let Some(planner) = self.planner.upgrade() else {
            return ReminderCheck::Stale("planner shut down".to_string());
        };
        planner.check_ticket(ticket).unwrap_or_else(|error| {
            tracing::warn!(activity_id = ticket.activity_id, error = %error, "reminder check failed; delivering");
            ReminderCheck::Current
        })
    }

    fn rescheduled(&self, ticket: &ReminderTicket) {
        let Some(planner) = self.planner.upgrade() else {
            return;
        };
        if let Err(error) = planner
            .db
            .advance_reminder(ticket.activity_id, ticket.generation, ticket.fire_at)
        {
            tracing::warn!(activity_id = ticket.activity_id, error = %error, "failed to persist next reminder");
        }
    }

    fn fired(&self, ticket: &ReminderTicket, status: DeliveryStatus) {
        let Some(planner) = self.planner.upgrade() else {
            return;
        };
        if let Err(error) =
            planner
                .db
                .insert_delivery(ticket.activity_id, ticket.kind, &ticket.message, status, ticket.fire_at)
        {
            tracing::warn!(activity_id = ticket.activity_id, error = %error, "failed to record delivery");
        }

        let finished = matches!(ticket.kind, ReminderKind::OneShot { .. }) || status == DeliveryStatus::Suppressed;
        if !finished {
            return;
        }
        match planner.db.get_reminder(ticket.activity_id) {
            Ok(Some(record)) if record.generation == ticket.generation => {
                if let Err(error) = planner.db.delete_reminder(ticket.activity_id) {
                    tracing::warn!(activity_id = ticket.activity_id, error = %error, "failed to clear reminder row");
                }
            }
            Ok(_) => {}
            Err(error) => tracing::warn!(activity_id = ticket.activity_id, error = %error, "reminder lookup failed"),
        }
    }
}
