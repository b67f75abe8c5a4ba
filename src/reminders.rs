use crate::clock::Clock;
use crate::models::{
    Activity, ActivityId, DeliveryStatus, NotificationMessage, NotificationPermission, ReminderKind, ReminderPlan,
    ReminderSetting,
};
use crate::notifier::Notifier;
use crate::timefmt;
use chrono::{NaiveDateTime, NaiveTime};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Duration;

pub const ONE_SHOT_TITLE: &str = "Recordatorio de Actividad";
pub const DAILY_TITLE: &str = "Recordatorio Diario";

/// Longest single sleep; the wall clock is re-read after each slice so that a
/// suspended host does not push reminders late.
const MAX_TIMER_SLICE: Duration = Duration::from_secs(300);

/// Works out when an activity's reminder should fire, if at all.
///
/// One-shot reminders whose instant is not strictly in the future are not
/// planned. Daily reminders ignore the activity date and pick the next
/// occurrence of its time of day.
pub fn plan_reminder(activity: &Activity, now: NaiveDateTime) -> Option<ReminderPlan> {
    match activity.reminder_time {
        ReminderSetting::None => None,
        ReminderSetting::MinutesBefore(minutes) => {
            let fire_at = activity.instant()? - chrono::Duration::minutes(i64::from(minutes));
            (fire_at > now).then_some(ReminderPlan {
                activity_id: activity.id,
                kind: ReminderKind::OneShot { minutes_before: minutes },
                fire_at,
            })
        }
        ReminderSetting::Daily => {
            let time = timefmt::parse_display_time(&activity.time)?;
            Some(ReminderPlan {
                activity_id: activity.id,
                kind: ReminderKind::Daily,
                fire_at: next_daily_fire(time, now),
            })
        }
    }
}

/// Today at `time` unless that has already passed, otherwise tomorrow.
pub fn next_daily_fire(time: NaiveTime, now: NaiveDateTime) -> NaiveDateTime {
    let today = now.date().and_time(time);
    if today < now {
        today + chrono::Duration::days(1)
    } else {
        today
    }
}

pub fn reminder_message(activity: &Activity, kind: ReminderKind, icon: Option<String>) -> NotificationMessage {
    match kind {
        ReminderKind::OneShot { minutes_before } => NotificationMessage {
            title: ONE_SHOT_TITLE.to_string(),
            body: format!("En {} minutos: {}", minutes_before, activity.name),
            icon,
        },
        ReminderKind::Daily => NotificationMessage {
            title: DAILY_TITLE.to_string(),
            body: format!("Es hora de: {}", activity.name),
            icon,
        },
    }
}

/// One armed reminder occurrence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReminderTicket {
    pub activity_id: ActivityId,
    pub generation: i64,
    pub kind: ReminderKind,
    pub fire_at: NaiveDateTime,
    pub message: NotificationMessage,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReminderCheck {
    Current,
    Stale(String),
}

/// Callbacks into the owner of the persisted reminder state.
pub trait ReminderHooks: Send + Sync {
    /// Decides at fire time whether the ticket still reflects stored data.
    fn validate(&self, ticket: &ReminderTicket) -> ReminderCheck;

    /// A daily ticket moved on to its next occurrence.
    fn rescheduled(&self, ticket: &ReminderTicket);

    fn fired(&self, ticket: &ReminderTicket, status: DeliveryStatus);
}

struct ArmedReminder {
    generation: i64,
    fire_at: NaiveDateTime,
    handle: JoinHandle<()>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArmedSummary {
    pub activity_id: ActivityId,
    pub generation: i64,
    pub fire_at: NaiveDateTime,
}

#[derive(Clone)]
pub struct ReminderScheduler {
    armed: Arc<Mutex<HashMap<ActivityId, ArmedReminder>>>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    hooks: Arc<RwLock<Option<Arc<dyn ReminderHooks>>>>,
}

impl ReminderScheduler {
    pub fn new(notifier: Arc<dyn Notifier>, clock: Arc<dyn Clock>) -> Self {
        Self {
            armed: Arc::new(Mutex::new(HashMap::new())),
            notifier,
            clock,
            hooks: Arc::new(RwLock::new(None)),
        }
    }

    pub fn set_hooks(&self, hooks: Arc<dyn ReminderHooks>) {
        let mut writer = self.hooks.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        *writer = Some(hooks);
    }

    /// Arms `ticket`, replacing whatever was armed for the same activity.
    /// Must be called from within a tokio runtime.
    pub fn arm(&self, ticket: ReminderTicket) {
        let activity_id = ticket.activity_id;
        let generation = ticket.generation;
        let fire_at = ticket.fire_at;

        let mut armed = self.armed_map();
        if let Some(previous) = armed.remove(&activity_id) {
            previous.handle.abort();
        }
        let scheduler = self.clone();
        let handle = tokio::spawn(async move {
            scheduler.run_ticket(ticket).await;
        });
        armed.insert(
            activity_id,
            ArmedReminder {
                generation,
                fire_at,
                handle,
            },
        );
        tracing::debug!(activity_id, generation, fire_at = %fire_at, "reminder armed");
    }

    pub fn disarm(&self, activity_id: ActivityId) -> bool {
        match self.armed_map().remove(&activity_id) {
            Some(previous) => {
                previous.handle.abort();
                tracing::debug!(activity_id, "reminder disarmed");
                true
            }
            None => false,
        }
    }

    pub fn disarm_all(&self) {
        for (_, previous) in self.armed_map().drain() {
            previous.handle.abort();
        }
    }

    pub fn armed(&self) -> Vec<ArmedSummary> {
        let mut summaries = self
            .armed_map()
            .iter()
            .map(|(activity_id, armed)| ArmedSummary {
                activity_id: *activity_id,
                generation: armed.generation,
                fire_at: armed.fire_at,
            })
            .collect::<Vec<_>>();
        summaries.sort_by_key(|summary| summary.fire_at);
        summaries
    }

    pub fn is_armed(&self, activity_id: ActivityId) -> bool {
        self.armed_map().contains_key(&activity_id)
    }

    async fn run_ticket(self, mut ticket: ReminderTicket) {
        loop {
            self.sleep_until(ticket.fire_at).await;

            if !self.fire(&ticket) {
                break;
            }

            let ReminderKind::Daily = ticket.kind else {
                break;
            };

            let mut next = next_daily_fire(ticket.fire_at.time(), self.clock.now());
            if next <= ticket.fire_at {
                next = ticket.fire_at + chrono::Duration::days(1);
            }
            ticket.fire_at = next;
            if let Some(armed) = self.armed_map().get_mut(&ticket.activity_id) {
                if armed.generation == ticket.generation {
                    armed.fire_at = next;
                }
            }
            if let Some(hooks) = self.current_hooks() {
                hooks.rescheduled(&ticket);
            }
            tracing::debug!(activity_id = ticket.activity_id, fire_at = %next, "daily reminder rescheduled");
        }

        let mut armed = self.armed_map();
        if armed
            .get(&ticket.activity_id)
            .map(|entry| entry.generation == ticket.generation)
            .unwrap_or(false)
        {
            armed.remove(&ticket.activity_id);
        }
    }

    async fn sleep_until(&self, fire_at: NaiveDateTime) {
        loop {
            let remaining = fire_at - self.clock.now();
            let Ok(remaining) = remaining.to_std() else {
                return;
            };
            if remaining.is_zero() {
                return;
            }
            tokio::time::sleep(remaining.min(MAX_TIMER_SLICE)).await;
        }
    }

    /// Returns whether the ticket is still live, i.e. a daily chain may go on.
    fn fire(&self, ticket: &ReminderTicket) -> bool {
        let hooks = self.current_hooks();

        if let Some(hooks) = hooks.as_ref() {
            if let ReminderCheck::Stale(reason) = hooks.validate(ticket) {
                tracing::info!(
                    activity_id = ticket.activity_id,
                    generation = ticket.generation,
                    reason = %reason,
                    "suppressed stale reminder"
                );
                hooks.fired(ticket, DeliveryStatus::Suppressed);
                return false;
            }
        }

        let status = match self.notifier.permission() {
            NotificationPermission::Granted => {
                self.notifier.show(ticket.activity_id, &ticket.message);
                tracing::info!(activity_id = ticket.activity_id, kind = ticket.kind.as_str(), "reminder delivered");
                DeliveryStatus::Delivered
            }
            permission => {
                tracing::debug!(
                    activity_id = ticket.activity_id,
                    permission = permission.as_str(),
                    "notification permission not granted"
                );
                DeliveryStatus::PermissionDenied
            }
        };

        if let Some(hooks) = hooks.as_ref() {
            hooks.fired(ticket, status);
        }
        true
    }

    fn current_hooks(&self) -> Option<Arc<dyn ReminderHooks>> {
        self.hooks
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn armed_map(&self) -> MutexGuard<'_, HashMap<ActivityId, ArmedReminder>> {
        self.armed.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::{
        plan_reminder, reminder_message, ReminderCheck, ReminderHooks, ReminderScheduler, ReminderTicket,
    };
    use crate::clock::{AnchoredClock, Clock};
    use crate::models::{
        Activity, ActivityId, Category, DeliveryStatus, NotificationMessage, NotificationPermission, Priority,
        ReminderKind, ReminderSetting,
    };
    use crate::notifier::Notifier;
    use chrono::{NaiveDate, NaiveDateTime, Timelike};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    fn at(day: u32, hour: u32, minute: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, day)
            .and_then(|date| date.and_hms_opt(hour, minute, 0))
            .expect("valid instant")
    }

    fn activity(reminder_time: ReminderSetting, time: &str) -> Activity {
        Activity {
            id: 1,
            name: "Standup".to_string(),
            date: "2024-03-01".to_string(),
            time: time.to_string(),
            category: Category::Trabajo,
            priority: Priority::Medium,
            completed: false,
            reminder_time,
        }
    }

    struct RecordingNotifier {
        clock: Arc<dyn Clock>,
        permission: NotificationPermission,
        shown: Mutex<Vec<(ActivityId, NotificationMessage, NaiveDateTime)>>,
    }

    impl RecordingNotifier {
        fn new(clock: Arc<dyn Clock>, permission: NotificationPermission) -> Arc<Self> {
            Arc::new(Self {
                clock,
                permission,
                shown: Mutex::new(Vec::new()),
            })
        }

        fn shown_at(&self) -> Vec<NaiveDateTime> {
            self.shown.lock().expect("shown").iter().map(|(_, _, at)| *at).collect()
        }
    }

    impl Notifier for RecordingNotifier {
        fn permission(&self) -> NotificationPermission {
            self.permission
        }

        fn show(&self, activity_id: ActivityId, message: &NotificationMessage) {
            let now = self.clock.now().with_nanosecond(0).unwrap_or_else(|| self.clock.now());
            self.shown.lock().expect("shown").push((activity_id, message.clone(), now));
        }
    }

    #[derive(Default)]
    struct RecordingHooks {
        stale: bool,
        fired: Mutex<Vec<DeliveryStatus>>,
        rescheduled: Mutex<Vec<NaiveDateTime>>,
    }

    impl ReminderHooks for RecordingHooks {
        fn validate(&self, _ticket: &ReminderTicket) -> ReminderCheck {
            if self.stale {
                ReminderCheck::Stale("activity changed".to_string())
            } else {
                ReminderCheck::Current
            }
        }

        fn rescheduled(&self, ticket: &ReminderTicket) {
            self.rescheduled.lock().expect("rescheduled").push(ticket.fire_at);
        }

        fn fired(&self, _ticket: &ReminderTicket, status: DeliveryStatus) {
            self.fired.lock().expect("fired").push(status);
        }
    }

    fn ticket_for(activity: &Activity, now: NaiveDateTime) -> ReminderTicket {
        let plan = plan_reminder(activity, now).expect("plan");
        ReminderTicket {
            activity_id: plan.activity_id,
            generation: 1,
            kind: plan.kind,
            fire_at: plan.fire_at,
            message: reminder_message(activity, plan.kind, None),
        }
    }

    #[test]
    fn one_shot_plan_fires_minutes_before_start() {
        let standup = activity(ReminderSetting::MinutesBefore(30), "9:00 AM");
        let plan = plan_reminder(&standup, at(1, 8, 0)).expect("plan");
        assert_eq!(plan.fire_at, at(1, 8, 30));
        assert_eq!(plan.kind, ReminderKind::OneShot { minutes_before: 30 });

        assert!(plan_reminder(&standup, at(1, 8, 40)).is_none());
        assert!(plan_reminder(&standup, at(1, 8, 30)).is_none());
    }

    #[test]
    fn daily_plan_ignores_the_activity_date() {
        let gym = activity(ReminderSetting::Daily, "7:00 AM");
        assert_eq!(plan_reminder(&gym, at(1, 7, 5)).expect("plan").fire_at, at(2, 7, 0));
        assert_eq!(plan_reminder(&gym, at(1, 6, 59)).expect("plan").fire_at, at(1, 7, 0));
        assert_eq!(plan_reminder(&gym, at(9, 7, 0)).expect("plan").fire_at, at(9, 7, 0));
    }

    #[test]
    fn no_reminder_without_setting_or_readable_time() {
        assert!(plan_reminder(&activity(ReminderSetting::None, "9:00 AM"), at(1, 8, 0)).is_none());
        assert!(plan_reminder(&activity(ReminderSetting::Daily, "later"), at(1, 8, 0)).is_none());
    }

    #[test]
    fn messages_name_the_activity() {
        let standup = activity(ReminderSetting::MinutesBefore(30), "9:00 AM");
        let one_shot = reminder_message(&standup, ReminderKind::OneShot { minutes_before: 30 }, None);
        assert_eq!(one_shot.title, "Recordatorio de Actividad");
        assert_eq!(one_shot.body, "En 30 minutos: Standup");

        let daily = reminder_message(&standup, ReminderKind::Daily, Some("icon.png".to_string()));
        assert_eq!(daily.body, "Es hora de: Standup");
        assert_eq!(daily.icon.as_deref(), Some("icon.png"));
    }

    #[tokio::test(start_paused = true)]
    async fn one_shot_reminder_fires_once_at_its_instant() {
        let clock: Arc<dyn Clock> = Arc::new(AnchoredClock::new(at(1, 8, 0)));
        let notifier = RecordingNotifier::new(clock.clone(), NotificationPermission::Granted);
        let scheduler = ReminderScheduler::new(notifier.clone(), clock.clone());

        let standup = activity(ReminderSetting::MinutesBefore(30), "9:00 AM");
        scheduler.arm(ticket_for(&standup, clock.now()));
        assert!(scheduler.is_armed(1));

        tokio::time::sleep(Duration::from_secs(3 * 3600)).await;
        assert_eq!(notifier.shown_at(), vec![at(1, 8, 30)]);
        assert!(!scheduler.is_armed(1));
    }

    #[tokio::test(start_paused = true)]
    async fn daily_reminder_reschedules_itself() {
        let clock: Arc<dyn Clock> = Arc::new(AnchoredClock::new(at(1, 7, 5)));
        let notifier = RecordingNotifier::new(clock.clone(), NotificationPermission::Granted);
        let hooks = Arc::new(RecordingHooks::default());
        let scheduler = ReminderScheduler::new(notifier.clone(), clock.clone());
        scheduler.set_hooks(hooks.clone());

        let gym = activity(ReminderSetting::Daily, "7:00 AM");
        scheduler.arm(ticket_for(&gym, clock.now()));

        tokio::time::sleep(Duration::from_secs(48 * 3600)).await;
        assert_eq!(notifier.shown_at(), vec![at(2, 7, 0), at(3, 7, 0)]);
        assert_eq!(
            hooks.rescheduled.lock().expect("rescheduled").clone(),
            vec![at(3, 7, 0), at(4, 7, 0)]
        );
        assert_eq!(scheduler.armed()[0].fire_at, at(4, 7, 0));
    }

    #[tokio::test(start_paused = true)]
    async fn denied_permission_skips_display_but_keeps_daily_chain() {
        let clock: Arc<dyn Clock> = Arc::new(AnchoredClock::new(at(1, 6, 0)));
        let notifier = RecordingNotifier::new(clock.clone(), NotificationPermission::Denied);
        let hooks = Arc::new(RecordingHooks::default());
        let scheduler = ReminderScheduler::new(notifier.clone(), clock.clone());
        scheduler.set_hooks(hooks.clone());

        scheduler.arm(ticket_for(&activity(ReminderSetting::Daily, "7:00 AM"), clock.now()));
        tokio::time::sleep(Duration::from_secs(26 * 3600)).await;

        assert!(notifier.shown_at().is_empty());
        assert_eq!(
            hooks.fired.lock().expect("fired").clone(),
            vec![DeliveryStatus::PermissionDenied, DeliveryStatus::PermissionDenied]
        );
        assert!(scheduler.is_armed(1));
    }

    #[tokio::test(start_paused = true)]
    async fn stale_tickets_are_suppressed_and_end_the_chain() {
        let clock: Arc<dyn Clock> = Arc::new(AnchoredClock::new(at(1, 6, 0)));
        let notifier = RecordingNotifier::new(clock.clone(), NotificationPermission::Granted);
        let hooks = Arc::new(RecordingHooks {
            stale: true,
            ..RecordingHooks::default()
        });
        let scheduler = ReminderScheduler::new(notifier.clone(), clock.clone());
        scheduler.set_hooks(hooks.clone());

        scheduler.arm(ticket_for(&activity(ReminderSetting::Daily, "7:00 AM"), clock.now()));
        tokio::time::sleep(Duration::from_secs(3 * 24 * 3600)).await;

        assert!(notifier.shown_at().is_empty());
        assert_eq!(hooks.fired.lock().expect("fired").clone(), vec![DeliveryStatus::Suppressed]);
        assert!(!scheduler.is_armed(1));
    }

    #[tokio::test(start_paused = true)]
    async fn disarm_and_rearm_cancel_the_pending_timer() {
        let clock: Arc<dyn Clock> = Arc::new(AnchoredClock::new(at(1, 8, 0)));
        let notifier = RecordingNotifier::new(clock.clone(), NotificationPermission::Granted);
        let scheduler = ReminderScheduler::new(notifier.clone(), clock.clone());

        let standup = activity(ReminderSetting::MinutesBefore(30), "9:00 AM");
        scheduler.arm(ticket_for(&standup, clock.now()));
        let mut rearmed = ticket_for(&standup, clock.now());
        rearmed.generation = 2;
        rearmed.fire_at = at(1, 8, 45);
        scheduler.arm(rearmed);

        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert_eq!(notifier.shown_at(), vec![at(1, 8, 45)]);

        scheduler.arm(ticket_for(&activity(ReminderSetting::Daily, "7:00 AM"), clock.now()));
        assert!(scheduler.disarm(1));
        tokio::time::sleep(Duration::from_secs(2 * 24 * 3600)).await;
        assert_eq!(notifier.shown_at().len(), 1);
    }
}
