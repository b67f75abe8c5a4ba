use crate::models::{ActivityId, NotificationMessage, NotificationPermission, PlannerEvent};
use std::sync::RwLock;
use tokio::sync::broadcast;

/// Local notification facility.
pub trait Notifier: Send + Sync {
    fn permission(&self) -> NotificationPermission;

    /// Asks for permission when it has not been decided yet.
    fn request_permission(&self) -> NotificationPermission {
        self.permission()
    }

    /// Records a decision made outside the process. Facilities whose
    /// permission comes from the platform ignore it.
    fn set_permission(&self, _permission: NotificationPermission) {}

    fn show(&self, activity_id: ActivityId, message: &NotificationMessage);
}

/// Publishes notifications as [`PlannerEvent::Notification`] on the planner's
/// event channel, for whichever front end is listening.
pub struct EventNotifier {
    events: broadcast::Sender<PlannerEvent>,
    permission: RwLock<NotificationPermission>,
}

impl EventNotifier {
    pub fn new(events: broadcast::Sender<PlannerEvent>, permission: NotificationPermission) -> Self {
        Self {
            events,
            permission: RwLock::new(permission),
        }
    }
}

impl Notifier for EventNotifier {
    fn permission(&self) -> NotificationPermission {
        *self.permission.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_permission(&self, permission: NotificationPermission) {
        let mut writer = self.permission.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        *writer = permission;
    }

    fn request_permission(&self) -> NotificationPermission {
        let mut writer = self.permission.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        if *writer == NotificationPermission::Default {
            *writer = NotificationPermission::Granted;
            tracing::info!("notification permission granted");
        }
        *writer
    }

    fn show(&self, activity_id: ActivityId, message: &NotificationMessage) {
        let event = PlannerEvent::Notification {
            activity_id,
            message: message.clone(),
        };
        if self.events.send(event).is_err() {
            tracing::debug!(activity_id, "notification published with no listeners");
        }
    }
}
