use crate::timefmt;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

pub type ActivityId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "Option<String>", into = "String")]
pub enum Category {
    Trabajo,
    Personal,
    Estudio,
    Ejercicio,
    Salud,
    Compras,
    #[default]
    Otro,
}

impl Category {
    pub const ALL: [Category; 7] = [
        Self::Trabajo,
        Self::Personal,
        Self::Estudio,
        Self::Ejercicio,
        Self::Salud,
        Self::Compras,
        Self::Otro,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Trabajo => "trabajo",
            Self::Personal => "personal",
            Self::Estudio => "estudio",
            Self::Ejercicio => "ejercicio",
            Self::Salud => "salud",
            Self::Compras => "compras",
            Self::Otro => "otro",
        }
    }

    /// Unrecognized names fall back to `otro`.
    pub fn parse(value: &str) -> Self {
        let value = value.trim();
        Self::ALL
            .into_iter()
            .find(|category| category.as_str().eq_ignore_ascii_case(value))
            .unwrap_or_default()
    }

    pub fn icon(self) -> &'static str {
        match self {
            Self::Trabajo => "💼",
            Self::Personal => "😊",
            Self::Estudio => "📚",
            Self::Ejercicio => "🏃",
            Self::Salud => "🏥",
            Self::Compras => "🛒",
            Self::Otro => "📌",
        }
    }

    pub fn color(self) -> &'static str {
        match self {
            Self::Trabajo => "#FF6B6B",
            Self::Personal => "#4ECDC4",
            Self::Estudio => "#45B7D1",
            Self::Ejercicio => "#96CEB4",
            Self::Salud => "#FFEEAD",
            Self::Compras => "#D4A5A5",
            Self::Otro => "#9EA1D4",
        }
    }
}

impl From<Option<String>> for Category {
    fn from(value: Option<String>) -> Self {
        value.as_deref().map(Self::parse).unwrap_or_default()
    }
}

impl From<Category> for String {
    fn from(value: Category) -> Self {
        value.as_str().to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "Option<String>", into = "String")]
pub enum Priority {
    High,
    #[default]
    Medium,
    Low,
    /// Stored value that is none of the known priorities.
    Unset,
}

impl Priority {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
            Self::Unset => "",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "high" => Self::High,
            "medium" => Self::Medium,
            "low" => Self::Low,
            _ => Self::Unset,
        }
    }

    pub fn rank(self) -> u8 {
        match self {
            Self::High => 3,
            Self::Medium => 2,
            Self::Low => 1,
            Self::Unset => 0,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::High => "Alta",
            Self::Medium => "Media",
            Self::Low => "Baja",
            Self::Unset => "",
        }
    }
}

impl From<Option<String>> for Priority {
    fn from(value: Option<String>) -> Self {
        match value {
            Some(value) => Self::parse(&value),
            None => Self::default(),
        }
    }
}

impl From<Priority> for String {
    fn from(value: Priority) -> Self {
        value.as_str().to_string()
    }
}

/// When to remind about an activity.
///
/// Stored as `"daily"`, a minute count (number or numeric string), or empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReminderSetting {
    #[default]
    None,
    Daily,
    MinutesBefore(u32),
}

impl ReminderSetting {
    pub fn parse(value: &str) -> Self {
        let value = value.trim();
        if value.is_empty() {
            return Self::None;
        }
        if value.eq_ignore_ascii_case("daily") {
            return Self::Daily;
        }
        value.parse::<u32>().map(Self::MinutesBefore).unwrap_or(Self::None)
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    pub fn label(&self) -> String {
        match self {
            Self::None => String::new(),
            Self::Daily => "Diariamente".to_string(),
            Self::MinutesBefore(1440) => "1 día antes".to_string(),
            Self::MinutesBefore(60) => "1 hora antes".to_string(),
            Self::MinutesBefore(minutes) => format!("{minutes} minutos antes"),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawReminderSetting {
    Integer(i64),
    Float(f64),
    Text(String),
}

impl Serialize for ReminderSetting {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::None => serializer.serialize_str(""),
            Self::Daily => serializer.serialize_str("daily"),
            Self::MinutesBefore(minutes) => serializer.serialize_u32(*minutes),
        }
    }
}

impl<'de> Deserialize<'de> for ReminderSetting {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Option::<RawReminderSetting>::deserialize(deserializer)?;
        Ok(match raw {
            None => Self::None,
            Some(RawReminderSetting::Integer(minutes)) => u32::try_from(minutes)
                .map(Self::MinutesBefore)
                .unwrap_or(Self::None),
            Some(RawReminderSetting::Float(minutes)) if minutes.is_finite() && minutes >= 0.0 => {
                Self::MinutesBefore(minutes.trunc().min(f64::from(u32::MAX)) as u32)
            }
            Some(RawReminderSetting::Float(_)) => Self::None,
            Some(RawReminderSetting::Text(text)) => Self::parse(&text),
        })
    }
}

/// The persisted activity record. Field names and the 12-hour `time` string
/// are the on-disk format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    pub id: ActivityId,
    pub name: String,
    pub date: String,
    pub time: String,
    #[serde(default)]
    pub category: Category,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub reminder_time: ReminderSetting,
}

impl Activity {
    pub fn instant(&self) -> Option<NaiveDateTime> {
        timefmt::activity_instant(&self.date, &self.time)
    }

    pub fn date_value(&self) -> Option<NaiveDate> {
        timefmt::parse_date(&self.date)
    }

    /// Time of day as the 24-hour `HH:MM` value an edit form expects.
    pub fn time_24h(&self) -> Option<String> {
        timefmt::to_24_hour(&self.time)
    }

    /// Captures the fields a reminder notification depends on.
    pub fn reminder_fingerprint(&self) -> String {
        serde_json::json!([self.name, self.date, self.time, self.reminder_time]).to_string()
    }
}

/// Form fields for creating or replacing an activity. `time` is 24-hour.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityPayload {
    pub name: String,
    pub date: String,
    pub time: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub priority: Option<String>,
    #[serde(default)]
    pub reminder_time: ReminderSetting,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityMutationResponse {
    pub activity: Activity,
    pub persisted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateActivityResponse {
    pub activity: Activity,
    pub persisted: bool,
    pub reminder: Option<ReminderPlan>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteActivityResponse {
    pub success: bool,
    pub persisted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    pub removed: Vec<ActivityId>,
    pub remaining: usize,
    pub persisted: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ReminderKind {
    #[serde(rename_all = "camelCase")]
    OneShot { minutes_before: u32 },
    Daily,
}

impl ReminderKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OneShot { .. } => "one-shot",
            Self::Daily => "daily",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReminderPlan {
    pub activity_id: ActivityId,
    pub kind: ReminderKind,
    pub fire_at: NaiveDateTime,
}

/// Persisted state of the reminder armed for one activity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReminderRecord {
    pub activity_id: ActivityId,
    pub kind: ReminderKind,
    pub next_fire_at: NaiveDateTime,
    pub generation: i64,
    pub fingerprint: String,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NotificationPermission {
    Granted,
    Denied,
    Default,
}

impl NotificationPermission {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Granted => "granted",
            Self::Denied => "denied",
            Self::Default => "default",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationMessage {
    pub title: String,
    pub body: String,
    pub icon: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeliveryStatus {
    Delivered,
    Suppressed,
    PermissionDenied,
}

impl DeliveryStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Delivered => "delivered",
            Self::Suppressed => "suppressed",
            Self::PermissionDenied => "permission-denied",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "delivered" => Self::Delivered,
            "permission-denied" => Self::PermissionDenied,
            _ => Self::Suppressed,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationDeliveryRecord {
    pub id: String,
    pub activity_id: ActivityId,
    pub kind: String,
    pub title: String,
    pub body: String,
    pub status: DeliveryStatus,
    pub fire_at: NaiveDateTime,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChangeCause {
    Created,
    Updated,
    Deleted,
    Toggled,
    Swept,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum PlannerEvent {
    #[serde(rename_all = "camelCase")]
    ActivitiesChanged {
        cause: ChangeCause,
        activity_ids: Vec<ActivityId>,
    },
    #[serde(rename_all = "camelCase")]
    Notification {
        activity_id: ActivityId,
        message: NotificationMessage,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarDay {
    pub day: u32,
    pub date: NaiveDate,
    pub activity_count: usize,
    pub is_today: bool,
}

impl CalendarDay {
    pub fn has_activity(&self) -> bool {
        self.activity_count > 0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthView {
    pub year: i32,
    pub month: u32,
    pub title: String,
    /// Blank cells before day 1 in a Sunday-first week.
    pub leading_blanks: u32,
    pub days: Vec<CalendarDay>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct AppSettings {
    pub collection_key: String,
    pub sweep_interval_secs: u64,
    pub cache_ttl_secs: u64,
    pub prune_after_days: u32,
    pub storage_quota_bytes: u64,
    pub notification_icon: Option<String>,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            collection_key: "activities".to_string(),
            sweep_interval_secs: 60,
            cache_ttl_secs: 60,
            prune_after_days: 30,
            storage_quota_bytes: 5 * 1024 * 1024,
            notification_icon: Some("icons/icon-192.png".to_string()),
        }
    }
}
