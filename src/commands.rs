use crate::calendar;
use crate::models::{ActivityId, ActivityPayload, NotificationPermission, PlannerEvent};
use crate::planner::PlannerCore;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One line of input to the daemon.
#[derive(Debug, Clone, Deserialize)]
pub struct CommandRequest {
    /// Echoed back so callers can match responses to requests.
    #[serde(default)]
    pub id: Option<Value>,
    pub command: String,
    #[serde(default)]
    pub payload: Value,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CommandResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CommandResponse {
    fn from_result(id: Option<Value>, result: Result<Value, String>) -> Self {
        match result {
            Ok(data) => Self {
                id,
                ok: true,
                data: Some(data),
                error: None,
            },
            Err(error) => Self {
                id,
                ok: false,
                data: None,
                error: Some(error),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EventEnvelope<'a> {
    pub event: &'a PlannerEvent,
}

#[derive(Debug, Deserialize)]
struct IdPayload {
    id: ActivityId,
}

#[derive(Debug, Deserialize)]
struct UpdateActivityPayload {
    id: ActivityId,
    #[serde(flatten)]
    fields: ActivityPayload,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct MonthPayload {
    year: Option<i32>,
    month: Option<u32>,
    /// Months to move from `year`/`month` (or from the current month).
    offset: i32,
}

#[derive(Debug, Deserialize)]
struct DayPayload {
    date: String,
}

#[derive(Debug, Deserialize)]
struct PermissionPayload {
    permission: NotificationPermission,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct LimitPayload {
    limit: Option<u32>,
}

pub fn dispatch(planner: &PlannerCore, request: CommandRequest) -> CommandResponse {
    tracing::debug!(command = %request.command, "dispatching command");
    let result = handle(planner, &request.command, request.payload);
    if let Err(error) = &result {
        tracing::warn!(command = %request.command, error = %error, "command failed");
    }
    CommandResponse::from_result(request.id, result)
}

/// Parses one input line and runs it. Malformed lines get an error response.
pub fn dispatch_line(planner: &PlannerCore, line: &str) -> CommandResponse {
    match serde_json::from_str::<CommandRequest>(line) {
        Ok(request) => dispatch(planner, request),
        Err(error) => CommandResponse::from_result(None, Err(format!("VALIDATION: malformed request: {error}"))),
    }
}

fn handle(planner: &PlannerCore, command: &str, payload: Value) -> Result<Value, String> {
    match command {
        "activities_list" => to_data(planner.ordered_activities()),
        "activity_get" => {
            let IdPayload { id } = parse_payload(payload)?;
            to_data(planner.get_activity(id))
        }
        "activity_create" => {
            let payload: ActivityPayload = parse_payload(payload)?;
            to_data(planner.create_activity(payload).map_err(to_client_error)?)
        }
        "activity_update" => {
            let UpdateActivityPayload { id, fields } = parse_payload(payload)?;
            to_data(planner.update_activity(id, fields).map_err(to_client_error)?)
        }
        "activity_delete" => {
            let IdPayload { id } = parse_payload(payload)?;
            to_data(planner.delete_activity(id).map_err(to_client_error)?)
        }
        "activity_toggle_completed" => {
            let IdPayload { id } = parse_payload(payload)?;
            to_data(planner.toggle_completed(id).map_err(to_client_error)?)
        }
        "activities_sweep" => to_data(planner.sweep_expired().map_err(to_client_error)?),
        "calendar_month" => {
            let request: MonthPayload = parse_optional_payload(payload)?;
            let (year, month) = month_for(planner, &request)?;
            to_data(planner.month_view(year, month).map_err(to_client_error)?)
        }
        "calendar_day" => {
            let DayPayload { date } = parse_payload(payload)?;
            to_data(planner.activities_on(&date).map_err(to_client_error)?)
        }
        "settings_get" => to_data(planner.get_settings().map_err(to_client_error)?),
        "settings_update" => to_data(planner.update_settings(payload).map_err(to_client_error)?),
        "notification_permission_get" => to_data(planner.notification_permission()),
        "notification_permission_request" => to_data(planner.request_notification_permission()),
        "notification_permission_set" => {
            let PermissionPayload { permission } = parse_payload(payload)?;
            to_data(planner.set_notification_permission(permission))
        }
        "notification_deliveries_list" => {
            let LimitPayload { limit } = parse_optional_payload(payload)?;
            to_data(planner.list_notification_deliveries(limit).map_err(to_client_error)?)
        }
        other => Err(format!("NOT_FOUND: unknown command '{other}'")),
    }
}

fn month_for(planner: &PlannerCore, request: &MonthPayload) -> Result<(i32, u32), String> {
    let today = planner.today();
    let year = request.year.unwrap_or_else(|| chrono::Datelike::year(&today));
    let month = request.month.unwrap_or_else(|| chrono::Datelike::month(&today));
    calendar::shift_month(year, month, request.offset).map_err(to_client_error)
}

fn parse_payload<T: serde::de::DeserializeOwned>(payload: Value) -> Result<T, String> {
    serde_json::from_value(payload).map_err(|error| format!("VALIDATION: invalid payload: {error}"))
}

fn parse_optional_payload<T: serde::de::DeserializeOwned + Default>(payload: Value) -> Result<T, String> {
    if payload.is_null() {
        return Ok(T::default());
    }
    parse_payload(payload)
}

fn to_data(value: impl Serialize) -> Result<Value, String> {
    serde_json::to_value(value).map_err(to_client_error)
}

fn to_client_error(error: impl std::fmt::Display) -> String {
    error.to_string()
}
