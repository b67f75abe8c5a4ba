use crate::errors::{AppError, AppResult};
use crate::models::{
    ActivityId, AppSettings, DeliveryStatus, NotificationDeliveryRecord, NotificationMessage, ReminderKind,
    ReminderRecord,
};
use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

const SCHEMA_SQL: &str = include_str!("schema.sql");
const LOCAL_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

#[derive(Debug)]
pub struct Database {
    conn: Mutex<Connection>,
    db_path: PathBuf,
}

impl Database {
    pub fn new(path: &Path) -> AppResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| AppError::Io(err.to_string()))?;
        }
        let conn = Connection::open(path).map_err(AppError::from)?;
        conn.execute_batch(SCHEMA_SQL).map_err(AppError::from)?;

        let db = Self {
            conn: Mutex::new(conn),
            db_path: path.to_path_buf(),
        };

        db.ensure_default_settings()?;

        Ok(db)
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    fn conn(&self) -> AppResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| AppError::Internal("database mutex poisoned".to_string()))
    }

    // ─── Key-Value Store ─────────────────────────────────────────────────────

    pub fn get_value(&self, key: &str) -> AppResult<Option<String>> {
        let conn = self.conn()?;
        let raw = conn
            .query_row("SELECT value_json FROM kv_store WHERE key = ?1", [key], |row| {
                row.get::<_, String>(0)
            })
            .optional()?;
        Ok(raw)
    }

    /// Writes `value` under `key`, refusing writes that would push the store
    /// past `quota_bytes`.
    pub fn put_value(&self, key: &str, value: &str, quota_bytes: u64) -> AppResult<()> {
        let conn = self.conn()?;
        let others: i64 = conn.query_row(
            "SELECT COALESCE(SUM(LENGTH(key) + LENGTH(value_json)), 0) FROM kv_store WHERE key <> ?1",
            [key],
            |row| row.get(0),
        )?;
        let projected = u64::try_from(others).unwrap_or(0) + (key.len() + value.len()) as u64;
        if projected > quota_bytes {
            return Err(AppError::QuotaExceeded(format!(
                "writing '{}' needs {} bytes, quota is {}",
                key, projected, quota_bytes
            )));
        }

        conn.execute(
            "INSERT INTO kv_store (key, value_json, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json, updated_at = excluded.updated_at",
            params![key, value, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn remove_value(&self, key: &str) -> AppResult<bool> {
        let conn = self.conn()?;
        let changed = conn.execute("DELETE FROM kv_store WHERE key = ?1", [key])?;
        Ok(changed > 0)
    }

    // ─── Settings ────────────────────────────────────────────────────────────

    pub fn get_settings(&self) -> AppResult<AppSettings> {
        let conn = self.conn()?;
        let raw = conn
            .query_row(
                "SELECT value_json FROM settings WHERE key = 'app'",
                [],
                |row| row.get::<_, String>(0),
            )
            .optional()?;

        match raw {
            Some(raw) => Ok(serde_json::from_str::<AppSettings>(&raw).unwrap_or_default()),
            None => Ok(AppSettings::default()),
        }
    }

    pub fn update_settings(&self, update: serde_json::Value) -> AppResult<AppSettings> {
        let current = self.get_settings()?;
        let mut merged = serde_json::to_value(current)?;
        merge_json(&mut merged, update);
        let settings: AppSettings = serde_json::from_value(merged)?;
        validate_settings(&settings)?;

        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO settings (key, value_json, updated_at)
             VALUES ('app', ?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json, updated_at = excluded.updated_at",
            params![serde_json::to_string(&settings)?, Utc::now().to_rfc3339()],
        )?;

        Ok(settings)
    }

    fn ensure_default_settings(&self) -> AppResult<()> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(1) FROM settings WHERE key = 'app'", [], |row| row.get(0))?;
        if count == 0 {
            conn.execute(
                "INSERT INTO settings (key, value_json, updated_at) VALUES ('app', ?1, ?2)",
                params![
                    serde_json::to_string(&AppSettings::default())?,
                    Utc::now().to_rfc3339()
                ],
            )?;
        }
        Ok(())
    }

    // ─── Reminders ───────────────────────────────────────────────────────────

    /// Records a freshly armed reminder and bumps its generation.
    pub fn upsert_reminder(
        &self,
        activity_id: ActivityId,
        kind: ReminderKind,
        next_fire_at: NaiveDateTime,
        fingerprint: &str,
    ) -> AppResult<ReminderRecord> {
        let now = Utc::now();
        let kind_json = serde_json::to_string(&kind)?;

        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO reminders (activity_id, kind_json, next_fire_at, generation, fingerprint, updated_at)
             VALUES (?1, ?2, ?3, 1, ?4, ?5)
             ON CONFLICT(activity_id) DO UPDATE SET
               kind_json = excluded.kind_json,
               next_fire_at = excluded.next_fire_at,
               generation = reminders.generation + 1,
               fingerprint = excluded.fingerprint,
               updated_at = excluded.updated_at",
            params![
                activity_id,
                kind_json,
                format_local_time(next_fire_at),
                fingerprint,
                now.to_rfc3339()
            ],
        )?;
        let generation: i64 = conn.query_row(
            "SELECT generation FROM reminders WHERE activity_id = ?1",
            [activity_id],
            |row| row.get(0),
        )?;

        Ok(ReminderRecord {
            activity_id,
            kind,
            next_fire_at,
            generation,
            fingerprint: fingerprint.to_string(),
            updated_at: now,
        })
    }

    /// Moves a daily reminder forward. Ignored when the row has since been
    /// re-armed under another generation.
    pub fn advance_reminder(
        &self,
        activity_id: ActivityId,
        generation: i64,
        next_fire_at: NaiveDateTime,
    ) -> AppResult<bool> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE reminders SET next_fire_at = ?1, updated_at = ?2
             WHERE activity_id = ?3 AND generation = ?4",
            params![
                format_local_time(next_fire_at),
                Utc::now().to_rfc3339(),
                activity_id,
                generation
            ],
        )?;
        Ok(changed > 0)
    }

    pub fn get_reminder(&self, activity_id: ActivityId) -> AppResult<Option<ReminderRecord>> {
        let conn = self.conn()?;
        let record = conn
            .query_row(
                "SELECT activity_id, kind_json, next_fire_at, generation, fingerprint, updated_at
                 FROM reminders WHERE activity_id = ?1",
                [activity_id],
                parse_reminder_row,
            )
            .optional()?;
        Ok(record)
    }

    pub fn list_reminders(&self) -> AppResult<Vec<ReminderRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT activity_id, kind_json, next_fire_at, generation, fingerprint, updated_at
             FROM reminders ORDER BY next_fire_at ASC",
        )?;
        let rows = stmt.query_map([], parse_reminder_row)?;
        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }

    pub fn delete_reminder(&self, activity_id: ActivityId) -> AppResult<bool> {
        let conn = self.conn()?;
        let changed = conn.execute("DELETE FROM reminders WHERE activity_id = ?1", [activity_id])?;
        Ok(changed > 0)
    }

    // ─── Notification Deliveries ─────────────────────────────────────────────

    pub fn insert_delivery(
        &self,
        activity_id: ActivityId,
        kind: ReminderKind,
        message: &NotificationMessage,
        status: DeliveryStatus,
        fire_at: NaiveDateTime,
    ) -> AppResult<NotificationDeliveryRecord> {
        let id = Uuid::new_v4().to_string();
        let recorded_at = Utc::now();

        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO notification_deliveries (id, activity_id, kind, title, body, status, fire_at, recorded_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                id,
                activity_id,
                kind.as_str(),
                message.title,
                message.body,
                status.as_str(),
                format_local_time(fire_at),
                recorded_at.to_rfc3339()
            ],
        )?;

        Ok(NotificationDeliveryRecord {
            id,
            activity_id,
            kind: kind.as_str().to_string(),
            title: message.title.clone(),
            body: message.body.clone(),
            status,
            fire_at,
            recorded_at,
        })
    }

    /// Drops log rows whose fire instant is before `cutoff`.
    pub fn prune_deliveries(&self, cutoff: NaiveDateTime) -> AppResult<usize> {
        let conn = self.conn()?;
        let removed = conn.execute(
            "DELETE FROM notification_deliveries WHERE fire_at < ?1",
            [format_local_time(cutoff)],
        )?;
        Ok(removed)
    }

    pub fn list_deliveries(&self, limit: u32) -> AppResult<Vec<NotificationDeliveryRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, activity_id, kind, title, body, status, fire_at, recorded_at
             FROM notification_deliveries
             ORDER BY recorded_at DESC, rowid DESC
             LIMIT ?1",
        )?;
        let rows = stmt.query_map([limit], |row| {
            Ok(NotificationDeliveryRecord {
                id: row.get(0)?,
                activity_id: row.get(1)?,
                kind: row.get(2)?,
                title: row.get(3)?,
                body: row.get(4)?,
                status: DeliveryStatus::parse(&row.get::<_, String>(5)?),
                fire_at: parse_local_time(&row.get::<_, String>(6)?)?,
                recorded_at: parse_time(&row.get::<_, String>(7)?)?,
            })
        })?;
        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }
}

fn parse_reminder_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ReminderRecord> {
    let kind_raw: String = row.get(1)?;
    Ok(ReminderRecord {
        activity_id: row.get(0)?,
        kind: serde_json::from_str::<ReminderKind>(&kind_raw).map_err(|error| conversion_error(error.to_string()))?,
        next_fire_at: parse_local_time(&row.get::<_, String>(2)?)?,
        generation: row.get(3)?,
        fingerprint: row.get(4)?,
        updated_at: parse_time(&row.get::<_, String>(5)?)?,
    })
}

fn validate_settings(settings: &AppSettings) -> AppResult<()> {
    if settings.collection_key.trim().is_empty() {
        return Err(AppError::Validation("collectionKey must not be empty".to_string()));
    }
    if settings.sweep_interval_secs == 0 {
        return Err(AppError::Validation("sweepIntervalSecs must be positive".to_string()));
    }
    Ok(())
}

fn format_local_time(value: NaiveDateTime) -> String {
    value.format(LOCAL_TIME_FORMAT).to_string()
}

fn parse_local_time(raw: &str) -> rusqlite::Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(raw, LOCAL_TIME_FORMAT).map_err(|error| conversion_error(error.to_string()))
}

fn parse_time(raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|error| conversion_error(error.to_string()))
}

fn conversion_error(message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        0,
        rusqlite::types::Type::Text,
        Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, message)),
    )
}

fn merge_json(target: &mut serde_json::Value, update: serde_json::Value) {
    match (target, update) {
        (serde_json::Value::Object(target_map), serde_json::Value::Object(update_map)) => {
            for (key, value) in update_map {
                merge_json(target_map.entry(key).or_insert(serde_json::Value::Null), value);
            }
        }
        (target, update) => {
            *target = update;
        }
    }
}
