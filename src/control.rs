//! Shared control state.
//!
//! The producer and the control surface exchange a handful of string keys:
//!
//! | key          | value                                        |
//! |--------------|----------------------------------------------|
//! | `mode`       | `0` unset, `1` configuring, `2` streaming    |
//! | `event_type` | `0` EventStat, `1` AlertStranger, `2` MonitorVehicle |
//! | `<Event>`    | latest raw frame for that event, base64 JPEG |
//!
//! Writes are last-write-wins. There is no compare-and-swap and no locking
//! beyond what the backing store does per statement.

use anyhow::{anyhow, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::classify::RegionCounts;
use crate::error::PipelineError;
use crate::frame::{encode_frame, placeholder_frame};
use crate::storage::{now_s, open_shared_db, FrameLog};
use crate::{AppMode, EventType};

pub const MODE_KEY: &str = "mode";
pub const EVENT_TYPE_KEY: &str = "event_type";

/// Mode and event type as last written by the control surface.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ControlState {
    pub mode: AppMode,
    pub event_type: EventType,
}

impl Default for ControlState {
    fn default() -> Self {
        Self {
            mode: AppMode::Configuring,
            event_type: EventType::EventStat,
        }
    }
}

fn parse_code(key: &'static str, raw: &str) -> Result<i64, PipelineError> {
    raw.trim().parse::<i64>().map_err(|_| PipelineError::InvalidValue {
        key: key.to_string(),
        value: raw.to_string(),
    })
}

pub trait ControlPlane {
    fn get(&self, key: &str) -> Result<Option<String>>;

    fn set(&mut self, key: &str, value: &str) -> Result<()>;

    /// Write only if the key has never been set. Returns true if written.
    fn set_if_absent(&mut self, key: &str, value: &str) -> Result<bool>;

    fn read_mode(&self) -> Result<AppMode> {
        let raw = self
            .get(MODE_KEY)?
            .ok_or(PipelineError::ControlKeyMissing(MODE_KEY))?;
        Ok(AppMode::from_code(parse_code(MODE_KEY, &raw)?)?)
    }

    fn read_event_type(&self) -> Result<EventType> {
        let raw = self
            .get(EVENT_TYPE_KEY)?
            .ok_or(PipelineError::ControlKeyMissing(EVENT_TYPE_KEY))?;
        Ok(EventType::from_code(parse_code(EVENT_TYPE_KEY, &raw)?)?)
    }

    /// Poll both keys. Unknown or malformed values surface as recoverable
    /// `PipelineError`s; the caller decides what state to keep.
    fn read_state(&self) -> Result<ControlState> {
        Ok(ControlState {
            mode: self.read_mode()?,
            event_type: self.read_event_type()?,
        })
    }

    fn set_mode(&mut self, mode: AppMode) -> Result<()> {
        self.set(MODE_KEY, &mode.code().to_string())
    }

    fn set_event_type(&mut self, event_type: EventType) -> Result<()> {
        self.set(EVENT_TYPE_KEY, &event_type.code().to_string())
    }

    fn publish_raw_frame(&mut self, event_type: EventType, image_b64: &str) -> Result<()> {
        self.set(event_type.name(), image_b64)
    }

    fn latest_raw_frame(&self, event_type: EventType) -> Result<Option<String>> {
        self.get(event_type.name())
    }
}

// ----------------------------------------------------------------------------
// SQLite
// ----------------------------------------------------------------------------

/// Control plane stored in a SQLite file shared between processes.
pub struct SqliteControlPlane {
    conn: Connection,
}

impl SqliteControlPlane {
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = open_shared_db(db_path)?;
        let mut plane = Self { conn };
        plane.ensure_schema()?;
        Ok(plane)
    }

    fn ensure_schema(&mut self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS control_kv (
              key TEXT PRIMARY KEY,
              value TEXT NOT NULL,
              updated_at INTEGER NOT NULL
            );
            "#,
        )?;
        Ok(())
    }
}

impl ControlPlane for SqliteControlPlane {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn
            .query_row(
                "SELECT value FROM control_kv WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn set(&mut self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO control_kv(key, value, updated_at) VALUES (?1, ?2, ?3)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            "#,
            params![key, value, now_s()?],
        )?;
        Ok(())
    }

    fn set_if_absent(&mut self, key: &str, value: &str) -> Result<bool> {
        let written = self.conn.execute(
            "INSERT OR IGNORE INTO control_kv(key, value, updated_at) VALUES (?1, ?2, ?3)",
            params![key, value, now_s()?],
        )?;
        Ok(written == 1)
    }
}

// ----------------------------------------------------------------------------
// In memory
// ----------------------------------------------------------------------------

/// In-process control plane. Clones share the same keys, so a test can hold
/// one handle as the "control surface" while the orchestrator owns another.
#[derive(Clone, Debug, Default)]
pub struct InMemoryControlPlane {
    values: Arc<Mutex<HashMap<String, String>>>,
}

impl InMemoryControlPlane {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_values<T>(&self, f: impl FnOnce(&mut HashMap<String, String>) -> T) -> Result<T> {
        let mut guard = self
            .values
            .lock()
            .map_err(|_| anyhow!("control plane lock poisoned"))?;
        Ok(f(&mut guard))
    }
}

impl ControlPlane for InMemoryControlPlane {
    fn get(&self, key: &str) -> Result<Option<String>> {
        self.with_values(|values| values.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<()> {
        self.with_values(|values| {
            values.insert(key.to_string(), value.to_string());
        })
    }

    fn set_if_absent(&mut self, key: &str, value: &str) -> Result<bool> {
        self.with_values(|values| {
            if values.contains_key(key) {
                false
            } else {
                values.insert(key.to_string(), value.to_string());
                true
            }
        })
    }
}

// ----------------------------------------------------------------------------
// Bootstrap
// ----------------------------------------------------------------------------

/// Seed first-run defaults. Values already present are left alone.
///
/// Starts in configuring mode on EventStat, publishes a grey placeholder as
/// every event's raw frame and, if the frame log is empty, appends one
/// all-zero record so viewers have something to show.
pub fn bootstrap(
    control: &mut dyn ControlPlane,
    log: &mut dyn FrameLog,
    jpeg_quality: u8,
) -> Result<()> {
    let placeholder = encode_frame(&placeholder_frame(), jpeg_quality)?;

    if control.set_if_absent(MODE_KEY, &AppMode::Configuring.code().to_string())? {
        log::info!("seeded {} = {}", MODE_KEY, AppMode::Configuring);
    }
    if control.set_if_absent(EVENT_TYPE_KEY, &EventType::EventStat.code().to_string())? {
        log::info!("seeded {} = {}", EVENT_TYPE_KEY, EventType::EventStat);
    }
    for event_type in EventType::ALL {
        control.set_if_absent(event_type.name(), &placeholder)?;
    }

    if log.is_empty()? {
        let sequence = log.append(&RegionCounts::zeroed().to_json()?, &placeholder)?;
        log::info!("seeded frame log with placeholder record {}", sequence);
    }
    Ok(())
}
