//! Persistent key/value device storage.
//!
//! Holds small pieces of per-device state such as the notifications
//! last-seen watermark.  Lives in its own SQLite file, separate from any
//! backend data.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use directories::ProjectDirs;
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{Result, StoreError};
use crate::schema::timestamp_string;

const CREATE_SQL: &str = "CREATE TABLE IF NOT EXISTS device_kv (
    key   TEXT PRIMARY KEY NOT NULL,
    value TEXT NOT NULL
);";

pub struct DeviceStorage {
    conn: Mutex<Connection>,
}

impl DeviceStorage {
    /// Open `device.db` inside `dir`, creating the directory if needed.
    pub fn open_in(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        Self::open_at(&dir.join("device.db"))
    }

    pub fn open_at(path: &Path) -> Result<Self> {
        tracing::debug!(path = %path.display(), "opening device storage");
        Self::prepare(Connection::open(path)?)
    }

    /// Storage in the platform data directory.
    pub fn open_default() -> Result<Self> {
        let dirs = ProjectDirs::from("com", "circle", "circle").ok_or(StoreError::NoDataDir)?;
        Self::open_in(dirs.data_dir())
    }

    pub fn in_memory() -> Result<Self> {
        Self::prepare(Connection::open_in_memory()?)
    }

    fn prepare(conn: Connection) -> Result<Self> {
        conn.execute_batch(CREATE_SQL)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| StoreError::LockPoisoned(e.to_string()))
    }

    pub fn get_item(&self, key: &str) -> Result<Option<String>> {
        Ok(self
            .conn()?
            .query_row(
                "SELECT value FROM device_kv WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?)
    }

    pub fn set_item(&self, key: &str, value: &str) -> Result<()> {
        self.conn()?.execute(
            "INSERT INTO device_kv (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    pub fn remove_item(&self, key: &str) -> Result<()> {
        self.conn()?
            .execute("DELETE FROM device_kv WHERE key = ?1", params![key])?;
        Ok(())
    }

    /// Watermark stored under `key`; the Unix epoch when absent or
    /// unreadable.
    pub fn last_seen(&self, key: &str) -> Result<DateTime<Utc>> {
        Ok(parse_watermark(key, self.get_item(key)?))
    }

    /// Move the watermark under `key` forward to `to`.  An older `to` leaves
    /// it unchanged.  Returns the watermark now in effect.
    pub fn advance_last_seen(&self, key: &str, to: DateTime<Utc>) -> Result<DateTime<Utc>> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let raw: Option<String> = tx
            .query_row(
                "SELECT value FROM device_kv WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        let current = parse_watermark(key, raw);
        if to <= current {
            return Ok(current);
        }
        tx.execute(
            "INSERT INTO device_kv (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, timestamp_string(to)],
        )?;
        tx.commit()?;
        tracing::debug!(key, from = %current, to = %to, "watermark advanced");
        Ok(to)
    }
}

fn parse_watermark(key: &str, raw: Option<String>) -> DateTime<Utc> {
    let Some(raw) = raw else {
        return DateTime::<Utc>::UNIX_EPOCH;
    };
    match DateTime::parse_from_rfc3339(&raw) {
        Ok(ts) => ts.with_timezone(&Utc),
        Err(e) => {
            tracing::warn!(key, value = %raw, error = %e, "ignoring unreadable watermark");
            DateTime::<Utc>::UNIX_EPOCH
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn items_round_trip_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        {
            let storage = DeviceStorage::open_in(dir.path()).unwrap();
            storage.set_item("theme", "dark").unwrap();
            storage.set_item("theme", "light").unwrap();
        }
        let storage = DeviceStorage::open_in(dir.path()).unwrap();
        assert_eq!(storage.get_item("theme").unwrap().as_deref(), Some("light"));
        storage.remove_item("theme").unwrap();
        assert_eq!(storage.get_item("theme").unwrap(), None);
    }

    #[test]
    fn missing_watermark_is_epoch() {
        let storage = DeviceStorage::in_memory().unwrap();
        assert_eq!(storage.last_seen("k").unwrap(), DateTime::<Utc>::UNIX_EPOCH);
    }

    #[test]
    fn watermark_never_moves_backwards() {
        let storage = DeviceStorage::in_memory().unwrap();
        let now = Utc::now();
        let later = now + Duration::seconds(5);

        storage.advance_last_seen("k", later).unwrap();
        let effective = storage.advance_last_seen("k", now).unwrap();
        assert_eq!(timestamp_string(effective), timestamp_string(later));
    }

    #[test]
    fn garbage_watermark_is_replaced() {
        let storage = DeviceStorage::in_memory().unwrap();
        storage.set_item("k", "not a date").unwrap();
        assert_eq!(storage.last_seen("k").unwrap(), DateTime::<Utc>::UNIX_EPOCH);

        let now = Utc::now();
        let effective = storage.advance_last_seen("k", now).unwrap();
        assert_eq!(timestamp_string(effective), timestamp_string(now));
    }

    #[test]
    fn watermark_compares_instants_not_text() {
        let storage = DeviceStorage::in_memory().unwrap();
        let eleven = DateTime::parse_from_rfc3339("2026-10-19T11:00:00Z")
            .unwrap()
            .with_timezone(&Utc);

        // 12:00+02:00 is 10:00 UTC.
        storage.set_item("k", "2026-10-19T12:00:00+02:00").unwrap();
        assert_eq!(storage.advance_last_seen("k", eleven).unwrap(), eleven);
        assert_eq!(storage.last_seen("k").unwrap(), eleven);

        storage.set_item("k", "2026-10-19T10:00:00.123Z").unwrap();
        let later = DateTime::parse_from_rfc3339("2026-10-19T10:00:00.123500Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(storage.advance_last_seen("k", later).unwrap(), later);

        // An older instant written in a longer form does not win.
        storage.set_item("k", "2026-10-19T12:00:00Z").unwrap();
        assert_eq!(
            storage.advance_last_seen("k", eleven).unwrap().to_rfc3339(),
            "2026-10-19T12:00:00+00:00"
        );
        assert_eq!(
            storage.get_item("k").unwrap().as_deref(),
            Some("2026-10-19T12:00:00Z")
        );
    }
}
