//! History Database
//!
//! SQLite-Tabelle für die Anrufliste. Eine Zeile pro Session.

use super::{open_file, DatabaseError};
use crate::call_engine::{
    CallDirection, CallHistoryItem, CallHistoryStore, CallKind, EndReason, PersistenceError,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, Row};
use std::path::Path;

/// Rohdaten einer Zeile, vor der Validierung
struct HistoryRow {
    session_id: String,
    contact_ids: String,
    kind: String,
    direction: String,
    missed: bool,
    dropped: bool,
    duration_seconds: Option<i64>,
    occurred_at: String,
    end_reason: String,
}

impl HistoryRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            session_id: row.get(0)?,
            contact_ids: row.get(1)?,
            kind: row.get(2)?,
            direction: row.get(3)?,
            missed: row.get(4)?,
            dropped: row.get(5)?,
            duration_seconds: row.get(6)?,
            occurred_at: row.get(7)?,
            end_reason: row.get(8)?,
        })
    }

    fn into_item(self) -> Result<CallHistoryItem, DatabaseError> {
        let corrupt = |detail: String| DatabaseError::CorruptRow {
            table: "call_history",
            detail,
        };

        let contact_ids: Vec<String> = serde_json::from_str(&self.contact_ids)
            .map_err(|e| corrupt(format!("contact_ids: {}", e)))?;
        let kind = CallKind::parse(&self.kind)
            .ok_or_else(|| corrupt(format!("kind: {}", self.kind)))?;
        let direction = CallDirection::parse(&self.direction)
            .ok_or_else(|| corrupt(format!("direction: {}", self.direction)))?;
        let occurred_at = DateTime::parse_from_rfc3339(&self.occurred_at)
            .map_err(|e| corrupt(format!("occurred_at: {}", e)))?
            .with_timezone(&Utc);
        let end_reason: EndReason = serde_json::from_str(&self.end_reason)
            .map_err(|e| corrupt(format!("end_reason: {}", e)))?;

        Ok(CallHistoryItem {
            session_id: self.session_id,
            contact_ids,
            kind,
            direction,
            missed: self.missed,
            dropped: self.dropped,
            duration_seconds: self.duration_seconds,
            occurred_at,
            end_reason,
        })
    }
}

/// SQLite-Datenbank für die Anrufliste (Thread-safe durch Mutex)
pub struct HistoryDatabase {
    conn: Mutex<Connection>,
}

impl HistoryDatabase {
    /// Öffnet oder erstellt `<data_dir>/history.db`
    pub fn open(data_dir: &Path) -> Result<Self, DatabaseError> {
        let db = Self {
            conn: Mutex::new(open_file(&data_dir.join("history.db"))?),
        };
        db.init_schema()?;
        Ok(db)
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self, DatabaseError> {
        let db = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        };
        db.init_schema()?;
        Ok(db)
    }

    fn init_schema(&self) -> Result<(), DatabaseError> {
        let conn = self.conn.lock();
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS call_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT NOT NULL UNIQUE,
                contact_ids TEXT NOT NULL,
                kind TEXT NOT NULL,
                direction TEXT NOT NULL,
                missed INTEGER NOT NULL DEFAULT 0,
                dropped INTEGER NOT NULL DEFAULT 0,
                duration_seconds INTEGER,
                occurred_at TEXT NOT NULL,
                end_reason TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_call_history_occurred ON call_history(occurred_at);
            "#,
        )?;
        Ok(())
    }

    /// Fügt einen Eintrag ein; gibt `false` zurück, wenn die Session schon existiert
    pub fn insert(&self, item: &CallHistoryItem) -> Result<bool, DatabaseError> {
        let contact_ids = serde_json::to_string(&item.contact_ids).map_err(|e| {
            DatabaseError::CorruptRow {
                table: "call_history",
                detail: e.to_string(),
            }
        })?;
        let end_reason = serde_json::to_string(&item.end_reason).map_err(|e| {
            DatabaseError::CorruptRow {
                table: "call_history",
                detail: e.to_string(),
            }
        })?;

        let conn = self.conn.lock();
        let inserted = conn.execute(
            r#"
            INSERT OR IGNORE INTO call_history
                (session_id, contact_ids, kind, direction, missed, dropped,
                 duration_seconds, occurred_at, end_reason)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
            params![
                item.session_id,
                contact_ids,
                item.kind.as_str(),
                item.direction.as_str(),
                item.missed,
                item.dropped,
                item.duration_seconds,
                item.occurred_at.to_rfc3339(),
                end_reason,
            ],
        )?;

        Ok(inserted > 0)
    }

    /// Neueste Einträge zuerst
    pub fn list_recent(&self, limit: usize) -> Result<Vec<CallHistoryItem>, DatabaseError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            r#"
            SELECT session_id, contact_ids, kind, direction, missed, dropped,
                   duration_seconds, occurred_at, end_reason
            FROM call_history
            ORDER BY occurred_at DESC, id DESC
            LIMIT ?1
            "#,
        )?;

        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = stmt
            .query_map(params![limit], HistoryRow::from_row)?
            .collect::<rusqlite::Result<Vec<HistoryRow>>>()?;

        rows.into_iter().map(HistoryRow::into_item).collect()
    }
}

#[async_trait]
impl CallHistoryStore for HistoryDatabase {
    async fn append(&self, item: CallHistoryItem) -> Result<(), PersistenceError> {
        if !self.insert(&item)? {
            tracing::debug!("History entry for {} already exists", item.session_id);
        }
        Ok(())
    }

    async fn recent(&self, limit: usize) -> Result<Vec<CallHistoryItem>, PersistenceError> {
        Ok(self.list_recent(limit)?)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call_engine::RejectReason;
    use chrono::TimeZone;

    fn item(session_id: &str, minute: u32) -> CallHistoryItem {
        CallHistoryItem {
            session_id: session_id.to_string(),
            contact_ids: vec!["p-bob".to_string(), "p-carol".to_string()],
            kind: CallKind::Audio,
            direction: CallDirection::Outgoing,
            missed: false,
            dropped: false,
            duration_seconds: Some(12),
            occurred_at: Utc.with_ymd_and_hms(2024, 5, 1, 10, minute, 0).unwrap(),
            end_reason: EndReason::RemoteRejected {
                rejected_with: RejectReason::Busy,
            },
        }
    }

    #[test]
    fn test_insert_is_idempotent() {
        let db = HistoryDatabase::open_in_memory().unwrap();

        assert!(db.insert(&item("s1", 0)).unwrap());
        assert!(!db.insert(&item("s1", 0)).unwrap());
        assert_eq!(db.list_recent(10).unwrap().len(), 1);
    }

    #[test]
    fn test_list_recent_newest_first() {
        let db = HistoryDatabase::open_in_memory().unwrap();
        db.insert(&item("s1", 0)).unwrap();
        db.insert(&item("s2", 5)).unwrap();
        db.insert(&item("s3", 2)).unwrap();

        let ids: Vec<String> = db
            .list_recent(2)
            .unwrap()
            .into_iter()
            .map(|i| i.session_id)
            .collect();
        assert_eq!(ids, vec!["s2", "s3"]);
    }

    #[test]
    fn test_row_keeps_all_fields() {
        let db = HistoryDatabase::open_in_memory().unwrap();
        let original = item("s1", 0);
        db.insert(&original).unwrap();

        let loaded = db.list_recent(1).unwrap().remove(0);
        assert_eq!(loaded, original);
    }

    #[test]
    fn test_corrupt_row_is_reported() {
        let db = HistoryDatabase::open_in_memory().unwrap();
        db.conn
            .lock()
            .execute(
                "INSERT INTO call_history (session_id, contact_ids, kind, direction, occurred_at, end_reason)
                 VALUES ('bad', '[]', 'hologram', 'outgoing', '2024-05-01T10:00:00+00:00', '{\"reason\":\"dropped\"}')",
                [],
            )
            .unwrap();

        assert!(matches!(
            db.list_recent(5),
            Err(DatabaseError::CorruptRow { table: "call_history", .. })
        ));
    }

    #[tokio::test]
    async fn test_store_trait_roundtrip() {
        let db = HistoryDatabase::open_in_memory().unwrap();
        db.append(item("s1", 0)).await.unwrap();
        db.append(item("s1", 0)).await.unwrap();

        let recent = db.recent(10).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].contact_ids, vec!["p-bob", "p-carol"]);
    }
}
