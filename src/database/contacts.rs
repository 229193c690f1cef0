//! Contacts Database
//!
//! SQLite-Datenbank für lokale Kontakte.
//! Liefert Anzeigename und Avatar für die Teilnehmer eines Anrufs.

use super::{open_file, DatabaseError};
use crate::registry::ContactStore;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Result as SqliteResult, Row};
use serde::{Deserialize, Serialize};
use std::path::Path;

// ============================================================================
// CONTACT STRUCT
// ============================================================================

/// Lokaler Kontakt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contact {
    pub id: i64,
    pub contact_id: String,
    pub username: String,
    pub display_name: Option<String>,
    pub avatar_ref: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl Contact {
    /// Anzeigename mit Fallback auf den Username
    pub fn label(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.username)
    }
}

/// Neuer Kontakt ohne ID (für INSERT)
#[derive(Debug, Clone)]
pub struct NewContact {
    pub contact_id: String,
    pub username: String,
    pub display_name: Option<String>,
    pub avatar_ref: Option<String>,
}

// ============================================================================
// DATABASE
// ============================================================================

const CONTACT_COLUMNS: &str =
    "id, contact_id, username, display_name, avatar_ref, created_at, updated_at";

/// SQLite-Datenbank für Kontakte (Thread-safe durch Mutex)
pub struct ContactsDatabase {
    conn: Mutex<Connection>,
}

impl ContactsDatabase {
    /// Öffnet oder erstellt `<data_dir>/contacts.db`
    pub fn open(data_dir: &Path) -> Result<Self, DatabaseError> {
        let conn = open_file(&data_dir.join("contacts.db"))?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.init_schema()?;
        Ok(db)
    }

    /// In-Memory Datenbank für Tests
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
            CREATE TABLE IF NOT EXISTS contacts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                contact_id TEXT NOT NULL UNIQUE,
                username TEXT NOT NULL,
                display_name TEXT,
                avatar_ref TEXT,
                created_at TEXT NOT NULL DEFAULT (datetime('now')),
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            );
            CREATE INDEX IF NOT EXISTS idx_contacts_username ON contacts(username);
            "#,
        )?;
        Ok(())
    }

    fn row_to_contact(row: &Row<'_>) -> SqliteResult<Contact> {
        Ok(Contact {
            id: row.get(0)?,
            contact_id: row.get(1)?,
            username: row.get(2)?,
            display_name: row.get(3)?,
            avatar_ref: row.get(4)?,
            created_at: row.get(5)?,
            updated_at: row.get(6)?,
        })
    }

    /// Fügt einen Kontakt hinzu oder aktualisiert ihn
    pub fn upsert_contact(&self, contact: NewContact) -> Result<Contact, DatabaseError> {
        let conn = self.conn.lock();
        conn.execute(
            r#"
            INSERT INTO contacts (contact_id, username, display_name, avatar_ref)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(contact_id) DO UPDATE SET
                username = excluded.username,
                display_name = COALESCE(excluded.display_name, display_name),
                avatar_ref = COALESCE(excluded.avatar_ref, avatar_ref),
                updated_at = datetime('now')
            "#,
            params![
                contact.contact_id,
                contact.username,
                contact.display_name,
                contact.avatar_ref
            ],
        )?;

        Self::find_inner(&conn, &contact.contact_id)?
            .ok_or(DatabaseError::ContactNotFound(contact.contact_id))
    }

    fn find_inner(conn: &Connection, contact_id: &str) -> Result<Option<Contact>, DatabaseError> {
        let sql = format!("SELECT {} FROM contacts WHERE contact_id = ?1", CONTACT_COLUMNS);
        Ok(conn
            .query_row(&sql, params![contact_id], Self::row_to_contact)
            .optional()?)
    }

    /// Holt einen Kontakt anhand der Kontakt-ID
    pub fn get_contact(&self, contact_id: &str) -> Result<Contact, DatabaseError> {
        let conn = self.conn.lock();
        Self::find_inner(&conn, contact_id)?
            .ok_or_else(|| DatabaseError::ContactNotFound(contact_id.to_string()))
    }

    /// Holt alle Kontakte
    pub fn get_all_contacts(&self) -> Result<Vec<Contact>, DatabaseError> {
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT {} FROM contacts ORDER BY username ASC",
            CONTACT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;

        let contacts = stmt
            .query_map([], Self::row_to_contact)?
            .collect::<SqliteResult<Vec<Contact>>>()?;

        Ok(contacts)
    }

    /// Aktualisiert den Display-Namen eines Kontakts
    pub fn set_display_name(
        &self,
        contact_id: &str,
        display_name: Option<&str>,
    ) -> Result<(), DatabaseError> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            r#"
            UPDATE contacts
            SET display_name = ?2, updated_at = datetime('now')
            WHERE contact_id = ?1
            "#,
            params![contact_id, display_name],
        )?;
        if changed == 0 {
            return Err(DatabaseError::ContactNotFound(contact_id.to_string()));
        }
        Ok(())
    }

    /// Löscht einen Kontakt
    pub fn delete_contact(&self, contact_id: &str) -> Result<(), DatabaseError> {
        let conn = self.conn.lock();
        conn.execute(
            "DELETE FROM contacts WHERE contact_id = ?1",
            params![contact_id],
        )?;
        Ok(())
    }
}

impl ContactStore for ContactsDatabase {
    fn lookup(&self, contact_id: &str) -> Result<Option<Contact>, DatabaseError> {
        let conn = self.conn.lock();
        Self::find_inner(&conn, contact_id)
    }
}

// ============================================================================
// TESTS
// ============================================================================
