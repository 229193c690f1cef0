//! Database Module - lokale SQLite-Datenbanken
//!
//! - Kontakte (Anzeigename, Avatar) für die Teilnehmer-Auflösung
//! - Anrufliste (beendete Sessions)

mod contacts;
mod history;

pub use contacts::{Contact, ContactsDatabase, NewContact};
pub use history::HistoryDatabase;

use rusqlite::Connection;
use std::path::Path;
use thiserror::Error;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Failed to create database directory: {0}")]
    DirectoryCreation(#[from] std::io::Error),

    #[error("Contact not found: {0}")]
    ContactNotFound(String),

    #[error("Corrupt row in {table}: {detail}")]
    CorruptRow { table: &'static str, detail: String },
}

/// Öffnet eine Datenbank-Datei und legt das Verzeichnis bei Bedarf an
fn open_file(path: &Path) -> Result<Connection, DatabaseError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    tracing::info!("Opening database at {:?}", path);
    Ok(Connection::open(path)?)
}
