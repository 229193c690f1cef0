//! Participant Registry
//!
//! Löst Kontakt-IDs in Anzeigedaten (Name, Avatar) für die UI auf.
//! Reine Abfrage, keine Call-Logik.

use crate::database::{Contact, DatabaseError};
use std::sync::Arc;

/// Quelle für Kontaktdaten
pub trait ContactStore: Send + Sync + 'static {
    fn lookup(&self, contact_id: &str) -> Result<Option<Contact>, DatabaseError>;
}

/// Anzeigedaten eines Teilnehmers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayInfo {
    pub display_name: String,
    pub avatar_ref: Option<String>,
}

impl DisplayInfo {
    /// Unbekannte Kontakte werden mit ihrer ID angezeigt
    pub fn fallback(contact_id: &str) -> Self {
        Self {
            display_name: contact_id.to_string(),
            avatar_ref: None,
        }
    }
}

impl From<Contact> for DisplayInfo {
    fn from(contact: Contact) -> Self {
        Self {
            display_name: contact.label().to_string(),
            avatar_ref: contact.avatar_ref,
        }
    }
}

pub struct ParticipantRegistry {
    contacts: Arc<dyn ContactStore>,
}

impl ParticipantRegistry {
    pub fn new(contacts: Arc<dyn ContactStore>) -> Self {
        Self { contacts }
    }

    /// Liefert immer ein Ergebnis; Fehler der Datenbank führen zum Fallback
    pub fn resolve(&self, contact_id: &str) -> DisplayInfo {
        match self.contacts.lookup(contact_id) {
            Ok(Some(contact)) => contact.into(),
            Ok(None) => DisplayInfo::fallback(contact_id),
            Err(e) => {
                tracing::warn!("Contact lookup for {} failed: {}", contact_id, e);
                DisplayInfo::fallback(contact_id)
            }
        }
    }
}

impl std::fmt::Debug for ParticipantRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParticipantRegistry").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{ContactsDatabase, NewContact};

    struct BrokenStore;

    impl ContactStore for BrokenStore {
        fn lookup(&self, contact_id: &str) -> Result<Option<Contact>, DatabaseError> {
            Err(DatabaseError::ContactNotFound(contact_id.to_string()))
        }
    }

    #[test]
    fn test_resolve_known_contact() {
        let db = ContactsDatabase::open_in_memory().unwrap();
        db.upsert_contact(NewContact {
            contact_id: "p-bob".to_string(),
            username: "bob".to_string(),
            display_name: None,
            avatar_ref: Some("avatars/bob.png".to_string()),
        })
        .unwrap();

        let registry = ParticipantRegistry::new(Arc::new(db));
        let info = registry.resolve("p-bob");
        assert_eq!(info.display_name, "bob");
        assert_eq!(info.avatar_ref.as_deref(), Some("avatars/bob.png"));
    }

    #[test]
    fn test_resolve_unknown_falls_back_to_id() {
        let registry = ParticipantRegistry::new(Arc::new(BrokenStore));
        assert_eq!(registry.resolve("p-zed"), DisplayInfo::fallback("p-zed"));
    }
}
