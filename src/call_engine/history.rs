//! Anrufliste
//!
//! Jede Session, die `Ended` erreicht, erzeugt genau einen Eintrag. Das
//! Schreiben läuft in einem eigenen Task; Fehler werden nur geloggt und
//! blockieren nie das Auflegen.

use super::session::{CallDirection, CallKind, CallSession, EndReason};
use crate::database::DatabaseError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use thiserror::Error;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("History database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("History store unavailable: {0}")]
    Unavailable(String),
}

// ============================================================================
// HISTORY ITEM
// ============================================================================

/// Eintrag der Anrufliste (nur anhängen, nie ändern)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallHistoryItem {
    pub session_id: String,
    pub contact_ids: Vec<String>,
    pub kind: CallKind,
    pub direction: CallDirection,
    pub missed: bool,
    pub dropped: bool,
    pub duration_seconds: Option<i64>,
    pub occurred_at: DateTime<Utc>,
    pub end_reason: EndReason,
}

impl CallHistoryItem {
    /// Leitet den Eintrag aus einer beendeten Session ab
    ///
    /// Liefert `None`, solange die Session nicht `Ended` ist.
    pub fn from_session(session: &CallSession) -> Option<Self> {
        let outcome = session.outcome.as_ref()?;
        session.timestamps.ended_at?;

        Some(Self {
            session_id: session.id.clone(),
            contact_ids: session.contact_ids(),
            kind: session.kind,
            direction: session.direction,
            missed: outcome.missed,
            dropped: outcome.dropped,
            duration_seconds: session.duration().map(|d| d.num_seconds()),
            occurred_at: session.timestamps.created_at,
            end_reason: outcome.reason.clone(),
        })
    }
}

// ============================================================================
// STORE TRAIT
// ============================================================================

#[async_trait]
pub trait CallHistoryStore: Send + Sync + 'static {
    /// Hängt einen Eintrag an; ein zweiter Eintrag derselben Session wird ignoriert
    async fn append(&self, item: CallHistoryItem) -> Result<(), PersistenceError>;

    /// Neueste Einträge zuerst
    async fn recent(&self, limit: usize) -> Result<Vec<CallHistoryItem>, PersistenceError>;
}

// ============================================================================
// RECORDER
// ============================================================================

/// Anzahl zuletzt aufgezeichneter Session-IDs für die Duplikatprüfung
const RECENT_SESSIONS: usize = 16;

/// Übersetzt beendete Sessions in History-Einträge
pub struct CallHistoryRecorder {
    store: Arc<dyn CallHistoryStore>,
    recorded: Mutex<VecDeque<String>>,
}

impl CallHistoryRecorder {
    pub fn new(store: Arc<dyn CallHistoryStore>) -> Self {
        Self {
            store,
            recorded: Mutex::new(VecDeque::with_capacity(RECENT_SESSIONS)),
        }
    }

    /// Nimmt eine `Ended`-Session entgegen (fire-and-forget)
    ///
    /// Gibt `true` zurück, wenn für die Session ein Eintrag angestoßen wurde.
    pub fn record(&self, session: &CallSession) -> bool {
        let Some(item) = CallHistoryItem::from_session(session) else {
            tracing::warn!("Ignoring history record for unfinished session {}", session.id);
            return false;
        };

        {
            let mut recorded = self.recorded.lock();
            if recorded.contains(&item.session_id) {
                tracing::debug!("Session {} already recorded", item.session_id);
                return false;
            }
            if recorded.len() == RECENT_SESSIONS {
                recorded.pop_front();
            }
            recorded.push_back(item.session_id.clone());
        }

        tracing::info!(
            "Recording call {} ({}, missed={}, dropped={}, duration={:?})",
            item.session_id,
            item.end_reason.label(),
            item.missed,
            item.dropped,
            item.duration_seconds
        );

        let store = Arc::clone(&self.store);
        tokio::spawn(async move {
            let session_id = item.session_id.clone();
            if let Err(e) = store.append(item).await {
                tracing::error!("Failed to persist call history for {}: {}", session_id, e);
            }
        });

        true
    }

    pub async fn recent(&self, limit: usize) -> Result<Vec<CallHistoryItem>, PersistenceError> {
        self.store.recent(limit).await
    }
}

impl std::fmt::Debug for CallHistoryRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallHistoryRecorder")
            .field("recorded", &self.recorded.lock().len())
            .finish()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call_engine::testing::MemoryHistoryStore;
    use crate::call_engine::{CallOutcome, CallStatus};

    fn ended_session(id: &str) -> CallSession {
        let start = Utc::now();
        let mut session = CallSession::new(
            id.to_string(),
            CallKind::Video,
            CallDirection::Outgoing,
            CallStatus::Ended,
            Vec::new(),
            start,
        );
        session.timestamps.connected_at = Some(start + chrono::Duration::seconds(2));
        session.timestamps.ended_at = Some(start + chrono::Duration::seconds(42));
        session.outcome = Some(CallOutcome {
            reason: EndReason::LocalHangup,
            missed: false,
            dropped: false,
        });
        session
    }

    #[test]
    fn test_item_from_unfinished_session_is_none() {
        let mut session = ended_session("s1");
        session.outcome = None;
        assert!(CallHistoryItem::from_session(&session).is_none());
    }

    #[test]
    fn test_item_duration() {
        let item = CallHistoryItem::from_session(&ended_session("s1")).unwrap();
        assert_eq!(item.duration_seconds, Some(40));
        assert!(!item.missed);
        assert_eq!(item.end_reason, EndReason::LocalHangup);
    }

    #[tokio::test]
    async fn test_record_once_per_session() {
        let store = Arc::new(MemoryHistoryStore::default());
        let recorder = CallHistoryRecorder::new(store.clone());
        let session = ended_session("s1");

        assert!(recorder.record(&session));
        assert!(!recorder.record(&session));

        tokio::task::yield_now().await;
        assert_eq!(store.items().len(), 1);
    }

    #[tokio::test]
    async fn test_dedupe_window_is_bounded() {
        let store = Arc::new(MemoryHistoryStore::default());
        let recorder = CallHistoryRecorder::new(store.clone());

        for i in 0..RECENT_SESSIONS * 3 {
            assert!(recorder.record(&ended_session(&format!("s{}", i))));
        }
        assert_eq!(recorder.recorded.lock().len(), RECENT_SESSIONS);

        let newest = ended_session(&format!("s{}", RECENT_SESSIONS * 3 - 1));
        assert!(!recorder.record(&newest));
    }

    #[tokio::test]
    async fn test_store_failure_is_swallowed() {
        let store = Arc::new(MemoryHistoryStore::failing());
        let recorder = CallHistoryRecorder::new(store.clone());

        assert!(recorder.record(&ended_session("s1")));
        tokio::task::yield_now().await;
        assert!(store.items().is_empty());
    }
}
