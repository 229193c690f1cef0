//! In-Memory Fakes für Engine-Tests

use super::history::{CallHistoryItem, CallHistoryRecorder, CallHistoryStore, PersistenceError};
use super::session::{CallKind, CallSession, CallStatus};
use super::CallSessionManager;
use crate::config::CallConfig;
use crate::database::{Contact, DatabaseError};
use crate::media::{
    LocalMediaHandle, MediaError, MediaEvent, MediaTransport, RemoteDescriptor, RemoteMediaHandle,
};
use crate::registry::{ContactStore, ParticipantRegistry};
use crate::signaling::{
    CallMessage, InboundSignal, OutboundSignal, SignalingChannel, SignalingError, SignalingEvent,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

// ============================================================================
// SIGNALING
// ============================================================================

pub(crate) struct FakeSignaling {
    local_id: String,
    sent: Mutex<Vec<OutboundSignal>>,
    events: broadcast::Sender<SignalingEvent>,
    offline: AtomicBool,
}

impl FakeSignaling {
    pub fn new(local_id: &str) -> Arc<Self> {
        let (events, _) = broadcast::channel(64);
        Arc::new(Self {
            local_id: local_id.to_string(),
            sent: Mutex::new(Vec::new()),
            events,
            offline: AtomicBool::new(false),
        })
    }

    /// Nachricht eines Peers zustellen
    pub fn inject(&self, from: &str, message: CallMessage) {
        let _ = self.events.send(SignalingEvent::Message(InboundSignal {
            from: from.to_string(),
            message,
        }));
    }

    pub fn emit(&self, event: SignalingEvent) {
        let _ = self.events.send(event);
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<OutboundSignal> {
        self.sent.lock().clone()
    }

    /// Gesendete Nachrichten eines Typs (z.B. `"call_end"`)
    pub fn sent_labeled(&self, label: &str) -> Vec<OutboundSignal> {
        self.sent
            .lock()
            .iter()
            .filter(|s| s.message.label() == label)
            .cloned()
            .collect()
    }

    pub fn last_invite_session(&self) -> Option<String> {
        self.sent.lock().iter().rev().find_map(|s| match &s.message {
            CallMessage::CallInvite { session_id, .. } => Some(session_id.clone()),
            _ => None,
        })
    }
}

impl SignalingChannel for FakeSignaling {
    fn local_id(&self) -> Option<String> {
        Some(self.local_id.clone())
    }

    fn send(&self, signal: OutboundSignal) -> Result<(), SignalingError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(SignalingError::NotConnected);
        }
        self.sent.lock().push(signal);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<SignalingEvent> {
        self.events.subscribe()
    }
}

// ============================================================================
// MEDIA
// ============================================================================

#[derive(Default)]
pub(crate) struct MediaCounters {
    pub acquired: AtomicUsize,
    pub released: AtomicUsize,
    pub attached: AtomicUsize,
    pub detached: AtomicUsize,
    pub renegotiated: AtomicUsize,
}

pub(crate) struct FakeMedia {
    pub counters: MediaCounters,
    events: broadcast::Sender<MediaEvent>,
    acquire_delay: Mutex<Option<Duration>>,
    acquire_error: Mutex<Option<MediaError>>,
    fail_controls: AtomicBool,
    fail_renegotiate: AtomicBool,
    /// Protokoll der Steuerbefehle, z.B. `"audio:false"`
    controls: Mutex<Vec<String>>,
}

impl FakeMedia {
    pub fn new() -> Arc<Self> {
        let (events, _) = broadcast::channel(16);
        Arc::new(Self {
            counters: MediaCounters::default(),
            events,
            acquire_delay: Mutex::new(None),
            acquire_error: Mutex::new(None),
            fail_controls: AtomicBool::new(false),
            fail_renegotiate: AtomicBool::new(false),
            controls: Mutex::new(Vec::new()),
        })
    }

    /// Simuliert eine Berechtigungsabfrage, die `delay` dauert
    pub fn delay_acquire(&self, delay: Duration) {
        *self.acquire_delay.lock() = Some(delay);
    }

    pub fn fail_acquire(&self, error: MediaError) {
        *self.acquire_error.lock() = Some(error);
    }

    pub fn fail_controls(&self, fail: bool) {
        self.fail_controls.store(fail, Ordering::SeqCst);
    }

    pub fn fail_renegotiate(&self, fail: bool) {
        self.fail_renegotiate.store(fail, Ordering::SeqCst);
    }

    pub fn emit(&self, event: MediaEvent) {
        let _ = self.events.send(event);
    }

    pub fn controls(&self) -> Vec<String> {
        self.controls.lock().clone()
    }

    pub fn acquired(&self) -> usize {
        self.counters.acquired.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.counters.released.load(Ordering::SeqCst)
    }

    pub fn attached(&self) -> usize {
        self.counters.attached.load(Ordering::SeqCst)
    }

    pub fn detached(&self) -> usize {
        self.counters.detached.load(Ordering::SeqCst)
    }

    fn control(&self, entry: String) -> Result<(), MediaError> {
        self.controls.lock().push(entry);
        if self.fail_controls.load(Ordering::SeqCst) {
            return Err(MediaError::Transport("control rejected".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl MediaTransport for FakeMedia {
    async fn acquire_local(&self, kind: CallKind) -> Result<LocalMediaHandle, MediaError> {
        let delay = *self.acquire_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let error = self.acquire_error.lock().clone();
        if let Some(error) = error {
            return Err(error);
        }
        self.counters.acquired.fetch_add(1, Ordering::SeqCst);
        Ok(LocalMediaHandle::new(kind))
    }

    async fn attach_remote(
        &self,
        descriptor: &RemoteDescriptor,
    ) -> Result<RemoteMediaHandle, MediaError> {
        self.counters.attached.fetch_add(1, Ordering::SeqCst);
        Ok(RemoteMediaHandle::new(descriptor.contact_id.clone()))
    }

    async fn detach_remote(&self, _handle: RemoteMediaHandle) {
        self.counters.detached.fetch_add(1, Ordering::SeqCst);
    }

    async fn set_audio_enabled(
        &self,
        _handle: &LocalMediaHandle,
        enabled: bool,
    ) -> Result<(), MediaError> {
        self.control(format!("audio:{}", enabled))
    }

    async fn set_video_enabled(
        &self,
        _handle: &LocalMediaHandle,
        enabled: bool,
    ) -> Result<(), MediaError> {
        self.control(format!("video:{}", enabled))
    }

    async fn set_speaker_enabled(
        &self,
        _handle: &LocalMediaHandle,
        enabled: bool,
    ) -> Result<(), MediaError> {
        self.control(format!("speaker:{}", enabled))
    }

    async fn switch_capture_device(&self, _handle: &LocalMediaHandle) -> Result<(), MediaError> {
        self.control("switch_camera".to_string())
    }

    async fn renegotiate(&self, _handle: &LocalMediaHandle, kind: CallKind) -> Result<(), MediaError> {
        self.counters.renegotiated.fetch_add(1, Ordering::SeqCst);
        if self.fail_renegotiate.load(Ordering::SeqCst) {
            return Err(MediaError::Transport(format!("cannot switch to {}", kind.as_str())));
        }
        Ok(())
    }

    async fn release(&self, _handle: LocalMediaHandle) {
        self.counters.released.fetch_add(1, Ordering::SeqCst);
    }

    fn subscribe(&self) -> broadcast::Receiver<MediaEvent> {
        self.events.subscribe()
    }
}

// ============================================================================
// HISTORY & CONTACTS
// ============================================================================

#[derive(Default)]
pub(crate) struct MemoryHistoryStore {
    items: Mutex<Vec<CallHistoryItem>>,
    fail: bool,
}

impl MemoryHistoryStore {
    pub fn failing() -> Self {
        Self {
            items: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn items(&self) -> Vec<CallHistoryItem> {
        self.items.lock().clone()
    }
}

#[async_trait]
impl CallHistoryStore for MemoryHistoryStore {
    async fn append(&self, item: CallHistoryItem) -> Result<(), PersistenceError> {
        if self.fail {
            return Err(PersistenceError::Unavailable("disk full".to_string()));
        }
        let mut items = self.items.lock();
        if !items.iter().any(|i| i.session_id == item.session_id) {
            items.push(item);
        }
        Ok(())
    }

    async fn recent(&self, limit: usize) -> Result<Vec<CallHistoryItem>, PersistenceError> {
        Ok(self.items.lock().iter().rev().take(limit).cloned().collect())
    }
}

/// Kennt keine Kontakte; Teilnehmer werden mit ihrer ID angezeigt
pub(crate) struct NoContacts;

impl ContactStore for NoContacts {
    fn lookup(&self, _contact_id: &str) -> Result<Option<Contact>, DatabaseError> {
        Ok(None)
    }
}

// ============================================================================
// HARNESS
// ============================================================================

/// Engine mit allen Fakes
pub(crate) struct Harness {
    pub manager: CallSessionManager,
    pub signaling: Arc<FakeSignaling>,
    pub media: Arc<FakeMedia>,
    pub history: Arc<MemoryHistoryStore>,
    pub snapshots: broadcast::Receiver<CallSession>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(CallConfig::default())
    }

    pub fn with_config(config: CallConfig) -> Self {
        let signaling = FakeSignaling::new("me");
        let media = FakeMedia::new();
        let history = Arc::new(MemoryHistoryStore::default());
        let registry = Arc::new(ParticipantRegistry::new(Arc::new(NoContacts)));
        let recorder = Arc::new(CallHistoryRecorder::new(history.clone()));

        let manager = CallSessionManager::spawn(
            config,
            signaling.clone(),
            media.clone(),
            registry,
            recorder,
        );
        let snapshots = manager.subscribe();

        Self {
            manager,
            signaling,
            media,
            history,
            snapshots,
        }
    }

    /// Wartet auf den nächsten Snapshot mit diesem Status
    pub async fn wait_for(&mut self, status: CallStatus) -> CallSession {
        self.wait_until(|s| s.status == status).await
    }

    /// Wartet auf den nächsten Snapshot, der `predicate` erfüllt
    pub async fn wait_until(&mut self, predicate: impl Fn(&CallSession) -> bool) -> CallSession {
        let deadline = Duration::from_secs(600);
        tokio::time::timeout(deadline, async {
            loop {
                match self.snapshots.recv().await {
                    Ok(session) if predicate(&session) => return session,
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => {
                        panic!("snapshot channel closed")
                    }
                }
            }
        })
        .await
        .unwrap_or_else(|_| panic!("no matching snapshot"))
    }

    /// Lässt alle bereiten Tasks laufen (Forwarder, Media-Tasks, Loop)
    pub async fn settle(&self) {
        for _ in 0..50 {
            tokio::task::yield_now().await;
        }
    }

    /// Ausgehender Anruf bis `Active`
    pub async fn active_outgoing(&mut self, kind: CallKind) -> CallSession {
        let session = self
            .manager
            .initiate_call(vec!["bob".to_string()], kind)
            .await
            .unwrap();
        self.signaling.inject(
            "bob",
            CallMessage::CallAccept {
                session_id: session.id.clone(),
            },
        );
        self.wait_for(CallStatus::Active).await
    }

    /// Eingehende Einladung von `from`
    pub fn invite(&self, from: &str, session_id: &str, kind: CallKind) {
        self.signaling.inject(
            from,
            CallMessage::CallInvite {
                session_id: session_id.to_string(),
                from_id: from.to_string(),
                to_ids: vec!["me".to_string()],
                kind,
            },
        );
    }

    pub async fn history_items(&self) -> Vec<CallHistoryItem> {
        self.settle().await;
        self.history.items()
    }
}
