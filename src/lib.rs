//! Pulse Calls - Call-Session-Engine für P2P Audio-/Video-Anrufe
//!
//! Bausteine:
//! - Cloudflare Worker als Signaling-Server (WebSocket, signierte Frames)
//! - State-Machine für genau einen Anruf (1:1 oder Gruppe)
//! - Audio ↔ Video Mode Switch während des Gesprächs
//! - SQLite für Kontakte und Anrufliste
//!
//! Der konkrete Media-Stack wird als `MediaTransport` von außen übergeben.

pub mod call_engine;
pub mod config;
pub mod crypto;
pub mod database;
pub mod media;
pub mod registry;
pub mod signaling;

use anyhow::Context;
use call_engine::{CallHistoryItem, CallHistoryRecorder, CallKind, CallSession, CallSessionManager};
use config::CallConfig;
use crypto::KeyPair;
use database::{Contact, ContactsDatabase, HistoryDatabase, NewContact};
use media::MediaTransport;
use once_cell::sync::OnceCell;
use registry::ParticipantRegistry;
use signaling::SignalingClient;
use std::sync::Arc;
use tokio::sync::broadcast;

// ============================================================================
// LOGGING
// ============================================================================

/// Installiert den globalen `tracing`-Subscriber
///
/// `RUST_LOG` hat Vorrang vor den Default-Direktiven. Ist bereits ein
/// Subscriber installiert, passiert nichts.
pub fn init_logging() {
    let mut filter = tracing_subscriber::EnvFilter::from_default_env();
    for directive in ["call_session_lib=debug", "tungstenite=warn", "rusqlite=warn"] {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }

    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

// ============================================================================
// APPLICATION STATE
// ============================================================================

/// Globaler Application State
pub struct AppState {
    config: CallConfig,
    keypair: Arc<KeyPair>,
    signaling: Arc<SignalingClient>,
    calls: CallSessionManager,
    contacts: Arc<ContactsDatabase>,
    history: Arc<CallHistoryRecorder>,
}

/// Singleton für den AppState
static APP_STATE: OnceCell<Arc<AppState>> = OnceCell::new();

impl AppState {
    /// Initialisiert den Application State und registriert ihn global
    ///
    /// Muss innerhalb einer Tokio-Runtime aufgerufen werden.
    pub fn init(config: CallConfig, media: Arc<dyn MediaTransport>) -> anyhow::Result<Arc<Self>> {
        init_logging();

        let state = Self::build(config, media)?;
        APP_STATE
            .set(Arc::clone(&state))
            .map_err(|_| anyhow::anyhow!("AppState already initialized"))?;

        Ok(state)
    }

    /// Gibt den globalen AppState zurück
    pub fn get() -> Option<Arc<Self>> {
        APP_STATE.get().cloned()
    }

    /// Verdrahtet alle Komponenten, ohne den globalen State zu setzen
    pub fn build(config: CallConfig, media: Arc<dyn MediaTransport>) -> anyhow::Result<Arc<Self>> {
        tracing::info!("Initializing Pulse call engine...");

        let data_dir = config
            .resolve_data_dir()
            .context("Failed to determine data directory")?;

        let keypair = KeyPair::load_or_create(&data_dir).context("Failed to load device key")?;
        tracing::info!("Loaded keypair: {:?}", keypair);
        let keypair = Arc::new(keypair);

        let contacts = Arc::new(
            ContactsDatabase::open(&data_dir).context("Failed to open contacts database")?,
        );
        let history_db =
            Arc::new(HistoryDatabase::open(&data_dir).context("Failed to open call history")?);
        tracing::info!("Databases opened in {:?}", data_dir);

        let signaling = Arc::new(SignalingClient::new(&config, Arc::clone(&keypair)));
        let registry = Arc::new(ParticipantRegistry::new(contacts.clone()));
        let history = Arc::new(CallHistoryRecorder::new(history_db));

        let calls = CallSessionManager::spawn(
            config.clone(),
            signaling.clone(),
            media,
            registry,
            history.clone(),
        );
        spawn_snapshot_logger(calls.subscribe());

        Ok(Arc::new(Self {
            config,
            keypair,
            signaling,
            calls,
            contacts,
            history,
        }))
    }

    pub fn config(&self) -> &CallConfig {
        &self.config
    }

    /// Snapshots aller Zustandsänderungen (für die UI)
    pub fn subscribe_calls(&self) -> broadcast::Receiver<CallSession> {
        self.calls.subscribe()
    }

    // ========================================================================
    // IDENTITY
    // ========================================================================

    pub fn public_key(&self) -> String {
        self.keypair.public_key_base64()
    }

    /// Peer-ID (erst nach der Registrierung bekannt)
    pub fn peer_id(&self) -> Option<String> {
        self.signaling.peer_id()
    }

    pub fn username(&self) -> Option<String> {
        self.signaling.username()
    }

    // ========================================================================
    // SIGNALING
    // ========================================================================

    /// Verbindet mit dem Signaling-Server, registriert den Benutzer und
    /// startet den Keepalive
    pub async fn connect_and_register(&self, username: String) -> anyhow::Result<String> {
        tracing::info!("Connecting as '{}'...", username);

        let peer_id = self
            .signaling
            .connect_and_register(username)
            .await
            .context("Failed to register with signaling server")?;
        Arc::clone(&self.signaling).start_keepalive();

        tracing::info!("Registered with peer_id: {}", peer_id);
        Ok(peer_id)
    }

    pub fn disconnect(&self) {
        self.signaling.disconnect();
    }

    // ========================================================================
    // CALLS
    // ========================================================================

    /// Startet einen ausgehenden Anruf
    pub async fn start_call(
        &self,
        contact_ids: Vec<String>,
        kind: CallKind,
    ) -> anyhow::Result<CallSession> {
        tracing::info!("Starting {} call to {:?}", kind.as_str(), contact_ids);
        self.calls
            .initiate_call(contact_ids, kind)
            .await
            .context("Failed to start call")
    }

    /// Nimmt den klingelnden Anruf an
    pub async fn accept_call(&self) -> anyhow::Result<CallSession> {
        self.calls
            .answer_call()
            .await
            .context("Failed to accept call")
    }

    pub async fn reject_call(&self) -> anyhow::Result<CallSession> {
        self.calls
            .reject_call()
            .await
            .context("Failed to reject call")
    }

    /// Beendet den aktuellen Anruf
    pub async fn hangup(&self) -> anyhow::Result<Option<CallSession>> {
        tracing::info!("Hanging up");
        self.calls.end_call().await.context("Failed to hang up")
    }

    pub async fn toggle_mute(&self) -> anyhow::Result<Option<CallSession>> {
        Ok(self.calls.toggle_mute().await?)
    }

    pub async fn toggle_speaker(&self) -> anyhow::Result<Option<CallSession>> {
        Ok(self.calls.toggle_speaker().await?)
    }

    pub async fn toggle_video(&self) -> anyhow::Result<Option<CallSession>> {
        Ok(self.calls.toggle_video().await?)
    }

    pub async fn switch_camera(&self) -> anyhow::Result<Option<CallSession>> {
        Ok(self.calls.switch_camera().await?)
    }

    /// Fragt den Wechsel auf `kind` beim Gegenüber an
    pub async fn request_mode_switch(&self, kind: CallKind) -> anyhow::Result<CallSession> {
        self.calls
            .request_mode_switch(kind)
            .await
            .with_context(|| format!("Failed to request switch to {}", kind.as_str()))
    }

    pub async fn respond_mode_switch(&self, accept: bool) -> anyhow::Result<CallSession> {
        self.calls
            .respond_mode_switch(accept)
            .await
            .context("Failed to answer mode switch")
    }

    /// Aktueller Anruf (`None` im Leerlauf)
    pub fn call_state(&self) -> Option<CallSession> {
        self.calls.snapshot()
    }

    /// Anrufliste, neueste zuerst
    pub async fn call_history(&self, limit: usize) -> anyhow::Result<Vec<CallHistoryItem>> {
        self.history
            .recent(limit)
            .await
            .context("Failed to load call history")
    }

    /// Beendet einen laufenden Anruf und stoppt Engine und Signaling
    pub async fn shutdown(&self) {
        self.calls.shutdown().await;
        self.signaling.disconnect();
    }

    // ========================================================================
    // CONTACTS
    // ========================================================================

    pub fn get_contacts(&self) -> anyhow::Result<Vec<Contact>> {
        self.contacts
            .get_all_contacts()
            .context("Failed to load contacts")
    }

    /// Fügt einen Kontakt hinzu oder aktualisiert ihn
    pub fn add_contact(&self, contact: NewContact) -> anyhow::Result<Contact> {
        let contact_id = contact.contact_id.clone();
        self.contacts
            .upsert_contact(contact)
            .with_context(|| format!("Failed to save contact {}", contact_id))
    }

    pub fn delete_contact(&self, contact_id: &str) -> anyhow::Result<()> {
        self.contacts
            .delete_contact(contact_id)
            .with_context(|| format!("Failed to delete contact {}", contact_id))
    }

    /// Aktualisiert den Display-Namen eines Kontakts
    pub fn update_contact_name(
        &self,
        contact_id: &str,
        display_name: Option<&str>,
    ) -> anyhow::Result<()> {
        self.contacts
            .set_display_name(contact_id, display_name)
            .with_context(|| format!("Failed to rename contact {}", contact_id))
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("signaling", &self.signaling)
            .field("calls", &self.calls)
            .finish()
    }
}

// ============================================================================
// EVENT HANDLER
// ============================================================================

/// Protokolliert jeden Snapshot der Engine
fn spawn_snapshot_logger(mut rx: broadcast::Receiver<CallSession>) {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(session) => match &session.outcome {
                    Some(outcome) => tracing::info!(
                        "Call {} ended: {} (missed={}, dropped={})",
                        session.id,
                        outcome.reason.label(),
                        outcome.missed,
                        outcome.dropped
                    ),
                    None => tracing::debug!(
                        "Call {}: {:?} ({}, {} participants)",
                        session.id,
                        session.status,
                        session.kind.as_str(),
                        session.participants.len()
                    ),
                },
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!("Snapshot logger skipped {} snapshots", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

// ============================================================================
// TESTS
// ============================================================================
