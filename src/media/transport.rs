//! MediaTransport Trait und Handles
//!
//! Alle Operationen sind asynchron und dürfen fehlschlagen. Die Engine ruft
//! sie nie direkt in ihrer Event-Loop auf, sondern in eigenen Tasks und
//! verarbeitet das Ergebnis als Event.

use crate::call_engine::CallKind;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;
use uuid::Uuid;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MediaError {
    #[error("Permission to capture media was denied")]
    PermissionDenied,

    #[error("Capture device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("Failed to attach remote stream: {0}")]
    AttachFailed(String),

    #[error("Media transport error: {0}")]
    Transport(String),
}

// ============================================================================
// HANDLES
// ============================================================================

/// Handle auf die lokal aufgenommenen Tracks
///
/// Pro Session existiert genau ein Handle; es wird auf jedem Weg nach
/// `Ended` über `MediaTransport::release` freigegeben.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LocalMediaHandle {
    id: Uuid,
    kind: CallKind,
}

impl LocalMediaHandle {
    pub fn new(kind: CallKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Art der Tracks, mit der das Handle angefordert wurde
    pub fn kind(&self) -> CallKind {
        self.kind
    }
}

/// Handle auf den Remote-Stream eines Teilnehmers
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RemoteMediaHandle {
    id: Uuid,
    contact_id: String,
}

impl RemoteMediaHandle {
    pub fn new(contact_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            contact_id: contact_id.into(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn contact_id(&self) -> &str {
        &self.contact_id
    }
}

/// Beschreibt, welcher Remote-Stream angehängt werden soll
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteDescriptor {
    pub session_id: String,
    pub contact_id: String,
    pub kind: CallKind,
}

// ============================================================================
// EVENTS
// ============================================================================

/// Zustandsmeldungen des Transports an die Engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaEvent {
    /// Medienpfad zum Peer unterbrochen
    LinkLost,
    /// Medienpfad wieder hergestellt
    LinkRestored,
}

// ============================================================================
// TRANSPORT TRAIT
// ============================================================================

/// Fähigkeit "Echtzeit-Medien" – konkrete Implementierung liegt außerhalb
/// dieses Crates (WebRTC, native SDK, Loopback für Tests)
#[async_trait]
pub trait MediaTransport: Send + Sync + 'static {
    /// Fordert Mikrofon (und Kamera bei Video) an; kann auf eine
    /// Berechtigungsabfrage warten
    async fn acquire_local(&self, kind: CallKind) -> Result<LocalMediaHandle, MediaError>;

    async fn attach_remote(
        &self,
        descriptor: &RemoteDescriptor,
    ) -> Result<RemoteMediaHandle, MediaError>;

    async fn detach_remote(&self, handle: RemoteMediaHandle);

    async fn set_audio_enabled(
        &self,
        handle: &LocalMediaHandle,
        enabled: bool,
    ) -> Result<(), MediaError>;

    async fn set_video_enabled(
        &self,
        handle: &LocalMediaHandle,
        enabled: bool,
    ) -> Result<(), MediaError>;

    /// Audio-Ausgabe auf Lautsprecher (true) oder Hörmuschel (false)
    async fn set_speaker_enabled(
        &self,
        handle: &LocalMediaHandle,
        enabled: bool,
    ) -> Result<(), MediaError>;

    async fn switch_capture_device(&self, handle: &LocalMediaHandle) -> Result<(), MediaError>;

    /// Handelt die Tracks für eine neue Call-Art neu aus (Mode Switch)
    async fn renegotiate(&self, handle: &LocalMediaHandle, kind: CallKind)
        -> Result<(), MediaError>;

    async fn release(&self, handle: LocalMediaHandle);

    /// Event-Receiver für Link-Verlust/-Wiederherstellung
    fn subscribe(&self) -> broadcast::Receiver<MediaEvent>;
}
