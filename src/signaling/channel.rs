//! Transport-unabhängige Signaling-Schnittstelle
//!
//! Die Call-Engine sieht nur diesen Trait. Der WebSocket-Client ist eine
//! Implementierung, Tests verwenden eine In-Memory-Variante.

use super::messages::CallMessage;
use thiserror::Error;
use tokio::sync::broadcast;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignalingError {
    #[error("WebSocket connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Not connected to signaling server")]
    NotConnected,

    #[error("Failed to send message: {0}")]
    SendFailed(String),

    #[error("Registration failed: {0}")]
    RegistrationFailed(String),

    #[error("Server error: {code} - {message}")]
    ServerError { code: i32, message: String },
}

// ============================================================================
// SIGNALS & EVENTS
// ============================================================================

/// Ausgehende Call-Nachricht mit Empfängern
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundSignal {
    pub to: Vec<String>,
    pub message: CallMessage,
}

impl OutboundSignal {
    pub fn new(to: Vec<String>, message: CallMessage) -> Self {
        Self { to, message }
    }
}

/// Eingehende Call-Nachricht mit Absender
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundSignal {
    pub from: String,
    pub message: CallMessage,
}

/// Events des Signaling-Kanals
///
/// Verbindungsverlust ist bewusst keine Nachricht, sondern ein eigenes Event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalingEvent {
    /// Call-Nachricht eines Peers (Reihenfolge wie empfangen)
    Message(InboundSignal),
    /// Verbindung zum Server verloren
    ConnectionLost,
    /// Verbindung wieder hergestellt und neu registriert
    ConnectionRestored,
}

// ============================================================================
// CHANNEL TRAIT
// ============================================================================

pub trait SignalingChannel: Send + Sync + 'static {
    /// Eigene Peer-ID (erst nach der Registrierung bekannt)
    fn local_id(&self) -> Option<String>;

    /// Fire-and-forget: blockiert nie, Zustellung ist nicht garantiert
    fn send(&self, signal: OutboundSignal) -> Result<(), SignalingError>;

    fn subscribe(&self) -> broadcast::Receiver<SignalingEvent>;
}
