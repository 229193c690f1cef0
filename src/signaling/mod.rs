//! Signaling Module - Call-Steuerung über einen persistenten Kanal
//!
//! Dieses Modul verwaltet die Kommunikation mit dem Signaling-Server:
//! - Transport-unabhängiger `SignalingChannel`-Trait für die Call-Engine
//! - WebSocket-Client mit Registrierung, Keepalive und Reconnect
//! - Nachrichten signieren und senden
//! - Eingehende Nachrichten parsen und weiterleiten
//!

mod channel;
mod client;
mod messages;

pub use channel::{InboundSignal, OutboundSignal, SignalingChannel, SignalingError, SignalingEvent};
pub use client::SignalingClient;
pub use messages::*;
