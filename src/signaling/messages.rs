//! Message Types für das Signaling-Protokoll
//!
//! Zwei Ebenen:
//! - `CallMessage`: Call-Steuerung zwischen Peers (transport-unabhängig)
//! - Client/Server-Frames: Umschlag für den WebSocket-Relay des Workers

use crate::call_engine::{CallKind, RejectReason};
use serde::{Deserialize, Serialize};

// ============================================================================
// CALL MESSAGES (PEER ↔ PEER)
// ============================================================================

/// Call-Steuernachrichten, die der Server unverändert weiterreicht
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum CallMessage {
    CallInvite {
        session_id: String,
        from_id: String,
        to_ids: Vec<String>,
        kind: CallKind,
    },

    CallAccept {
        session_id: String,
    },

    CallReject {
        session_id: String,
        reason: RejectReason,
    },

    CallEnd {
        session_id: String,
    },

    ModeSwitchRequest {
        session_id: String,
        target_kind: CallKind,
        seq: u64,
    },

    ModeSwitchResponse {
        session_id: String,
        seq: u64,
        accepted: bool,
    },

    /// Mute-/Kamera-Status des Absenders
    MediaState {
        session_id: String,
        audio_enabled: bool,
        video_enabled: bool,
    },

    Heartbeat {
        session_id: String,
    },
}

impl CallMessage {
    pub fn session_id(&self) -> &str {
        match self {
            CallMessage::CallInvite { session_id, .. }
            | CallMessage::CallAccept { session_id }
            | CallMessage::CallReject { session_id, .. }
            | CallMessage::CallEnd { session_id }
            | CallMessage::ModeSwitchRequest { session_id, .. }
            | CallMessage::ModeSwitchResponse { session_id, .. }
            | CallMessage::MediaState { session_id, .. }
            | CallMessage::Heartbeat { session_id } => session_id,
        }
    }

    /// Kurzname für Logs
    pub fn label(&self) -> &'static str {
        match self {
            CallMessage::CallInvite { .. } => "call_invite",
            CallMessage::CallAccept { .. } => "call_accept",
            CallMessage::CallReject { .. } => "call_reject",
            CallMessage::CallEnd { .. } => "call_end",
            CallMessage::ModeSwitchRequest { .. } => "mode_switch_request",
            CallMessage::ModeSwitchResponse { .. } => "mode_switch_response",
            CallMessage::MediaState { .. } => "media_state",
            CallMessage::Heartbeat { .. } => "heartbeat",
        }
    }
}

// ============================================================================
// CLIENT → SERVER MESSAGES
// ============================================================================

/// Registrierung eines Benutzers
#[derive(Debug, Clone, Serialize)]
pub struct RegisterPayload {
    #[serde(rename = "type")]
    pub msg_type: &'static str,
    pub username: String,
    #[serde(rename = "publicKey")]
    pub public_key: String,
}

impl RegisterPayload {
    pub fn new(username: String, public_key: String) -> Self {
        Self {
            msg_type: "register",
            username,
            public_key,
        }
    }
}

/// Call-Nachricht an einen oder mehrere Peers weiterleiten
#[derive(Debug, Clone, Serialize)]
pub struct RelayPayload {
    #[serde(rename = "type")]
    pub msg_type: &'static str,
    #[serde(rename = "fromPeerId")]
    pub from_peer_id: String,
    #[serde(rename = "toPeerIds")]
    pub to_peer_ids: Vec<String>,
    pub payload: CallMessage,
}

impl RelayPayload {
    pub fn new(from_peer_id: String, to_peer_ids: Vec<String>, payload: CallMessage) -> Self {
        Self {
            msg_type: "relay",
            from_peer_id,
            to_peer_ids,
            payload,
        }
    }
}

/// Keepalive gegen den Idle-Timeout des Workers
#[derive(Debug, Clone, Serialize)]
pub struct KeepalivePayload {
    #[serde(rename = "type")]
    pub msg_type: &'static str,
    #[serde(rename = "peerId")]
    pub peer_id: String,
}

impl KeepalivePayload {
    pub fn new(peer_id: String) -> Self {
        Self {
            msg_type: "keepalive",
            peer_id,
        }
    }
}

// ============================================================================
// SERVER → CLIENT MESSAGES
// ============================================================================

/// Alle möglichen Server-Nachrichten
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Erfolgreiche Registrierung
    Registered {
        #[serde(rename = "peerId")]
        peer_id: String,
        username: String,
        #[serde(default)]
        timestamp: i64,
    },

    /// Weitergeleitete Call-Nachricht eines Peers
    Signal {
        #[serde(rename = "fromPeerId")]
        from_peer_id: String,
        payload: CallMessage,
        #[serde(default)]
        timestamp: i64,
    },

    /// Empfänger nicht erreichbar
    DeliveryFailed {
        #[serde(rename = "toPeerId")]
        to_peer_id: String,
        reason: String,
        #[serde(default)]
        timestamp: i64,
    },

    /// Fehler
    Error {
        code: i32,
        message: String,
        #[serde(default)]
        timestamp: i64,
    },

    /// Keepalive-Antwort
    Pong {
        #[serde(default)]
        timestamp: i64,
    },
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_invite_wire_format() {
        let msg = CallMessage::CallInvite {
            session_id: "s-1".to_string(),
            from_id: "alice".to_string(),
            to_ids: vec!["bob".to_string()],
            kind: CallKind::Video,
        };

        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "call_invite");
        assert_eq!(json["sessionId"], "s-1");
        assert_eq!(json["fromId"], "alice");
        assert_eq!(json["toIds"][0], "bob");
        assert_eq!(json["kind"], "video");
    }

    #[test]
    fn test_parse_signal_from_server() {
        let raw = r#"{
            "type": "signal",
            "fromPeerId": "bob",
            "payload": { "type": "mode_switch_response", "sessionId": "s-1", "seq": 3, "accepted": false },
            "timestamp": 1700000000000
        }"#;

        match serde_json::from_str::<ServerMessage>(raw).unwrap() {
            ServerMessage::Signal {
                from_peer_id,
                payload,
                ..
            } => {
                assert_eq!(from_peer_id, "bob");
                assert_eq!(
                    payload,
                    CallMessage::ModeSwitchResponse {
                        session_id: "s-1".to_string(),
                        seq: 3,
                        accepted: false,
                    }
                );
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_reject_reason_is_snake_case() {
        let msg = CallMessage::CallReject {
            session_id: "s-2".to_string(),
            reason: RejectReason::Busy,
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains(r#""reason":"busy""#));
        assert_eq!(msg.session_id(), "s-2");
    }

    #[test]
    fn test_relay_payload_shape() {
        let relay = RelayPayload::new(
            "alice".to_string(),
            vec!["bob".to_string()],
            CallMessage::Heartbeat {
                session_id: "s-3".to_string(),
            },
        );
        let json = serde_json::to_value(&relay).unwrap();
        assert_eq!(json["type"], "relay");
        assert_eq!(json["toPeerIds"][0], "bob");
        assert_eq!(json["payload"]["type"], "heartbeat");
    }
}
