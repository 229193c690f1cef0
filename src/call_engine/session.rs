//! Datenmodell einer Call-Session
//!
//! Die Engine ist der einzige Schreiber dieser Strukturen. Nach außen gehen
//! nur Kopien (Snapshots), die UI und History lesen.

use crate::media::RemoteMediaHandle;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// ENUMS
// ============================================================================

/// Art eines Anrufs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallKind {
    Audio,
    Video,
}

impl CallKind {
    pub fn has_video(self) -> bool {
        matches!(self, CallKind::Video)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CallKind::Audio => "audio",
            CallKind::Video => "video",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "audio" => Some(CallKind::Audio),
            "video" => Some(CallKind::Video),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallDirection {
    Outgoing,
    Incoming,
}

impl CallDirection {
    pub fn as_str(self) -> &'static str {
        match self {
            CallDirection::Outgoing => "outgoing",
            CallDirection::Incoming => "incoming",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "outgoing" => Some(CallDirection::Outgoing),
            "incoming" => Some(CallDirection::Incoming),
            _ => None,
        }
    }
}

/// Zustände der State-Machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallStatus {
    /// Kein aktiver Anruf
    Idle,
    /// Ausgehender Anruf klingelt beim Gegenüber
    Dialing,
    /// Eingehender Anruf wartet auf Antwort
    RingingIncoming,
    /// Medien werden aufgebaut
    Connecting,
    /// Anruf aktiv
    Active,
    /// Link verloren, warte auf Wiederherstellung
    Reconnecting,
    /// Anruf beendet
    Ended,
}

impl CallStatus {
    /// Zulässige Kanten der State-Machine
    pub fn can_transition_to(self, next: CallStatus) -> bool {
        use CallStatus::*;
        matches!(
            (self, next),
            (Idle, Dialing)
                | (Idle, RingingIncoming)
                | (Dialing, Connecting)
                | (Dialing, Ended)
                | (RingingIncoming, Connecting)
                | (RingingIncoming, Ended)
                | (Connecting, Active)
                | (Connecting, Ended)
                | (Active, Reconnecting)
                | (Active, Ended)
                | (Reconnecting, Active)
                | (Reconnecting, Ended)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, CallStatus::Ended)
    }

    /// Zustände, in denen lokale Medien existieren (oder gerade entstehen)
    pub fn has_media(self) -> bool {
        matches!(
            self,
            CallStatus::Connecting | CallStatus::Active | CallStatus::Reconnecting
        )
    }

    pub fn is_ringing(self) -> bool {
        matches!(self, CallStatus::Dialing | CallStatus::RingingIncoming)
    }
}

/// Grund für die Ablehnung eines Anrufs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    Declined,
    Busy,
    Timeout,
}

/// Warum eine Session beendet wurde
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum EndReason {
    LocalHangup,
    RemoteHangup,
    LocalRejected,
    RemoteRejected { rejected_with: RejectReason },
    RingTimeout,
    ConnectTimeout,
    MediaFailed { message: String },
    Dropped,
}

impl EndReason {
    pub fn label(&self) -> &'static str {
        match self {
            EndReason::LocalHangup => "local_hangup",
            EndReason::RemoteHangup => "remote_hangup",
            EndReason::LocalRejected => "local_rejected",
            EndReason::RemoteRejected { .. } => "remote_rejected",
            EndReason::RingTimeout => "ring_timeout",
            EndReason::ConnectTimeout => "connect_timeout",
            EndReason::MediaFailed { .. } => "media_failed",
            EndReason::Dropped => "dropped",
        }
    }
}

/// Klassifizierung einer beendeten Session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallOutcome {
    pub reason: EndReason,
    pub missed: bool,
    pub dropped: bool,
}

// ============================================================================
// FLAGS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CameraFacing {
    Front,
    Back,
}

impl CameraFacing {
    pub fn flipped(self) -> Self {
        match self {
            CameraFacing::Front => CameraFacing::Back,
            CameraFacing::Back => CameraFacing::Front,
        }
    }
}

/// Lokale Steuer-Flags (Mute, Kamera, Lautsprecher)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalFlags {
    pub audio_enabled: bool,
    pub video_enabled: bool,
    pub speaker_on: bool,
    pub camera: CameraFacing,
}

impl LocalFlags {
    /// Video-Anrufe starten mit Kamera und Lautsprecher
    pub fn for_kind(kind: CallKind) -> Self {
        Self {
            audio_enabled: true,
            video_enabled: kind.has_video(),
            speaker_on: kind.has_video(),
            camera: CameraFacing::Front,
        }
    }
}

/// Vom Peer zuletzt gemeldeter Medienstatus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFlags {
    pub audio_enabled: bool,
    pub video_enabled: bool,
}

impl RemoteFlags {
    pub fn for_kind(kind: CallKind) -> Self {
        Self {
            audio_enabled: true,
            video_enabled: kind.has_video(),
        }
    }
}

// ============================================================================
// PARTICIPANT
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantState {
    /// Eingeladen, noch keine Antwort
    Invited,
    /// Im Anruf
    Joined,
    /// Abgelehnt oder aufgelegt
    Left,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub contact_id: String,
    pub display_name: String,
    pub avatar_ref: Option<String>,
    pub remote_flags: RemoteFlags,
    pub media_handle: Option<RemoteMediaHandle>,
    pub state: ParticipantState,
}

impl Participant {
    pub fn is_present(&self) -> bool {
        self.state != ParticipantState::Left
    }
}

// ============================================================================
// MODE SWITCH REQUEST
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwitchInitiator {
    Local,
    Remote,
}

/// Laufende Anfrage zum Wechsel der Call-Art
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModeSwitchRequest {
    pub requested_kind: CallKind,
    pub initiator: SwitchInitiator,
    pub seq: u64,
    pub expires_at: DateTime<Utc>,
}

// ============================================================================
// CALL SESSION
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallTimestamps {
    pub created_at: DateTime<Utc>,
    pub connected_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

/// Ein Anrufversuch von der Initiierung bis zum Ende
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallSession {
    pub id: String,
    pub kind: CallKind,
    pub direction: CallDirection,
    pub status: CallStatus,
    pub participants: Vec<Participant>,
    pub local_flags: LocalFlags,
    pub timestamps: CallTimestamps,
    pub pending_mode_switch: Option<ModeSwitchRequest>,
    pub outcome: Option<CallOutcome>,
}

impl CallSession {
    pub(crate) fn new(
        id: String,
        kind: CallKind,
        direction: CallDirection,
        status: CallStatus,
        participants: Vec<Participant>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            kind,
            direction,
            status,
            participants,
            local_flags: LocalFlags::for_kind(kind),
            timestamps: CallTimestamps {
                created_at: now,
                connected_at: None,
                ended_at: None,
            },
            pending_mode_switch: None,
            outcome: None,
        }
    }

    pub fn is_group(&self) -> bool {
        self.participants.len() > 1
    }

    pub fn participant(&self, contact_id: &str) -> Option<&Participant> {
        self.participants
            .iter()
            .find(|p| p.contact_id == contact_id)
    }

    pub(crate) fn participant_mut(&mut self, contact_id: &str) -> Option<&mut Participant> {
        self.participants
            .iter_mut()
            .find(|p| p.contact_id == contact_id)
    }

    /// Kontakt-IDs aller Teilnehmer, die noch nicht gegangen sind
    pub fn present_ids(&self) -> Vec<String> {
        self.participants
            .iter()
            .filter(|p| p.is_present())
            .map(|p| p.contact_id.clone())
            .collect()
    }

    /// Mindestens ein Teilnehmer ist dem Anruf beigetreten
    pub fn has_joined(&self) -> bool {
        self.participants
            .iter()
            .any(|p| p.state == ParticipantState::Joined)
    }

    pub fn contact_ids(&self) -> Vec<String> {
        self.participants
            .iter()
            .map(|p| p.contact_id.clone())
            .collect()
    }

    pub fn has_remote_media(&self) -> bool {
        self.participants.iter().any(|p| p.media_handle.is_some())
    }

    /// Gesprächsdauer (nur wenn verbunden und beendet)
    pub fn duration(&self) -> Option<chrono::Duration> {
        match (self.timestamps.connected_at, self.timestamps.ended_at) {
            (Some(connected), Some(ended)) => Some(ended - connected),
            _ => None,
        }
    }
}

/// Entfernt leere und doppelte IDs, Reihenfolge bleibt erhalten
pub(crate) fn dedupe_contact_ids<I>(ids: I, exclude: &str) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let mut unique: Vec<String> = Vec::new();
    for id in ids {
        let id = id.trim().to_string();
        if id.is_empty() || id == exclude || unique.contains(&id) {
            continue;
        }
        unique.push(id);
    }
    unique
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_edges() {
        assert!(CallStatus::Idle.can_transition_to(CallStatus::Dialing));
        assert!(CallStatus::Active.can_transition_to(CallStatus::Reconnecting));
        assert!(CallStatus::Reconnecting.can_transition_to(CallStatus::Active));

        // keine übersprungenen Zustände
        assert!(!CallStatus::Dialing.can_transition_to(CallStatus::Active));
        assert!(!CallStatus::RingingIncoming.can_transition_to(CallStatus::Active));
        assert!(!CallStatus::Connecting.can_transition_to(CallStatus::Reconnecting));
        assert!(!CallStatus::Ended.can_transition_to(CallStatus::Idle));
    }

    #[test]
    fn test_dedupe_contact_ids() {
        let ids = vec![
            "bob".to_string(),
            " alice ".to_string(),
            "bob".to_string(),
            "".to_string(),
            "me".to_string(),
        ];
        assert_eq!(dedupe_contact_ids(ids, "me"), vec!["bob", "alice"]);
    }

    #[test]
    fn test_duration_requires_connect() {
        let now = Utc::now();
        let mut session = CallSession::new(
            "s1".to_string(),
            CallKind::Audio,
            CallDirection::Outgoing,
            CallStatus::Dialing,
            Vec::new(),
            now,
        );
        session.timestamps.ended_at = Some(now + chrono::Duration::seconds(5));
        assert_eq!(session.duration(), None);

        session.timestamps.connected_at = Some(now + chrono::Duration::seconds(1));
        assert_eq!(session.duration(), Some(chrono::Duration::seconds(4)));
    }

    #[test]
    fn test_video_defaults_to_speaker() {
        let flags = LocalFlags::for_kind(CallKind::Video);
        assert!(flags.video_enabled && flags.speaker_on && flags.audio_enabled);

        let flags = LocalFlags::for_kind(CallKind::Audio);
        assert!(!flags.video_enabled && !flags.speaker_on);
    }
}
