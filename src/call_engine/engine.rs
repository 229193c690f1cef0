//! Call Session Manager
//!
//! State-Machine für genau eine Call-Session. Alle Änderungen laufen durch
//! eine einzige Event-Loop: Befehle der UI, Signaling-Nachrichten,
//! Ergebnisse des Media-Transports und Timer landen in derselben Queue.
//!
//! Lang laufende Media-Operationen (Kamera/Mikrofon anfordern, Remote-Streams
//! anhängen) laufen in eigenen Tasks und melden ihr Ergebnis als Event
//! zurück. Die Loop selbst wartet nie auf I/O.
//!
//! ```text
//! Idle ─► Dialing ─────────┐
//!   └──► RingingIncoming ──┴─► Connecting ─► Active ◄─► Reconnecting
//!
//! jeder Zustand außer Idle ─► Ended
//! ```

use super::history::CallHistoryRecorder;
use super::mode_switch::{ModeSwitchNegotiator, RemoteVerdict};
use super::session::{
    dedupe_contact_ids, CallDirection, CallKind, CallOutcome, CallSession, CallStatus,
    CameraFacing, EndReason, LocalFlags, ModeSwitchRequest, Participant, ParticipantState,
    RejectReason, RemoteFlags, SwitchInitiator,
};
use super::timers::{SessionTimers, TimerFired, TimerKind};
use crate::config::CallConfig;
use crate::media::{
    LocalMediaHandle, MediaError, MediaEvent, MediaTransport, RemoteDescriptor, RemoteMediaHandle,
};
use crate::registry::ParticipantRegistry;
use crate::signaling::{
    CallMessage, InboundSignal, OutboundSignal, SignalingChannel, SignalingError, SignalingEvent,
};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use uuid::Uuid;

const INPUT_QUEUE_SIZE: usize = 256;
const SNAPSHOT_BUFFER: usize = 64;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CallError {
    #[error("{operation} is not allowed while the call is {status:?}")]
    InvalidState {
        operation: &'static str,
        status: CallStatus,
    },

    #[error("No contacts to call")]
    NoContacts,

    #[error("A mode switch is already pending")]
    ModeSwitchPending,

    #[error("Call is already in {0:?} mode")]
    AlreadyInMode(CallKind),

    #[error("Signaling error: {0}")]
    Signaling(#[from] SignalingError),

    #[error("Call engine is not running")]
    EngineStopped,
}

// ============================================================================
// ENGINE INPUT
// ============================================================================

type Reply<T> = oneshot::Sender<Result<T, CallError>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LocalControl {
    Mute,
    Speaker,
    Video,
    SwitchCamera,
}

#[derive(Debug)]
enum Command {
    Initiate {
        contact_ids: Vec<String>,
        kind: CallKind,
        reply: Reply<CallSession>,
    },
    Answer(Reply<CallSession>),
    Reject(Reply<CallSession>),
    End(Reply<Option<CallSession>>),
    Control(LocalControl, Reply<Option<CallSession>>),
    RequestModeSwitch {
        kind: CallKind,
        reply: Reply<CallSession>,
    },
    RespondModeSwitch {
        accept: bool,
        reply: Reply<CallSession>,
    },
    Shutdown,
}

/// Ziel einer Media-Operation; bei Fehler wird auf den Vorwert zurückgesetzt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MediaOp {
    Audio { enabled: bool },
    Video { enabled: bool },
    Speaker { enabled: bool },
    SwitchCamera { facing: CameraFacing },
    Renegotiate { kind: CallKind, previous: CallKind },
}

#[derive(Debug)]
enum EngineInput {
    Command(Command),
    Signal(SignalingEvent),
    Media(MediaEvent),
    LocalAcquired {
        session_id: String,
        result: Result<LocalMediaHandle, MediaError>,
    },
    RemoteAttached {
        session_id: String,
        contact_id: String,
        result: Result<RemoteMediaHandle, MediaError>,
    },
    MediaOpFailed {
        session_id: String,
        op: MediaOp,
        error: MediaError,
    },
    Timer(TimerFired),
}

// ============================================================================
// CLOCK
// ============================================================================

/// Wanduhr, die mit der Tokio-Zeit läuft (auch mit pausierter Zeit in Tests)
struct SessionClock {
    origin_utc: DateTime<Utc>,
    origin: tokio::time::Instant,
}

impl SessionClock {
    fn new() -> Self {
        Self {
            origin_utc: Utc::now(),
            origin: tokio::time::Instant::now(),
        }
    }

    fn now(&self) -> DateTime<Utc> {
        self.origin_utc + to_chrono(self.origin.elapsed())
    }
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::zero())
}

// ============================================================================
// CALL SESSION MANAGER (HANDLE)
// ============================================================================

/// Handle auf die Event-Loop der Call-Engine
///
/// Klonbar; alle Klone sprechen mit derselben Loop.
#[derive(Clone)]
pub struct CallSessionManager {
    input_tx: mpsc::Sender<EngineInput>,
    snapshot_tx: broadcast::Sender<CallSession>,
    current: Arc<RwLock<Option<CallSession>>>,
}

impl CallSessionManager {
    /// Startet die Event-Loop (muss innerhalb einer Tokio-Runtime laufen)
    pub fn spawn(
        config: CallConfig,
        signaling: Arc<dyn SignalingChannel>,
        media: Arc<dyn MediaTransport>,
        registry: Arc<ParticipantRegistry>,
        recorder: Arc<CallHistoryRecorder>,
    ) -> Self {
        let (input_tx, input_rx) = mpsc::channel(INPUT_QUEUE_SIZE);
        let (snapshot_tx, _) = broadcast::channel(SNAPSHOT_BUFFER);
        let current = Arc::new(RwLock::new(None));

        // Vor dem Start abonnieren, damit kein Event verloren geht
        let forwarders = vec![
            forward(
                signaling.subscribe(),
                input_tx.clone(),
                EngineInput::Signal,
                "signaling",
            ),
            forward(media.subscribe(), input_tx.clone(), EngineInput::Media, "media"),
        ];

        let engine = EngineLoop {
            timers: SessionTimers::new(input_tx.clone(), EngineInput::Timer),
            config,
            signaling,
            media,
            registry,
            recorder,
            input_tx: input_tx.clone(),
            snapshot_tx: snapshot_tx.clone(),
            current: Arc::clone(&current),
            session: None,
            last_terminal: None,
            local_media: None,
            attaching: HashSet::new(),
            negotiator: ModeSwitchNegotiator::new(),
            clock: SessionClock::new(),
        };
        tokio::spawn(engine.run(input_rx, forwarders));

        Self {
            input_tx,
            snapshot_tx,
            current,
        }
    }

    /// Startet einen ausgehenden Anruf an einen oder mehrere Kontakte
    pub async fn initiate_call(
        &self,
        contact_ids: Vec<String>,
        kind: CallKind,
    ) -> Result<CallSession, CallError> {
        self.request(|reply| Command::Initiate {
            contact_ids,
            kind,
            reply,
        })
        .await
    }

    pub async fn answer_call(&self) -> Result<CallSession, CallError> {
        self.request(Command::Answer).await
    }

    pub async fn reject_call(&self) -> Result<CallSession, CallError> {
        self.request(Command::Reject).await
    }

    /// Beendet den laufenden Anruf; liefert die beendete Session
    pub async fn end_call(&self) -> Result<Option<CallSession>, CallError> {
        self.request(Command::End).await
    }

    pub async fn toggle_mute(&self) -> Result<Option<CallSession>, CallError> {
        self.request(|reply| Command::Control(LocalControl::Mute, reply))
            .await
    }

    pub async fn toggle_speaker(&self) -> Result<Option<CallSession>, CallError> {
        self.request(|reply| Command::Control(LocalControl::Speaker, reply))
            .await
    }

    pub async fn toggle_video(&self) -> Result<Option<CallSession>, CallError> {
        self.request(|reply| Command::Control(LocalControl::Video, reply))
            .await
    }

    pub async fn switch_camera(&self) -> Result<Option<CallSession>, CallError> {
        self.request(|reply| Command::Control(LocalControl::SwitchCamera, reply))
            .await
    }

    pub async fn request_mode_switch(&self, kind: CallKind) -> Result<CallSession, CallError> {
        self.request(|reply| Command::RequestModeSwitch { kind, reply })
            .await
    }

    pub async fn respond_mode_switch(&self, accept: bool) -> Result<CallSession, CallError> {
        self.request(|reply| Command::RespondModeSwitch { accept, reply })
            .await
    }

    /// Snapshots jeder Zustandsänderung
    pub fn subscribe(&self) -> broadcast::Receiver<CallSession> {
        self.snapshot_tx.subscribe()
    }

    /// Aktuelle Session (`None` im Leerlauf)
    pub fn snapshot(&self) -> Option<CallSession> {
        self.current.read().clone()
    }

    /// Beendet einen laufenden Anruf und stoppt die Event-Loop
    pub async fn shutdown(&self) {
        let _ = self
            .input_tx
            .send(EngineInput::Command(Command::Shutdown))
            .await;
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(Reply<T>) -> Command,
    ) -> Result<T, CallError> {
        let (reply, rx) = oneshot::channel();
        self.input_tx
            .send(EngineInput::Command(build(reply)))
            .await
            .map_err(|_| CallError::EngineStopped)?;
        rx.await.map_err(|_| CallError::EngineStopped)?
    }
}

impl std::fmt::Debug for CallSessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallSessionManager")
            .field(
                "status",
                &self.snapshot().map_or(CallStatus::Idle, |s| s.status),
            )
            .finish()
    }
}

/// Leitet einen Broadcast-Kanal in die Queue der Engine
fn forward<T, F>(
    mut rx: broadcast::Receiver<T>,
    tx: mpsc::Sender<EngineInput>,
    wrap: F,
    source: &'static str,
) -> JoinHandle<()>
where
    T: Clone + Send + 'static,
    F: Fn(T) -> EngineInput + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if tx.send(wrap(event)).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!("Call engine lagged behind {} events: {} dropped", source, skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

// ============================================================================
// EVENT LOOP
// ============================================================================

struct EngineLoop {
    config: CallConfig,
    signaling: Arc<dyn SignalingChannel>,
    media: Arc<dyn MediaTransport>,
    registry: Arc<ParticipantRegistry>,
    recorder: Arc<CallHistoryRecorder>,
    input_tx: mpsc::Sender<EngineInput>,
    snapshot_tx: broadcast::Sender<CallSession>,
    current: Arc<RwLock<Option<CallSession>>>,
    session: Option<CallSession>,
    /// Zuletzt beendete Session (Antwort auf Befehle nach dem Ende)
    last_terminal: Option<CallSession>,
    local_media: Option<LocalMediaHandle>,
    /// Laufende `attach_remote`-Aufrufe als (Session, Kontakt)
    attaching: HashSet<(String, String)>,
    timers: SessionTimers<EngineInput>,
    negotiator: ModeSwitchNegotiator,
    clock: SessionClock,
}

impl EngineLoop {
    async fn run(mut self, mut rx: mpsc::Receiver<EngineInput>, forwarders: Vec<JoinHandle<()>>) {
        tracing::info!("Call engine started");

        while let Some(input) = rx.recv().await {
            if !self.handle(input) {
                break;
            }
        }

        self.timers.cancel_all();
        for task in forwarders {
            task.abort();
        }
        tracing::info!("Call engine stopped");
    }

    /// Verarbeitet ein Event; `false` beendet die Loop
    fn handle(&mut self, input: EngineInput) -> bool {
        match input {
            EngineInput::Command(command) => return self.handle_command(command),
            EngineInput::Signal(event) => self.handle_signaling(event),
            EngineInput::Media(event) => self.handle_media_event(event),
            EngineInput::LocalAcquired { session_id, result } => {
                self.on_local_acquired(&session_id, result)
            }
            EngineInput::RemoteAttached {
                session_id,
                contact_id,
                result,
            } => self.on_remote_attached(&session_id, &contact_id, result),
            EngineInput::MediaOpFailed {
                session_id,
                op,
                error,
            } => self.on_media_op_failed(&session_id, op, error),
            EngineInput::Timer(fired) => self.on_timer(fired),
        }
        true
    }

    fn handle_command(&mut self, command: Command) -> bool {
        match command {
            Command::Initiate {
                contact_ids,
                kind,
                reply,
            } => {
                let _ = reply.send(self.initiate(contact_ids, kind));
            }
            Command::Answer(reply) => {
                let _ = reply.send(self.answer());
            }
            Command::Reject(reply) => {
                let _ = reply.send(self.reject());
            }
            Command::End(reply) => {
                let _ = reply.send(Ok(self.end()));
            }
            Command::Control(control, reply) => {
                let _ = reply.send(Ok(self.control(control)));
            }
            Command::RequestModeSwitch { kind, reply } => {
                let _ = reply.send(self.request_mode_switch(kind));
            }
            Command::RespondModeSwitch { accept, reply } => {
                let _ = reply.send(self.respond_mode_switch(accept));
            }
            Command::Shutdown => {
                if self.session.is_some() {
                    self.end();
                }
                return false;
            }
        }
        true
    }

    // ========================================================================
    // USER COMMANDS
    // ========================================================================

    fn initiate(
        &mut self,
        contact_ids: Vec<String>,
        kind: CallKind,
    ) -> Result<CallSession, CallError> {
        if let Some(session) = &self.session {
            return Err(CallError::InvalidState {
                operation: "initiate_call",
                status: session.status,
            });
        }

        let local_id = self
            .signaling
            .local_id()
            .ok_or(SignalingError::NotConnected)?;
        let ids = dedupe_contact_ids(contact_ids, &local_id);
        if ids.is_empty() {
            return Err(CallError::NoContacts);
        }

        let session_id = Uuid::new_v4().to_string();
        self.signaling.send(OutboundSignal::new(
            ids.clone(),
            CallMessage::CallInvite {
                session_id: session_id.clone(),
                from_id: local_id,
                to_ids: ids.clone(),
                kind,
            },
        ))?;

        let participants = ids
            .iter()
            .map(|id| self.new_participant(id, kind, ParticipantState::Invited))
            .collect();
        let session = CallSession::new(
            session_id.clone(),
            kind,
            CallDirection::Outgoing,
            CallStatus::Dialing,
            participants,
            self.clock.now(),
        );

        tracing::info!("Dialing {:?} ({} call {})", ids, kind.as_str(), session_id);
        self.begin(session);
        self.timers
            .arm(TimerKind::Ring, &session_id, self.config.ring_timeout());
        self.publish();
        self.live_snapshot("initiate_call")
    }

    fn answer(&mut self) -> Result<CallSession, CallError> {
        let (session_id, kind, peers) = match &self.session {
            Some(s) if s.status == CallStatus::RingingIncoming => {
                (s.id.clone(), s.kind, s.present_ids())
            }
            _ => return self.terminal_or_invalid("answer_call"),
        };

        self.transition(CallStatus::Connecting);
        self.send_to(
            peers.clone(),
            CallMessage::CallAccept {
                session_id: session_id.clone(),
            },
        );
        self.timers
            .arm(TimerKind::Connect, &session_id, self.config.connect_timeout());
        self.start_acquire(&session_id, kind);
        for contact_id in &peers {
            self.start_attach(&session_id, contact_id, kind);
        }

        self.publish();
        self.live_snapshot("answer_call")
    }

    fn reject(&mut self) -> Result<CallSession, CallError> {
        let session_id = match &self.session {
            Some(s) if s.status == CallStatus::RingingIncoming => s.id.clone(),
            _ => return self.terminal_or_invalid("reject_call"),
        };

        self.send_to_present(CallMessage::CallReject {
            session_id,
            reason: RejectReason::Declined,
        });
        self.finish(EndReason::LocalRejected)
            .ok_or(CallError::InvalidState {
                operation: "reject_call",
                status: CallStatus::Idle,
            })
    }

    fn end(&mut self) -> Option<CallSession> {
        let Some(session) = &self.session else {
            return self.last_terminal.clone();
        };

        let session_id = session.id.clone();
        if session.status == CallStatus::RingingIncoming {
            self.send_to_present(CallMessage::CallReject {
                session_id,
                reason: RejectReason::Declined,
            });
            self.finish(EndReason::LocalRejected)
        } else {
            self.send_to_present(CallMessage::CallEnd { session_id });
            self.finish(EndReason::LocalHangup)
        }
    }

    fn control(&mut self, control: LocalControl) -> Option<CallSession> {
        let Some(session) = self.session.as_mut() else {
            return self.last_terminal.clone();
        };

        if !session.status.has_media() {
            tracing::debug!("Ignoring {:?} while {:?}", control, session.status);
            return Some(session.clone());
        }
        let video_only = matches!(control, LocalControl::Video | LocalControl::SwitchCamera);
        if video_only && !session.kind.has_video() {
            tracing::debug!("Ignoring {:?} on an audio call", control);
            return Some(session.clone());
        }

        let flags = &mut session.local_flags;
        let op = match control {
            LocalControl::Mute => {
                flags.audio_enabled = !flags.audio_enabled;
                MediaOp::Audio {
                    enabled: flags.audio_enabled,
                }
            }
            LocalControl::Speaker => {
                flags.speaker_on = !flags.speaker_on;
                MediaOp::Speaker {
                    enabled: flags.speaker_on,
                }
            }
            LocalControl::Video => {
                flags.video_enabled = !flags.video_enabled;
                MediaOp::Video {
                    enabled: flags.video_enabled,
                }
            }
            LocalControl::SwitchCamera => {
                flags.camera = flags.camera.flipped();
                MediaOp::SwitchCamera {
                    facing: flags.camera,
                }
            }
        };
        let session_id = session.id.clone();

        tracing::debug!("Call {}: {:?}", session_id, op);
        // Ohne Handle werden die Flags beim Acquire angewendet
        if let Some(handle) = self.local_media.clone() {
            self.spawn_media_op(&session_id, handle, op);
        }
        if matches!(control, LocalControl::Mute | LocalControl::Video) {
            self.announce_media_state();
        }

        self.publish();
        self.session.clone()
    }

    fn request_mode_switch(&mut self, kind: CallKind) -> Result<CallSession, CallError> {
        let (session_id, peers) = match &self.session {
            Some(s) if s.status == CallStatus::Active => {
                if s.pending_mode_switch.is_some() {
                    return Err(CallError::ModeSwitchPending);
                }
                if s.kind == kind {
                    return Err(CallError::AlreadyInMode(kind));
                }
                (s.id.clone(), s.present_ids())
            }
            _ => return self.terminal_or_invalid("request_mode_switch"),
        };

        let seq = self.negotiator.open_local();
        self.send_to(
            peers,
            CallMessage::ModeSwitchRequest {
                session_id: session_id.clone(),
                target_kind: kind,
                seq,
            },
        );
        self.open_mode_switch(kind, SwitchInitiator::Local, seq);

        tracing::info!("Call {}: requested switch to {} (seq {})", session_id, kind.as_str(), seq);
        self.publish();
        self.live_snapshot("request_mode_switch")
    }

    fn respond_mode_switch(&mut self, accept: bool) -> Result<CallSession, CallError> {
        let (session_id, request) = match &self.session {
            Some(s) if s.status == CallStatus::Active => match &s.pending_mode_switch {
                Some(r) if r.initiator == SwitchInitiator::Remote => (s.id.clone(), r.clone()),
                _ => {
                    return Err(CallError::InvalidState {
                        operation: "respond_mode_switch",
                        status: s.status,
                    })
                }
            },
            _ => return self.terminal_or_invalid("respond_mode_switch"),
        };

        self.send_to_present(CallMessage::ModeSwitchResponse {
            session_id: session_id.clone(),
            seq: request.seq,
            accepted: accept,
        });
        self.close_mode_switch();

        if accept {
            self.apply_mode_switch(request.requested_kind);
        } else {
            tracing::info!("Call {}: declined switch to {}", session_id, request.requested_kind.as_str());
        }

        self.publish();
        self.live_snapshot("respond_mode_switch")
    }

    // ========================================================================
    // SIGNALING
    // ========================================================================

    fn handle_signaling(&mut self, event: SignalingEvent) {
        match event {
            SignalingEvent::Message(signal) => self.on_signal(signal),
            SignalingEvent::ConnectionLost => {
                tracing::warn!("Signaling connection lost");
                self.on_link_lost("signaling connection lost");
            }
            SignalingEvent::ConnectionRestored => self.on_link_restored("signaling reconnected"),
        }
    }

    fn on_signal(&mut self, signal: InboundSignal) {
        let InboundSignal { from, message } = signal;

        match message {
            CallMessage::CallInvite {
                session_id,
                to_ids,
                kind,
                ..
            } => self.on_invite(&from, session_id, to_ids, kind),
            other => self.on_session_signal(&from, other),
        }
    }

    fn on_invite(&mut self, from: &str, session_id: String, to_ids: Vec<String>, kind: CallKind) {
        if let Some(current) = &self.session {
            if current.id == session_id {
                tracing::debug!("Duplicate invite for {}", session_id);
            } else {
                tracing::info!("Busy: rejecting invite {} from {}", session_id, from);
                self.send_to(
                    vec![from.to_string()],
                    CallMessage::CallReject {
                        session_id,
                        reason: RejectReason::Busy,
                    },
                );
            }
            return;
        }
        if self
            .last_terminal
            .as_ref()
            .is_some_and(|s| s.id == session_id)
        {
            tracing::debug!("Ignoring invite for finished session {}", session_id);
            return;
        }

        let local_id = self.signaling.local_id().unwrap_or_default();
        let ids = dedupe_contact_ids(std::iter::once(from.to_string()).chain(to_ids), &local_id);
        if ids.is_empty() {
            tracing::warn!("Ignoring invite {} without participants", session_id);
            return;
        }

        let participants = ids
            .iter()
            .map(|id| self.new_participant(id, kind, ParticipantState::Joined))
            .collect();
        let session = CallSession::new(
            session_id.clone(),
            kind,
            CallDirection::Incoming,
            CallStatus::RingingIncoming,
            participants,
            self.clock.now(),
        );

        tracing::info!("Incoming {} call {} from {}", kind.as_str(), session_id, from);
        self.begin(session);
        self.timers
            .arm(TimerKind::Ring, &session_id, self.config.ring_timeout());
        self.publish();
    }

    /// Nachrichten zu einer bestehenden Session
    fn on_session_signal(&mut self, from: &str, message: CallMessage) {
        let known = match &self.session {
            Some(s) if s.id == message.session_id() => s.participant(from).is_some(),
            _ => false,
        };
        if !known {
            tracing::debug!(
                "Dropping {} from {} for session {}",
                message.label(),
                from,
                message.session_id()
            );
            return;
        }

        self.note_peer_activity();

        match message {
            CallMessage::CallAccept { .. } => self.on_accept(from),
            CallMessage::CallReject { reason, .. } => self.on_reject(from, reason),
            CallMessage::CallEnd { .. } => self.on_remote_end(from),
            CallMessage::ModeSwitchRequest {
                target_kind, seq, ..
            } => self.on_mode_switch_request(from, target_kind, seq),
            CallMessage::ModeSwitchResponse { seq, accepted, .. } => {
                self.on_mode_switch_response(seq, accepted)
            }
            CallMessage::MediaState {
                audio_enabled,
                video_enabled,
                ..
            } => self.on_media_state(from, audio_enabled, video_enabled),
            CallMessage::Heartbeat { .. } => self.on_link_restored("heartbeat received"),
            CallMessage::CallInvite { .. } => {}
        }
    }

    fn on_accept(&mut self, from: &str) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let status = session.status;
        let Some(participant) = session.participant_mut(from) else {
            return;
        };
        if participant.state != ParticipantState::Invited {
            tracing::debug!("Ignoring duplicate accept from {}", from);
            return;
        }
        if !(status == CallStatus::Dialing || status.has_media()) {
            tracing::debug!("Ignoring accept from {} while {:?}", from, status);
            return;
        }

        participant.state = ParticipantState::Joined;
        let session_id = session.id.clone();
        let kind = session.kind;
        tracing::info!("Call {}: {} accepted", session_id, from);

        if status == CallStatus::Dialing {
            self.transition(CallStatus::Connecting);
            self.timers
                .arm(TimerKind::Connect, &session_id, self.config.connect_timeout());
            self.start_acquire(&session_id, kind);
        }
        self.start_attach(&session_id, from, kind);
        self.publish();
    }

    fn on_reject(&mut self, from: &str, reason: RejectReason) {
        let Some(session) = &self.session else {
            return;
        };
        let ringing = session.status == CallStatus::RingingIncoming;
        let expected = session.participant(from).is_some_and(|p| {
            p.state == ParticipantState::Invited || (ringing && p.is_present())
        });
        if !expected {
            tracing::debug!("Ignoring reject from {}", from);
            return;
        }

        tracing::info!("Call {}: {} rejected ({:?})", session.id, from, reason);
        self.participant_left(from, EndReason::RemoteRejected { rejected_with: reason });
    }

    fn on_remote_end(&mut self, from: &str) {
        let present = self
            .session
            .as_ref()
            .and_then(|s| s.participant(from))
            .is_some_and(Participant::is_present);
        if !present {
            tracing::debug!("Ignoring duplicate end from {}", from);
            return;
        }

        tracing::info!("{} left the call", from);
        self.participant_left(from, EndReason::RemoteHangup);
    }

    /// Markiert einen Teilnehmer als gegangen; ohne Teilnehmer endet die Session.
    /// Nach der Klingelphase endet sie, sobald niemand mehr beigetreten ist.
    fn participant_left(&mut self, contact_id: &str, reason: EndReason) {
        let Some(session) = self.session.as_mut() else {
            return;
        };

        let inviter_left = session.direction == CallDirection::Incoming
            && session.status == CallStatus::RingingIncoming
            && session
                .participants
                .first()
                .is_some_and(|p| p.contact_id == contact_id);

        let mut detached = None;
        if let Some(participant) = session.participant_mut(contact_id) {
            participant.state = ParticipantState::Left;
            detached = participant.media_handle.take();
        }
        // Nach der Klingelphase zählen nur noch beigetretene Teilnehmer
        let ring_phase = matches!(
            session.status,
            CallStatus::Dialing | CallStatus::RingingIncoming
        );
        let empty = if ring_phase {
            session.present_ids().is_empty()
        } else {
            !session.has_joined()
        };
        let session_id = session.id.clone();

        if let Some(handle) = detached {
            self.spawn_detach(handle);
        }
        if empty && !ring_phase {
            // Noch klingelnde Eingeladene
            self.send_to_present(CallMessage::CallEnd { session_id });
        }
        if empty || inviter_left {
            self.finish(reason);
        } else {
            self.publish();
        }
    }

    fn on_media_state(&mut self, from: &str, audio_enabled: bool, video_enabled: bool) {
        if let Some(participant) = self
            .session
            .as_mut()
            .and_then(|s| s.participant_mut(from))
        {
            participant.remote_flags = RemoteFlags {
                audio_enabled,
                video_enabled,
            };
            self.publish();
        }
    }

    // ========================================================================
    // MODE SWITCH
    // ========================================================================

    fn on_mode_switch_request(&mut self, from: &str, target_kind: CallKind, seq: u64) {
        let Some(session) = &self.session else {
            return;
        };
        let session_id = session.id.clone();

        if session.status != CallStatus::Active || session.kind == target_kind {
            self.negotiator.observe(seq);
            tracing::info!(
                "Call {}: declining switch to {} while {:?}/{}",
                session_id,
                target_kind.as_str(),
                session.status,
                session.kind.as_str()
            );
            self.send_mode_switch_response(from, session_id, seq, false);
            return;
        }

        let local_id = self.signaling.local_id().unwrap_or_default();
        let verdict = self.negotiator.on_remote_request(
            session.pending_mode_switch.as_ref(),
            seq,
            &local_id,
            from,
        );

        match verdict {
            RemoteVerdict::Pending | RemoteVerdict::Supersede => {
                if verdict == RemoteVerdict::Supersede {
                    tracing::info!("Call {}: own switch request yields to {}", session_id, from);
                }
                self.open_mode_switch(target_kind, SwitchInitiator::Remote, seq);
                self.publish();
            }
            RemoteVerdict::Reject => {
                tracing::info!("Call {}: switch request {} from {} loses", session_id, seq, from);
                self.send_mode_switch_response(from, session_id, seq, false);
            }
        }
    }

    fn on_mode_switch_response(&mut self, seq: u64, accepted: bool) {
        let request = match &self.session {
            Some(s)
                if s.status == CallStatus::Active
                    && ModeSwitchNegotiator::matches_response(
                        s.pending_mode_switch.as_ref(),
                        seq,
                    ) =>
            {
                s.pending_mode_switch.clone()
            }
            _ => None,
        };
        let Some(request) = request else {
            tracing::debug!("Ignoring mode switch response {}", seq);
            return;
        };

        self.close_mode_switch();
        if accepted {
            self.apply_mode_switch(request.requested_kind);
        } else {
            tracing::info!("Switch to {} was declined", request.requested_kind.as_str());
        }
        self.publish();
    }

    fn on_mode_switch_timeout(&mut self) {
        let Some(request) = self
            .session
            .as_mut()
            .and_then(|s| s.pending_mode_switch.take())
        else {
            return;
        };

        tracing::info!("Switch to {} timed out", request.requested_kind.as_str());
        if request.initiator == SwitchInitiator::Remote {
            self.send_to_present_response(request.seq, false);
        }
        self.publish();
    }

    fn open_mode_switch(&mut self, kind: CallKind, initiator: SwitchInitiator, seq: u64) {
        let timeout = self.config.mode_switch_timeout();
        let expires_at = self.clock.now() + to_chrono(timeout);

        let Some(session) = self.session.as_mut() else {
            return;
        };
        session.pending_mode_switch = Some(ModeSwitchRequest {
            requested_kind: kind,
            initiator,
            seq,
            expires_at,
        });
        let session_id = session.id.clone();
        self.timers.arm(TimerKind::ModeSwitch, &session_id, timeout);
    }

    fn close_mode_switch(&mut self) {
        self.timers.cancel(TimerKind::ModeSwitch);
        if let Some(session) = self.session.as_mut() {
            session.pending_mode_switch = None;
        }
    }

    fn apply_mode_switch(&mut self, target: CallKind) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let previous = session.kind;
        if previous == target {
            return;
        }

        session.kind = target;
        session.local_flags.video_enabled = target.has_video();
        for participant in &mut session.participants {
            participant.remote_flags.video_enabled = target.has_video();
        }
        let session_id = session.id.clone();
        tracing::info!(
            "Call {}: switched {} -> {}",
            session_id,
            previous.as_str(),
            target.as_str()
        );

        if let Some(handle) = self.local_media.clone() {
            self.spawn_media_op(
                &session_id,
                handle,
                MediaOp::Renegotiate {
                    kind: target,
                    previous,
                },
            );
        }
    }

    fn send_mode_switch_response(&self, to: &str, session_id: String, seq: u64, accepted: bool) {
        self.send_to(
            vec![to.to_string()],
            CallMessage::ModeSwitchResponse {
                session_id,
                seq,
                accepted,
            },
        );
    }

    fn send_to_present_response(&self, seq: u64, accepted: bool) {
        if let Some(session) = &self.session {
            self.send_to_present(CallMessage::ModeSwitchResponse {
                session_id: session.id.clone(),
                seq,
                accepted,
            });
        }
    }

    // ========================================================================
    // MEDIA
    // ========================================================================

    fn handle_media_event(&mut self, event: MediaEvent) {
        match event {
            MediaEvent::LinkLost => self.on_link_lost("media link lost"),
            MediaEvent::LinkRestored => self.on_link_restored("media link restored"),
        }
    }

    fn start_acquire(&self, session_id: &str, kind: CallKind) {
        let media = Arc::clone(&self.media);
        let tx = self.input_tx.clone();
        let session_id = session_id.to_string();

        tokio::spawn(async move {
            let result = media.acquire_local(kind).await;
            let sent = tx
                .send(EngineInput::LocalAcquired { session_id, result })
                .await;
            // Engine gestoppt: Handle nicht verlieren
            if let Err(mpsc::error::SendError(EngineInput::LocalAcquired {
                result: Ok(handle),
                ..
            })) = sent
            {
                media.release(handle).await;
            }
        });
    }

    fn start_attach(&mut self, session_id: &str, contact_id: &str, kind: CallKind) {
        let key = (session_id.to_string(), contact_id.to_string());
        if !self.attaching.insert(key) {
            return;
        }

        let media = Arc::clone(&self.media);
        let tx = self.input_tx.clone();
        let descriptor = RemoteDescriptor {
            session_id: session_id.to_string(),
            contact_id: contact_id.to_string(),
            kind,
        };

        tokio::spawn(async move {
            let result = media.attach_remote(&descriptor).await;
            let sent = tx
                .send(EngineInput::RemoteAttached {
                    session_id: descriptor.session_id,
                    contact_id: descriptor.contact_id,
                    result,
                })
                .await;
            if let Err(mpsc::error::SendError(EngineInput::RemoteAttached {
                result: Ok(handle),
                ..
            })) = sent
            {
                media.detach_remote(handle).await;
            }
        });
    }

    fn spawn_media_op(&self, session_id: &str, handle: LocalMediaHandle, op: MediaOp) {
        let media = Arc::clone(&self.media);
        let tx = self.input_tx.clone();
        let session_id = session_id.to_string();

        tokio::spawn(async move {
            let result = match op {
                MediaOp::Audio { enabled } => media.set_audio_enabled(&handle, enabled).await,
                MediaOp::Video { enabled } => media.set_video_enabled(&handle, enabled).await,
                MediaOp::Speaker { enabled } => media.set_speaker_enabled(&handle, enabled).await,
                MediaOp::SwitchCamera { .. } => media.switch_capture_device(&handle).await,
                MediaOp::Renegotiate { kind, .. } => media.renegotiate(&handle, kind).await,
            };
            if let Err(error) = result {
                let _ = tx
                    .send(EngineInput::MediaOpFailed {
                        session_id,
                        op,
                        error,
                    })
                    .await;
            }
        });
    }

    fn spawn_release(&self, handle: LocalMediaHandle) {
        let media = Arc::clone(&self.media);
        tokio::spawn(async move { media.release(handle).await });
    }

    fn spawn_detach(&self, handle: RemoteMediaHandle) {
        let media = Arc::clone(&self.media);
        tokio::spawn(async move { media.detach_remote(handle).await });
    }

    fn on_local_acquired(&mut self, session_id: &str, result: Result<LocalMediaHandle, MediaError>) {
        let wanted = self.local_media.is_none()
            && matches!(&self.session, Some(s) if s.id == session_id && s.status.has_media());

        if !wanted {
            match result {
                Ok(handle) => {
                    tracing::info!("Releasing media acquired for abandoned session {}", session_id);
                    self.spawn_release(handle);
                }
                Err(e) => tracing::debug!("Late acquisition failure for {}: {}", session_id, e),
            }
            return;
        }

        match result {
            Ok(handle) => {
                tracing::info!("Call {}: local {} media ready", session_id, handle.kind().as_str());
                self.apply_pending_flags(session_id, &handle);
                self.local_media = Some(handle);
                self.check_ready();
            }
            Err(e) => {
                tracing::error!("Call {}: local media acquisition failed: {}", session_id, e);
                self.send_to_present(CallMessage::CallEnd {
                    session_id: session_id.to_string(),
                });
                self.finish(EndReason::MediaFailed {
                    message: e.to_string(),
                });
            }
        }
    }

    /// Überträgt vor dem Acquire umgeschaltete Flags auf das neue Handle
    fn apply_pending_flags(&self, session_id: &str, handle: &LocalMediaHandle) {
        let Some(session) = &self.session else {
            return;
        };
        let flags = session.local_flags;
        let defaults = LocalFlags::for_kind(handle.kind());

        let mut ops = Vec::new();
        if flags.audio_enabled != defaults.audio_enabled {
            ops.push(MediaOp::Audio {
                enabled: flags.audio_enabled,
            });
        }
        if flags.video_enabled != defaults.video_enabled {
            ops.push(MediaOp::Video {
                enabled: flags.video_enabled,
            });
        }
        if flags.speaker_on != defaults.speaker_on {
            ops.push(MediaOp::Speaker {
                enabled: flags.speaker_on,
            });
        }
        if flags.camera != defaults.camera {
            ops.push(MediaOp::SwitchCamera {
                facing: flags.camera,
            });
        }

        for op in ops {
            self.spawn_media_op(session_id, handle.clone(), op);
        }
    }

    fn on_remote_attached(
        &mut self,
        session_id: &str,
        contact_id: &str,
        result: Result<RemoteMediaHandle, MediaError>,
    ) {
        self.attaching
            .remove(&(session_id.to_string(), contact_id.to_string()));

        let wanted = match &self.session {
            Some(s) if s.id == session_id && s.status.has_media() => s
                .participant(contact_id)
                .is_some_and(|p| p.is_present() && p.media_handle.is_none()),
            _ => false,
        };

        match result {
            Ok(handle) if wanted => {
                tracing::info!("Call {}: remote stream of {} attached", session_id, contact_id);
                if let Some(participant) = self
                    .session
                    .as_mut()
                    .and_then(|s| s.participant_mut(contact_id))
                {
                    participant.media_handle = Some(handle);
                }
                if !self.check_ready() {
                    self.publish();
                }
            }
            Ok(handle) => {
                tracing::debug!("Detaching stale remote stream of {}", contact_id);
                self.spawn_detach(handle);
            }
            Err(e) if wanted => {
                tracing::warn!("Call {}: attaching {} failed: {}", session_id, contact_id, e);
                let stuck = self.status() == CallStatus::Connecting
                    && !self.session.as_ref().is_some_and(CallSession::has_remote_media)
                    && !self.attaching.iter().any(|(s, _)| s == session_id);
                if stuck {
                    self.send_to_present(CallMessage::CallEnd {
                        session_id: session_id.to_string(),
                    });
                    self.finish(EndReason::MediaFailed {
                        message: e.to_string(),
                    });
                }
            }
            Err(e) => tracing::debug!("Late attach failure for {}: {}", contact_id, e),
        }
    }

    fn on_media_op_failed(&mut self, session_id: &str, op: MediaOp, error: MediaError) {
        tracing::warn!("Media operation {:?} failed: {}", op, error);

        let Some(session) = self.session.as_mut().filter(|s| s.id == session_id) else {
            return;
        };

        let flags = &mut session.local_flags;
        let reverted = match op {
            MediaOp::Audio { enabled } if flags.audio_enabled == enabled => {
                flags.audio_enabled = !enabled;
                true
            }
            MediaOp::Video { enabled } if flags.video_enabled == enabled => {
                flags.video_enabled = !enabled;
                true
            }
            MediaOp::Speaker { enabled } if flags.speaker_on == enabled => {
                flags.speaker_on = !enabled;
                true
            }
            MediaOp::SwitchCamera { facing } if flags.camera == facing => {
                flags.camera = facing.flipped();
                true
            }
            MediaOp::Renegotiate { kind, previous } if session.kind == kind => {
                session.kind = previous;
                flags.video_enabled = previous.has_video();
                for participant in &mut session.participants {
                    participant.remote_flags.video_enabled = previous.has_video();
                }
                true
            }
            _ => false,
        };
        if !reverted {
            return;
        }

        if matches!(
            op,
            MediaOp::Audio { .. } | MediaOp::Video { .. } | MediaOp::Renegotiate { .. }
        ) {
            self.announce_media_state();
        }
        self.publish();
    }

    // ========================================================================
    // CONNECTIVITY
    // ========================================================================

    /// Connecting → Active, sobald lokale Medien und ein Remote-Stream da sind
    fn check_ready(&mut self) -> bool {
        let ready = self.local_media.is_some()
            && matches!(&self.session, Some(s) if s.status == CallStatus::Connecting && s.has_remote_media());
        if !ready || !self.transition(CallStatus::Active) {
            return false;
        }

        let now = self.clock.now();
        let Some(session) = self.session.as_mut() else {
            return false;
        };
        if session.timestamps.connected_at.is_none() {
            session.timestamps.connected_at = Some(now);
        }
        let session_id = session.id.clone();

        self.timers.arm(
            TimerKind::HeartbeatSend,
            &session_id,
            self.config.heartbeat_interval(),
        );
        self.timers.arm(
            TimerKind::HeartbeatWatch,
            &session_id,
            self.config.heartbeat_grace(),
        );
        self.publish();
        true
    }

    fn note_peer_activity(&mut self) {
        if let Some(session) = self.session.as_ref().filter(|s| s.status == CallStatus::Active) {
            let session_id = session.id.clone();
            self.timers.arm(
                TimerKind::HeartbeatWatch,
                &session_id,
                self.config.heartbeat_grace(),
            );
        }
    }

    fn on_link_lost(&mut self, cause: &str) {
        if self.status() != CallStatus::Active || !self.transition(CallStatus::Reconnecting) {
            return;
        }

        let Some(session) = self.session.as_mut() else {
            return;
        };
        if let Some(request) = session.pending_mode_switch.take() {
            tracing::info!("Dropping pending switch to {}", request.requested_kind.as_str());
        }
        let session_id = session.id.clone();

        tracing::warn!("Call {}: {}, reconnecting", session_id, cause);
        self.timers.arm(
            TimerKind::Reconnect,
            &session_id,
            self.config.reconnect_timeout(),
        );
        self.publish();
    }

    fn on_link_restored(&mut self, cause: &str) {
        if self.status() != CallStatus::Reconnecting || !self.transition(CallStatus::Active) {
            return;
        }

        let Some(session_id) = self.session.as_ref().map(|s| s.id.clone()) else {
            return;
        };
        tracing::info!("Call {}: {}", session_id, cause);
        self.timers.arm(
            TimerKind::HeartbeatWatch,
            &session_id,
            self.config.heartbeat_grace(),
        );
        self.publish();
    }

    // ========================================================================
    // TIMERS
    // ========================================================================

    fn on_timer(&mut self, fired: TimerFired) {
        let live = matches!(&self.session, Some(s) if s.id == fired.session_id);
        if !live || !self.timers.take_if_current(&fired) {
            tracing::trace!("Stale {:?} timer for {}", fired.kind, fired.session_id);
            return;
        }

        let session_id = fired.session_id;
        match (fired.kind, self.status()) {
            (TimerKind::Ring, CallStatus::Dialing) => {
                tracing::info!("Call {}: nobody answered", session_id);
                self.send_to_present(CallMessage::CallEnd { session_id });
                self.finish(EndReason::RingTimeout);
            }
            (TimerKind::Ring, CallStatus::RingingIncoming) => {
                tracing::info!("Call {}: missed", session_id);
                self.send_to_present(CallMessage::CallReject {
                    session_id,
                    reason: RejectReason::Timeout,
                });
                self.finish(EndReason::RingTimeout);
            }
            (TimerKind::Connect, CallStatus::Connecting) => {
                tracing::warn!("Call {}: media setup timed out", session_id);
                self.send_to_present(CallMessage::CallEnd { session_id });
                self.finish(EndReason::ConnectTimeout);
            }
            (TimerKind::Reconnect, CallStatus::Reconnecting) => {
                tracing::warn!("Call {}: link did not recover", session_id);
                self.send_to_present(CallMessage::CallEnd { session_id });
                self.finish(EndReason::Dropped);
            }
            (TimerKind::ModeSwitch, CallStatus::Active) => self.on_mode_switch_timeout(),
            (TimerKind::HeartbeatSend, CallStatus::Active | CallStatus::Reconnecting) => {
                self.send_to_present(CallMessage::Heartbeat {
                    session_id: session_id.clone(),
                });
                self.timers.arm(
                    TimerKind::HeartbeatSend,
                    &session_id,
                    self.config.heartbeat_interval(),
                );
            }
            (TimerKind::HeartbeatWatch, CallStatus::Active) => {
                self.on_link_lost("no heartbeat from peers")
            }
            (kind, status) => tracing::debug!("Ignoring {:?} timer while {:?}", kind, status),
        }
    }

    // ========================================================================
    // STATE HELPERS
    // ========================================================================

    fn status(&self) -> CallStatus {
        self.session
            .as_ref()
            .map_or(CallStatus::Idle, |s| s.status)
    }

    fn begin(&mut self, session: CallSession) {
        self.timers.cancel_all();
        self.negotiator.reset();
        self.attaching.clear();
        self.last_terminal = None;
        self.session = Some(session);
    }

    fn new_participant(&self, contact_id: &str, kind: CallKind, state: ParticipantState) -> Participant {
        let info = self.registry.resolve(contact_id);
        Participant {
            contact_id: contact_id.to_string(),
            display_name: info.display_name,
            avatar_ref: info.avatar_ref,
            remote_flags: RemoteFlags::for_kind(kind),
            media_handle: None,
            state,
        }
    }

    /// Wechselt den Zustand entlang der erlaubten Kanten und stoppt die
    /// Timer des verlassenen Zustands
    fn transition(&mut self, next: CallStatus) -> bool {
        let Some(session) = self.session.as_mut() else {
            return false;
        };
        let previous = session.status;
        if !previous.can_transition_to(next) {
            tracing::warn!("Call {}: refusing {:?} -> {:?}", session.id, previous, next);
            return false;
        }

        tracing::info!("Call {}: {:?} -> {:?}", session.id, previous, next);
        session.status = next;

        match previous {
            CallStatus::Dialing | CallStatus::RingingIncoming => self.timers.cancel(TimerKind::Ring),
            CallStatus::Connecting => self.timers.cancel(TimerKind::Connect),
            CallStatus::Reconnecting => self.timers.cancel(TimerKind::Reconnect),
            CallStatus::Active => {
                self.timers.cancel(TimerKind::ModeSwitch);
                self.timers.cancel(TimerKind::HeartbeatWatch);
            }
            CallStatus::Idle | CallStatus::Ended => {}
        }
        true
    }

    /// Einziger Weg nach `Ended`: Timer stoppen, Medien freigeben, Snapshot
    /// senden und genau einen History-Eintrag anstoßen
    fn finish(&mut self, reason: EndReason) -> Option<CallSession> {
        let mut session = self.session.take()?;
        self.timers.cancel_all();
        self.attaching.clear();

        let missed = session.timestamps.connected_at.is_none()
            && (session.direction == CallDirection::Incoming || reason == EndReason::RingTimeout);
        let dropped = reason == EndReason::Dropped;

        tracing::info!(
            "Call {}: {:?} -> Ended ({}, missed={}, dropped={})",
            session.id,
            session.status,
            reason.label(),
            missed,
            dropped
        );

        session.status = CallStatus::Ended;
        session.timestamps.ended_at = Some(self.clock.now());
        session.pending_mode_switch = None;
        session.outcome = Some(CallOutcome {
            reason,
            missed,
            dropped,
        });

        if let Some(handle) = self.local_media.take() {
            self.spawn_release(handle);
        }
        for participant in &mut session.participants {
            if let Some(handle) = participant.media_handle.take() {
                self.spawn_detach(handle);
            }
        }

        let _ = self.snapshot_tx.send(session.clone());
        self.recorder.record(&session);
        *self.current.write() = None;
        self.last_terminal = Some(session.clone());
        Some(session)
    }

    fn publish(&self) {
        if let Some(session) = &self.session {
            *self.current.write() = Some(session.clone());
            let _ = self.snapshot_tx.send(session.clone());
        }
    }

    fn live_snapshot(&self, operation: &'static str) -> Result<CallSession, CallError> {
        self.session.clone().ok_or(CallError::InvalidState {
            operation,
            status: CallStatus::Idle,
        })
    }

    /// Befehl gegen eine beendete Session: letzte Session zurückgeben
    fn terminal_or_invalid(&self, operation: &'static str) -> Result<CallSession, CallError> {
        match (&self.session, &self.last_terminal) {
            (None, Some(ended)) => Ok(ended.clone()),
            (session, _) => Err(CallError::InvalidState {
                operation,
                status: session.as_ref().map_or(CallStatus::Idle, |s| s.status),
            }),
        }
    }

    // ========================================================================
    // OUTBOUND
    // ========================================================================

    fn send_to(&self, to: Vec<String>, message: CallMessage) {
        if to.is_empty() {
            return;
        }
        let label = message.label();
        if let Err(e) = self.signaling.send(OutboundSignal::new(to, message)) {
            tracing::warn!("Failed to send {}: {}", label, e);
        }
    }

    fn send_to_present(&self, message: CallMessage) {
        let to = self
            .session
            .as_ref()
            .map(CallSession::present_ids)
            .unwrap_or_default();
        self.send_to(to, message);
    }

    fn announce_media_state(&self) {
        if let Some(session) = &self.session {
            self.send_to_present(CallMessage::MediaState {
                session_id: session.id.clone(),
                audio_enabled: session.local_flags.audio_enabled,
                video_enabled: session.local_flags.video_enabled,
            });
        }
    }
}
