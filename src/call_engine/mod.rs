//! Call Engine Module - Lebenszyklus eines Anrufs
//!
//! Dieses Modul verwaltet:
//! - Die State-Machine einer Call-Session (Wählen, Klingeln, Verbinden, Aktiv)
//! - Timer für Klingeln, Verbindungsaufbau, Reconnect und Mode Switch
//! - Den Wechsel zwischen Audio und Video während eines Anrufs
//! - Die Anrufliste (ein Eintrag pro beendeter Session)

mod engine;
mod history;
mod mode_switch;
mod session;
mod timers;

#[cfg(test)]
pub(crate) mod testing;

pub use engine::{CallError, CallSessionManager};
pub use history::{CallHistoryItem, CallHistoryRecorder, CallHistoryStore, PersistenceError};
pub use session::{
    CallDirection, CallKind, CallOutcome, CallSession, CallStatus, CallTimestamps, CameraFacing,
    EndReason, LocalFlags, ModeSwitchRequest, Participant, ParticipantState, RejectReason,
    RemoteFlags, SwitchInitiator,
};
