//! Mode Switch (Audio ↔ Video) während eines aktiven Anrufs
//!
//! Der Negotiator hält nur die Sequenznummern und entscheidet über
//! konkurrierende Anfragen. Timer und Nachrichten verwaltet die Engine.

use super::session::{ModeSwitchRequest, SwitchInitiator};

/// Entscheidung über eine eingehende Anfrage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RemoteVerdict {
    /// Keine offene Anfrage: die eingehende wird zur offenen Anfrage
    Pending,
    /// Eigene Anfrage verliert den Tie-Break und wird still verworfen
    Supersede,
    /// Eingehende Anfrage wird abgelehnt, die offene bleibt bestehen
    Reject,
}

#[derive(Debug)]
pub(crate) struct ModeSwitchNegotiator {
    next_seq: u64,
}

impl ModeSwitchNegotiator {
    pub fn new() -> Self {
        Self { next_seq: 1 }
    }

    /// Sequenzen beginnen pro Session bei 1
    pub fn reset(&mut self) {
        self.next_seq = 1;
    }

    /// Vergibt die Sequenznummer für eine lokale Anfrage
    pub fn open_local(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    /// Eigene Nummern liegen immer über den zuletzt empfangenen
    pub fn observe(&mut self, remote_seq: u64) {
        self.next_seq = self.next_seq.max(remote_seq.saturating_add(1));
    }

    /// Bewertet eine Anfrage des Peers
    ///
    /// Bei gekreuzten Anfragen gewinnt die kleinere Sequenznummer, bei
    /// Gleichstand die kleinere Kontakt-ID. Eine bereits offene Anfrage des
    /// Peers gewinnt immer gegen eine zweite.
    pub fn on_remote_request(
        &mut self,
        pending: Option<&ModeSwitchRequest>,
        remote_seq: u64,
        local_id: &str,
        remote_id: &str,
    ) -> RemoteVerdict {
        self.observe(remote_seq);

        let Some(pending) = pending else {
            return RemoteVerdict::Pending;
        };

        match pending.initiator {
            SwitchInitiator::Remote => RemoteVerdict::Reject,
            SwitchInitiator::Local => {
                let local_wins = match pending.seq.cmp(&remote_seq) {
                    std::cmp::Ordering::Less => true,
                    std::cmp::Ordering::Greater => false,
                    std::cmp::Ordering::Equal => local_id < remote_id,
                };
                if local_wins {
                    RemoteVerdict::Reject
                } else {
                    RemoteVerdict::Supersede
                }
            }
        }
    }

    /// Passt eine Antwort zur eigenen offenen Anfrage?
    pub fn matches_response(pending: Option<&ModeSwitchRequest>, seq: u64) -> bool {
        matches!(
            pending,
            Some(request) if request.initiator == SwitchInitiator::Local && request.seq == seq
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call_engine::CallKind;
    use chrono::Utc;

    fn request(initiator: SwitchInitiator, seq: u64) -> ModeSwitchRequest {
        ModeSwitchRequest {
            requested_kind: CallKind::Video,
            initiator,
            seq,
            expires_at: Utc::now(),
        }
    }

    #[test]
    fn test_sequence_advances_past_remote() {
        let mut negotiator = ModeSwitchNegotiator::new();
        assert_eq!(negotiator.open_local(), 1);

        negotiator.on_remote_request(None, 7, "me", "bob");
        assert_eq!(negotiator.open_local(), 8);

        negotiator.reset();
        assert_eq!(negotiator.open_local(), 1);
    }

    #[test]
    fn test_first_remote_request_wins() {
        let mut negotiator = ModeSwitchNegotiator::new();
        let pending = request(SwitchInitiator::Remote, 1);
        assert_eq!(
            negotiator.on_remote_request(Some(&pending), 2, "me", "bob"),
            RemoteVerdict::Reject
        );
    }

    #[test]
    fn test_crossing_requests_lower_seq_wins() {
        let mut negotiator = ModeSwitchNegotiator::new();
        let mine = request(SwitchInitiator::Local, 1);
        assert_eq!(
            negotiator.on_remote_request(Some(&mine), 2, "me", "bob"),
            RemoteVerdict::Reject
        );

        let mine = request(SwitchInitiator::Local, 3);
        assert_eq!(
            negotiator.on_remote_request(Some(&mine), 2, "me", "bob"),
            RemoteVerdict::Supersede
        );
    }

    #[test]
    fn test_crossing_requests_equal_seq_uses_contact_id() {
        let mut negotiator = ModeSwitchNegotiator::new();
        let mine = request(SwitchInitiator::Local, 1);
        assert_eq!(
            negotiator.on_remote_request(Some(&mine), 1, "alice", "bob"),
            RemoteVerdict::Reject
        );
        assert_eq!(
            negotiator.on_remote_request(Some(&mine), 1, "carol", "bob"),
            RemoteVerdict::Supersede
        );
    }

    #[test]
    fn test_response_matching() {
        let mine = request(SwitchInitiator::Local, 4);
        assert!(ModeSwitchNegotiator::matches_response(Some(&mine), 4));
        assert!(!ModeSwitchNegotiator::matches_response(Some(&mine), 3));

        let theirs = request(SwitchInitiator::Remote, 4);
        assert!(!ModeSwitchNegotiator::matches_response(Some(&theirs), 4));
        assert!(!ModeSwitchNegotiator::matches_response(None, 4));
    }
}
