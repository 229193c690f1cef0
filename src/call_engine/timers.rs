//! Timer der State-Machine
//!
//! Jeder Timer ist ein `sleep`-Task, der beim Ablauf ein Event in die Queue
//! der Engine legt. Ein Token pro Timer-Art verwirft Events von Timern, die
//! inzwischen abgebrochen oder neu gestartet wurden.

use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum TimerKind {
    Ring,
    Connect,
    Reconnect,
    ModeSwitch,
    /// Ausgehender Heartbeat (periodisch)
    HeartbeatSend,
    /// Kein Heartbeat vom Peer innerhalb der Toleranz
    HeartbeatWatch,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct TimerFired {
    pub kind: TimerKind,
    pub session_id: String,
    pub token: u64,
}

struct ArmedTimer {
    token: u64,
    task: JoinHandle<()>,
}

/// Timer einer Session, nur von der Event-Loop benutzt
pub(crate) struct SessionTimers<E> {
    tx: mpsc::Sender<E>,
    wrap: fn(TimerFired) -> E,
    armed: HashMap<TimerKind, ArmedTimer>,
    next_token: u64,
}

impl<E: Send + 'static> SessionTimers<E> {
    pub fn new(tx: mpsc::Sender<E>, wrap: fn(TimerFired) -> E) -> Self {
        Self {
            tx,
            wrap,
            armed: HashMap::new(),
            next_token: 0,
        }
    }

    /// Startet (oder ersetzt) den Timer dieser Art
    pub fn arm(&mut self, kind: TimerKind, session_id: &str, after: Duration) {
        self.cancel(kind);
        self.next_token += 1;
        let token = self.next_token;

        let fired = TimerFired {
            kind,
            session_id: session_id.to_string(),
            token,
        };
        let tx = self.tx.clone();
        let wrap = self.wrap;
        let task = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let _ = tx.send(wrap(fired)).await;
        });

        self.armed.insert(kind, ArmedTimer { token, task });
    }

    pub fn cancel(&mut self, kind: TimerKind) {
        if let Some(timer) = self.armed.remove(&kind) {
            timer.task.abort();
        }
    }

    pub fn cancel_all(&mut self) {
        for (_, timer) in self.armed.drain() {
            timer.task.abort();
        }
    }

    #[cfg(test)]
    pub fn is_armed(&self, kind: TimerKind) -> bool {
        self.armed.contains_key(&kind)
    }

    /// Prüft, ob das Event vom aktuell laufenden Timer stammt, und entfernt ihn
    pub fn take_if_current(&mut self, fired: &TimerFired) -> bool {
        match self.armed.get(&fired.kind) {
            Some(timer) if timer.token == fired.token => {
                self.armed.remove(&fired.kind);
                true
            }
            _ => false,
        }
    }
}

impl<E> Drop for SessionTimers<E> {
    fn drop(&mut self) {
        for (_, timer) in self.armed.drain() {
            timer.task.abort();
        }
    }
}
