//! WebSocket Client für den Signaling-Server
//!
//! Verwaltet die WebSocket-Verbindung zum Cloudflare Worker:
//! - Registrierung mit Public Key
//! - Versiegelte (signierte) Frames
//! - Keepalive gegen den Idle-Timeout
//! - Reconnect mit erneuter Registrierung
//! - Event-basierte Weitergabe an die Call-Engine

use super::channel::{InboundSignal, OutboundSignal, SignalingChannel, SignalingError, SignalingEvent};
use super::messages::*;
use crate::config::CallConfig;
use crate::crypto::KeyPair;
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use url::Url;

// ============================================================================
// CLIENT STATE
// ============================================================================

#[derive(Debug, Clone, Default)]
struct ClientState {
    is_connected: bool,
    peer_id: Option<String>,
    username: Option<String>,
    /// Gesetzt durch `disconnect()`, verhindert Reconnects
    shutting_down: bool,
}

// ============================================================================
// SIGNALING CLIENT
// ============================================================================

/// WebSocket Client für Signaling-Server Kommunikation
pub struct SignalingClient {
    server_url: String,
    keypair: Arc<KeyPair>,
    state: Arc<RwLock<ClientState>>,
    tx: RwLock<Option<mpsc::Sender<String>>>,
    event_tx: broadcast::Sender<SignalingEvent>,
    registration_timeout: Duration,
    reconnect_attempts: u32,
    reconnect_delay: Duration,
    keepalive_interval: Duration,
}

impl SignalingClient {
    /// Erstellt einen neuen (noch nicht verbundenen) SignalingClient
    pub fn new(config: &CallConfig, keypair: Arc<KeyPair>) -> Self {
        let (event_tx, _) = broadcast::channel(100);

        Self {
            server_url: config.signaling_url.clone(),
            keypair,
            state: Arc::new(RwLock::new(ClientState::default())),
            tx: RwLock::new(None),
            event_tx,
            registration_timeout: config.registration_timeout(),
            reconnect_attempts: config.signaling_reconnect_attempts,
            reconnect_delay: config.signaling_reconnect_delay(),
            keepalive_interval: config.keepalive_interval(),
        }
    }

    /// Gibt die aktuelle Peer-ID zurück (falls registriert)
    pub fn peer_id(&self) -> Option<String> {
        self.state.read().peer_id.clone()
    }

    /// Gibt den aktuellen Username zurück (falls registriert)
    pub fn username(&self) -> Option<String> {
        self.state.read().username.clone()
    }

    /// Prüft ob verbunden
    pub fn is_connected(&self) -> bool {
        self.state.read().is_connected
    }

    /// Baut die WebSocket-URL (`http` → `ws`, `https` → `wss`, Pfad `/ws`)
    pub fn websocket_url(server_url: &str) -> Result<Url, SignalingError> {
        let mut url =
            Url::parse(server_url).map_err(|e| SignalingError::ConnectionFailed(e.to_string()))?;

        let scheme = match url.scheme() {
            "http" | "ws" => "ws",
            "https" | "wss" => "wss",
            other => {
                return Err(SignalingError::ConnectionFailed(format!(
                    "Unsupported scheme: {}",
                    other
                )))
            }
        };
        url.set_scheme(scheme)
            .map_err(|_| SignalingError::ConnectionFailed("Invalid URL".to_string()))?;

        let path = format!("{}/ws", url.path().trim_end_matches('/'));
        url.set_path(&path);
        Ok(url)
    }

    /// Verbindet mit dem Signaling-Server und registriert den Benutzer
    ///
    /// Danach überwacht ein Task die Verbindung und verbindet bei Abbruch
    /// neu (`ConnectionLost` / `ConnectionRestored`).
    pub async fn connect_and_register(
        self: &Arc<Self>,
        username: String,
    ) -> Result<String, SignalingError> {
        self.state.write().shutting_down = false;

        let (peer_id, closed) = self.open_connection(username.clone()).await?;
        Arc::clone(self).supervise(username, closed);

        Ok(peer_id)
    }

    /// Trennt die Verbindung, ohne neu zu verbinden
    pub fn disconnect(&self) {
        {
            let mut state = self.state.write();
            state.shutting_down = true;
            state.is_connected = false;
        }
        // Sender droppen beendet den Write-Task, der den Socket schließt
        *self.tx.write() = None;
        tracing::info!("Signaling client disconnected");
    }

    /// Startet einen Keepalive-Task
    pub fn start_keepalive(self: Arc<Self>) {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.keepalive_interval);
            loop {
                interval.tick().await;

                if self.state.read().shutting_down {
                    tracing::info!("Keepalive: client shut down, stopping");
                    break;
                }
                // Während eines Reconnects einfach weiter warten
                let Some(peer_id) = self.peer_id().filter(|_| self.is_connected()) else {
                    continue;
                };
                if let Err(e) = self.send_sealed(KeepalivePayload::new(peer_id)) {
                    tracing::warn!("Failed to send keepalive: {}", e);
                }
            }
        });
    }

    // ========================================================================
    // PRIVATE METHODS
    // ========================================================================

    /// Öffnet den Socket, startet Read-/Write-Task und registriert
    ///
    /// Der zurückgegebene Receiver feuert, sobald der Socket zu ist.
    async fn open_connection(
        &self,
        username: String,
    ) -> Result<(String, oneshot::Receiver<()>), SignalingError> {
        let ws_url = Self::websocket_url(&self.server_url)?;

        tracing::info!("Connecting to signaling server: {}", ws_url);

        let (ws_stream, _) = connect_async(ws_url.as_str())
            .await
            .map_err(|e| SignalingError::ConnectionFailed(e.to_string()))?;

        let (mut write, mut read) = ws_stream.split();

        let (tx, mut rx) = mpsc::channel::<String>(100);
        *self.tx.write() = Some(tx);
        self.state.write().username = Some(username.clone());

        let (reg_tx, mut reg_rx) = mpsc::channel::<Result<String, SignalingError>>(1);
        let (closed_tx, closed_rx) = oneshot::channel::<()>();

        // Read-Task
        let state_clone = Arc::clone(&self.state);
        let event_tx = self.event_tx.clone();
        let read_task = tokio::spawn(async move {
            while let Some(msg_result) = read.next().await {
                match msg_result {
                    Ok(Message::Text(text)) => match serde_json::from_str::<ServerMessage>(&text) {
                        Ok(server_msg) => {
                            Self::handle_server_message(server_msg, &state_clone, &event_tx, &reg_tx)
                        }
                        Err(e) => tracing::warn!("Ignoring unparseable server message: {}", e),
                    },
                    Ok(Message::Close(_)) => {
                        tracing::info!("WebSocket closed by server");
                        break;
                    }
                    Err(e) => {
                        tracing::error!("WebSocket error: {}", e);
                        break;
                    }
                    _ => {}
                }
            }

            state_clone.write().is_connected = false;
            let _ = closed_tx.send(());
        });

        // Write-Task
        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                if let Err(e) = write.send(Message::Text(msg)).await {
                    tracing::error!("Failed to send WebSocket message: {}", e);
                    break;
                }
            }
            let _ = write.close().await;
        });

        match self.register(username, &mut reg_rx).await {
            Ok(peer_id) => {
                self.state.write().is_connected = true;
                Ok((peer_id, closed_rx))
            }
            Err(e) => {
                read_task.abort();
                self.reset_connection();
                Err(e)
            }
        }
    }

    /// Sendet `register` und wartet auf die Peer-ID
    async fn register(
        &self,
        username: String,
        reg_rx: &mut mpsc::Receiver<Result<String, SignalingError>>,
    ) -> Result<String, SignalingError> {
        self.send_sealed(RegisterPayload::new(
            username,
            self.keypair.public_key_base64(),
        ))?;

        tokio::select! {
            result = reg_rx.recv() => {
                match result {
                    Some(Ok(peer_id)) => Ok(peer_id),
                    Some(Err(e)) => Err(e),
                    None => Err(SignalingError::RegistrationFailed("No response".to_string())),
                }
            }
            _ = tokio::time::sleep(self.registration_timeout) => {
                Err(SignalingError::RegistrationFailed("Timeout".to_string()))
            }
        }
    }

    /// Verwirft einen halb offenen Socket samt alter Peer-ID
    fn reset_connection(&self) {
        {
            let mut state = self.state.write();
            state.is_connected = false;
            state.peer_id = None;
        }
        *self.tx.write() = None;
    }

    /// Überwacht die Verbindung und verbindet bei Abbruch neu
    fn supervise(self: Arc<Self>, username: String, closed: oneshot::Receiver<()>) {
        tokio::spawn(async move {
            let mut closed = closed;
            loop {
                let _ = closed.await;

                if self.state.read().shutting_down {
                    break;
                }

                tracing::warn!("Signaling connection lost");
                let _ = self.event_tx.send(SignalingEvent::ConnectionLost);

                match self.reconnect(&username).await {
                    Some(next) => {
                        closed = next;
                        let _ = self.event_tx.send(SignalingEvent::ConnectionRestored);
                    }
                    None => {
                        tracing::error!("Giving up on signaling server after reconnect attempts");
                        break;
                    }
                }
            }
        });
    }

    async fn reconnect(&self, username: &str) -> Option<oneshot::Receiver<()>> {
        for attempt in 1..=self.reconnect_attempts {
            tokio::time::sleep(self.reconnect_delay).await;

            if self.state.read().shutting_down {
                return None;
            }

            match self.open_connection(username.to_string()).await {
                Ok((peer_id, closed)) => {
                    tracing::info!("Reconnected to signaling server as {}", peer_id);
                    return Some(closed);
                }
                Err(e) => tracing::warn!("Reconnect attempt {} failed: {}", attempt, e),
            }
        }
        None
    }

    /// Versiegelt einen Payload und reiht ihn non-blocking ein
    fn send_sealed<T: serde::Serialize>(&self, payload: T) -> Result<(), SignalingError> {
        let tx = self.tx.read().clone().ok_or(SignalingError::NotConnected)?;

        let frame = self
            .keypair
            .seal(&payload, Utc::now().timestamp_millis())
            .map_err(|e| SignalingError::SendFailed(e.to_string()))?;

        tx.try_send(frame)
            .map_err(|e| SignalingError::SendFailed(e.to_string()))
    }

    /// Verarbeitet eingehende Server-Nachrichten
    fn handle_server_message(
        msg: ServerMessage,
        state: &Arc<RwLock<ClientState>>,
        event_tx: &broadcast::Sender<SignalingEvent>,
        reg_tx: &mpsc::Sender<Result<String, SignalingError>>,
    ) {
        match msg {
            ServerMessage::Registered {
                peer_id, username, ..
            } => {
                tracing::info!("Registered as {} with peer_id {}", username, peer_id);
                {
                    let mut s = state.write();
                    s.peer_id = Some(peer_id.clone());
                    s.username = Some(username);
                }
                let _ = reg_tx.try_send(Ok(peer_id));
            }

            ServerMessage::Signal {
                from_peer_id,
                payload,
                ..
            } => {
                tracing::debug!("Received {} from {}", payload.label(), from_peer_id);
                let _ = event_tx.send(SignalingEvent::Message(InboundSignal {
                    from: from_peer_id,
                    message: payload,
                }));
            }

            ServerMessage::DeliveryFailed {
                to_peer_id, reason, ..
            } => {
                tracing::warn!("Delivery to {} failed: {}", to_peer_id, reason);
            }

            ServerMessage::Error { code, message, .. } => {
                tracing::error!("Server error {}: {}", code, message);
                // Bei Registrierungs-Fehlern auch dem reg_tx melden
                let _ = reg_tx.try_send(Err(SignalingError::ServerError { code, message }));
            }

            ServerMessage::Pong { .. } => {
                // Keepalive-Response - nichts zu tun
            }
        }
    }
}

impl SignalingChannel for SignalingClient {
    fn local_id(&self) -> Option<String> {
        self.peer_id()
    }

    fn send(&self, signal: OutboundSignal) -> Result<(), SignalingError> {
        let peer_id = self.peer_id().ok_or(SignalingError::NotConnected)?;
        tracing::debug!("Relaying {} to {:?}", signal.message.label(), signal.to);
        self.send_sealed(RelayPayload::new(peer_id, signal.to, signal.message))
    }

    fn subscribe(&self) -> broadcast::Receiver<SignalingEvent> {
        self.event_tx.subscribe()
    }
}

impl std::fmt::Debug for SignalingClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalingClient")
            .field("server_url", &self.server_url)
            .field("state", &*self.state.read())
            .finish()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call_engine::CallKind;
    use crate::crypto::verify_sealed;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    fn client_for(url: &str) -> (Arc<SignalingClient>, Arc<KeyPair>) {
        client_with(CallConfig {
            signaling_url: url.to_string(),
            ..Default::default()
        })
    }

    fn client_with(config: CallConfig) -> (Arc<SignalingClient>, Arc<KeyPair>) {
        let keypair = Arc::new(KeyPair::generate());
        (
            Arc::new(SignalingClient::new(&config, Arc::clone(&keypair))),
            keypair,
        )
    }

    #[test]
    fn test_websocket_url() {
        let url = SignalingClient::websocket_url("https://signal.example.dev").unwrap();
        assert_eq!(url.as_str(), "wss://signal.example.dev/ws");

        let url = SignalingClient::websocket_url("http://127.0.0.1:8787/api/").unwrap();
        assert_eq!(url.as_str(), "ws://127.0.0.1:8787/api/ws");

        assert!(SignalingClient::websocket_url("ftp://nope").is_err());
    }

    #[test]
    fn test_send_without_connection() {
        let (client, _) = client_for("http://127.0.0.1:1");
        let result = client.send(OutboundSignal::new(
            vec!["bob".to_string()],
            CallMessage::CallEnd {
                session_id: "s".to_string(),
            },
        ));
        assert_eq!(result, Err(SignalingError::NotConnected));
    }

    #[test]
    fn test_signal_becomes_event() {
        let state = Arc::new(RwLock::new(ClientState::default()));
        let (event_tx, mut event_rx) = broadcast::channel(8);
        let (reg_tx, mut reg_rx) = mpsc::channel(1);

        SignalingClient::handle_server_message(
            ServerMessage::Registered {
                peer_id: "p-1".to_string(),
                username: "alice".to_string(),
                timestamp: 0,
            },
            &state,
            &event_tx,
            &reg_tx,
        );
        assert_eq!(reg_rx.try_recv().unwrap(), Ok("p-1".to_string()));
        assert_eq!(state.read().peer_id.as_deref(), Some("p-1"));

        SignalingClient::handle_server_message(
            ServerMessage::Signal {
                from_peer_id: "bob".to_string(),
                payload: CallMessage::CallAccept {
                    session_id: "s-1".to_string(),
                },
                timestamp: 0,
            },
            &state,
            &event_tx,
            &reg_tx,
        );
        assert_eq!(
            event_rx.try_recv().unwrap(),
            SignalingEvent::Message(InboundSignal {
                from: "bob".to_string(),
                message: CallMessage::CallAccept {
                    session_id: "s-1".to_string()
                },
            })
        );
    }

    #[tokio::test]
    async fn test_register_and_relay_over_websocket() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (client, keypair) = client_for(&format!("http://{}", addr));
        let public_key = keypair.public_key_base64();

        let (relayed_tx, relayed_rx) = oneshot::channel::<String>();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();

            // register
            let Some(Ok(Message::Text(register))) = ws.next().await else {
                panic!("expected register frame");
            };
            verify_sealed(&public_key, &register).unwrap();
            let register: serde_json::Value = serde_json::from_str(&register).unwrap();
            assert_eq!(register["type"], "register");
            assert_eq!(register["username"], "alice");

            ws.send(Message::Text(
                r#"{"type":"registered","peerId":"p-alice","username":"alice","timestamp":1}"#
                    .to_string(),
            ))
            .await
            .unwrap();
            ws.send(Message::Text(
                r#"{"type":"signal","fromPeerId":"p-bob","payload":{"type":"call_invite","sessionId":"s-9","fromId":"p-bob","toIds":["p-alice"],"kind":"audio"},"timestamp":2}"#
                    .to_string(),
            ))
            .await
            .unwrap();

            // relay
            if let Some(Ok(Message::Text(relay))) = ws.next().await {
                let _ = relayed_tx.send(relay);
            }
        });

        let mut events = client.subscribe();
        let peer_id = client.connect_and_register("alice".to_string()).await.unwrap();
        assert_eq!(peer_id, "p-alice");
        assert_eq!(client.local_id().as_deref(), Some("p-alice"));

        match events.recv().await.unwrap() {
            SignalingEvent::Message(InboundSignal { from, message }) => {
                assert_eq!(from, "p-bob");
                assert_eq!(
                    message,
                    CallMessage::CallInvite {
                        session_id: "s-9".to_string(),
                        from_id: "p-bob".to_string(),
                        to_ids: vec!["p-alice".to_string()],
                        kind: CallKind::Audio,
                    }
                );
            }
            other => panic!("unexpected event: {:?}", other),
        }

        client
            .send(OutboundSignal::new(
                vec!["p-bob".to_string()],
                CallMessage::CallAccept {
                    session_id: "s-9".to_string(),
                },
            ))
            .unwrap();

        let relay: serde_json::Value = serde_json::from_str(&relayed_rx.await.unwrap()).unwrap();
        assert_eq!(relay["type"], "relay");
        assert_eq!(relay["fromPeerId"], "p-alice");
        assert_eq!(relay["toPeerIds"][0], "p-bob");
        assert_eq!(relay["payload"]["type"], "call_accept");

        client.disconnect();
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn test_registration_timeout_drops_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (client, _) = client_with(CallConfig {
            signaling_url: format!("http://{}", addr),
            registration_timeout_secs: 1,
            ..Default::default()
        });

        let (closed_tx, closed_rx) = oneshot::channel::<()>();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();

            // register lesen, aber nie beantworten
            let Some(Ok(Message::Text(_))) = ws.next().await else {
                panic!("expected register frame");
            };
            loop {
                match ws.next().await {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                }
            }
            let _ = closed_tx.send(());
        });

        // Peer-ID einer früheren Verbindung
        client.state.write().peer_id = Some("p-old".to_string());

        let result = client.connect_and_register("alice".to_string()).await;
        assert_eq!(
            result,
            Err(SignalingError::RegistrationFailed("Timeout".to_string()))
        );
        assert!(!client.is_connected());
        assert_eq!(client.local_id(), None);

        let send = client.send(OutboundSignal::new(
            vec!["p-bob".to_string()],
            CallMessage::CallEnd {
                session_id: "s-1".to_string(),
            },
        ));
        assert_eq!(send, Err(SignalingError::NotConnected));

        tokio::time::timeout(Duration::from_secs(5), closed_rx)
            .await
            .expect("socket was not closed")
            .unwrap();
    }
}
