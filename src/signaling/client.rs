//! Signaling Client
//!
//! Hält genau eine Verbindung zum Relay:
//! - WebSocket (tokio-tungstenite) für den echten Betrieb
//! - Loopback-Paar für lokale Demos und Tests
//!
//! Keine automatische Reconnection: geht das Relay verloren, wird
//! `SignalingEvent::Disconnected` gemeldet und der Aufrufer entscheidet.

use super::messages::SignalingMessage;
use futures::{SinkExt, StreamExt};
use parking_lot::RwLock;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use url::Url;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignalingError {
    #[error("WebSocket connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Invalid signaling URL: {0}")]
    InvalidUrl(String),

    #[error("Not connected to signaling server")]
    NotConnected,

    #[error("Failed to send message: {0}")]
    SendFailed(String),
}

// ============================================================================
// SIGNALING EVENTS
// ============================================================================

/// Events die vom SignalingClient ausgelöst werden
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalingEvent {
    /// Verbunden mit dem Relay
    Connected,

    /// Nachricht vom anderen Peer
    Message(SignalingMessage),

    /// Verbindung getrennt
    Disconnected,
}

/// Empfangsseite für eingehende Events (genau ein Konsument)
pub type SignalingEvents = mpsc::UnboundedReceiver<SignalingEvent>;

// ============================================================================
// CLIENT STATE
// ============================================================================

#[derive(Debug, Clone, Default)]
struct ClientState {
    is_connected: bool,
    sent: u64,
    received: u64,
}

// ============================================================================
// SIGNALING CLIENT
// ============================================================================

/// Client für das Signaling-Relay
pub struct SignalingClient {
    endpoint: String,
    state: Arc<RwLock<ClientState>>,
    tx: mpsc::UnboundedSender<String>,
}

impl SignalingClient {
    /// Verbindet sich per WebSocket mit dem Relay
    ///
    /// `http`/`https` URLs werden auf `ws`/`wss` abgebildet.
    pub async fn connect(url: &Url) -> Result<(Self, SignalingEvents), SignalingError> {
        let ws_url = websocket_url(url)?;

        tracing::info!("Connecting to signaling relay: {}", ws_url);

        let (ws_stream, _) = connect_async(ws_url.as_str())
            .await
            .map_err(|e| SignalingError::ConnectionFailed(e.to_string()))?;

        let (mut write, mut read) = ws_stream.split();

        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let state = Arc::new(RwLock::new(ClientState {
            is_connected: true,
            ..Default::default()
        }));

        let _ = event_tx.send(SignalingEvent::Connected);

        // Read-Task
        let state_clone = Arc::clone(&state);
        tokio::spawn(async move {
            while let Some(msg_result) = read.next().await {
                match msg_result {
                    Ok(Message::Text(text)) => {
                        Self::dispatch_text(&text, &state_clone, &event_tx);
                    }
                    Ok(Message::Close(_)) => {
                        tracing::info!("WebSocket closed by relay");
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
            let _ = event_tx.send(SignalingEvent::Disconnected);
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

        let client = Self {
            endpoint: ws_url.to_string(),
            state,
            tx,
        };

        Ok((client, event_rx))
    }

    /// Erstellt zwei direkt verbundene Clients
    ///
    /// Alles, was `a` sendet, kommt bei `b` an und umgekehrt; der JSON-Codec
    /// wird dabei genauso durchlaufen wie über das echte Relay. Wird ein Client
    /// gedroppt, meldet die Gegenseite `Disconnected`. Benötigt eine laufende
    /// Tokio-Runtime.
    pub fn loopback_pair() -> ((Self, SignalingEvents), (Self, SignalingEvents)) {
        let (a_tx, a_rx) = mpsc::unbounded_channel::<String>();
        let (b_tx, b_rx) = mpsc::unbounded_channel::<String>();
        let (a_event_tx, a_event_rx) = mpsc::unbounded_channel();
        let (b_event_tx, b_event_rx) = mpsc::unbounded_channel();

        let connected = || {
            Arc::new(RwLock::new(ClientState {
                is_connected: true,
                ..Default::default()
            }))
        };
        let a_state = connected();
        let b_state = connected();

        let _ = a_event_tx.send(SignalingEvent::Connected);
        let _ = b_event_tx.send(SignalingEvent::Connected);

        Self::spawn_loopback_leg(a_rx, Arc::clone(&b_state), b_event_tx);
        Self::spawn_loopback_leg(b_rx, Arc::clone(&a_state), a_event_tx);

        let a = Self {
            endpoint: "loopback:a".to_string(),
            state: a_state,
            tx: a_tx,
        };
        let b = Self {
            endpoint: "loopback:b".to_string(),
            state: b_state,
            tx: b_tx,
        };

        ((a, a_event_rx), (b, b_event_rx))
    }

    /// Sendet eine Nachricht an den anderen Peer (fire-and-forget)
    pub fn send(&self, message: &SignalingMessage) -> Result<(), SignalingError> {
        if !self.is_connected() {
            return Err(SignalingError::NotConnected);
        }

        let text = message
            .to_json()
            .map_err(|e| SignalingError::SendFailed(e.to_string()))?;

        self.tx
            .send(text)
            .map_err(|_| SignalingError::NotConnected)?;

        self.state.write().sent += 1;
        tracing::debug!("Sent '{}' via {}", message.event_name(), self.endpoint);
        Ok(())
    }

    /// Prüft ob verbunden
    pub fn is_connected(&self) -> bool {
        self.state.read().is_connected
    }

    /// Adresse des Relays
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Anzahl gesendeter und empfangener Nachrichten
    pub fn message_counts(&self) -> (u64, u64) {
        let state = self.state.read();
        (state.sent, state.received)
    }

    // ========================================================================
    // PRIVATE METHODS
    // ========================================================================

    fn dispatch_text(
        text: &str,
        state: &Arc<RwLock<ClientState>>,
        event_tx: &mpsc::UnboundedSender<SignalingEvent>,
    ) {
        match SignalingMessage::from_json(text) {
            Ok(message) => {
                tracing::debug!("Received '{}' from relay", message.event_name());
                state.write().received += 1;
                let _ = event_tx.send(SignalingEvent::Message(message));
            }
            Err(e) => {
                tracing::warn!("Ignoring undecodable relay frame: {}", e);
            }
        }
    }

    fn spawn_loopback_leg(
        mut rx: mpsc::UnboundedReceiver<String>,
        peer_state: Arc<RwLock<ClientState>>,
        peer_event_tx: mpsc::UnboundedSender<SignalingEvent>,
    ) {
        tokio::spawn(async move {
            while let Some(text) = rx.recv().await {
                Self::dispatch_text(&text, &peer_state, &peer_event_tx);
            }
            peer_state.write().is_connected = false;
            let _ = peer_event_tx.send(SignalingEvent::Disconnected);
        });
    }
}

impl std::fmt::Debug for SignalingClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalingClient")
            .field("endpoint", &self.endpoint)
            .field("state", &*self.state.read())
            .finish()
    }
}

/// Bildet die konfigurierte Relay-URL auf eine WebSocket-URL ab
pub fn websocket_url(url: &Url) -> Result<Url, SignalingError> {
    let scheme = match url.scheme() {
        "ws" | "http" => "ws",
        "wss" | "https" => "wss",
        other => {
            return Err(SignalingError::InvalidUrl(format!(
                "unsupported scheme '{}'",
                other
            )))
        }
    };

    let mut ws_url = url.clone();
    ws_url
        .set_scheme(scheme)
        .map_err(|_| SignalingError::InvalidUrl(url.to_string()))?;
    Ok(ws_url)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signaling::{CandidateDescriptor, SessionDescription};

    #[test]
    fn test_websocket_url_mapping() {
        let http = Url::parse("http://relay.example:5000/ws").unwrap();
        assert_eq!(
            websocket_url(&http).unwrap().as_str(),
            "ws://relay.example:5000/ws"
        );

        let https = Url::parse("https://relay.example/socket").unwrap();
        assert_eq!(
            websocket_url(&https).unwrap().as_str(),
            "wss://relay.example/socket"
        );

        let ftp = Url::parse("ftp://relay.example").unwrap();
        assert!(matches!(
            websocket_url(&ftp),
            Err(SignalingError::InvalidUrl(_))
        ));
    }

    #[tokio::test]
    async fn test_loopback_preserves_order() {
        let ((a, mut a_events), (_b, mut b_events)) = SignalingClient::loopback_pair();

        assert_eq!(a_events.recv().await, Some(SignalingEvent::Connected));
        assert_eq!(b_events.recv().await, Some(SignalingEvent::Connected));

        let sent = vec![
            SignalingMessage::IceCandidate(CandidateDescriptor::new("candidate:1")),
            SignalingMessage::Offer(SessionDescription::offer("v=0")),
            SignalingMessage::IceCandidate(CandidateDescriptor::new("candidate:2")),
            SignalingMessage::IceCandidate(CandidateDescriptor::new("candidate:2")),
        ];
        for msg in &sent {
            a.send(msg).unwrap();
        }

        for expected in sent {
            assert_eq!(b_events.recv().await, Some(SignalingEvent::Message(expected)));
        }
        assert_eq!(a.message_counts(), (4, 0));
    }

    #[tokio::test]
    async fn test_loopback_reports_disconnect() {
        let ((a, _a_events), (b, mut b_events)) = SignalingClient::loopback_pair();
        assert_eq!(b_events.recv().await, Some(SignalingEvent::Connected));

        drop(a);

        assert_eq!(b_events.recv().await, Some(SignalingEvent::Disconnected));
        assert!(!b.is_connected());
        assert!(matches!(
            b.send(&SignalingMessage::Offer(SessionDescription::offer("v=0"))),
            Err(SignalingError::NotConnected)
        ));
    }
}
