//! Session Negotiator - Zustandsmaschine eines Anrufs
//!
//! `Idle → Capturing → Negotiating → Connected → Ended → Idle`
//!
//! Die `Session` besitzt alles, was zu einem Anruf gehört: Peer Connection,
//! lokalen und entfernten Stream, den Candidate-Puffer und den Signaling
//! Client. Alle Übergänge laufen über `&mut self`, also nie parallel.

use super::peer::{
    NegotiationError, PeerConnection, PeerConnectionFactory, PeerConnectionState, PeerEvent,
    PeerEventSender, PeerInput,
};
use crate::config::IceServerConfig;
use crate::media::{MediaAccessError, MediaCaptureManager, MediaStream, RemoteStream, RemoteTrack};
use crate::recording::{RecordingController, RecordingError, RecordingEvent, SavedRecording};
use crate::signaling::{
    CandidateDescriptor, SessionDescription, SignalingClient, SignalingError, SignalingEvent,
    SignalingMessage,
};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};

/// Obergrenze für früh eingetroffene ICE Candidates
pub const MAX_PENDING_CANDIDATES: usize = 64;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error(transparent)]
    Media(#[from] MediaAccessError),

    #[error(transparent)]
    Negotiation(#[from] NegotiationError),

    #[error(transparent)]
    Signaling(#[from] SignalingError),

    #[error(transparent)]
    Recording(#[from] RecordingError),

    #[error("Session has stopped")]
    Stopped,
}

// ============================================================================
// STATE & UPDATES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallRole {
    Caller,
    Callee,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Capturing,
    Negotiating { role: CallRole },
    Connected { role: CallRole },
    Ended,
}

impl SessionState {
    /// Läuft ein Anruf (Verhandlung oder verbunden)?
    pub fn in_call(&self) -> bool {
        matches!(self, Self::Negotiating { .. } | Self::Connected { .. })
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Capturing => write!(f, "capturing"),
            Self::Negotiating { role } => write!(f, "negotiating ({:?})", role),
            Self::Connected { role } => write!(f, "connected ({:?})", role),
            Self::Ended => write!(f, "ended"),
        }
    }
}

/// Meldungen an die Oberfläche
#[derive(Debug, Clone)]
pub enum SessionUpdate {
    StateChanged(SessionState),
    LocalStream(Option<MediaStream>),
    RemoteStream(Option<RemoteStream>),
    /// Jeder angenommene Track des entfernten Streams
    RemoteTrack(RemoteTrack),
    CallAbandoned { reason: String },
    MediaError(MediaAccessError),
    Recording(RecordingEvent),
}

struct ActivePeer {
    connection: Arc<dyn PeerConnection>,
    generation: u64,
    role: CallRole,
    has_remote_description: bool,
}

// ============================================================================
// SESSION
// ============================================================================

pub struct Session {
    state: SessionState,
    capture: MediaCaptureManager,
    pub(super) recorder: RecordingController,
    signaling: SignalingClient,
    factory: Arc<dyn PeerConnectionFactory>,
    ice_servers: Vec<IceServerConfig>,
    peer: Option<ActivePeer>,
    generation: u64,
    remote_stream: Option<RemoteStream>,
    pending_candidates: Vec<CandidateDescriptor>,
    peer_tx: mpsc::UnboundedSender<PeerInput>,
    pub(super) peer_rx: mpsc::UnboundedReceiver<PeerInput>,
    pub(super) update_tx: broadcast::Sender<SessionUpdate>,
}

impl Session {
    pub fn new(
        capture: MediaCaptureManager,
        recorder: RecordingController,
        signaling: SignalingClient,
        factory: Arc<dyn PeerConnectionFactory>,
        ice_servers: Vec<IceServerConfig>,
    ) -> Self {
        let (peer_tx, peer_rx) = mpsc::unbounded_channel();
        let (update_tx, _) = broadcast::channel(64);

        Self {
            state: SessionState::Idle,
            capture,
            recorder,
            signaling,
            factory,
            ice_servers,
            peer: None,
            generation: 0,
            remote_stream: None,
            pending_candidates: Vec::new(),
            peer_tx,
            peer_rx,
            update_tx,
        }
    }

    /// Gibt einen Update-Receiver zurück
    pub fn subscribe(&self) -> broadcast::Receiver<SessionUpdate> {
        self.update_tx.subscribe()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn local_stream(&self) -> Option<&MediaStream> {
        self.capture.current()
    }

    pub fn remote_stream(&self) -> Option<&RemoteStream> {
        self.remote_stream.as_ref()
    }

    pub fn has_peer_connection(&self) -> bool {
        self.peer.is_some()
    }

    pub fn pending_candidate_count(&self) -> usize {
        self.pending_candidates.len()
    }

    pub fn is_recording(&self) -> bool {
        self.recorder.is_recording()
    }

    pub fn signaling(&self) -> &SignalingClient {
        &self.signaling
    }

    // ========================================================================
    // USER ACTIONS
    // ========================================================================

    /// Start Video: lokalen Stream holen
    pub fn start_video(&mut self) -> Result<MediaStream, SessionError> {
        match self.capture.acquire() {
            Ok(stream) => {
                let _ = self
                    .update_tx
                    .send(SessionUpdate::LocalStream(Some(stream.clone())));
                if self.state == SessionState::Idle {
                    self.set_state(SessionState::Capturing);
                }
                Ok(stream)
            }
            Err(e) => {
                tracing::error!("Could not access local media: {}", e);
                let _ = self.update_tx.send(SessionUpdate::MediaError(e.clone()));
                Err(e.into())
            }
        }
    }

    /// Start Call: Offer erstellen und verschicken
    ///
    /// Ohne lokalen Stream wird zuerst einer geholt; scheitert das, bleibt der
    /// Zustand unverändert. Eine bestehende Peer Connection wird ersetzt.
    pub async fn start_call(&mut self) -> Result<(), SessionError> {
        let held = self.capture.current().filter(|s| s.is_active()).cloned();
        let stream = match held {
            Some(stream) => stream,
            None => self.start_video()?,
        };

        if self.peer.is_some() {
            tracing::warn!("Replacing existing peer connection");
            self.discard_peer().await;
        }

        if let Err(e) = self.initiate(&stream).await {
            self.abandon_call(format!("failed to start call: {}", e)).await;
            return Err(e);
        }
        Ok(())
    }

    /// End Call: alles schließen und freigeben
    ///
    /// Gibt `false` zurück, wenn nichts zu beenden war.
    pub async fn end_call(&mut self) -> bool {
        self.pending_candidates.clear();

        let has_call = self.peer.is_some()
            || self.remote_stream.is_some()
            || self.capture.current().is_some();
        if !has_call {
            tracing::debug!("End call without active call, nothing to do");
            return false;
        }

        tracing::info!("Ending call");
        self.discard_peer().await;

        if self.capture.current().is_some() {
            self.capture.release_current();
            let _ = self.update_tx.send(SessionUpdate::LocalStream(None));
        }

        self.set_state(SessionState::Ended);
        self.set_state(SessionState::Idle);
        true
    }

    /// Start Recording: No-op ohne lokalen Stream
    pub fn start_recording(&mut self) -> bool {
        self.recorder.start(self.capture.current())
    }

    /// Stop Recording: speichert die Aufnahme
    pub async fn stop_recording(&mut self) -> Result<Vec<SavedRecording>, SessionError> {
        Ok(self.recorder.stop().await?)
    }

    // ========================================================================
    // INPUTS
    // ========================================================================

    /// Verarbeitet ein Event des Signaling Clients
    pub async fn handle_signaling_event(&mut self, event: SignalingEvent) {
        match event {
            SignalingEvent::Connected => {
                tracing::info!("Signaling relay connected ({})", self.signaling.endpoint());
            }
            SignalingEvent::Message(message) => self.handle_signal(message).await,
            SignalingEvent::Disconnected => {
                if matches!(self.state, SessionState::Negotiating { .. }) {
                    self.abandon_call("signaling relay lost during negotiation".to_string())
                        .await;
                } else {
                    tracing::warn!("Signaling relay disconnected");
                }
            }
        }
    }

    /// Verarbeitet eine Nachricht des anderen Peers
    pub async fn handle_signal(&mut self, message: SignalingMessage) {
        tracing::debug!("Received '{}' in state {}", message.event_name(), self.state);

        match message {
            SignalingMessage::Offer(offer) => {
                if let Err(e) = self.respond_to_offer(offer).await {
                    self.abandon_call(format!("failed to answer offer: {}", e)).await;
                }
            }
            SignalingMessage::Answer(answer) => {
                if let Err(e) = self.receive_answer(answer).await {
                    self.abandon_call(format!("failed to apply answer: {}", e)).await;
                }
            }
            SignalingMessage::IceCandidate(candidate) => self.receive_candidate(candidate).await,
        }
    }

    /// Verarbeitet ein Event einer Peer Connection
    ///
    /// Events älterer (geschlossener) Verbindungen werden verworfen.
    pub async fn handle_peer_input(&mut self, input: PeerInput) {
        let current = self.peer.as_ref().map(|p| p.generation);
        if current != Some(input.generation) {
            tracing::debug!(
                "Ignoring event of stale peer connection #{}",
                input.generation
            );
            return;
        }

        match input.event {
            PeerEvent::LocalCandidate(candidate) => {
                if let Err(e) = self
                    .signaling
                    .send(&SignalingMessage::IceCandidate(candidate))
                {
                    tracing::warn!("Could not forward local ICE candidate: {}", e);
                }
            }
            PeerEvent::GatheringComplete => {
                tracing::debug!("ICE gathering complete");
            }
            PeerEvent::RemoteTrack { stream_id, track } => {
                self.on_remote_track(stream_id, track);
            }
            PeerEvent::StateChanged(PeerConnectionState::Failed) => {
                tracing::warn!("Peer connection failed");
            }
            PeerEvent::StateChanged(state) => {
                tracing::debug!("Peer connection state: {:?}", state);
            }
        }
    }

    /// Verarbeitet alle bereits anstehenden Peer-Events
    pub async fn process_peer_events(&mut self) -> usize {
        let mut processed = 0;
        while let Ok(input) = self.peer_rx.try_recv() {
            self.handle_peer_input(input).await;
            processed += 1;
        }
        processed
    }

    // ========================================================================
    // NEGOTIATION
    // ========================================================================

    async fn initiate(&mut self, stream: &MediaStream) -> Result<(), SessionError> {
        let connection = self.create_peer(Some(stream), CallRole::Caller).await?;

        let offer = connection.create_offer().await?;
        connection.set_local_description(offer.clone()).await?;

        self.set_state(SessionState::Negotiating {
            role: CallRole::Caller,
        });
        self.signaling.send(&SignalingMessage::Offer(offer))?;
        Ok(())
    }

    async fn respond_to_offer(&mut self, offer: SessionDescription) -> Result<(), SessionError> {
        let existing = self
            .peer
            .as_ref()
            .map(|p| (Arc::clone(&p.connection), p.has_remote_description));
        let connection = match existing {
            Some((connection, false)) => connection,
            established => {
                if established.is_some() {
                    // Neuer Anruf der Gegenseite: alte Verbindung ist tot
                    tracing::info!("Offer on an established connection, starting over");
                    self.discard_peer().await;
                }
                let local = self.capture.current().filter(|s| s.is_active()).cloned();
                if local.is_none() {
                    tracing::info!("Answering without local media");
                }
                self.create_peer(local.as_ref(), CallRole::Callee).await?
            }
        };

        connection.set_remote_description(offer).await?;
        self.remote_description_applied(&connection).await;

        let answer = connection.create_answer().await?;
        connection.set_local_description(answer.clone()).await?;
        self.signaling.send(&SignalingMessage::Answer(answer))?;

        if self.remote_stream.is_none() {
            let role = self.peer.as_ref().map_or(CallRole::Callee, |p| p.role);
            self.set_state(SessionState::Negotiating { role });
        }
        Ok(())
    }

    async fn receive_answer(&mut self, answer: SessionDescription) -> Result<(), SessionError> {
        let Some(connection) = self.peer.as_ref().map(|p| Arc::clone(&p.connection)) else {
            tracing::warn!("Dropping answer without peer connection");
            return Ok(());
        };

        connection.set_remote_description(answer).await?;
        self.remote_description_applied(&connection).await;
        Ok(())
    }

    async fn receive_candidate(&mut self, candidate: CandidateDescriptor) {
        let ready = self
            .peer
            .as_ref()
            .filter(|p| p.has_remote_description)
            .map(|p| Arc::clone(&p.connection));

        match ready {
            Some(connection) => {
                if let Err(e) = connection.add_ice_candidate(candidate).await {
                    tracing::warn!("Skipping ICE candidate: {}", e);
                }
            }
            None => {
                if self.pending_candidates.len() >= MAX_PENDING_CANDIDATES {
                    let dropped = self.pending_candidates.remove(0);
                    tracing::warn!(
                        "Candidate buffer full, dropping oldest ({})",
                        dropped.candidate
                    );
                }
                self.pending_candidates.push(candidate);
                tracing::debug!(
                    "Buffered early ICE candidate ({} pending)",
                    self.pending_candidates.len()
                );
            }
        }
    }

    /// Markiert die Remote Description und wendet gepufferte Candidates an
    async fn remote_description_applied(&mut self, connection: &Arc<dyn PeerConnection>) {
        if let Some(peer) = self.peer.as_mut() {
            peer.has_remote_description = true;
        }

        let pending = std::mem::take(&mut self.pending_candidates);
        if pending.is_empty() {
            return;
        }

        tracing::debug!("Applying {} buffered ICE candidate(s)", pending.len());
        for candidate in pending {
            if let Err(e) = connection.add_ice_candidate(candidate).await {
                tracing::warn!("Skipping buffered ICE candidate: {}", e);
            }
        }
    }

    fn on_remote_track(&mut self, stream_id: String, track: RemoteTrack) {
        match &self.remote_stream {
            Some(stream) if stream.id() == stream_id => {
                if stream.add_track(track.clone()) {
                    tracing::debug!("Added track to remote stream {}", stream_id);
                    let _ = self.update_tx.send(SessionUpdate::RemoteTrack(track));
                }
            }
            Some(stream) => {
                tracing::warn!(
                    "Ignoring track of stream {}, remote stream is {}",
                    stream_id,
                    stream.id()
                );
            }
            None => {
                tracing::info!("Remote stream {} received", stream_id);
                let stream = RemoteStream::new(stream_id, track.clone());
                self.remote_stream = Some(stream.clone());
                let _ = self
                    .update_tx
                    .send(SessionUpdate::RemoteStream(Some(stream)));
                let _ = self.update_tx.send(SessionUpdate::RemoteTrack(track));

                let role = self.peer.as_ref().map_or(CallRole::Callee, |p| p.role);
                self.set_state(SessionState::Connected { role });
            }
        }
    }

    // ========================================================================
    // PRIVATE METHODS
    // ========================================================================

    async fn create_peer(
        &mut self,
        local: Option<&MediaStream>,
        role: CallRole,
    ) -> Result<Arc<dyn PeerConnection>, SessionError> {
        self.generation += 1;
        let generation = self.generation;

        let events = PeerEventSender::new(generation, self.peer_tx.clone());
        let connection = self.factory.create(&self.ice_servers, events).await?;
        tracing::info!("Created peer connection #{} as {:?}", generation, role);

        self.peer = Some(ActivePeer {
            connection: Arc::clone(&connection),
            generation,
            role,
            has_remote_description: false,
        });

        if let Some(stream) = local {
            for track in stream.tracks() {
                connection.add_track(stream.id(), track).await?;
            }
        }

        Ok(connection)
    }

    async fn discard_peer(&mut self) {
        if let Some(peer) = self.peer.take() {
            tracing::info!("Closing peer connection #{}", peer.generation);
            peer.connection.close().await;
        }

        self.pending_candidates.clear();

        if self.remote_stream.take().is_some() {
            let _ = self.update_tx.send(SessionUpdate::RemoteStream(None));
        }
    }

    async fn abandon_call(&mut self, reason: String) {
        tracing::warn!("Call abandoned: {}", reason);
        let _ = self.update_tx.send(SessionUpdate::CallAbandoned { reason });
        self.end_call().await;
    }

    fn set_state(&mut self, next: SessionState) {
        if self.state == next {
            return;
        }
        tracing::info!("Session state: {} -> {}", self.state, next);
        self.state = next;
        let _ = self.update_tx.send(SessionUpdate::StateChanged(next));
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.state)
            .field("generation", &self.generation)
            .field("has_peer", &self.peer.is_some())
            .field("pending_candidates", &self.pending_candidates.len())
            .field("capture", &self.capture)
            .field("signaling", &self.signaling)
            .finish()
    }
}

// ============================================================================
// TESTS
// ============================================================================
