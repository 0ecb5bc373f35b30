//! Gemeinsame Test-Hilfen: Fake Peer Connections, manuelle Medienquelle,
//! Warten auf Session-Updates.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use peercall::config::IceServerConfig;
use peercall::media::{
    CodecSpec, MediaAccessError, MediaCaptureManager, MediaConstraints, MediaSource, MediaStream,
    MediaTrack, RemoteTrack, TrackKind,
};
use peercall::recording::{DirectorySink, RecordingController};
use peercall::session::{
    NegotiationError, PeerConnection, PeerConnectionFactory, PeerConnectionState, PeerEvent,
    PeerEventSender, Session, SessionHandle, SessionState, SessionUpdate,
};
use peercall::signaling::{
    CandidateDescriptor, SdpKind, SessionDescription, SignalingClient, SignalingEvents,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

pub const TIMEOUT: Duration = Duration::from_secs(5);

pub fn init_tracing() {
    peercall::init_logging();
}

// ============================================================================
// FAKE SDP
// ============================================================================

/// Beschreibung im Format des Fake-Backends
///
/// ```text
/// fake-sdp offer from=<name>
/// track <stream_id> <track_id> <kind>
/// ```
pub fn fake_description(kind: SdpKind, from: &str, tracks: &[(&str, &str, TrackKind)]) -> String {
    let label = match kind {
        SdpKind::Offer => "offer",
        SdpKind::Answer => "answer",
        SdpKind::Pranswer => "pranswer",
        SdpKind::Rollback => "rollback",
    };
    let mut sdp = format!("fake-sdp {} from={}", label, from);
    for (stream_id, track_id, kind) in tracks {
        sdp.push_str(&format!("\ntrack {} {} {}", stream_id, track_id, kind));
    }
    sdp
}

pub fn fake_offer(from: &str, tracks: &[(&str, &str, TrackKind)]) -> SessionDescription {
    SessionDescription::offer(fake_description(SdpKind::Offer, from, tracks))
}

pub fn fake_answer(from: &str, tracks: &[(&str, &str, TrackKind)]) -> SessionDescription {
    SessionDescription::answer(fake_description(SdpKind::Answer, from, tracks))
}

fn parse_tracks(sdp: &str) -> Vec<(String, String, TrackKind)> {
    sdp.lines()
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            if parts.next() != Some("track") {
                return None;
            }
            let stream_id = parts.next()?.to_string();
            let track_id = parts.next()?.to_string();
            let kind = match parts.next()? {
                "video" => TrackKind::Video,
                _ => TrackKind::Audio,
            };
            Some((stream_id, track_id, kind))
        })
        .collect()
}

// ============================================================================
// FAKE PEER CONNECTION
// ============================================================================

/// Peer Connection ohne Netzwerk
///
/// Sobald lokale und entfernte Beschreibung gesetzt sind, meldet sie die
/// Tracks aus der entfernten Beschreibung als Remote Tracks.
pub struct FakePeer {
    name: String,
    events: PeerEventSender,
    local_tracks: Mutex<Vec<(String, String, TrackKind)>>,
    local: Mutex<Option<SessionDescription>>,
    remote: Mutex<Option<SessionDescription>>,
    applied: Mutex<Vec<String>>,
    closed: AtomicBool,
    announced: AtomicBool,
    candidates: AtomicUsize,
}

impl FakePeer {
    fn new(name: String, events: PeerEventSender) -> Self {
        Self {
            name,
            events,
            local_tracks: Mutex::new(Vec::new()),
            local: Mutex::new(None),
            remote: Mutex::new(None),
            applied: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            announced: AtomicBool::new(false),
            candidates: AtomicUsize::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn applied_candidates(&self) -> Vec<String> {
        self.applied.lock().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn has_remote_description(&self) -> bool {
        self.remote.lock().is_some()
    }

    pub fn local_track_count(&self) -> usize {
        self.local_tracks.lock().len()
    }

    fn ensure_open(&self) -> Result<(), NegotiationError> {
        if self.is_closed() {
            return Err(NegotiationError::Closed);
        }
        Ok(())
    }

    fn describe(&self, kind: SdpKind) -> SessionDescription {
        let tracks = self.local_tracks.lock();
        let refs: Vec<(&str, &str, TrackKind)> = tracks
            .iter()
            .map(|(s, t, k)| (s.as_str(), t.as_str(), *k))
            .collect();
        SessionDescription {
            kind,
            sdp: fake_description(kind, &self.name, &refs),
        }
    }

    fn announce_remote_tracks(&self) {
        let Some(remote) = self.remote.lock().clone() else {
            return;
        };
        if self.local.lock().is_none() || self.announced.swap(true, Ordering::SeqCst) {
            return;
        }

        self.events
            .send(PeerEvent::StateChanged(PeerConnectionState::Connected));
        for (stream_id, track_id, kind) in parse_tracks(&remote.sdp) {
            let mime = match kind {
                TrackKind::Audio => "audio/PCMU",
                TrackKind::Video => "video/VP8",
            };
            self.events.send(PeerEvent::RemoteTrack {
                stream_id,
                track: RemoteTrack::new(track_id, kind, mime),
            });
        }
    }
}

#[async_trait]
impl PeerConnection for FakePeer {
    async fn add_track(&self, stream_id: &str, track: &MediaTrack) -> Result<(), NegotiationError> {
        self.ensure_open()?;
        self.local_tracks.lock().push((
            stream_id.to_string(),
            track.id().to_string(),
            track.kind(),
        ));
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription, NegotiationError> {
        self.ensure_open()?;
        Ok(self.describe(SdpKind::Offer))
    }

    async fn create_answer(&self) -> Result<SessionDescription, NegotiationError> {
        self.ensure_open()?;
        if !self.has_remote_description() {
            return Err(NegotiationError::NoRemoteDescription);
        }
        Ok(self.describe(SdpKind::Answer))
    }

    async fn set_local_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), NegotiationError> {
        self.ensure_open()?;
        *self.local.lock() = Some(description);

        let n = self.candidates.fetch_add(1, Ordering::SeqCst) + 1;
        self.events
            .send(PeerEvent::LocalCandidate(CandidateDescriptor {
                candidate: format!("candidate:{}-{}", self.name, n),
                sdp_mid: Some("0".to_string()),
                sdp_mline_index: Some(0),
                username_fragment: None,
            }));
        self.events.send(PeerEvent::GatheringComplete);

        self.announce_remote_tracks();
        Ok(())
    }

    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), NegotiationError> {
        self.ensure_open()?;
        if !description.sdp.starts_with("fake-sdp") {
            return Err(NegotiationError::InvalidSdp(description.sdp));
        }
        *self.remote.lock() = Some(description);
        self.announce_remote_tracks();
        Ok(())
    }

    async fn add_ice_candidate(
        &self,
        candidate: CandidateDescriptor,
    ) -> Result<(), NegotiationError> {
        self.ensure_open()?;
        if !self.has_remote_description() {
            return Err(NegotiationError::NoRemoteDescription);
        }
        if candidate.candidate.is_empty() {
            return Err(NegotiationError::InvalidCandidate("empty".to_string()));
        }
        self.applied.lock().push(candidate.candidate);
        Ok(())
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.events
                .send(PeerEvent::StateChanged(PeerConnectionState::Closed));
        }
    }
}

/// Merkt sich alle erzeugten Fake Peers
pub struct FakePeerFactory {
    name: String,
    peers: Mutex<Vec<Arc<FakePeer>>>,
    fail: AtomicBool,
}

impl FakePeerFactory {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            peers: Mutex::new(Vec::new()),
            fail: AtomicBool::new(false),
        }
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn peers(&self) -> Vec<Arc<FakePeer>> {
        self.peers.lock().clone()
    }

    pub fn last(&self) -> Option<Arc<FakePeer>> {
        self.peers.lock().last().cloned()
    }
}

#[async_trait]
impl PeerConnectionFactory for FakePeerFactory {
    async fn create(
        &self,
        _ice_servers: &[IceServerConfig],
        events: PeerEventSender,
    ) -> Result<Arc<dyn PeerConnection>, NegotiationError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(NegotiationError::WebRTC("factory unavailable".to_string()));
        }
        let peer = Arc::new(FakePeer::new(
            format!("{}#{}", self.name, events.generation()),
            events,
        ));
        self.peers.lock().push(Arc::clone(&peer));
        Ok(peer)
    }
}

// ============================================================================
// MANUAL MEDIA SOURCE
// ============================================================================

/// Medienquelle ohne Hardware; Frames werden vom Test geschoben
#[derive(Default)]
pub struct ManualSource {
    failure: Mutex<Option<MediaAccessError>>,
    streams: Mutex<Vec<MediaStream>>,
}

impl ManualSource {
    pub fn fail_with(&self, error: Option<MediaAccessError>) {
        *self.failure.lock() = error;
    }

    pub fn streams(&self) -> Vec<MediaStream> {
        self.streams.lock().clone()
    }
}

impl MediaSource for ManualSource {
    fn name(&self) -> &str {
        "manual"
    }

    fn open(&self, constraints: &MediaConstraints) -> Result<MediaStream, MediaAccessError> {
        if let Some(error) = self.failure.lock().clone() {
            return Err(error);
        }

        let mut tracks = Vec::new();
        if constraints.audio {
            tracks.push(MediaTrack::new(TrackKind::Audio, CodecSpec::pcmu()));
        }
        if constraints.video {
            tracks.push(MediaTrack::new(
                TrackKind::Video,
                CodecSpec {
                    mime_type: "video/VP8".to_string(),
                    clock_rate: 90_000,
                    channels: 0,
                },
            ));
        }

        let stream = MediaStream::new(tracks);
        self.streams.lock().push(stream.clone());
        Ok(stream)
    }
}

// ============================================================================
// ENDPOINTS
// ============================================================================

/// Eine laufende Session mit Fake-Backend
pub struct TestEndpoint {
    pub handle: SessionHandle,
    pub task: JoinHandle<()>,
    pub factory: Arc<FakePeerFactory>,
    pub source: Arc<ManualSource>,
    pub recordings: TempDir,
}

pub fn endpoint(name: &str, signaling: (SignalingClient, SignalingEvents)) -> TestEndpoint {
    endpoint_with(name, signaling, MediaConstraints::default())
}

pub fn endpoint_with(
    name: &str,
    signaling: (SignalingClient, SignalingEvents),
    constraints: MediaConstraints,
) -> TestEndpoint {
    let factory = Arc::new(FakePeerFactory::new(name));
    let source = Arc::new(ManualSource::default());
    let recordings = tempfile::tempdir().expect("temp dir");

    let (client, events) = signaling;
    let session = Session::new(
        MediaCaptureManager::new(source.clone(), constraints),
        RecordingController::new(Arc::new(DirectorySink::new(recordings.path(), name))),
        client,
        factory.clone(),
        Vec::new(),
    );
    let (handle, task) = session.spawn(events);

    TestEndpoint {
        handle,
        task,
        factory,
        source,
        recordings,
    }
}

/// Zwei Sessions, verbunden über das Loopback-Relay
pub fn connected_pair() -> (TestEndpoint, TestEndpoint) {
    let (a, b) = SignalingClient::loopback_pair();
    (endpoint("alice", a), endpoint("bob", b))
}

/// Eine Session und die rohe Gegenseite des Relays
pub fn endpoint_with_raw_remote(name: &str) -> (TestEndpoint, SignalingClient, SignalingEvents) {
    endpoint_with_raw_remote_constraints(name, MediaConstraints::default())
}

pub fn endpoint_with_raw_remote_constraints(
    name: &str,
    constraints: MediaConstraints,
) -> (TestEndpoint, SignalingClient, SignalingEvents) {
    let (local, (remote, remote_events)) = SignalingClient::loopback_pair();
    (endpoint_with(name, local, constraints), remote, remote_events)
}

// ============================================================================
// WAITING
// ============================================================================

pub async fn wait_for<F>(updates: &mut broadcast::Receiver<SessionUpdate>, mut predicate: F) -> SessionUpdate
where
    F: FnMut(&SessionUpdate) -> bool,
{
    tokio::time::timeout(TIMEOUT, async {
        loop {
            match updates.recv().await {
                Ok(update) if predicate(&update) => return update,
                Ok(_) | Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => panic!("session updates closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for session update")
}

pub async fn wait_for_state(updates: &mut broadcast::Receiver<SessionUpdate>, state: SessionState) {
    wait_for(updates, |u| matches!(u, SessionUpdate::StateChanged(s) if *s == state)).await;
}

/// Fragt den Zustand ab, bis er erreicht ist
pub async fn settle_state(handle: &SessionHandle, state: SessionState) {
    let result = tokio::time::timeout(TIMEOUT, async {
        while handle.state().await.expect("session stopped") != state {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(result.is_ok(), "timed out waiting for state {}", state);
}

/// Pollt eine Bedingung bis zum Timeout
pub async fn eventually<F>(what: &str, mut condition: F)
where
    F: FnMut() -> bool,
{
    let result = tokio::time::timeout(TIMEOUT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(result.is_ok(), "timed out waiting for {}", what);
}

/// Sammelt alle Updates, die bis jetzt angekommen sind
pub fn drain(updates: &mut broadcast::Receiver<SessionUpdate>) -> Vec<SessionUpdate> {
    let mut collected = Vec::new();
    loop {
        match updates.try_recv() {
            Ok(update) => collected.push(update),
            Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
            Err(_) => break,
        }
    }
    collected
}

/// Wartet auf die nächste Relay-Nachricht der Gegenseite
pub async fn next_message(events: &mut SignalingEvents) -> peercall::signaling::SignalingMessage {
    tokio::time::timeout(TIMEOUT, async {
        loop {
            match events.recv().await {
                Some(peercall::signaling::SignalingEvent::Message(message)) => return message,
                Some(_) => continue,
                None => panic!("signaling events closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for relay message")
}
