//! Stream- und Track-Handles
//!
//! `MediaStream`/`MediaTrack` sind billig klonbare Handles auf geteilten
//! Zustand. Nur der `MediaCaptureManager` stoppt Tracks; Peer Connection und
//! Recorder lesen lediglich den Frame-Feed.

use bytes::Bytes;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};

/// Kapazität des Frame-Feeds pro Track
pub const FRAME_FEED_CAPACITY: usize = 256;

// ============================================================================
// TRACK TYPES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackKind {
    Audio,
    Video,
}

impl std::fmt::Display for TrackKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrackKind::Audio => write!(f, "audio"),
            TrackKind::Video => write!(f, "video"),
        }
    }
}

/// Codec, in dem ein Track seine Frames liefert
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodecSpec {
    pub mime_type: String,
    pub clock_rate: u32,
    pub channels: u16,
}

impl CodecSpec {
    /// G.711 µ-law, 8 kHz mono
    pub fn pcmu() -> Self {
        Self {
            mime_type: "audio/PCMU".to_string(),
            clock_rate: 8000,
            channels: 1,
        }
    }

    /// H.264 Annex-B, 90 kHz RTP-Takt
    pub fn h264() -> Self {
        Self {
            mime_type: "video/H264".to_string(),
            clock_rate: 90000,
            channels: 0,
        }
    }
}

/// Ein kodierter Frame aus der Capture-Pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaFrame {
    pub data: Bytes,
    pub duration: Duration,
}

impl MediaFrame {
    pub fn new(data: impl Into<Bytes>, duration: Duration) -> Self {
        Self {
            data: data.into(),
            duration,
        }
    }
}

// ============================================================================
// LOCAL TRACK
// ============================================================================

struct TrackInner {
    id: String,
    kind: TrackKind,
    codec: CodecSpec,
    frames: broadcast::Sender<MediaFrame>,
    ended: watch::Sender<bool>,
}

/// Lokaler Track (Mikrofon, Kamera, Testquelle)
#[derive(Clone)]
pub struct MediaTrack {
    inner: Arc<TrackInner>,
}

impl MediaTrack {
    pub fn new(kind: TrackKind, codec: CodecSpec) -> Self {
        let (frames, _) = broadcast::channel(FRAME_FEED_CAPACITY);
        let (ended, _) = watch::channel(false);

        Self {
            inner: Arc::new(TrackInner {
                id: uuid::Uuid::new_v4().to_string(),
                kind,
                codec,
                frames,
                ended,
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn kind(&self) -> TrackKind {
        self.inner.kind
    }

    pub fn codec(&self) -> &CodecSpec {
        &self.inner.codec
    }

    /// Veröffentlicht einen Frame; nach `stop()` wird nichts mehr angenommen
    pub fn push_frame(&self, frame: MediaFrame) -> bool {
        if self.is_ended() {
            return false;
        }
        // Kein Empfänger ist kein Fehler
        let _ = self.inner.frames.send(frame);
        true
    }

    /// Abonniert den Frame-Feed ab jetzt
    pub fn subscribe(&self) -> broadcast::Receiver<MediaFrame> {
        self.inner.frames.subscribe()
    }

    /// Stoppt den Track. Gibt `true` zurück, wenn er vorher noch lief.
    pub fn stop(&self) -> bool {
        self.inner.ended.send_if_modified(|ended| {
            if *ended {
                false
            } else {
                *ended = true;
                true
            }
        })
    }

    pub fn is_ended(&self) -> bool {
        *self.inner.ended.borrow()
    }

    /// Wartet bis der Track gestoppt wurde
    pub async fn wait_ended(&self) {
        let mut rx = self.inner.ended.subscribe();
        let _ = rx.wait_for(|ended| *ended).await;
    }
}

impl std::fmt::Debug for MediaTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaTrack")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind)
            .field("codec", &self.inner.codec.mime_type)
            .field("ended", &self.is_ended())
            .finish()
    }
}

// ============================================================================
// LOCAL STREAM
// ============================================================================

/// Lokaler Stream, gehört dem `MediaCaptureManager`
#[derive(Debug, Clone)]
pub struct MediaStream {
    id: String,
    tracks: Vec<MediaTrack>,
}

impl MediaStream {
    pub fn new(tracks: Vec<MediaTrack>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            tracks,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn tracks(&self) -> &[MediaTrack] {
        &self.tracks
    }

    /// Erster Track der gewünschten Art
    pub fn track_of(&self, kind: TrackKind) -> Option<&MediaTrack> {
        self.tracks.iter().find(|t| t.kind() == kind)
    }

    /// Läuft noch mindestens ein Track?
    pub fn is_active(&self) -> bool {
        self.tracks.iter().any(|t| !t.is_ended())
    }

    pub(crate) fn stop_all(&self) -> usize {
        self.tracks.iter().filter(|t| t.stop()).count()
    }
}

// ============================================================================
// REMOTE STREAM
// ============================================================================

struct RemoteTrackInner {
    id: String,
    kind: TrackKind,
    mime_type: String,
    payloads: broadcast::Sender<Bytes>,
}

/// Track vom anderen Peer
#[derive(Clone)]
pub struct RemoteTrack {
    inner: Arc<RemoteTrackInner>,
}

impl RemoteTrack {
    pub fn new(id: impl Into<String>, kind: TrackKind, mime_type: impl Into<String>) -> Self {
        let (payloads, _) = broadcast::channel(FRAME_FEED_CAPACITY);
        Self {
            inner: Arc::new(RemoteTrackInner {
                id: id.into(),
                kind,
                mime_type: mime_type.into(),
                payloads,
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn kind(&self) -> TrackKind {
        self.inner.kind
    }

    pub fn mime_type(&self) -> &str {
        &self.inner.mime_type
    }

    /// Empfangene Payloads für die Wiedergabe
    pub fn subscribe(&self) -> broadcast::Receiver<Bytes> {
        self.inner.payloads.subscribe()
    }

    pub(crate) fn push_payload(&self, payload: Bytes) {
        let _ = self.inner.payloads.send(payload);
    }
}

impl std::fmt::Debug for RemoteTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteTrack")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind)
            .field("mime_type", &self.inner.mime_type)
            .finish()
    }
}

/// Stream vom anderen Peer, wird pro Verbindung genau einmal gesetzt
#[derive(Clone)]
pub struct RemoteStream {
    id: String,
    tracks: Arc<RwLock<Vec<RemoteTrack>>>,
}

impl RemoteStream {
    pub fn new(id: impl Into<String>, first_track: RemoteTrack) -> Self {
        Self {
            id: id.into(),
            tracks: Arc::new(RwLock::new(vec![first_track])),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn tracks(&self) -> Vec<RemoteTrack> {
        self.tracks.read().clone()
    }

    /// Hängt einen weiteren Track an; doppelte IDs werden ignoriert
    pub fn add_track(&self, track: RemoteTrack) -> bool {
        let mut tracks = self.tracks.write();
        if tracks.iter().any(|t| t.id() == track.id()) {
            return false;
        }
        tracks.push(track);
        true
    }
}

impl std::fmt::Debug for RemoteStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteStream")
            .field("id", &self.id)
            .field("tracks", &self.tracks.read().len())
            .finish()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn audio_track() -> MediaTrack {
        MediaTrack::new(TrackKind::Audio, CodecSpec::pcmu())
    }

    #[test]
    fn test_stop_is_idempotent() {
        let track = audio_track();

        assert!(track.stop());
        assert!(!track.stop());
        assert!(track.is_ended());
        assert!(!track.push_frame(MediaFrame::new(vec![1u8], Duration::from_millis(20))));
    }

    #[test]
    fn test_stop_all_counts_running_tracks() {
        let video = MediaTrack::new(TrackKind::Video, CodecSpec::h264());
        let audio = audio_track();
        let stream = MediaStream::new(vec![video.clone(), audio.clone()]);

        assert_eq!(stream.track_of(TrackKind::Audio).map(|t| t.id()), Some(audio.id()));
        assert_eq!(stream.track_of(TrackKind::Video).map(|t| t.id()), Some(video.id()));

        video.stop();
        assert!(stream.is_active());
        assert_eq!(stream.stop_all(), 1);
        assert_eq!(stream.stop_all(), 0);
        assert!(!stream.is_active());
    }

    #[tokio::test]
    async fn test_wait_ended_after_stop() {
        let track = audio_track();
        let waiter = track.clone();
        let handle = tokio::spawn(async move { waiter.wait_ended().await });

        track.stop();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("wait_ended did not finish")
            .unwrap();

        // Bereits gestoppt: kehrt sofort zurück
        track.wait_ended().await;
    }

    #[test]
    fn test_remote_stream_ignores_duplicate_tracks() {
        let first = RemoteTrack::new("a", TrackKind::Audio, "audio/PCMU");
        let stream = RemoteStream::new("remote", first.clone());

        assert!(!stream.add_track(first));
        assert!(stream.add_track(RemoteTrack::new("v", TrackKind::Video, "video/VP8")));
        assert_eq!(stream.tracks().len(), 2);
    }
}
