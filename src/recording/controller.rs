//! Recording Controller
//!
//! `Idle → Recording → Idle`. Nimmt jeden Track des lokalen Streams auf, bis
//! `stop()` gerufen wird oder der Stream endet, und speichert pro Track ein
//! Artefakt über den `ArtifactSink`.

use super::sink::ArtifactSink;
use crate::media::{MediaFrame, MediaStream, MediaTrack};
use bytes::{Bytes, BytesMut};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecordingError {
    #[error("Failed to save recording: {0}")]
    Save(String),

    #[error("Recording task failed: {0}")]
    Task(String),
}

// ============================================================================
// TYPES
// ============================================================================

/// Fertige Aufnahme, bereit zum Speichern
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordingArtifact {
    pub mime_type: String,
    pub data: Bytes,
    pub chunk_count: usize,
}

/// Ergebnis einer gespeicherten Aufnahme
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedRecording {
    pub location: PathBuf,
    pub size: usize,
    pub chunk_count: usize,
    pub mime_type: String,
}

/// Events die vom RecordingController ausgelöst werden
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordingEvent {
    Started { stream_id: String },
    Saved(SavedRecording),
    Failed(String),
}

/// Geordnete Chunks einer laufenden Aufnahme
#[derive(Debug)]
struct RecordingBuffer {
    mime_type: String,
    chunks: Vec<Bytes>,
    total: usize,
}

impl RecordingBuffer {
    fn new(mime_type: String) -> Self {
        Self {
            mime_type,
            chunks: Vec::new(),
            total: 0,
        }
    }

    fn push(&mut self, frame: MediaFrame) {
        if frame.data.is_empty() {
            return;
        }
        self.total += frame.data.len();
        self.chunks.push(frame.data);
    }

    /// Chunk-Grenzen spielen für das Artefakt keine Rolle
    fn finalize(self) -> RecordingArtifact {
        let mut data = BytesMut::with_capacity(self.total);
        for chunk in &self.chunks {
            data.extend_from_slice(chunk);
        }
        RecordingArtifact {
            mime_type: self.mime_type,
            data: data.freeze(),
            chunk_count: self.chunks.len(),
        }
    }
}

struct ActiveRecording {
    stream_id: String,
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<Result<Vec<SavedRecording>, RecordingError>>,
}

// ============================================================================
// RECORDING CONTROLLER
// ============================================================================

pub struct RecordingController {
    sink: Arc<dyn ArtifactSink>,
    active: Option<ActiveRecording>,
    event_tx: broadcast::Sender<RecordingEvent>,
}

impl RecordingController {
    pub fn new(sink: Arc<dyn ArtifactSink>) -> Self {
        let (event_tx, _) = broadcast::channel(16);
        Self {
            sink,
            active: None,
            event_tx,
        }
    }

    /// Gibt einen Event-Receiver zurück
    pub fn subscribe(&self) -> broadcast::Receiver<RecordingEvent> {
        self.event_tx.subscribe()
    }

    /// Läuft gerade eine Aufnahme?
    pub fn is_recording(&self) -> bool {
        self.active
            .as_ref()
            .is_some_and(|active| !active.handle.is_finished())
    }

    /// Startet die Aufnahme aller Tracks des Streams
    ///
    /// Ohne (laufenden) lokalen Stream oder bei bereits laufender Aufnahme
    /// passiert nichts; der Rückgabewert sagt, ob gestartet wurde.
    pub fn start(&mut self, stream: Option<&MediaStream>) -> bool {
        if self.is_recording() {
            tracing::debug!("Recording already active, ignoring start");
            return false;
        }

        let Some(stream) = stream.filter(|s| s.is_active()) else {
            tracing::debug!("No local stream, ignoring start recording");
            return false;
        };

        // Eine selbst beendete Aufnahme wurde bereits gespeichert
        self.active = None;

        // Abonnieren vor dem Spawn, damit kein Frame verloren geht
        let feeds: Vec<(MediaTrack, broadcast::Receiver<MediaFrame>)> = stream
            .tracks()
            .iter()
            .filter(|t| !t.is_ended())
            .map(|t| (t.clone(), t.subscribe()))
            .collect();

        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(record(
            feeds,
            stop_rx,
            Arc::clone(&self.sink),
            self.event_tx.clone(),
        ));

        tracing::info!("Recording started on stream {}", stream.id());
        let _ = self.event_tx.send(RecordingEvent::Started {
            stream_id: stream.id().to_string(),
        });

        self.active = Some(ActiveRecording {
            stream_id: stream.id().to_string(),
            stop_tx,
            handle,
        });
        true
    }

    /// Stoppt die Aufnahme und speichert ein Artefakt pro Track
    ///
    /// Ohne laufende Aufnahme ein No-op (leere Liste).
    pub async fn stop(&mut self) -> Result<Vec<SavedRecording>, RecordingError> {
        let Some(active) = self.active.take() else {
            return Ok(Vec::new());
        };

        if active.handle.is_finished() {
            // Bereits durch Stream-Ende abgeschlossen und gespeichert
            tracing::debug!("Recording on {} already finalized", active.stream_id);
            return Ok(Vec::new());
        }

        let _ = active.stop_tx.send(true);
        active
            .handle
            .await
            .map_err(|e| RecordingError::Task(e.to_string()))?
    }
}

impl std::fmt::Debug for RecordingController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordingController")
            .field("is_recording", &self.is_recording())
            .finish()
    }
}

/// Aufnahme-Task: sammelt alle Tracks, speichert danach nacheinander
async fn record(
    feeds: Vec<(MediaTrack, broadcast::Receiver<MediaFrame>)>,
    stop_rx: watch::Receiver<bool>,
    sink: Arc<dyn ArtifactSink>,
    event_tx: broadcast::Sender<RecordingEvent>,
) -> Result<Vec<SavedRecording>, RecordingError> {
    let buffers = futures::future::join_all(
        feeds
            .into_iter()
            .map(|(track, frames)| collect_track(track, frames, stop_rx.clone())),
    )
    .await;

    let mut saved = Vec::with_capacity(buffers.len());
    let mut failure = None;

    for buffer in buffers {
        match save_artifact(&sink, buffer.finalize()).await {
            Ok(recording) => {
                let _ = event_tx.send(RecordingEvent::Saved(recording.clone()));
                saved.push(recording);
            }
            Err(e) => {
                tracing::error!("Recording could not be saved: {}", e);
                let _ = event_tx.send(RecordingEvent::Failed(e.to_string()));
                failure.get_or_insert(e);
            }
        }
    }

    match failure {
        Some(e) => Err(e),
        None => Ok(saved),
    }
}

/// Sammelt die Frames eines Tracks bis Stop oder Track-Ende
async fn collect_track(
    track: MediaTrack,
    mut frames: broadcast::Receiver<MediaFrame>,
    mut stop_rx: watch::Receiver<bool>,
) -> RecordingBuffer {
    let mut buffer = RecordingBuffer::new(track.codec().mime_type.clone());

    loop {
        tokio::select! {
            _ = async {
                let _ = stop_rx.wait_for(|stop| *stop).await;
            } => break,
            _ = track.wait_ended() => {
                tracing::info!("Recorded track {} ended, finalizing", track.id());
                break;
            }
            frame = frames.recv() => match frame {
                Ok(frame) => buffer.push(frame),
                Err(RecvError::Lagged(n)) => {
                    tracing::warn!("Recorder lagged behind, {} frame(s) lost", n);
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    // Bereits gepufferte Frames mitnehmen
    loop {
        match frames.try_recv() {
            Ok(frame) => buffer.push(frame),
            Err(TryRecvError::Lagged(n)) => {
                tracing::warn!("Recorder lagged behind, {} frame(s) lost", n);
            }
            Err(_) => break,
        }
    }
    buffer
}

async fn save_artifact(
    sink: &Arc<dyn ArtifactSink>,
    artifact: RecordingArtifact,
) -> Result<SavedRecording, RecordingError> {
    let size = artifact.data.len();
    let chunk_count = artifact.chunk_count;
    let mime_type = artifact.mime_type.clone();

    let sink = Arc::clone(sink);
    let location = tokio::task::spawn_blocking(move || sink.save(&artifact))
        .await
        .map_err(|e| RecordingError::Task(e.to_string()))??;

    Ok(SavedRecording {
        location,
        size,
        chunk_count,
        mime_type,
    })
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{CodecSpec, TrackKind};
    use parking_lot::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct MemorySink {
        saved: Mutex<Vec<RecordingArtifact>>,
    }

    impl ArtifactSink for MemorySink {
        fn save(&self, artifact: &RecordingArtifact) -> Result<PathBuf, RecordingError> {
            let mut saved = self.saved.lock();
            saved.push(artifact.clone());
            Ok(PathBuf::from(format!("memory://{}", saved.len())))
        }
    }

    fn local_stream() -> MediaStream {
        MediaStream::new(vec![MediaTrack::new(TrackKind::Audio, CodecSpec::pcmu())])
    }

    #[tokio::test]
    async fn test_start_without_stream_is_noop() {
        let sink = Arc::new(MemorySink::default());
        let mut recorder = RecordingController::new(sink.clone());

        assert!(!recorder.start(None));
        assert!(!recorder.is_recording());
        assert_eq!(recorder.stop().await, Ok(Vec::new()));
        assert!(sink.saved.lock().is_empty());
    }

    #[tokio::test]
    async fn test_start_on_stopped_stream_is_noop() {
        let mut recorder = RecordingController::new(Arc::new(MemorySink::default()));
        let stream = local_stream();
        stream.stop_all();

        assert!(!recorder.start(Some(&stream)));
        assert!(!recorder.is_recording());
    }

    #[tokio::test]
    async fn test_artifact_size_equals_sum_of_chunks() {
        let sink = Arc::new(MemorySink::default());
        let mut recorder = RecordingController::new(sink.clone());
        let stream = local_stream();
        let track = stream.tracks()[0].clone();

        assert!(recorder.start(Some(&stream)));
        assert!(recorder.is_recording());

        let sizes = [160usize, 7, 0, 1024, 33];
        for (i, size) in sizes.iter().enumerate() {
            track.push_frame(MediaFrame::new(vec![i as u8; *size], Duration::from_millis(20)));
        }

        let saved = recorder.stop().await.unwrap().remove(0);
        let total: usize = sizes.iter().sum();

        assert_eq!(saved.size, total);
        // Leere Chunks werden verworfen
        assert_eq!(saved.chunk_count, 4);
        assert_eq!(saved.mime_type, "audio/PCMU");
        assert!(!recorder.is_recording());

        let artifacts = sink.saved.lock();
        assert_eq!(artifacts.len(), 1);
        assert_eq!(artifacts[0].data.len(), total);
        assert_eq!(&artifacts[0].data[..160], &[0u8; 160][..]);
    }

    #[tokio::test]
    async fn test_recording_stops_when_stream_ends() {
        let sink = Arc::new(MemorySink::default());
        let mut recorder = RecordingController::new(sink.clone());
        let mut events = recorder.subscribe();
        let stream = local_stream();

        recorder.start(Some(&stream));
        stream.tracks()[0].push_frame(MediaFrame::new(vec![1u8; 10], Duration::from_millis(20)));
        stream.stop_all();

        let mut saved = None;
        while saved.is_none() {
            match tokio::time::timeout(Duration::from_secs(2), events.recv())
                .await
                .expect("recording was not finalized")
                .unwrap()
            {
                RecordingEvent::Saved(s) => saved = Some(s),
                RecordingEvent::Started { .. } => {}
                RecordingEvent::Failed(e) => panic!("save failed: {}", e),
            }
        }

        assert_eq!(saved.unwrap().size, 10);

        // Bereits gespeichert: stop speichert nicht erneut
        let _ = recorder.stop().await.unwrap();
        assert!(!recorder.is_recording());
        assert_eq!(sink.saved.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_every_track_is_saved_separately() {
        let sink = Arc::new(MemorySink::default());
        let mut recorder = RecordingController::new(sink.clone());
        let audio = MediaTrack::new(TrackKind::Audio, CodecSpec::pcmu());
        let video = MediaTrack::new(TrackKind::Video, CodecSpec::h264());
        let stream = MediaStream::new(vec![audio.clone(), video.clone()]);

        assert!(recorder.start(Some(&stream)));
        audio.push_frame(MediaFrame::new(vec![0xffu8; 160], Duration::from_millis(20)));
        video.push_frame(MediaFrame::new(vec![0u8, 0, 0, 1, 0x65], Duration::from_millis(66)));
        video.push_frame(MediaFrame::new(vec![0u8, 0, 0, 1, 0x41], Duration::from_millis(66)));

        let saved = recorder.stop().await.unwrap();

        assert_eq!(saved.len(), 2);
        assert_eq!(saved[0].mime_type, "audio/PCMU");
        assert_eq!(saved[0].size, 160);
        assert_eq!(saved[1].mime_type, "video/H264");
        assert_eq!(saved[1].size, 10);
        assert_eq!(saved[1].chunk_count, 2);
        assert_ne!(saved[0].location, saved[1].location);
        assert_eq!(sink.saved.lock().len(), 2);
    }
}
