//! PeerCall - P2P Audio/Video Call
//!
//! Direkter Anruf zwischen zwei Endpunkten mit:
//! - WebSocket-Relay für Offer/Answer und ICE Candidates
//! - WebRTC für den Medienpfad (STUN/TURN)
//! - Lokaler Aufnahme des eigenen Streams als Datei

pub mod config;
pub mod media;
pub mod recording;
pub mod session;
pub mod signaling;

use config::{AppConfig, MediaSourceKind};
use media::{CpalAudioSource, MediaCaptureManager, MediaSource, SyntheticSource};
use recording::{DirectorySink, RecordingController};
use session::{PeerConnectionFactory, Session, SessionError, SessionHandle, WebRtcPeerFactory};
use signaling::{SignalingClient, SignalingEvents};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing_subscriber::EnvFilter;

pub const DEFAULT_LOG_FILTER: &str = "peercall=debug,webrtc=warn";

/// Initialisiert das Logging (`RUST_LOG` hat Vorrang)
///
/// Mehrfacher Aufruf ist harmlos.
pub fn init_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Capture-Backend laut Konfiguration
pub fn media_source(kind: MediaSourceKind) -> Arc<dyn MediaSource> {
    match kind {
        MediaSourceKind::Device => Arc::new(CpalAudioSource::new()),
        MediaSourceKind::Synthetic => Arc::new(SyntheticSource::default()),
    }
}

/// Baut eine Session aus Konfiguration und bestehendem Signaling Client
pub fn build_session(
    config: &AppConfig,
    signaling: SignalingClient,
    factory: Arc<dyn PeerConnectionFactory>,
) -> Session {
    let capture = MediaCaptureManager::new(media_source(config.media_source), config.constraints);
    let recorder = RecordingController::new(Arc::new(DirectorySink::new(
        config.recording.output_dir.clone(),
        config.recording.file_stem.clone(),
    )));

    Session::new(
        capture,
        recorder,
        signaling,
        factory,
        config.ice_servers.clone(),
    )
}

/// Startet eine Session mit einem bereits verbundenen Signaling Client
pub fn start_session(
    config: &AppConfig,
    signaling: (SignalingClient, SignalingEvents),
    factory: Arc<dyn PeerConnectionFactory>,
) -> (SessionHandle, JoinHandle<()>) {
    let (client, events) = signaling;
    build_session(config, client, factory).spawn(events)
}

/// Verbindet mit dem Relay und startet die Session mit WebRTC
pub async fn connect(config: &AppConfig) -> Result<(SessionHandle, JoinHandle<()>), SessionError> {
    tracing::info!("Starting PeerCall...");

    let signaling = SignalingClient::connect(&config.signaling_url).await?;
    Ok(start_session(
        config,
        signaling,
        Arc::new(WebRtcPeerFactory::new()),
    ))
}
