//! Peer Connection Vertrag
//!
//! Die Session kennt die Peer Connection nur über diese Traits. Alles, was
//! die Verbindung asynchron meldet (ICE Candidates, Remote Tracks, Status),
//! landet als `PeerEvent` in der Event-Queue der Session.

use crate::config::IceServerConfig;
use crate::media::{MediaTrack, RemoteTrack};
use crate::signaling::{CandidateDescriptor, SessionDescription};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NegotiationError {
    #[error("WebRTC error: {0}")]
    WebRTC(String),

    #[error("Invalid SDP: {0}")]
    InvalidSdp(String),

    #[error("Invalid ICE candidate: {0}")]
    InvalidCandidate(String),

    #[error("No remote description set")]
    NoRemoteDescription,

    #[error("Peer connection is closed")]
    Closed,
}

// ============================================================================
// EVENTS
// ============================================================================

/// Verbindungsstatus auf Transportebene (nur für Logging)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// Asynchrone Meldungen einer Peer Connection
#[derive(Debug, Clone)]
pub enum PeerEvent {
    /// Lokal gefundener ICE Candidate, muss sofort verschickt werden
    LocalCandidate(CandidateDescriptor),
    /// Candidate-Sammlung abgeschlossen
    GatheringComplete,
    /// Track vom anderen Peer empfangen
    RemoteTrack { stream_id: String, track: RemoteTrack },
    StateChanged(PeerConnectionState),
}

/// Event einer bestimmten Verbindungs-Generation
#[derive(Debug, Clone)]
pub struct PeerInput {
    pub generation: u64,
    pub event: PeerEvent,
}

/// Sender, über den eine Peer Connection in die Session-Queue schreibt
///
/// Jede neue Verbindung bekommt eine eigene Generation; Events einer bereits
/// geschlossenen Verbindung werden von der Session verworfen.
#[derive(Debug, Clone)]
pub struct PeerEventSender {
    generation: u64,
    tx: mpsc::UnboundedSender<PeerInput>,
}

impl PeerEventSender {
    pub fn new(generation: u64, tx: mpsc::UnboundedSender<PeerInput>) -> Self {
        Self { generation, tx }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Gibt `false` zurück, wenn die Session nicht mehr existiert
    pub fn send(&self, event: PeerEvent) -> bool {
        self.tx
            .send(PeerInput {
                generation: self.generation,
                event,
            })
            .is_ok()
    }
}

// ============================================================================
// TRAITS
// ============================================================================

/// Eine Seite einer direkten Peer-to-Peer Verbindung
///
/// Aufrufe erfolgen nie parallel; jeder Schritt wird abgewartet, bevor der
/// nächste beginnt. Nach `close()` dürfen alle Operationen fehlschlagen.
#[async_trait]
pub trait PeerConnection: Send + Sync {
    async fn add_track(&self, stream_id: &str, track: &MediaTrack) -> Result<(), NegotiationError>;

    async fn create_offer(&self) -> Result<SessionDescription, NegotiationError>;

    async fn create_answer(&self) -> Result<SessionDescription, NegotiationError>;

    async fn set_local_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), NegotiationError>;

    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), NegotiationError>;

    async fn add_ice_candidate(&self, candidate: CandidateDescriptor)
        -> Result<(), NegotiationError>;

    async fn close(&self);
}

/// Erzeugt Peer Connections für die Session
#[async_trait]
pub trait PeerConnectionFactory: Send + Sync {
    async fn create(
        &self,
        ice_servers: &[IceServerConfig],
        events: PeerEventSender,
    ) -> Result<Arc<dyn PeerConnection>, NegotiationError>;
}
