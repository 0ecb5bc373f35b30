//! Session Module - Verbindungsaufbau zwischen zwei Peers
//!
//! Dieses Modul verwaltet:
//! - Die Zustandsmaschine eines Anrufs (Offer/Answer, ICE Candidates)
//! - Den Session-Task und das Handle für die Oberfläche
//! - Peer Connections (WebRTC oder austauschbar über Traits)

mod handle;
mod negotiator;
mod peer;
mod webrtc_peer;

pub use handle::SessionHandle;
pub use negotiator::{CallRole, Session, SessionError, SessionState, SessionUpdate};
pub use peer::{
    NegotiationError, PeerConnection, PeerConnectionFactory, PeerConnectionState, PeerEvent,
    PeerEventSender, PeerInput,
};
pub use webrtc_peer::{WebRtcPeer, WebRtcPeerFactory};
