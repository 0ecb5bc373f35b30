//! WebRTC Backend (webrtc-rs)
//!
//! Lokale Tracks werden als `TrackLocalStaticSample` aus dem Frame-Feed
//! gespeist; empfangene RTP-Payloads gehen an den `RemoteTrack`.

use super::peer::{
    NegotiationError, PeerConnection, PeerConnectionFactory, PeerConnectionState, PeerEvent,
    PeerEventSender,
};
use crate::config::IceServerConfig;
use crate::media::{MediaTrack, RemoteTrack, TrackKind};
use crate::signaling::{CandidateDescriptor, SdpKind, SessionDescription};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::media::Sample;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

fn webrtc_err(e: impl std::fmt::Display) -> NegotiationError {
    NegotiationError::WebRTC(e.to_string())
}

// ============================================================================
// CONVERSIONS
// ============================================================================

fn to_rtc_ice_server(server: &IceServerConfig) -> RTCIceServer {
    RTCIceServer {
        urls: server.urls.clone(),
        username: server.username.clone(),
        credential: server.credential.clone(),
        ..Default::default()
    }
}

fn to_rtc_description(
    description: SessionDescription,
) -> Result<RTCSessionDescription, NegotiationError> {
    let parsed = match description.kind {
        SdpKind::Offer => RTCSessionDescription::offer(description.sdp),
        SdpKind::Answer => RTCSessionDescription::answer(description.sdp),
        SdpKind::Pranswer => RTCSessionDescription::pranswer(description.sdp),
        SdpKind::Rollback => {
            return Err(NegotiationError::InvalidSdp(
                "rollback descriptions are not supported".to_string(),
            ))
        }
    };
    parsed.map_err(|e| NegotiationError::InvalidSdp(e.to_string()))
}

fn from_rtc_description(
    description: RTCSessionDescription,
) -> Result<SessionDescription, NegotiationError> {
    let kind = match description.sdp_type {
        RTCSdpType::Offer => SdpKind::Offer,
        RTCSdpType::Answer => SdpKind::Answer,
        RTCSdpType::Pranswer => SdpKind::Pranswer,
        RTCSdpType::Rollback => SdpKind::Rollback,
        RTCSdpType::Unspecified => {
            return Err(NegotiationError::InvalidSdp(
                "description without type".to_string(),
            ))
        }
    };
    Ok(SessionDescription {
        kind,
        sdp: description.sdp,
    })
}

fn map_state(state: RTCPeerConnectionState) -> PeerConnectionState {
    match state {
        RTCPeerConnectionState::Connecting => PeerConnectionState::Connecting,
        RTCPeerConnectionState::Connected => PeerConnectionState::Connected,
        RTCPeerConnectionState::Disconnected => PeerConnectionState::Disconnected,
        RTCPeerConnectionState::Failed => PeerConnectionState::Failed,
        RTCPeerConnectionState::Closed => PeerConnectionState::Closed,
        _ => PeerConnectionState::New,
    }
}

// ============================================================================
// FACTORY
// ============================================================================

/// Erzeugt echte WebRTC Peer Connections
#[derive(Debug, Default, Clone)]
pub struct WebRtcPeerFactory;

impl WebRtcPeerFactory {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl PeerConnectionFactory for WebRtcPeerFactory {
    async fn create(
        &self,
        ice_servers: &[IceServerConfig],
        events: PeerEventSender,
    ) -> Result<Arc<dyn PeerConnection>, NegotiationError> {
        // Media Engine mit Standard-Codecs (Opus, PCMU, VP8, ...)
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs().map_err(webrtc_err)?;

        // Interceptors für RTCP, NACK etc.
        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine).map_err(webrtc_err)?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let config = RTCConfiguration {
            ice_servers: ice_servers.iter().map(to_rtc_ice_server).collect(),
            ..Default::default()
        };

        let pc = Arc::new(api.new_peer_connection(config).await.map_err(webrtc_err)?);

        setup_peer_connection_handlers(&pc, events);

        Ok(Arc::new(WebRtcPeer {
            pc,
            pumps: Mutex::new(Vec::new()),
        }))
    }
}

/// Registriert Event Handler für die Peer Connection
fn setup_peer_connection_handlers(pc: &Arc<RTCPeerConnection>, events: PeerEventSender) {
    let generation = events.generation();

    // Connection State Handler
    let events_clone = events.clone();
    pc.on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
        tracing::info!("Peer connection #{} state: {:?}", generation, s);
        events_clone.send(PeerEvent::StateChanged(map_state(s)));
        Box::pin(async {})
    }));

    // ICE Candidate Handler
    let events_clone = events.clone();
    pc.on_ice_candidate(Box::new(move |candidate| {
        match candidate {
            Some(c) => match c.to_json() {
                Ok(init) => {
                    events_clone.send(PeerEvent::LocalCandidate(CandidateDescriptor {
                        candidate: init.candidate,
                        sdp_mid: init.sdp_mid,
                        sdp_mline_index: init.sdp_mline_index,
                        username_fragment: init.username_fragment,
                    }));
                }
                Err(e) => tracing::warn!("Could not serialize local ICE candidate: {}", e),
            },
            None => {
                events_clone.send(PeerEvent::GatheringComplete);
            }
        }
        Box::pin(async {})
    }));

    // Track Handler (für eingehende Medien)
    pc.on_track(Box::new(move |track, _, _| {
        let events = events.clone();
        Box::pin(async move {
            let kind = match track.kind() {
                RTPCodecType::Video => TrackKind::Video,
                _ => TrackKind::Audio,
            };
            let codec = track.codec();
            tracing::info!(
                "Received {} track {} ({})",
                kind,
                track.id(),
                codec.capability.mime_type
            );

            let remote = RemoteTrack::new(track.id(), kind, codec.capability.mime_type.clone());
            events.send(PeerEvent::RemoteTrack {
                stream_id: track.stream_id(),
                track: remote.clone(),
            });

            tokio::spawn(async move {
                while let Ok((packet, _)) = track.read_rtp().await {
                    remote.push_payload(packet.payload);
                }
                tracing::debug!("Remote track {} finished", remote.id());
            });
        })
    }));
}

// ============================================================================
// PEER CONNECTION
// ============================================================================

/// `PeerConnection` auf Basis von `RTCPeerConnection`
pub struct WebRtcPeer {
    pc: Arc<RTCPeerConnection>,
    pumps: Mutex<Vec<JoinHandle<()>>>,
}

#[async_trait]
impl PeerConnection for WebRtcPeer {
    async fn add_track(&self, stream_id: &str, track: &MediaTrack) -> Result<(), NegotiationError> {
        let codec = track.codec();
        let local = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: codec.mime_type.clone(),
                clock_rate: codec.clock_rate,
                channels: codec.channels,
                ..Default::default()
            },
            track.id().to_string(),
            stream_id.to_string(),
        ));

        let sender = self
            .pc
            .add_track(Arc::clone(&local) as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(webrtc_err)?;

        // RTCP lesen, damit Interceptors arbeiten
        let rtcp_pump = tokio::spawn(async move {
            let mut buf = vec![0u8; 1500];
            while sender.read(&mut buf).await.is_ok() {}
        });

        // Frames aus dem lokalen Track schreiben
        let source = track.clone();
        let mut frames = track.subscribe();
        let sample_pump = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = source.wait_ended() => break,
                    frame = frames.recv() => match frame {
                        Ok(frame) => {
                            let sample = Sample {
                                data: frame.data,
                                duration: frame.duration,
                                ..Default::default()
                            };
                            if let Err(e) = local.write_sample(&sample).await {
                                tracing::debug!("Failed to write sample: {}", e);
                            }
                        }
                        Err(RecvError::Lagged(n)) => {
                            tracing::warn!("Sender lagged behind, {} frame(s) skipped", n);
                        }
                        Err(RecvError::Closed) => break,
                    },
                }
            }
        });

        let mut pumps = self.pumps.lock();
        pumps.push(rtcp_pump);
        pumps.push(sample_pump);
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription, NegotiationError> {
        let offer = self.pc.create_offer(None).await.map_err(webrtc_err)?;
        from_rtc_description(offer)
    }

    async fn create_answer(&self) -> Result<SessionDescription, NegotiationError> {
        let answer = self.pc.create_answer(None).await.map_err(webrtc_err)?;
        from_rtc_description(answer)
    }

    async fn set_local_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), NegotiationError> {
        let description = to_rtc_description(description)?;
        self.pc
            .set_local_description(description)
            .await
            .map_err(webrtc_err)
    }

    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), NegotiationError> {
        let description = to_rtc_description(description)?;
        self.pc
            .set_remote_description(description)
            .await
            .map_err(webrtc_err)
    }

    async fn add_ice_candidate(
        &self,
        candidate: CandidateDescriptor,
    ) -> Result<(), NegotiationError> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: candidate.username_fragment,
        };
        self.pc
            .add_ice_candidate(init)
            .await
            .map_err(|e| NegotiationError::InvalidCandidate(e.to_string()))
    }

    async fn close(&self) {
        for pump in self.pumps.lock().drain(..) {
            pump.abort();
        }
        if let Err(e) = self.pc.close().await {
            tracing::debug!("Error while closing peer connection: {}", e);
        }
    }
}

impl std::fmt::Debug for WebRtcPeer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebRtcPeer")
            .field("connection_state", &self.pc.connection_state())
            .finish()
    }
}

// ============================================================================
// TESTS
// ============================================================================
