//! Media Module - Lokale Aufnahme und Wiedergabe
//!
//! Dieses Modul verwaltet:
//! - Stream/Track Handles (lokal und remote)
//! - Capture-Backends (Mikrofon via cpal, Testquelle mit Ton und Testbild)
//! - G.711 µ-law Kodierung der Capture-Frames, H.264 für Video
//! - Wiedergabe des entfernten Audio-Tracks

mod capture;
mod cpal_source;
mod g711;
mod playback;
mod stream;
mod synthetic;
mod video;

pub use capture::{MediaAccessError, MediaCaptureManager, MediaConstraints, MediaSource};
pub use cpal_source::CpalAudioSource;
pub use g711::{
    linear_to_ulaw, ulaw_to_linear, PcmuPacketizer, FRAME_DURATION, FRAME_SIZE, PCMU_RATE,
};
pub use playback::{AudioPlayback, PlaybackBuffer};
pub use stream::{
    CodecSpec, MediaFrame, MediaStream, MediaTrack, RemoteStream, RemoteTrack, TrackKind,
    FRAME_FEED_CAPACITY,
};
pub use synthetic::SyntheticSource;
pub use video::{test_pattern, H264Encoder, VIDEO_FPS, VIDEO_HEIGHT, VIDEO_WIDTH};
