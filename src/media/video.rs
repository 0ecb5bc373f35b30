//! Video-Testbild als H.264
//!
//! Erzeugt ein bewegtes RGB-Muster, kodiert es mit openh264 und liefert
//! Annex-B Access Units in den Frame-Feed eines Video-Tracks.

use super::capture::MediaAccessError;
use super::stream::{MediaFrame, MediaTrack};
use openh264::{
    encoder::{
        BitRate, Encoder, EncoderConfig, FrameRate, IntraFramePeriod, RateControlMode, SpsPpsStrategy,
        UsageType,
    },
    formats::{RgbSliceU8, YUVBuffer},
    OpenH264API,
};
use std::sync::mpsc;
use std::time::{Duration, Instant};

// ============================================================================
// CONSTANTS
// ============================================================================

pub const VIDEO_WIDTH: u32 = 320;
pub const VIDEO_HEIGHT: u32 = 240;
pub const VIDEO_FPS: u32 = 15;

/// Ziel-Bitrate des Encoders
const VIDEO_BITRATE: u32 = 300_000;

/// IDR-Abstand in Frames (SPS/PPS kommen mit jedem Keyframe)
const KEYFRAME_INTERVAL: u32 = 30;

// ============================================================================
// ENCODER
// ============================================================================

pub struct H264Encoder {
    encoder: Encoder,
}

impl H264Encoder {
    pub fn new(fps: u32, bitrate: u32, keyframe_interval: u32) -> Result<Self, MediaAccessError> {
        let config = EncoderConfig::new()
            .usage_type(UsageType::CameraVideoRealTime)
            .max_frame_rate(FrameRate::from_hz(fps as f32))
            .bitrate(BitRate::from_bps(bitrate))
            .rate_control_mode(RateControlMode::Bitrate)
            .sps_pps_strategy(SpsPpsStrategy::InAccessUnit)
            .intra_frame_period(IntraFramePeriod::from_num_frames(keyframe_interval));

        let encoder = Encoder::with_api_config(OpenH264API::from_source(), config)
            .map_err(|e| MediaAccessError::Backend(format!("openh264: {}", e)))?;
        Ok(Self { encoder })
    }

    /// Kodiert ein RGB24-Bild zu einer Annex-B Access Unit
    pub fn encode_rgb(
        &mut self,
        rgb: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Vec<u8>, MediaAccessError> {
        let source = RgbSliceU8::new(rgb, (width as usize, height as usize));
        let yuv = YUVBuffer::from_rgb_source(source);

        let bitstream = self
            .encoder
            .encode(&yuv)
            .map_err(|e| MediaAccessError::Backend(format!("openh264: {}", e)))?;
        Ok(bitstream.to_vec())
    }
}

impl std::fmt::Debug for H264Encoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("H264Encoder").finish_non_exhaustive()
    }
}

// ============================================================================
// TEST PATTERN
// ============================================================================

/// RGB24-Muster, das sich mit `tick` verschiebt
pub fn test_pattern(width: u32, height: u32, tick: u8) -> Vec<u8> {
    let mut data = Vec::with_capacity((width * height * 3) as usize);
    for y in 0..height {
        for x in 0..width {
            data.push(x as u8 ^ tick);
            data.push(y as u8 ^ tick);
            data.push(x.wrapping_add(y) as u8 ^ tick);
        }
    }
    data
}

/// Startet den Testbild-Thread für einen Video-Track
///
/// Kehrt erst zurück, wenn der Encoder bereit ist; der Thread endet mit dem
/// Track.
pub(crate) fn spawn_test_pattern(track: MediaTrack) -> Result<(), MediaAccessError> {
    let (ready_tx, ready_rx) = mpsc::sync_channel(1);

    std::thread::Builder::new()
        .name("test-pattern".to_string())
        .spawn(move || {
            let encoder = match H264Encoder::new(VIDEO_FPS, VIDEO_BITRATE, KEYFRAME_INTERVAL) {
                Ok(encoder) => encoder,
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };
            let _ = ready_tx.send(Ok(()));
            pattern_loop(encoder, track);
        })
        .map_err(|e| MediaAccessError::Backend(e.to_string()))?;

    ready_rx
        .recv()
        .map_err(|_| MediaAccessError::Backend("test pattern thread exited".to_string()))?
}

fn pattern_loop(mut encoder: H264Encoder, track: MediaTrack) {
    let period = Duration::from_millis(1000 / VIDEO_FPS as u64);
    let mut next_deadline = Instant::now() + period;
    let mut tick = 0u8;

    while !track.is_ended() {
        let rgb = test_pattern(VIDEO_WIDTH, VIDEO_HEIGHT, tick);
        tick = tick.wrapping_add(1);

        match encoder.encode_rgb(&rgb, VIDEO_WIDTH, VIDEO_HEIGHT) {
            // Übersprungene Frames liefern keinen Bitstream
            Ok(data) if data.is_empty() => {}
            Ok(data) => {
                track.push_frame(MediaFrame::new(data, period));
            }
            Err(e) => tracing::warn!("Dropping video frame: {}", e),
        }

        let now = Instant::now();
        if now < next_deadline {
            std::thread::sleep(next_deadline - now);
            next_deadline += period;
        } else {
            next_deadline = now + period;
        }
    }
    tracing::debug!("Test pattern stopped");
}

// ============================================================================
// TESTS
// ============================================================================
