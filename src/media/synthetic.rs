//! Geräte-freie Testquelle (Sinuston als PCMU, Testbild als H.264)

use super::capture::{MediaAccessError, MediaConstraints, MediaSource};
use super::g711::{PcmuPacketizer, FRAME_DURATION, FRAME_SIZE, PCMU_RATE};
use super::stream::{CodecSpec, MediaStream, MediaTrack, TrackKind};
use super::video::spawn_test_pattern;

/// Liefert alle 20 ms einen Frame eines Sinustons, auf Wunsch ein Testbild
#[derive(Debug, Clone)]
pub struct SyntheticSource {
    tone_hz: f32,
}

impl SyntheticSource {
    pub fn new(tone_hz: f32) -> Self {
        Self { tone_hz }
    }
}

impl Default for SyntheticSource {
    fn default() -> Self {
        Self::new(440.0)
    }
}

impl MediaSource for SyntheticSource {
    fn name(&self) -> &str {
        "synthetic"
    }

    fn open(&self, constraints: &MediaConstraints) -> Result<MediaStream, MediaAccessError> {
        let mut tracks = Vec::new();

        if constraints.audio {
            tracks.push(self.spawn_tone()?);
        }

        if constraints.video {
            let track = MediaTrack::new(TrackKind::Video, CodecSpec::h264());
            if let Err(e) = spawn_test_pattern(track.clone()) {
                for track in &tracks {
                    track.stop();
                }
                return Err(e);
            }
            tracks.push(track);
        }

        Ok(MediaStream::new(tracks))
    }
}

impl SyntheticSource {
    fn spawn_tone(&self) -> Result<MediaTrack, MediaAccessError> {
        let track = MediaTrack::new(TrackKind::Audio, CodecSpec::pcmu());
        let feed = track.clone();
        let step = std::f32::consts::TAU * self.tone_hz / PCMU_RATE as f32;

        std::thread::Builder::new()
            .name("synthetic-capture".to_string())
            .spawn(move || {
                let mut packetizer = PcmuPacketizer::new(PCMU_RATE, 1);
                let mut phase = 0.0f32;
                let mut samples = vec![0.0f32; FRAME_SIZE];

                while !feed.is_ended() {
                    for sample in samples.iter_mut() {
                        *sample = 0.2 * phase.sin();
                        phase = (phase + step) % std::f32::consts::TAU;
                    }
                    for frame in packetizer.push(&samples) {
                        feed.push_frame(frame);
                    }
                    std::thread::sleep(FRAME_DURATION);
                }
                tracing::debug!("Synthetic capture stopped");
            })
            .map_err(|e| MediaAccessError::Backend(e.to_string()))?;

        Ok(track)
    }
}
