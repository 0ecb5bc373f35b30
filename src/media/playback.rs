//! Wiedergabe des entfernten Audio-Tracks über cpal
//!
//! Empfangene PCMU-Payloads werden dekodiert, in einen Ring-Buffer gelegt und
//! im Output-Callback auf die Geräte-Rate gebracht.

use super::capture::MediaAccessError;
use super::cpal_source::select_best_config;
use super::g711::{ulaw_to_linear, FRAME_SIZE, PCMU_RATE};
use super::stream::RemoteTrack;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Stream, StreamConfig};
use parking_lot::Mutex;
use ringbuf::{traits::*, HeapRb};
use std::sync::{mpsc, Arc};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

/// Puffer für eine halbe Sekunde
const RING_BUFFER_SIZE: usize = FRAME_SIZE * 25;

// ============================================================================
// PLAYBACK BUFFER
// ============================================================================

/// Dekodierte Samples plus Zustand des Resamplers
pub struct PlaybackBuffer {
    samples: HeapRb<f32>,
    step: f32,
    position: f32,
    current: f32,
}

impl PlaybackBuffer {
    pub fn new(source_rate: u32, target_rate: u32) -> Self {
        Self {
            samples: HeapRb::new(RING_BUFFER_SIZE),
            step: source_rate as f32 / target_rate.max(1) as f32,
            position: 1.0,
            current: 0.0,
        }
    }

    /// Dekodiert eine PCMU-Payload; gibt die Zahl verworfener Samples zurück
    pub fn push_pcmu(&mut self, payload: &[u8]) -> usize {
        let mut dropped = 0;
        for byte in payload {
            let sample = ulaw_to_linear(*byte) as f32 / 32768.0;
            if self.samples.try_push(sample).is_err() {
                dropped += 1;
            }
        }
        dropped
    }

    pub fn buffered(&self) -> usize {
        self.samples.occupied_len()
    }

    /// Füllt interleaved Output; bei Unterlauf Stille
    pub fn fill(&mut self, out: &mut [f32], channels: usize) {
        for frame in out.chunks_mut(channels.max(1)) {
            while self.position >= 1.0 {
                self.current = self.samples.try_pop().unwrap_or(0.0);
                self.position -= 1.0;
            }
            frame.fill(self.current);
            self.position += self.step;
        }
    }
}

// ============================================================================
// AUDIO PLAYBACK
// ============================================================================

/// Spielt einen entfernten PCMU-Track ab, bis der Wert gedroppt wird
pub struct AudioPlayback {
    track_id: String,
    feeder: JoinHandle<()>,
    _stop: mpsc::Sender<()>,
}

impl AudioPlayback {
    /// Startet die Wiedergabe; braucht eine laufende tokio Runtime
    pub fn start(track: &RemoteTrack) -> Result<Self, MediaAccessError> {
        if !track.mime_type().eq_ignore_ascii_case("audio/PCMU") {
            return Err(MediaAccessError::Backend(format!(
                "cannot play {} tracks",
                track.mime_type()
            )));
        }

        let (ready_tx, ready_rx) = mpsc::sync_channel(1);
        let (stop_tx, stop_rx) = mpsc::channel::<()>();

        // Der cpal-Stream ist nicht `Send` und bleibt auf seinem Thread
        std::thread::Builder::new()
            .name("cpal-playback".to_string())
            .spawn(move || match build_output_stream() {
                Ok((stream, buffer)) => {
                    let _ = ready_tx.send(Ok(buffer));
                    let _ = stop_rx.recv();
                    drop(stream);
                    tracing::info!("Audio playback stopped");
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                }
            })
            .map_err(|e| MediaAccessError::Backend(e.to_string()))?;

        let buffer = ready_rx
            .recv()
            .map_err(|_| MediaAccessError::Backend("playback thread exited".to_string()))??;

        let mut payloads = track.subscribe();
        let feeder = tokio::spawn(async move {
            loop {
                match payloads.recv().await {
                    Ok(payload) => {
                        let dropped = buffer.lock().push_pcmu(&payload);
                        if dropped > 0 {
                            tracing::debug!("Playback buffer full, {} sample(s) dropped", dropped);
                        }
                    }
                    Err(RecvError::Lagged(n)) => {
                        tracing::warn!("Playback lagged behind, {} payload(s) lost", n);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });

        tracing::info!("Playing remote track {}", track.id());
        Ok(Self {
            track_id: track.id().to_string(),
            feeder,
            _stop: stop_tx,
        })
    }

    pub fn track_id(&self) -> &str {
        &self.track_id
    }
}

impl Drop for AudioPlayback {
    fn drop(&mut self) {
        self.feeder.abort();
    }
}

impl std::fmt::Debug for AudioPlayback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioPlayback")
            .field("track_id", &self.track_id)
            .finish()
    }
}

fn build_output_stream() -> Result<(Stream, Arc<Mutex<PlaybackBuffer>>), MediaAccessError> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| MediaAccessError::NoDevice("audio output".to_string()))?;

    let configs = device
        .supported_output_configs()
        .map_err(|e| MediaAccessError::Backend(e.to_string()))?;
    let config: StreamConfig = select_best_config(configs.collect())?;

    tracing::info!(
        "Starting audio playback: {} Hz, {} channels",
        config.sample_rate.0,
        config.channels
    );

    let buffer = Arc::new(Mutex::new(PlaybackBuffer::new(PCMU_RATE, config.sample_rate.0)));
    let playback_buffer = Arc::clone(&buffer);
    let channels = config.channels as usize;

    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                playback_buffer.lock().fill(data, channels);
            },
            |err| {
                tracing::error!("Audio playback error: {}", err);
            },
            None,
        )
        .map_err(|e| MediaAccessError::Backend(e.to_string()))?;

    stream
        .play()
        .map_err(|e| MediaAccessError::Backend(e.to_string()))?;

    Ok((stream, buffer))
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upsampling_repeats_samples() {
        let mut buffer = PlaybackBuffer::new(8000, 16000);
        buffer.push_pcmu(&[0x80, 0x00]);

        let mut out = [1.0f32; 6];
        buffer.fill(&mut out, 1);

        let loud = 32124.0 / 32768.0;
        assert_eq!(out, [loud, loud, -loud, -loud, 0.0, 0.0]);
        assert_eq!(buffer.buffered(), 0);
    }

    #[test]
    fn test_every_channel_gets_the_sample() {
        let mut buffer = PlaybackBuffer::new(8000, 8000);
        buffer.push_pcmu(&[0x80, 0xFF]);

        let mut out = [9.0f32; 4];
        buffer.fill(&mut out, 2);

        let loud = 32124.0 / 32768.0;
        assert_eq!(out, [loud, loud, 0.0, 0.0]);
    }

    #[test]
    fn test_overflow_is_counted() {
        let mut buffer = PlaybackBuffer::new(8000, 48000);
        let payload = vec![0xFFu8; RING_BUFFER_SIZE + 10];

        assert_eq!(buffer.push_pcmu(&payload), 10);
        assert_eq!(buffer.buffered(), RING_BUFFER_SIZE);
    }

    #[tokio::test]
    async fn test_video_track_is_not_played() {
        let track = RemoteTrack::new("v", crate::media::TrackKind::Video, "video/VP8");
        assert!(matches!(
            AudioPlayback::start(&track),
            Err(MediaAccessError::Backend(_))
        ));
    }
}
