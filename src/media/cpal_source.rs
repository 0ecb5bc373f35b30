//! Audio Capture über cpal
//!
//! Nimmt das Standard-Mikrofon auf und liefert PCMU-Frames. Der cpal-Stream
//! ist nicht `Send`, daher lebt er auf einem eigenen Thread, bis der Track
//! gestoppt wird.

use super::capture::{MediaAccessError, MediaConstraints, MediaSource};
use super::g711::PcmuPacketizer;
use super::stream::{CodecSpec, MediaStream, MediaTrack, TrackKind};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, Stream, StreamConfig, SupportedStreamConfigRange};
use std::sync::mpsc;

/// Bevorzugte Geräte-Rate
const PREFERRED_RATE: u32 = 48000;

// ============================================================================
// CPAL AUDIO SOURCE
// ============================================================================

/// Mikrofon-Quelle (Standard-Eingabegerät)
#[derive(Debug, Default)]
pub struct CpalAudioSource;

impl CpalAudioSource {
    pub fn new() -> Self {
        Self
    }
}

impl MediaSource for CpalAudioSource {
    fn name(&self) -> &str {
        "cpal"
    }

    fn open(&self, constraints: &MediaConstraints) -> Result<MediaStream, MediaAccessError> {
        if constraints.video {
            return Err(MediaAccessError::NoDevice(
                "camera (only the synthetic source provides video)".to_string(),
            ));
        }

        let track = MediaTrack::new(TrackKind::Audio, CodecSpec::pcmu());
        let (ready_tx, ready_rx) = mpsc::sync_channel(1);

        let capture_track = track.clone();
        std::thread::Builder::new()
            .name("cpal-capture".to_string())
            .spawn(move || run_capture(capture_track, ready_tx))
            .map_err(|e| MediaAccessError::Backend(e.to_string()))?;

        ready_rx
            .recv()
            .map_err(|_| MediaAccessError::Backend("capture thread exited".to_string()))??;

        Ok(MediaStream::new(vec![track]))
    }
}

/// Capture-Thread: hält den cpal-Stream bis der Track endet
fn run_capture(track: MediaTrack, ready: mpsc::SyncSender<Result<(), MediaAccessError>>) {
    let stream = match build_input_stream(&track) {
        Ok(stream) => stream,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };
    let _ = ready.send(Ok(()));

    futures::executor::block_on(track.wait_ended());

    drop(stream);
    tracing::info!("Audio capture stopped");
}

fn build_input_stream(track: &MediaTrack) -> Result<Stream, MediaAccessError> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| MediaAccessError::NoDevice("audio input".to_string()))?;

    let config = find_best_input_config(&device)?;

    tracing::info!(
        "Starting audio capture: {} Hz, {} channels",
        config.sample_rate.0,
        config.channels
    );

    let mut packetizer = PcmuPacketizer::new(config.sample_rate.0, config.channels);
    let feed = track.clone();

    let stream = device
        .build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                for frame in packetizer.push(data) {
                    feed.push_frame(frame);
                }
            },
            |err| {
                tracing::error!("Audio capture error: {}", err);
            },
            None,
        )
        .map_err(|e| match e {
            cpal::BuildStreamError::DeviceNotAvailable => {
                MediaAccessError::NoDevice("audio input".to_string())
            }
            other => MediaAccessError::Backend(other.to_string()),
        })?;

    stream.play().map_err(|e| match e {
        cpal::PlayStreamError::DeviceNotAvailable => {
            MediaAccessError::NoDevice("audio input".to_string())
        }
        other => MediaAccessError::Backend(other.to_string()),
    })?;

    Ok(stream)
}

/// Findet die beste Input-Konfiguration
fn find_best_input_config(device: &Device) -> Result<StreamConfig, MediaAccessError> {
    let configs = device.supported_input_configs().map_err(|e| match e {
        cpal::SupportedStreamConfigsError::DeviceNotAvailable => {
            MediaAccessError::NoDevice("audio input".to_string())
        }
        other => MediaAccessError::Backend(other.to_string()),
    })?;

    select_best_config(configs.collect())
}

/// Wählt die beste Konfiguration aus einer Liste
///
/// Nur F32 kommt in Frage, da der Callback f32-Samples erwartet.
/// Priorität: 48kHz, sonst die höchste unterstützte Rate.
pub(super) fn select_best_config(configs: Vec<SupportedStreamConfigRange>) -> Result<StreamConfig, MediaAccessError> {
    let target_rate = cpal::SampleRate(PREFERRED_RATE);

    let f32_configs: Vec<&SupportedStreamConfigRange> = configs
        .iter()
        .filter(|c| c.sample_format() == SampleFormat::F32)
        .collect();

    if let Some(config) = f32_configs
        .iter()
        .find(|c| c.min_sample_rate() <= target_rate && c.max_sample_rate() >= target_rate)
    {
        return Ok((*config).clone().with_sample_rate(target_rate).into());
    }

    if let Some(config) = f32_configs.first() {
        return Ok((*config).clone().with_max_sample_rate().into());
    }

    Err(MediaAccessError::Backend(
        "No f32 input configuration available".to_string(),
    ))
}
