//! G.711 µ-law Packetizer
//!
//! Wandelt f32-PCM beliebiger Rate/Kanalzahl in 20 ms PCMU-Frames (8 kHz mono)
//! und dekodiert empfangene PCMU-Bytes für die Wiedergabe.

use super::stream::MediaFrame;
use ringbuf::{traits::*, HeapRb};
use std::time::Duration;

// ============================================================================
// CONSTANTS
// ============================================================================

/// Ziel-Rate für PCMU
pub const PCMU_RATE: u32 = 8000;

/// Frame Size in Samples (20ms @ 8kHz = 160 samples)
pub const FRAME_SIZE: usize = 160;

/// Dauer eines Frames
pub const FRAME_DURATION: Duration = Duration::from_millis(20);

/// Buffer Size für den Encoder-Ring-Buffer
const RING_BUFFER_SIZE: usize = FRAME_SIZE * 10;

const ULAW_BIAS: i32 = 0x84;
const ULAW_CLIP: i32 = 32635;

// ============================================================================
// ENCODING
// ============================================================================

/// Kodiert ein lineares 16-bit Sample als µ-law Byte
pub fn linear_to_ulaw(sample: i16) -> u8 {
    let mut pcm = sample as i32;
    let sign = if pcm < 0 {
        pcm = -pcm;
        0x80
    } else {
        0
    };

    pcm = pcm.min(ULAW_CLIP) + ULAW_BIAS;

    let mut exponent = 7;
    let mut mask = 0x4000;
    while exponent > 0 && pcm & mask == 0 {
        exponent -= 1;
        mask >>= 1;
    }

    let mantissa = (pcm >> (exponent + 3)) & 0x0F;
    !((sign | (exponent << 4) | mantissa) as u8)
}

/// Dekodiert ein µ-law Byte zu einem linearen 16-bit Sample
pub fn ulaw_to_linear(byte: u8) -> i16 {
    let ulaw = !byte;
    let exponent = ((ulaw >> 4) & 0x07) as i32;
    let mantissa = (ulaw & 0x0F) as i32;
    let magnitude = (((mantissa << 3) + ULAW_BIAS) << exponent) - ULAW_BIAS;

    if ulaw & 0x80 != 0 {
        -magnitude as i16
    } else {
        magnitude as i16
    }
}

// ============================================================================
// PACKETIZER
// ============================================================================

/// Sammelt Samples und gibt vollständige 20 ms Frames aus
pub struct PcmuPacketizer {
    source_rate: u32,
    channels: usize,
    pending: HeapRb<u8>,
}

impl PcmuPacketizer {
    pub fn new(source_rate: u32, channels: u16) -> Self {
        Self {
            source_rate,
            channels: channels.max(1) as usize,
            pending: HeapRb::new(RING_BUFFER_SIZE),
        }
    }

    /// Nimmt interleaved f32-Samples an und liefert fertige Frames
    pub fn push(&mut self, data: &[f32]) -> Vec<MediaFrame> {
        // Downmix auf Mono
        let mono: Vec<f32> = data
            .chunks(self.channels)
            .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
            .collect();

        // Resampling falls nötig (zu 8kHz)
        let samples: Vec<f32> = if self.source_rate != PCMU_RATE {
            let ratio = PCMU_RATE as f32 / self.source_rate as f32;
            let new_len = (mono.len() as f32 * ratio) as usize;
            (0..new_len)
                .map(|i| {
                    let src_idx = i as f32 / ratio;
                    let idx = src_idx as usize;
                    let frac = src_idx - idx as f32;
                    let s1 = mono.get(idx).copied().unwrap_or(0.0);
                    let s2 = mono.get(idx + 1).copied().unwrap_or(s1);
                    s1 + (s2 - s1) * frac
                })
                .collect()
        } else {
            mono
        };

        for sample in samples {
            let pcm = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
            if self.pending.try_push(linear_to_ulaw(pcm)).is_err() {
                tracing::warn!("PCMU encoder buffer full, dropping samples");
                break;
            }
        }

        let mut frames = Vec::new();
        while self.pending.occupied_len() >= FRAME_SIZE {
            let mut frame = Vec::with_capacity(FRAME_SIZE);
            for _ in 0..FRAME_SIZE {
                if let Some(byte) = self.pending.try_pop() {
                    frame.push(byte);
                }
            }
            frames.push(MediaFrame::new(frame, FRAME_DURATION));
        }
        frames
    }
}

// ============================================================================
// TESTS
// ============================================================================
