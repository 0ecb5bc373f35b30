//! Media Capture Manager
//!
//! Dünner Wrapper um eine `MediaSource`: hält den lokalen Stream exklusiv
//! bis er freigegeben wird. Fehler sind explizit und beenden nichts.

use super::stream::MediaStream;
use std::sync::Arc;
use thiserror::Error;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MediaAccessError {
    #[error("No capture device found: {0}")]
    NoDevice(String),

    #[error("Permission to access {0} was denied")]
    PermissionDenied(String),

    #[error("Capture backend error: {0}")]
    Backend(String),
}

// ============================================================================
// CONSTRAINTS & SOURCES
// ============================================================================

/// Welche Medienarten angefordert werden
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaConstraints {
    pub audio: bool,
    pub video: bool,
}

impl Default for MediaConstraints {
    fn default() -> Self {
        Self {
            audio: true,
            video: false,
        }
    }
}

/// Capture-Backend (Gerät, Testquelle, ...)
///
/// `open` startet die Aufnahme; das Backend hört auf zu liefern, sobald
/// die Tracks des zurückgegebenen Streams gestoppt werden.
pub trait MediaSource: Send + Sync {
    fn name(&self) -> &str;

    fn open(&self, constraints: &MediaConstraints) -> Result<MediaStream, MediaAccessError>;
}

// ============================================================================
// MEDIA CAPTURE MANAGER
// ============================================================================

pub struct MediaCaptureManager {
    source: Arc<dyn MediaSource>,
    constraints: MediaConstraints,
    current: Option<MediaStream>,
}

impl MediaCaptureManager {
    pub fn new(source: Arc<dyn MediaSource>, constraints: MediaConstraints) -> Self {
        Self {
            source,
            constraints,
            current: None,
        }
    }

    /// Holt den lokalen Stream (oder gibt den bereits gehaltenen zurück)
    pub fn acquire(&mut self) -> Result<MediaStream, MediaAccessError> {
        if let Some(stream) = self.current.as_ref().filter(|s| s.is_active()) {
            return Ok(stream.clone());
        }

        if !self.constraints.audio && !self.constraints.video {
            return Err(MediaAccessError::Backend(
                "neither audio nor video requested".to_string(),
            ));
        }

        let stream = self.source.open(&self.constraints).map_err(|e| {
            tracing::warn!("Media access via '{}' failed: {}", self.source.name(), e);
            e
        })?;

        tracing::info!(
            "Acquired local stream {} from '{}' ({} track(s))",
            stream.id(),
            self.source.name(),
            stream.tracks().len()
        );

        self.current = Some(stream.clone());
        Ok(stream)
    }

    /// Stoppt alle Tracks eines Streams; mehrfacher Aufruf ist harmlos
    pub fn release(&mut self, stream: &MediaStream) -> usize {
        let stopped = stream.stop_all();

        if self.current.as_ref().map(|s| s.id()) == Some(stream.id()) {
            self.current = None;
        }

        if stopped > 0 {
            tracing::info!("Released local stream {} ({} track(s) stopped)", stream.id(), stopped);
        }
        stopped
    }

    /// Gibt den aktuell gehaltenen Stream frei (falls vorhanden)
    pub fn release_current(&mut self) -> usize {
        match self.current.take() {
            Some(stream) => self.release(&stream),
            None => 0,
        }
    }

    pub fn current(&self) -> Option<&MediaStream> {
        self.current.as_ref()
    }
}

impl std::fmt::Debug for MediaCaptureManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaCaptureManager")
            .field("source", &self.source.name())
            .field("constraints", &self.constraints)
            .field("current", &self.current.as_ref().map(|s| s.id().to_string()))
            .finish()
    }
}

// ============================================================================
// TESTS
// ============================================================================
