//! Recording Module - Lokale Aufnahme als Datei
//!
//! Dieses Modul verwaltet:
//! - Start/Stop der Aufnahme des lokalen Streams
//! - Zusammenfügen der Chunks zu einem Artefakt
//! - Ablage des Artefakts (Download-Verzeichnis)

mod controller;
mod sink;

pub use controller::{
    RecordingArtifact, RecordingController, RecordingError, RecordingEvent, SavedRecording,
};
pub use sink::{extension_for, ArtifactSink, DirectorySink};
