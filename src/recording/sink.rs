//! Speicherziele für fertige Aufnahmen

use super::controller::{RecordingArtifact, RecordingError};
use std::path::{Path, PathBuf};

/// Nimmt ein fertiges Artefakt entgegen und legt es ab ("Download")
pub trait ArtifactSink: Send + Sync {
    fn save(&self, artifact: &RecordingArtifact) -> Result<PathBuf, RecordingError>;
}

/// Dateiendung passend zum MIME-Typ
pub fn extension_for(mime_type: &str) -> &'static str {
    match mime_type.to_ascii_lowercase().as_str() {
        "audio/pcmu" | "audio/basic" => "ulaw",
        "audio/webm" | "video/webm" => "webm",
        "video/h264" => "h264",
        "audio/wav" | "audio/x-wav" => "wav",
        _ => "bin",
    }
}

/// Schreibt Aufnahmen als Datei in ein Verzeichnis
#[derive(Debug, Clone)]
pub struct DirectorySink {
    dir: PathBuf,
    file_stem: String,
}

impl DirectorySink {
    pub fn new(dir: impl Into<PathBuf>, file_stem: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            file_stem: file_stem.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Freier Dateiname `<stem>-<zeitstempel>[-n].<ext>`
    fn next_path(&self, extension: &str) -> PathBuf {
        let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S");
        let base = format!("{}-{}", self.file_stem, stamp);

        let mut candidate = self.dir.join(format!("{}.{}", base, extension));
        let mut n = 1;
        while candidate.exists() {
            candidate = self.dir.join(format!("{}-{}.{}", base, n, extension));
            n += 1;
        }
        candidate
    }
}

impl ArtifactSink for DirectorySink {
    fn save(&self, artifact: &RecordingArtifact) -> Result<PathBuf, RecordingError> {
        std::fs::create_dir_all(&self.dir).map_err(|e| RecordingError::Save(e.to_string()))?;

        let path = self.next_path(extension_for(&artifact.mime_type));
        std::fs::write(&path, &artifact.data).map_err(|e| RecordingError::Save(e.to_string()))?;

        tracing::info!(
            "Saved recording to {} ({} bytes)",
            path.display(),
            artifact.data.len()
        );
        Ok(path)
    }
}
