//! Stage configuration and the naming laws shared by every stage.
//!
//! Downstream consumers locate artifacts purely by convention, so the mapping from a
//! source key to its artifact key and archive key must stay a pure function:
//!
//! ```text
//! name.txt   --stage 1-->  name.ssml   archive: text/name.txt
//! name.ssml  --stage 2-->  name.mp3    archive: ssml/name.ssml
//! ```

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Immutable per-stage configuration, loaded once at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageConfig {
    /// Human-readable stage name, used in logs.
    pub name: String,
    /// Only keys ending in this extension are processed (e.g. `.txt`).
    pub accepted_extension: String,
    /// Extension substituted onto the source key for the artifact (e.g. `.ssml`).
    pub output_extension: String,
    pub source_container: String,
    pub artifact_container: String,
    pub archive_container: String,
    /// Sub-path inside the archive container (e.g. `text`).
    pub archive_sub_path: String,
    /// Media type written with the artifact. Derived from the output extension when absent.
    #[serde(default)]
    pub media_type: Option<String>,
    /// When set, the original key is published here after the stage completes.
    #[serde(default)]
    pub notify_topic: Option<String>,
}

impl StageConfig {
    /// Stage 1 as deployed: `.txt` sources become `.ssml` artifacts, archived under `text/`.
    pub fn text_to_ssml(
        source_container: &str,
        artifact_container: &str,
        archive_container: &str,
    ) -> Self {
        Self {
            name: "text-to-ssml".to_string(),
            accepted_extension: ".txt".to_string(),
            output_extension: ".ssml".to_string(),
            source_container: source_container.to_string(),
            artifact_container: artifact_container.to_string(),
            archive_container: archive_container.to_string(),
            archive_sub_path: "text".to_string(),
            media_type: None,
            notify_topic: None,
        }
    }

    /// Stage 2 as deployed: `.ssml` sources become `.mp3` artifacts, archived under `ssml/`,
    /// and the original key is published to `notify_topic`.
    pub fn ssml_to_audio(
        source_container: &str,
        artifact_container: &str,
        archive_container: &str,
        notify_topic: Option<&str>,
    ) -> Self {
        Self {
            name: "ssml-to-audio".to_string(),
            accepted_extension: ".ssml".to_string(),
            output_extension: ".mp3".to_string(),
            source_container: source_container.to_string(),
            artifact_container: artifact_container.to_string(),
            archive_container: archive_container.to_string(),
            archive_sub_path: "ssml".to_string(),
            media_type: None,
            notify_topic: notify_topic.map(str::to_string),
        }
    }

    pub fn trace_loaded(&self) {
        info!(
            stage = %self.name,
            accepted = %self.accepted_extension,
            output = %self.output_extension,
            source = %self.source_container,
            artifact = %self.artifact_container,
            archive = %self.archive_container,
            notify = self.notify_topic.as_deref().unwrap_or("-"),
            "Loaded stage"
        );
        debug!(?self, "Stage loaded (full debug)");
    }

    /// Whether this stage handles `key`. Foreign file types are ignored, not rejected.
    pub fn accepts(&self, key: &str) -> bool {
        key.len() > self.accepted_extension.len() && key.ends_with(&self.accepted_extension)
    }

    /// Artifact key for a source key: the accepted extension swapped for the output one.
    ///
    /// Returns `None` for keys this stage does not accept.
    pub fn destination_key(&self, key: &str) -> Option<String> {
        let stem = key.strip_suffix(&self.accepted_extension)?;
        if stem.is_empty() {
            return None;
        }
        Some(format!("{stem}{}", self.output_extension))
    }

    /// Archive record key for a source key: `{archive_sub_path}/{key}`.
    pub fn archive_key(&self, key: &str) -> String {
        let sub_path = self.archive_sub_path.trim_matches('/');
        if sub_path.is_empty() {
            key.to_string()
        } else {
            format!("{sub_path}/{key}")
        }
    }

    /// Media type of the artifact this stage writes.
    pub fn artifact_media_type(&self) -> &str {
        match &self.media_type {
            Some(media_type) => media_type,
            None => media_type_for_extension(&self.output_extension),
        }
    }
}

/// Default media type for a file extension (with or without the leading dot).
pub fn media_type_for_extension(extension: &str) -> &'static str {
    match extension.trim_start_matches('.').to_ascii_lowercase().as_str() {
        "ssml" => "application/ssml+xml",
        "mp3" => "audio/mpeg",
        "ogg" => "audio/ogg",
        "wav" => "audio/wav",
        "txt" => "text/plain",
        _ => "application/octet-stream",
    }
}
