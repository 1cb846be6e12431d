/// `load_config` module: loads a static YAML config into the typed [`AppConfig`] the CLI runs with.
///
/// This module is the only place where untrusted YAML is parsed and mapped to strongly-typed
/// structs. Secrets (access tokens) never live in the file; clients read them from the
/// environment when they are constructed.
///
/// # Responsibilities
/// - Parse the YAML file into [`AppConfig`]
/// - Validate cross-field rules (unique stage names, extension shape, a notifying stage needs
///   a `notify` section, a `synthesize` stage needs a `synthesizer` section)
/// - Produce clear diagnostics: any failure must say which file and which field
///
/// # Errors
/// All errors use `anyhow::Error` and are surfaced at the CLI boundary.
use anyhow::Result;
use serde::Deserialize;
use speech_bucket_core::transform::SsmlOptions;
use speech_bucket_core::StageConfig;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{error, info};

/// Default bound for each I/O step of a stage invocation.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    pub store: StoreSection,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub notify: Option<NotifySection>,
    #[serde(default)]
    pub synthesizer: Option<SynthesizerSection>,
    #[serde(default)]
    pub stages: Vec<StageSection>,
}

#[derive(Debug, Deserialize)]
pub struct StoreSection {
    /// Root directory; each container is a sub-directory.
    pub root: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotifySection {
    /// Base URL of the publish API, e.g. `https://pubsub.googleapis.com`.
    pub base_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SynthesizerSection {
    pub endpoint: String,
    #[serde(default = "default_language_code")]
    pub language_code: String,
    #[serde(default = "default_voice_gender")]
    pub voice_gender: String,
    #[serde(default = "default_audio_encoding")]
    pub audio_encoding: String,
}

fn default_language_code() -> String {
    "en-US".to_string()
}

fn default_voice_gender() -> String {
    "MALE".to_string()
}

fn default_audio_encoding() -> String {
    "MP3".to_string()
}

/// Which transform a stage runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransformKind {
    /// Plain text → SSML.
    Ssml,
    /// SSML → audio through the configured synthesizer.
    Synthesize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StageSection {
    pub transform: TransformKind,
    #[serde(default)]
    pub ssml: SsmlOptions,
    #[serde(flatten)]
    pub stage: StageConfig,
}

impl AppConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn stage(&self, name: &str) -> Option<&StageSection> {
        self.stages.iter().find(|s| s.stage.name == name)
    }

    pub fn validate(&self) -> Result<()> {
        if self.timeout_secs == 0 {
            anyhow::bail!("timeout_secs must be greater than zero");
        }

        let mut names = HashSet::new();
        for section in &self.stages {
            let stage = &section.stage;
            if !names.insert(stage.name.as_str()) {
                anyhow::bail!("Duplicate stage name: {}", stage.name);
            }
            for (field, ext) in [
                ("accepted_extension", &stage.accepted_extension),
                ("output_extension", &stage.output_extension),
            ] {
                if !ext.starts_with('.') || ext.len() < 2 {
                    anyhow::bail!(
                        "Stage {}: {field} must look like \".ext\", got {ext:?}",
                        stage.name
                    );
                }
            }
            if stage.accepted_extension == stage.output_extension
                && stage.source_container == stage.artifact_container
            {
                anyhow::bail!(
                    "Stage {}: artifacts would retrigger the stage on its own output",
                    stage.name
                );
            }
            if stage.notify_topic.is_some() && self.notify.is_none() {
                anyhow::bail!(
                    "Stage {} sets notify_topic but no notify section is configured",
                    stage.name
                );
            }
            if section.transform == TransformKind::Ssml {
                if let Err(reason) = section.ssml.validate() {
                    anyhow::bail!("Stage {}: {reason}", stage.name);
                }
            }
            if section.transform == TransformKind::Synthesize && self.synthesizer.is_none() {
                anyhow::bail!(
                    "Stage {} uses the synthesize transform but no synthesizer section is configured",
                    stage.name
                );
            }
        }
        Ok(())
    }
}

/// Loads and validates a static YAML config file (no secrets).
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<AppConfig> {
    let path_ref = path.as_ref();
    info!(config_path = ?path_ref, "Loading configuration from file");

    let config_content = match fs::read_to_string(path_ref) {
        Ok(content) => {
            info!(config_path = ?path_ref, "Config file read successfully");
            content
        }
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to read config file");
            return Err(anyhow::anyhow!(
                "Failed to read config file {:?}: {}",
                path_ref,
                e
            ));
        }
    };

    let config: AppConfig = match serde_yaml::from_str(&config_content) {
        Ok(conf) => {
            info!(config_path = ?path_ref, "Parsed config YAML successfully");
            conf
        }
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to parse config YAML");
            return Err(anyhow::anyhow!("Failed to parse config YAML: {e}"));
        }
    };

    if let Err(e) = config.validate() {
        error!(error = %e, config_path = ?path_ref, "Config failed validation");
        return Err(e.context(format!("Invalid config {:?}", path_ref)));
    }

    for section in &config.stages {
        section.stage.trace_loaded();
    }
    info!(
        store_root = %config.store.root.display(),
        stages = config.stages.len(),
        timeout_secs = config.timeout_secs,
        "Config loaded and validated successfully"
    );

    Ok(config)
}
