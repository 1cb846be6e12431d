///
/// This module implements the CLI interface for speech-bucket: command parsing, wiring of
/// concrete collaborators, and user-visible invocation.
///
/// All protocol logic (stage runner, transforms, naming laws) lives in the
/// [`speech-bucket-core`] crate. This module is strictly glue: it loads the config, builds
/// the store, sink and transform once, and hands a trigger event to the runner.
///
/// ## Exit codes
/// - `0`: the event was handled (`Success`, `Skipped` or `AlreadyProcessed`).
/// - `75`: retriable failure; the trigger layer should redeliver the event.
/// - `1`: non-retriable failure (malformed input, inconsistent state, bad config).
///
/// [`speech-bucket-core`]: ../../speech-bucket-core/
use crate::load_config::{load_config, AppConfig, StageSection, TransformKind};
use crate::notify::PubSubSink;
use crate::store::FsObjectStore;
use crate::synth::HttpSynthesizer;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use speech_bucket_core::contract::Transform;
use speech_bucket_core::sweep::sweep_processed;
use speech_bucket_core::transform::SsmlTransform;
use speech_bucket_core::{StageError, StageOutcome, StageRunner, TriggerEvent};
use std::io::Read;
use std::path::PathBuf;

/// Exit code asking the trigger layer to redeliver (`EX_TEMPFAIL`).
pub const EXIT_RETRY: i32 = 75;

/// CLI for speech-bucket: run pipeline stages against trigger events.
#[derive(Parser)]
#[clap(
    name = "speech-bucket",
    version,
    about = "Event-driven text → SSML → audio conversion over object storage"
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Handle one object-creation event with the named stage
    Handle {
        /// Path to the YAML config file
        #[clap(long)]
        config: PathBuf,
        /// Name of the stage in the config
        #[clap(long)]
        stage: String,
        /// Trigger event JSON; read from stdin when omitted
        #[clap(long)]
        event: Option<String>,
    },
    /// Delete sources that were archived but linger after a failed delete
    Sweep {
        /// Path to the YAML config file
        #[clap(long)]
        config: PathBuf,
        /// Only sweep this stage; all stages when omitted
        #[clap(long)]
        stage: Option<String>,
    },
}

/// Extracted async CLI logic entrypoint for integration tests and main()
pub async fn run(cli: Cli) -> Result<()> {
    // Emit a top-level 'trace_initialised' event at the very start
    tracing::info!("trace_initialised");

    match cli.command {
        Commands::Handle {
            config,
            stage,
            event,
        } => {
            let config = load_config(config)?;
            let raw = match event {
                Some(raw) => raw,
                None => {
                    let mut raw = String::new();
                    std::io::stdin()
                        .read_to_string(&mut raw)
                        .context("Failed to read trigger event from stdin")?;
                    raw
                }
            };
            let event = TriggerEvent::from_json(&raw).context("Failed to parse trigger event")?;
            handle(&config, &stage, &event).await
        }
        Commands::Sweep { config, stage } => {
            let config = load_config(config)?;
            sweep(&config, stage.as_deref()).await
        }
    }
}

async fn handle(config: &AppConfig, stage_name: &str, event: &TriggerEvent) -> Result<()> {
    let section = config
        .stage(stage_name)
        .with_context(|| format!("No stage named {stage_name:?} in config"))?;
    tracing::info!(command = "handle", stage = stage_name, key = %event.key, "Handling trigger event");

    let store = FsObjectStore::new(&config.store.root);
    let sink = match &config.notify {
        Some(notify) => Some(
            PubSubSink::new_from_env(notify, config.timeout())
                .context("Failed to construct notification sink")?,
        ),
        None => None,
    };
    let transform = build_transform(config, section)?;
    let runner = StageRunner::new(store, sink).with_step_timeout(config.timeout());

    match runner.run(event, &section.stage, &*transform).await {
        Ok(StageOutcome::Skipped) => {
            println!("Skipped {}: not for stage {}", event.key, stage_name);
            Ok(())
        }
        Ok(StageOutcome::AlreadyProcessed) => {
            println!("Already processed {}", event.key);
            Ok(())
        }
        Ok(StageOutcome::Success(report)) => {
            println!(
                "Converted {} to {}/{} (archived as {}/{})",
                report.source_key,
                report.artifact_container,
                report.artifact_key,
                report.archive_container,
                report.archive_key
            );
            for warning in &report.warnings {
                eprintln!("[WARN] {warning}");
            }
            Ok(())
        }
        Err(e) => {
            tracing::error!(command = "handle", error = %e, retriable = e.is_retriable(), "Stage failed");
            Err(anyhow::Error::new(e))
        }
    }
}

fn build_transform(config: &AppConfig, section: &StageSection) -> Result<Box<dyn Transform>> {
    match section.transform {
        TransformKind::Ssml => Ok(Box::new(SsmlTransform::new(section.ssml.clone()))),
        TransformKind::Synthesize => {
            let synth = config
                .synthesizer
                .clone()
                .context("Synthesize transform requires a synthesizer section")?;
            let client = HttpSynthesizer::new_from_env(synth, config.timeout())
                .context("Failed to construct synthesizer")?;
            Ok(Box::new(client))
        }
    }
}

async fn sweep(config: &AppConfig, only: Option<&str>) -> Result<()> {
    let store = FsObjectStore::new(&config.store.root);
    let mut matched = false;
    for section in &config.stages {
        if only.is_some_and(|name| name != section.stage.name) {
            continue;
        }
        matched = true;
        let report = sweep_processed(&store, &section.stage)
            .await
            .with_context(|| format!("Sweep failed for stage {}", section.stage.name))?;
        println!(
            "Swept {}: deleted {}, pending {}",
            section.stage.name,
            report.deleted.len(),
            report.pending.len()
        );
    }
    if let (Some(name), false) = (only, matched) {
        anyhow::bail!("No stage named {name:?} in config");
    }
    Ok(())
}

/// Process exit code for an error returned by [`run`].
pub fn exit_code(error: &anyhow::Error) -> i32 {
    match error.downcast_ref::<StageError>() {
        Some(e) if e.is_retriable() => EXIT_RETRY,
        _ => 1,
    }
}
