//! Stage runner: executes one invocation of the stage protocol for one trigger event.
//!
//! The protocol is an explicit state machine:
//!
//! ```text
//! Filtering → CheckingIdempotency → Fetching → Transforming
//!           → PublishingArtifact → Archiving → Deleting → Notifying → Done
//! ```
//!
//! # Guarantees
//! - Foreign keys (wrong extension or wrong container) are `Skipped` before any store call.
//! - The archive record is the idempotency fence: once it exists, every later delivery of
//!   the same event returns `AlreadyProcessed` without fetching, transforming or writing.
//! - The source is deleted only after the artifact and the archive record were written.
//! - Delete and notify failures never fail the run; they are carried as [`StageWarning`]s.
//! - The completion notification is published only after the source was deleted. A failed
//!   delete ends the run without notifying.
//!
//! # Concurrency
//! Invocations share no in-process state. Duplicate deliveries running concurrently are
//! reconciled through the store alone (existence check plus overwrite-tolerant writes).
//! Every store, transform and publish call is bounded by the runner's step timeout; the
//! runner never retries, redelivery by the trigger layer is the only retry mechanism.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::contract::{
    NotificationSink, NotifyError, ObjectStore, StoreError, Transform, TransformError,
};
use crate::event::TriggerEvent;
use crate::stage::{media_type_for_extension, StageConfig};

/// Bound applied to each I/O step unless overridden.
pub const DEFAULT_STEP_TIMEOUT: Duration = Duration::from_secs(30);

/// Named states of the stage protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageState {
    Filtering,
    CheckingIdempotency,
    Fetching,
    Transforming,
    PublishingArtifact,
    Archiving,
    Deleting,
    Notifying,
    Done,
}

impl fmt::Display for StageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StageState::Filtering => "filtering",
            StageState::CheckingIdempotency => "checking_idempotency",
            StageState::Fetching => "fetching",
            StageState::Transforming => "transforming",
            StageState::PublishingArtifact => "publishing_artifact",
            StageState::Archiving => "archiving",
            StageState::Deleting => "deleting",
            StageState::Notifying => "notifying",
            StageState::Done => "done",
        };
        f.write_str(name)
    }
}

/// Successful result of one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    /// The key is not for this stage. Nothing was read or written.
    Skipped,
    /// The archive record already exists. Nothing was written.
    AlreadyProcessed,
    /// Artifact and archive record are durable.
    Success(StageReport),
}

/// What a successful invocation produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageReport {
    pub source_container: String,
    pub source_key: String,
    pub artifact_container: String,
    pub artifact_key: String,
    pub archive_container: String,
    pub archive_key: String,
    pub artifact_bytes: usize,
    /// Hex SHA-256 of the artifact content.
    pub artifact_sha256: String,
    pub source_deleted: bool,
    pub notified: bool,
    /// Non-fatal failures in the cleanup and notify steps.
    pub warnings: Vec<StageWarning>,
}

/// Failure in a best-effort step. The run still succeeded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StageWarning {
    #[error("source delete failed: {0}")]
    Delete(StoreError),
    #[error("notification failed: {0}")]
    Notify(NotifyError),
}

/// Failure that aborts an invocation before the stage completed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StageError {
    /// Reading the archive fence or the source failed.
    #[error("fetch failed while {state} for {key}: {source}")]
    Fetch {
        state: StageState,
        key: String,
        source: StoreError,
    },
    /// The transform rejected the content. Redelivery will not help.
    #[error("transform rejected {key}: {reason}")]
    Transform { key: String, reason: String },
    /// The transform backend errored or timed out.
    #[error("transform backend failed for {key}: {reason}")]
    Backend { key: String, reason: String },
    #[error("publishing artifact {key} failed: {source}")]
    PublishArtifact { key: String, source: StoreError },
    #[error("archiving to {key} failed: {source}")]
    Archive { key: String, source: StoreError },
    /// The source vanished but no archive record exists.
    #[error("inconsistent state: {container}/{key} is gone but was never archived")]
    InconsistentState { container: String, key: String },
}

impl StageError {
    /// Whether redelivering the same event may succeed.
    pub fn is_retriable(&self) -> bool {
        match self {
            StageError::Fetch { .. }
            | StageError::Backend { .. }
            | StageError::PublishArtifact { .. }
            | StageError::Archive { .. } => true,
            StageError::Transform { .. } | StageError::InconsistentState { .. } => false,
        }
    }

    /// The state whose transition failed.
    pub fn state(&self) -> StageState {
        match self {
            StageError::Fetch { state, .. } => *state,
            StageError::Transform { .. } | StageError::Backend { .. } => StageState::Transforming,
            StageError::PublishArtifact { .. } => StageState::PublishingArtifact,
            StageError::Archive { .. } => StageState::Archiving,
            StageError::InconsistentState { .. } => StageState::Fetching,
        }
    }
}

pub type StageResult = Result<StageOutcome, StageError>;

/// Result of one transition: move on, or finish early with an outcome.
enum Step {
    Advance(StageState),
    Halt(StageOutcome),
}

/// Data accumulated while walking the state machine.
struct Invocation<'a> {
    event: &'a TriggerEvent,
    config: &'a StageConfig,
    artifact_key: String,
    archive_key: String,
    source: Vec<u8>,
    artifact: Vec<u8>,
    source_deleted: bool,
    notified: bool,
    warnings: Vec<StageWarning>,
}

impl<'a> Invocation<'a> {
    fn into_report(self) -> StageReport {
        let artifact_sha256 = format!("{:x}", Sha256::digest(&self.artifact));
        StageReport {
            source_container: self.event.container.clone(),
            source_key: self.event.key.clone(),
            artifact_container: self.config.artifact_container.clone(),
            artifact_key: self.artifact_key,
            archive_container: self.config.archive_container.clone(),
            archive_key: self.archive_key,
            artifact_bytes: self.artifact.len(),
            artifact_sha256,
            source_deleted: self.source_deleted,
            notified: self.notified,
            warnings: self.warnings,
        }
    }
}

/// Executes the stage protocol against injected collaborators.
///
/// Construct once per process and reuse it for every invocation.
pub struct StageRunner<S, N> {
    store: S,
    sink: Option<N>,
    step_timeout: Duration,
}

impl<S, N> StageRunner<S, N>
where
    S: ObjectStore,
    N: NotificationSink,
{
    pub fn new(store: S, sink: Option<N>) -> Self {
        Self {
            store,
            sink,
            step_timeout: DEFAULT_STEP_TIMEOUT,
        }
    }

    pub fn with_step_timeout(mut self, step_timeout: Duration) -> Self {
        self.step_timeout = step_timeout;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn step_timeout(&self) -> Duration {
        self.step_timeout
    }

    /// Run one invocation for `event` under `config`, converting content with `transform`.
    pub async fn run<T>(&self, event: &TriggerEvent, config: &StageConfig, transform: &T) -> StageResult
    where
        T: Transform + ?Sized,
    {
        let invocation_id = Uuid::new_v4();
        let span = info_span!(
            "stage",
            stage = %config.name,
            container = %event.container,
            key = %event.key,
            %invocation_id
        );
        let result = self.execute(event, config, transform).instrument(span.clone()).await;
        span.in_scope(|| match &result {
            Ok(StageOutcome::Skipped) => debug!("[STAGE] Finished: skipped"),
            Ok(StageOutcome::AlreadyProcessed) => info!("[STAGE] Finished: already processed"),
            Ok(StageOutcome::Success(report)) => info!(
                artifact = %report.artifact_key,
                archive = %report.archive_key,
                warnings = report.warnings.len(),
                "[STAGE] Finished: success"
            ),
            Err(e) => error!(
                error = %e,
                state = %e.state(),
                retriable = e.is_retriable(),
                "[STAGE][ERROR] Finished: failed"
            ),
        });
        result
    }

    async fn execute<T>(&self, event: &TriggerEvent, config: &StageConfig, transform: &T) -> StageResult
    where
        T: Transform + ?Sized,
    {
        let mut inv = Invocation {
            event,
            config,
            artifact_key: String::new(),
            archive_key: config.archive_key(&event.key),
            source: Vec::new(),
            artifact: Vec::new(),
            source_deleted: false,
            notified: false,
            warnings: Vec::new(),
        };

        let mut state = StageState::Filtering;
        loop {
            debug!(%state, "[STAGE] Entering state");
            let step = match state {
                StageState::Filtering => self.filter(&mut inv),
                StageState::CheckingIdempotency => self.check_fence(&inv).await?,
                StageState::Fetching => self.fetch(&mut inv).await?,
                StageState::Transforming => self.transform(&mut inv, transform).await?,
                StageState::PublishingArtifact => self.publish_artifact(&inv).await?,
                StageState::Archiving => self.archive(&inv).await?,
                StageState::Deleting => self.delete_source(&mut inv).await,
                StageState::Notifying => self.notify(&mut inv).await,
                StageState::Done => return Ok(StageOutcome::Success(inv.into_report())),
            };
            state = match step {
                Step::Advance(next) => next,
                Step::Halt(outcome) => return Ok(outcome),
            };
        }
    }

    fn filter(&self, inv: &mut Invocation<'_>) -> Step {
        let (event, config) = (inv.event, inv.config);
        if event.container != config.source_container {
            info!(
                expected = %config.source_container,
                "[STAGE] Event is for a foreign container. Skipping."
            );
            return Step::Halt(StageOutcome::Skipped);
        }
        match config.destination_key(&event.key) {
            Some(artifact_key) => {
                inv.artifact_key = artifact_key;
                Step::Advance(StageState::CheckingIdempotency)
            }
            None => {
                info!(
                    accepted = %config.accepted_extension,
                    "[STAGE] File is not for this stage. Skipping."
                );
                Step::Halt(StageOutcome::Skipped)
            }
        }
    }

    async fn check_fence(&self, inv: &Invocation<'_>) -> Result<Step, StageError> {
        if self.archive_exists(inv, StageState::CheckingIdempotency).await? {
            info!(archive = %inv.archive_key, "[STAGE] Archive record exists, already processed");
            return Ok(Step::Halt(StageOutcome::AlreadyProcessed));
        }
        Ok(Step::Advance(StageState::Fetching))
    }

    async fn fetch(&self, inv: &mut Invocation<'_>) -> Result<Step, StageError> {
        let event = inv.event;
        match self.store_call(self.store.get(&event.container, &event.key)).await {
            Ok(content) => {
                info!(bytes = content.len(), "[STAGE] Fetched source");
                inv.source = content;
                Ok(Step::Advance(StageState::Transforming))
            }
            Err(e) if e.is_not_found() => {
                // A duplicate delivery may have completed between the fence check and the read.
                if self.archive_exists(inv, StageState::Fetching).await? {
                    info!("[STAGE] Source gone and archive present, already processed");
                    return Ok(Step::Halt(StageOutcome::AlreadyProcessed));
                }
                error!(
                    archive = %inv.archive_key,
                    "[STAGE][ERROR] Source is missing and no archive record exists"
                );
                Err(StageError::InconsistentState {
                    container: event.container.clone(),
                    key: event.key.clone(),
                })
            }
            Err(e) => {
                warn!(error = %e, "[STAGE] Fetching source failed");
                Err(StageError::Fetch {
                    state: StageState::Fetching,
                    key: event.key.clone(),
                    source: e,
                })
            }
        }
    }

    async fn transform<T>(&self, inv: &mut Invocation<'_>, transform: &T) -> Result<Step, StageError>
    where
        T: Transform + ?Sized,
    {
        let timeout = self.step_timeout;
        let input = inv.source.clone();
        let result = match tokio::time::timeout(timeout, transform.transform(input)).await {
            Ok(result) => result,
            Err(_) => Err(TransformError::Backend(format!("timed out after {timeout:?}"))),
        };

        match result {
            Ok(artifact) => {
                info!(bytes = artifact.len(), "[STAGE] Transformed content");
                inv.artifact = artifact;
                Ok(Step::Advance(StageState::PublishingArtifact))
            }
            Err(TransformError::Malformed(reason)) => {
                error!(%reason, "[STAGE][ERROR] Transform rejected content, needs operator attention");
                Err(StageError::Transform {
                    key: inv.event.key.clone(),
                    reason,
                })
            }
            Err(TransformError::Backend(reason)) => {
                warn!(%reason, "[STAGE] Transform backend failed");
                Err(StageError::Backend {
                    key: inv.event.key.clone(),
                    reason,
                })
            }
        }
    }

    async fn publish_artifact(&self, inv: &Invocation<'_>) -> Result<Step, StageError> {
        let config = inv.config;
        let media_type = config.artifact_media_type();
        self.store_call(self.store.put(
            &config.artifact_container,
            &inv.artifact_key,
            inv.artifact.clone(),
            media_type,
        ))
        .await
        .map_err(|e| {
            error!(error = %e, artifact = %inv.artifact_key, "[STAGE][ERROR] Publishing artifact failed");
            StageError::PublishArtifact {
                key: inv.artifact_key.clone(),
                source: e,
            }
        })?;
        info!(
            container = %config.artifact_container,
            artifact = %inv.artifact_key,
            %media_type,
            "[STAGE] Published artifact"
        );
        Ok(Step::Advance(StageState::Archiving))
    }

    async fn archive(&self, inv: &Invocation<'_>) -> Result<Step, StageError> {
        let (event, config) = (inv.event, inv.config);
        let copied = self
            .store_call(self.store.copy(
                &event.container,
                &event.key,
                &config.archive_container,
                &inv.archive_key,
            ))
            .await;

        match copied {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                if self.archive_exists(inv, StageState::Archiving).await? {
                    info!("[STAGE] Source archived by a concurrent delivery, already processed");
                    return Ok(Step::Halt(StageOutcome::AlreadyProcessed));
                }
                // The source vanished after we read it; archive the bytes we hold.
                warn!("[STAGE] Source vanished before copy, archiving fetched content");
                let media_type = media_type_for_extension(&config.accepted_extension);
                self.store_call(self.store.put(
                    &config.archive_container,
                    &inv.archive_key,
                    inv.source.clone(),
                    media_type,
                ))
                .await
                .map_err(|e| self.archive_failed(inv, e))?;
            }
            Err(e) => return Err(self.archive_failed(inv, e)),
        }

        info!(
            container = %config.archive_container,
            archive = %inv.archive_key,
            "[STAGE] Archived source"
        );
        Ok(Step::Advance(StageState::Deleting))
    }

    async fn delete_source(&self, inv: &mut Invocation<'_>) -> Step {
        let event = inv.event;
        match self.store_call(self.store.delete(&event.container, &event.key)).await {
            Ok(()) => {
                info!("[STAGE] Deleted source");
                inv.source_deleted = true;
            }
            Err(e) => {
                error!(error = %e, "[STAGE][ERROR] Deleting source failed, leaving it for the sweep");
                inv.warnings.push(StageWarning::Delete(e));
                // Notify only once the source is gone.
                return Step::Advance(StageState::Done);
            }
        }
        Step::Advance(StageState::Notifying)
    }

    async fn notify(&self, inv: &mut Invocation<'_>) -> Step {
        let Some(topic) = inv.config.notify_topic.as_deref() else {
            return Step::Advance(StageState::Done);
        };
        let Some(sink) = self.sink.as_ref() else {
            error!(%topic, "[STAGE][ERROR] No notification sink configured");
            inv.warnings.push(StageWarning::Notify(NotifyError::NoSink(topic.to_string())));
            return Step::Advance(StageState::Done);
        };

        let payload = inv.event.key.as_bytes().to_vec();
        let timeout = self.step_timeout;
        let published = match tokio::time::timeout(timeout, sink.publish(topic, payload)).await {
            Ok(result) => result,
            Err(_) => Err(NotifyError::Timeout(timeout)),
        };
        match published {
            Ok(()) => {
                info!(%topic, "[STAGE] Published completion notification");
                inv.notified = true;
            }
            Err(e) => {
                error!(%topic, error = %e, "[STAGE][ERROR] Publishing notification failed");
                inv.warnings.push(StageWarning::Notify(e));
            }
        }
        Step::Advance(StageState::Done)
    }

    async fn archive_exists(&self, inv: &Invocation<'_>, state: StageState) -> Result<bool, StageError> {
        let container = &inv.config.archive_container;
        self.store_call(self.store.exists(container, &inv.archive_key))
            .await
            .map_err(|e| {
                warn!(error = %e, archive = %inv.archive_key, "[STAGE] Archive existence check failed");
                StageError::Fetch {
                    state,
                    key: inv.archive_key.clone(),
                    source: e,
                }
            })
    }

    fn archive_failed(&self, inv: &Invocation<'_>, e: StoreError) -> StageError {
        error!(error = %e, archive = %inv.archive_key, "[STAGE][ERROR] Archiving source failed");
        StageError::Archive {
            key: inv.archive_key.clone(),
            source: e,
        }
    }

    async fn store_call<F, T>(&self, call: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        match tokio::time::timeout(self.step_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout(self.step_timeout)),
        }
    }
}
