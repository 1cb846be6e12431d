#![doc = "speech-bucket-core: the reusable stage protocol behind the text → SSML → audio pipeline."]

//! Each pipeline stage consumes an object-creation event, converts the object, publishes
//! the artifact, archives the source, deletes it and optionally signals downstream. This
//! crate holds that protocol and the collaborator contracts it runs against. Cloud
//! clients, configuration files and the command line live in the `speech-bucket` crate.
//!
//! # Usage
//! Build a [`runner::StageRunner`] once with an [`contract::ObjectStore`] and an optional
//! [`contract::NotificationSink`], then call [`runner::StageRunner::run`] for every
//! [`event::TriggerEvent`] with the stage's [`stage::StageConfig`] and
//! [`contract::Transform`].

pub mod contract;
pub mod event;
pub mod memory;
pub mod runner;
pub mod stage;
pub mod sweep;
pub mod transform;

pub use contract::{NotificationSink, NotifyError, ObjectStore, StoreError, Transform, TransformError};
pub use event::TriggerEvent;
pub use runner::{StageError, StageOutcome, StageReport, StageResult, StageRunner, StageState, StageWarning};
pub use stage::StageConfig;
