//! # contract: collaborator interfaces for the stage protocol
//!
//! This module defines the three seams a stage invocation talks through:
//!
//! - [`ObjectStore`]: durable blob storage organised into named containers (buckets).
//! - [`NotificationSink`]: a publish endpoint for downstream completion signals.
//! - [`Transform`]: the per-stage content conversion (text → SSML, SSML → audio).
//!
//! ## Interface & Extensibility
//! - Implement [`ObjectStore`] for a new storage backend (cloud bucket, directory, memory).
//! - Implement [`NotificationSink`] for a new signalling channel.
//! - Implement [`Transform`] for a new conversion policy. A transform never touches storage.
//! - All methods are async and return typed errors, so the runner can classify failures
//!   into retriable and non-retriable outcomes.
//!
//! ## Mocking & Testing
//! - The traits are annotated for `mockall` so consumers can generate deterministic mocks
//!   for unit/integration tests (see the `test-export-mocks` feature).
//! - For state-based tests prefer [`crate::memory::MemoryObjectStore`].

use async_trait::async_trait;
use thiserror::Error;

use mockall::automock;

/// Failure reported by an [`ObjectStore`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// The addressed object does not exist.
    #[error("object not found: {container}/{key}")]
    NotFound { container: String, key: String },
    /// Any other storage failure (transport, permissions, I/O).
    #[error("storage backend error: {0}")]
    Backend(String),
    /// The call did not complete within the runner's bound.
    #[error("storage call timed out after {0:?}")]
    Timeout(std::time::Duration),
}

impl StoreError {
    pub fn not_found(container: &str, key: &str) -> Self {
        StoreError::NotFound {
            container: container.to_string(),
            key: key.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

/// Failure reported by a [`NotificationSink`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NotifyError {
    #[error("notification publish to {topic} failed: {reason}")]
    Publish { topic: String, reason: String },
    #[error("notification publish timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("stage configured to notify {0} but no notification sink is available")]
    NoSink(String),
}

/// Failure reported by a [`Transform`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransformError {
    /// The input can never be converted; redelivery will not help.
    #[error("malformed input: {0}")]
    Malformed(String),
    /// The conversion backend failed or timed out; redelivery may succeed.
    #[error("transform backend error: {0}")]
    Backend(String),
}

/// Durable key/value blob storage organised into named containers.
///
/// Writes are overwrite-tolerant: putting identical content twice, or copying onto an
/// existing destination, must succeed and leave the same bytes in place.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Read the full content of an object. Returns [`StoreError::NotFound`] if absent.
    async fn get(&self, container: &str, key: &str) -> Result<Vec<u8>, StoreError>;

    /// Write (or overwrite) an object with the given media type.
    async fn put(
        &self,
        container: &str,
        key: &str,
        content: Vec<u8>,
        media_type: &str,
    ) -> Result<(), StoreError>;

    /// Check whether an object exists without reading it.
    async fn exists(&self, container: &str, key: &str) -> Result<bool, StoreError>;

    /// Server-side copy of an object, possibly across containers.
    async fn copy(
        &self,
        src_container: &str,
        src_key: &str,
        dst_container: &str,
        dst_key: &str,
    ) -> Result<(), StoreError>;

    /// Delete an object. Deleting an absent object is not an error.
    async fn delete(&self, container: &str, key: &str) -> Result<(), StoreError>;

    /// List keys in a container that start with `prefix`, in arbitrary order.
    async fn list(&self, container: &str, prefix: &str) -> Result<Vec<String>, StoreError>;
}

/// Publish endpoint for downstream completion signals.
///
/// `publish` resolves only once the sink acknowledged the message.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), NotifyError>;
}

/// Per-stage content conversion.
///
/// Implementations must be deterministic for identical input and options, and must
/// not write to any store: the runner relies on this step having no side effects.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait Transform: Send + Sync {
    async fn transform(&self, content: Vec<u8>) -> Result<Vec<u8>, TransformError>;
}
