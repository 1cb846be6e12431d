//! In-process collaborators for tests and local dry runs.
//!
//! Thread-safe via `RwLock`/`Mutex`. Not durable, not suitable for production.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;

use crate::contract::{NotificationSink, NotifyError, ObjectStore, StoreError};

#[derive(Debug, Clone)]
struct StoredObject {
    content: Vec<u8>,
    media_type: String,
}

/// In-memory [`ObjectStore`] keyed by `(container, key)`.
///
/// Cloning yields a handle onto the same objects, so a test can keep one clone for
/// assertions while the runner owns another.
#[derive(Debug, Default, Clone)]
pub struct MemoryObjectStore {
    objects: Arc<RwLock<HashMap<(String, String), StoredObject>>>,
    mutations: Arc<AtomicUsize>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an object directly, without counting it as a mutation.
    pub fn insert(&self, container: &str, key: &str, content: impl Into<Vec<u8>>, media_type: &str) {
        if let Ok(mut objects) = self.objects.write() {
            objects.insert(
                (container.to_string(), key.to_string()),
                StoredObject {
                    content: content.into(),
                    media_type: media_type.to_string(),
                },
            );
        }
    }

    /// Content of an object, if present.
    pub fn content(&self, container: &str, key: &str) -> Option<Vec<u8>> {
        self.objects
            .read()
            .ok()?
            .get(&(container.to_string(), key.to_string()))
            .map(|o| o.content.clone())
    }

    pub fn media_type(&self, container: &str, key: &str) -> Option<String> {
        self.objects
            .read()
            .ok()?
            .get(&(container.to_string(), key.to_string()))
            .map(|o| o.media_type.clone())
    }

    pub fn contains(&self, container: &str, key: &str) -> bool {
        self.content(container, key).is_some()
    }

    /// Sorted keys of every object in `container`.
    pub fn keys(&self, container: &str) -> Vec<String> {
        let mut keys: Vec<String> = match self.objects.read() {
            Ok(objects) => objects
                .keys()
                .filter(|(c, _)| c == container)
                .map(|(_, k)| k.clone())
                .collect(),
            Err(_) => Vec::new(),
        };
        keys.sort();
        keys
    }

    /// Number of put/copy/delete calls served so far.
    pub fn mutations(&self) -> usize {
        self.mutations.load(Ordering::SeqCst)
    }

    fn poisoned() -> StoreError {
        StoreError::Backend("lock poisoned".into())
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn get(&self, container: &str, key: &str) -> Result<Vec<u8>, StoreError> {
        let objects = self.objects.read().map_err(|_| Self::poisoned())?;
        objects
            .get(&(container.to_string(), key.to_string()))
            .map(|o| o.content.clone())
            .ok_or_else(|| StoreError::not_found(container, key))
    }

    async fn put(
        &self,
        container: &str,
        key: &str,
        content: Vec<u8>,
        media_type: &str,
    ) -> Result<(), StoreError> {
        self.mutations.fetch_add(1, Ordering::SeqCst);
        self.objects.write().map_err(|_| Self::poisoned())?.insert(
            (container.to_string(), key.to_string()),
            StoredObject {
                content,
                media_type: media_type.to_string(),
            },
        );
        Ok(())
    }

    async fn exists(&self, container: &str, key: &str) -> Result<bool, StoreError> {
        let objects = self.objects.read().map_err(|_| Self::poisoned())?;
        Ok(objects.contains_key(&(container.to_string(), key.to_string())))
    }

    async fn copy(
        &self,
        src_container: &str,
        src_key: &str,
        dst_container: &str,
        dst_key: &str,
    ) -> Result<(), StoreError> {
        self.mutations.fetch_add(1, Ordering::SeqCst);
        let mut objects = self.objects.write().map_err(|_| Self::poisoned())?;
        let object = objects
            .get(&(src_container.to_string(), src_key.to_string()))
            .cloned()
            .ok_or_else(|| StoreError::not_found(src_container, src_key))?;
        objects.insert((dst_container.to_string(), dst_key.to_string()), object);
        Ok(())
    }

    async fn delete(&self, container: &str, key: &str) -> Result<(), StoreError> {
        self.mutations.fetch_add(1, Ordering::SeqCst);
        self.objects
            .write()
            .map_err(|_| Self::poisoned())?
            .remove(&(container.to_string(), key.to_string()));
        Ok(())
    }

    async fn list(&self, container: &str, prefix: &str) -> Result<Vec<String>, StoreError> {
        let objects = self.objects.read().map_err(|_| Self::poisoned())?;
        Ok(objects
            .keys()
            .filter(|(c, k)| c == container && k.starts_with(prefix))
            .map(|(_, k)| k.clone())
            .collect())
    }
}

/// In-memory [`NotificationSink`] that records every acknowledged publish.
#[derive(Debug, Default, Clone)]
pub struct MemoryNotificationSink {
    published: Arc<Mutex<Vec<(String, Vec<u8>)>>>,
}

impl MemoryNotificationSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every `(topic, payload)` published so far, in order.
    pub fn published(&self) -> Vec<(String, Vec<u8>)> {
        self.published
            .lock()
            .map(|p| p.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl NotificationSink for MemoryNotificationSink {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), NotifyError> {
        self.published
            .lock()
            .map_err(|_| NotifyError::Publish {
                topic: topic.to_string(),
                reason: "lock poisoned".into(),
            })?
            .push((topic.to_string(), payload));
        Ok(())
    }
}
