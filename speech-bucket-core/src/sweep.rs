//! Cleanup for sources whose delete step failed.
//!
//! A source may linger in its container after a successful run if the best-effort delete
//! failed. The archive record already proves it was processed, so removing it later is
//! safe. Sources without an archive record are never touched.

use futures::future::{join_all, try_join_all};
use tracing::{info, warn};

use crate::contract::{ObjectStore, StoreError};
use crate::stage::StageConfig;

/// What a sweep found and removed.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    /// Sources with an archive record that were deleted.
    pub deleted: Vec<String>,
    /// Sources still awaiting processing.
    pub pending: Vec<String>,
}

/// Delete every accepted source in `config.source_container` that already has an
/// archive record. Fails fast on the first store error.
pub async fn sweep_processed<S>(store: &S, config: &StageConfig) -> Result<SweepReport, StoreError>
where
    S: ObjectStore + ?Sized,
{
    info!(stage = %config.name, container = %config.source_container, "[SWEEP] Listing sources");
    let mut keys: Vec<String> = store
        .list(&config.source_container, "")
        .await?
        .into_iter()
        .filter(|key| config.accepts(key))
        .collect();
    keys.sort();

    let checks = keys.iter().map(|key| async move {
        let archived = store
            .exists(&config.archive_container, &config.archive_key(key))
            .await?;
        Ok::<_, StoreError>((key.clone(), archived))
    });

    let mut report = SweepReport::default();
    let mut processed = Vec::new();
    for checked in join_all(checks).await {
        match checked? {
            (key, true) => processed.push(key),
            (key, false) => report.pending.push(key),
        }
    }

    let deletions = processed
        .iter()
        .map(|key| store.delete(&config.source_container, key));
    if let Err(e) = try_join_all(deletions).await {
        warn!(error = %e, "[SWEEP] Deleting processed sources failed");
        return Err(e);
    }

    info!(
        deleted = processed.len(),
        pending = report.pending.len(),
        "[SWEEP] Finished"
    );
    report.deleted = processed;
    Ok(report)
}
