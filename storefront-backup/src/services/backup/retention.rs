use crate::error::BackupError;
use crate::services::backup::store::{ArchiveInfo, ArchiveStore};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetentionFailure {
    pub name: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetentionReport {
    pub kept: usize,
    pub deleted: Vec<String>,
    pub failed: Vec<RetentionFailure>,
}

/// Keep the `keep` most recently modified archives with `extension` and delete
/// the rest. A failed delete is recorded and the pass carries on.
pub fn apply(
    store: &ArchiveStore,
    extension: &str,
    keep: usize,
) -> Result<RetentionReport, BackupError> {
    let archives = store.list(extension)?;
    Ok(prune(archives, keep, |name| store.delete(name)))
}

/// Delete everything after the first `keep` entries of a newest-first listing.
fn prune(
    archives: Vec<ArchiveInfo>,
    keep: usize,
    mut delete: impl FnMut(&str) -> Result<(), BackupError>,
) -> RetentionReport {
    let mut report = RetentionReport {
        kept: archives.len().min(keep),
        ..Default::default()
    };

    if archives.len() <= keep {
        return report;
    }

    for old in archives.into_iter().skip(keep) {
        match delete(&old.name) {
            Ok(()) => report.deleted.push(old.name),
            Err(e) => {
                tracing::warn!(file = %old.name, error = %e, "[Backup] Failed to remove old archive");
                report.failed.push(RetentionFailure {
                    name: old.name,
                    error: e.to_string(),
                });
            }
        }
    }

    tracing::info!(
        kept = report.kept,
        deleted = report.deleted.len(),
        failed = report.failed.len(),
        "[Backup] Retention pass finished"
    );
    report
}
