//! Age-based bundle pruning
//!
//! Runs once before a collection. Every directory directly under the data
//! directory whose modification time is older than the cutoff is removed:
//! its files first, then the directory. Failures are logged and skipped,
//! never propagated.

use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::fs;
use tracing::{debug, info, warn};

/// What a pruning pass did
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RetentionReport {
    /// Bundle directories that were deleted
    pub removed: Vec<PathBuf>,
    /// Bundle directories young enough to keep
    pub kept: usize,
    /// Files or directories that could not be deleted
    pub failures: usize,
}

/// Remove bundles older than `max_age`
pub async fn prune_bundles(data_dir: &Path, max_age: Duration) -> RetentionReport {
    let cutoff = SystemTime::now()
        .checked_sub(max_age)
        .unwrap_or(SystemTime::UNIX_EPOCH);
    prune_older_than(data_dir, cutoff).await
}

/// Remove bundle directories last modified before `cutoff`
pub async fn prune_older_than(data_dir: &Path, cutoff: SystemTime) -> RetentionReport {
    let mut report = RetentionReport::default();

    let mut entries = match fs::read_dir(data_dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(data_dir = %data_dir.display(), "data directory does not exist yet, nothing to prune");
            return report;
        }
        Err(e) => {
            warn!(data_dir = %data_dir.display(), error = %e, "cannot list data directory for pruning");
            report.failures += 1;
            return report;
        }
    };

    loop {
        let entry = match entries.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "error while listing data directory");
                report.failures += 1;
                break;
            }
        };

        let path = entry.path();
        let metadata = match fs::symlink_metadata(&path).await {
            Ok(m) => m,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "cannot stat entry");
                report.failures += 1;
                continue;
            }
        };
        if !metadata.is_dir() {
            continue;
        }

        let is_old = metadata.modified().map(|m| m < cutoff).unwrap_or(false);
        if !is_old {
            report.kept += 1;
            continue;
        }

        if remove_bundle(&path, &mut report).await {
            info!(bundle = %path.display(), "removed old bundle");
            report.removed.push(path);
        }
    }

    report
}

/// Delete the files of a bundle, then the bundle directory
///
/// Returns true when the directory itself is gone.
async fn remove_bundle(dir: &Path, report: &mut RetentionReport) -> bool {
    match fs::read_dir(dir).await {
        Ok(mut files) => loop {
            match files.next_entry().await {
                Ok(Some(file)) => {
                    let path = file.path();
                    if let Err(e) = fs::remove_file(&path).await {
                        warn!(path = %path.display(), error = %e, "failed to delete file in old bundle");
                        report.failures += 1;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(bundle = %dir.display(), error = %e, "error while listing old bundle");
                    report.failures += 1;
                    break;
                }
            }
        },
        Err(e) => {
            warn!(bundle = %dir.display(), error = %e, "cannot list old bundle");
            report.failures += 1;
        }
    }

    match fs::remove_dir(dir).await {
        Ok(()) => true,
        Err(e) => {
            warn!(bundle = %dir.display(), error = %e, "failed to remove old bundle directory");
            report.failures += 1;
            false
        }
    }
}
