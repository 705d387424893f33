//! Result aggregation: manifest first, then the latest pointer

use chrono::Utc;
use std::path::{Path, PathBuf};
use tokio::sync::broadcast;

use crate::bundle::artifact::artifact_path;
use crate::bundle::{Run, publish_latest, write_manifest};
use crate::error::Result;
use crate::types::{Event, Manifest, Record};

/// Where the aggregated bundle ended up
#[derive(Debug)]
pub(crate) struct Published {
    pub(crate) manifest_path: PathBuf,
    pub(crate) records: usize,
}

/// Write the manifest for `run`, then point the data directory at it
///
/// Must only be called once every task is terminal. Records whose file is
/// not in the bundle directory are dropped.
pub(crate) async fn publish(
    run: &Run,
    data_dir: &Path,
    records: Vec<Record>,
    event_tx: &broadcast::Sender<Event>,
) -> Result<Published> {
    let results = existing_records(run.bundle_dir(), records).await;
    let count = results.len();

    let manifest = Manifest {
        run_id: run.run_id().clone(),
        timestamp: Utc::now(),
        results,
    };
    let manifest_path = write_manifest(run.bundle_dir(), &manifest).await?;
    event_tx
        .send(Event::ManifestWritten {
            run_id: run.run_id().clone(),
            records: count,
        })
        .ok();

    publish_latest(data_dir, run.run_id()).await?;
    event_tx
        .send(Event::LatestUpdated {
            run_id: run.run_id().clone(),
        })
        .ok();

    tracing::info!(run_id = %run.run_id(), records = count, "bundle complete");
    Ok(Published {
        manifest_path,
        records: count,
    })
}

/// Keep records whose `filename` is a file inside `bundle_dir`
async fn existing_records(bundle_dir: &Path, records: Vec<Record>) -> Vec<Record> {
    let mut kept = Vec::with_capacity(records.len());
    for record in records {
        let exists = match artifact_path(bundle_dir, &record.filename) {
            Some(path) => tokio::fs::metadata(&path)
                .await
                .map(|m| m.is_file())
                .unwrap_or(false),
            None => false,
        };
        if exists {
            kept.push(record);
        } else {
            tracing::warn!(
                source = %record.source,
                filename = %record.filename,
                "dropping record without a file in the bundle"
            );
        }
    }
    kept
}
