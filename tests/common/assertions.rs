//! Custom assertions for collection runs

use std::path::Path;
use swell_collector::bundle::{read_latest, read_manifest};
use swell_collector::{Event, RunId, RunSummary, TaskStatus};
use tokio::sync::broadcast;

/// Assert the manifest matches the summary and every record has its file
pub async fn assert_bundle_consistent(summary: &RunSummary) {
    let manifest = read_manifest(&summary.bundle_dir)
        .await
        .expect("manifest should be readable");
    assert_eq!(manifest.run_id, summary.run_id);
    assert_eq!(manifest.results.len(), summary.records);
    for record in &manifest.results {
        let path = summary.bundle_dir.join(&record.filename);
        assert!(path.is_file(), "record file {:?} missing", path);
    }
}

/// Assert `latest_bundle.txt` in `data_dir` names `run_id`
pub async fn assert_latest_is(data_dir: &Path, run_id: &RunId) {
    let latest = read_latest(data_dir)
        .await
        .expect("pointer should be readable");
    assert_eq!(latest.as_ref(), Some(run_id), "latest pointer mismatch");
}

/// Status of the task named `name`
pub fn task_status<'a>(summary: &'a RunSummary, name: &str) -> &'a TaskStatus {
    &summary
        .tasks
        .iter()
        .find(|t| t.name == name)
        .unwrap_or_else(|| panic!("no task named {name}"))
        .status
}

/// Drain every event already sent to `rx`
pub fn drain_events(rx: &mut broadcast::Receiver<Event>) -> Vec<Event> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
