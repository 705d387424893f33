//! Bundle manifest and the "latest bundle" pointer

use std::path::{Path, PathBuf};

use super::atomic::write_atomic;
use crate::error::{BundleError, Result};
use crate::types::{Manifest, RunId};

/// Manifest file name inside a bundle directory
pub const MANIFEST_FILE: &str = "metadata.json";

/// Pointer file name inside the data directory
pub const LATEST_POINTER_FILE: &str = "latest_bundle.txt";

/// Write `manifest` to `{bundle_dir}/metadata.json` atomically
///
/// Returns the manifest path.
pub async fn write_manifest(bundle_dir: &Path, manifest: &Manifest) -> Result<PathBuf> {
    let path = bundle_dir.join(MANIFEST_FILE);
    let json = serde_json::to_vec_pretty(manifest)?;
    write_atomic(&path, &json)
        .await
        .map_err(|source| BundleError::Write {
            path: path.clone(),
            source,
        })?;
    Ok(path)
}

/// Read a bundle's manifest
pub async fn read_manifest(bundle_dir: &Path) -> Result<Manifest> {
    let content = tokio::fs::read(bundle_dir.join(MANIFEST_FILE)).await?;
    Ok(serde_json::from_slice(&content)?)
}

/// Point `{data_dir}/latest_bundle.txt` at `run_id`, atomically
pub async fn publish_latest(data_dir: &Path, run_id: &RunId) -> Result<()> {
    let path = data_dir.join(LATEST_POINTER_FILE);
    write_atomic(&path, run_id.as_str().as_bytes())
        .await
        .map_err(|source| BundleError::Write { path, source })?;
    Ok(())
}

/// Run id the pointer currently names, if the pointer exists
pub async fn read_latest(data_dir: &Path) -> Result<Option<RunId>> {
    match tokio::fs::read_to_string(data_dir.join(LATEST_POINTER_FILE)).await {
        Ok(content) => {
            let id = content.trim();
            Ok((!id.is_empty()).then(|| RunId::from(id.to_string())))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}
