//! Artifact storage inside a bundle directory

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;

use super::manifest::MANIFEST_FILE;
use crate::error::BundleError;

/// Maximum number of suffixed names to try before giving up
const MAX_RENAME_ATTEMPTS: u32 = 9999;

/// Reject names that could escape the bundle directory
pub fn validate_artifact_name(name: &str) -> Result<(), BundleError> {
    let reason = if name.is_empty() {
        Some("name is empty")
    } else if name.contains(['/', '\\']) {
        Some("name contains a path separator")
    } else if name.contains("..") {
        Some("name contains '..'")
    } else if name.contains('\0') {
        Some("name contains a NUL byte")
    } else if name == "." {
        Some("name is '.'")
    } else if is_manifest_temp(name) {
        Some("name is reserved for manifest writes")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(BundleError::InvalidArtifactName {
            name: name.to_string(),
            reason: reason.to_string(),
        }),
        None => Ok(()),
    }
}

/// Temp sibling of the manifest: `.metadata.json.<pid>.<suffix>.tmp`
fn is_manifest_temp(name: &str) -> bool {
    name.strip_prefix('.')
        .and_then(|rest| rest.strip_prefix(MANIFEST_FILE))
        .is_some_and(|rest| rest.starts_with('.') && rest.ends_with(".tmp"))
}

/// The `attempt`-th alternative for `name`: `stem_N.ext`
fn candidate_name(name: &str, attempt: u32) -> String {
    if attempt == 0 {
        return name.to_string();
    }
    let path = Path::new(name);
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or(name);
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => format!("{stem}_{attempt}.{ext}"),
        None => format!("{stem}_{attempt}"),
    }
}

/// Write `data` into `dir` under `name`, or the first free `stem_N.ext`
///
/// The file is created exclusively, so concurrent saves under the same
/// name never overwrite each other. The manifest name is never handed
/// out; `metadata.json` is saved as `metadata_1.json`. It is fsynced before this returns.
/// Returns the file name that was used.
pub async fn save_artifact(dir: &Path, name: &str, data: &[u8]) -> Result<String, BundleError> {
    validate_artifact_name(name)?;

    for attempt in 0..=MAX_RENAME_ATTEMPTS {
        let candidate = candidate_name(name, attempt);
        if candidate == MANIFEST_FILE {
            continue;
        }
        let path = dir.join(&candidate);

        let mut file = match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
            Err(source) => return Err(BundleError::Write { path, source }),
        };

        write_and_sync(&mut file, data)
            .await
            .map_err(|source| BundleError::Write {
                path: path.clone(),
                source,
            })?;

        if attempt > 0 {
            tracing::debug!(requested = name, saved_as = %candidate, "artifact name taken, used suffix");
        }
        return Ok(candidate);
    }

    Err(BundleError::NameExhausted {
        name: name.to_string(),
        attempts: MAX_RENAME_ATTEMPTS,
    })
}

async fn write_and_sync(file: &mut tokio::fs::File, data: &[u8]) -> std::io::Result<()> {
    file.write_all(data).await?;
    file.flush().await?;
    file.sync_all().await
}

/// Path of an artifact inside `dir`, if `name` is a bare file name
pub(crate) fn artifact_path(dir: &Path, name: &str) -> Option<PathBuf> {
    validate_artifact_name(name).ok().map(|()| dir.join(name))
}
