//! Atomic file replacement.
//!
//! Writes go to a temp file next to the target (unique PID + random
//! suffix), are fsynced, then renamed over the target. Readers see either
//! the old content or the new content, never a partial file.

use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Replace `path` with `contents` atomically.
pub async fn write_atomic(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let temp_path = temp_path_for(path);

    let result = async {
        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(contents).await?;
        file.sync_all().await?;
        drop(file);
        fs::rename(&temp_path, path).await
    }
    .await;

    if let Err(e) = &result {
        tracing::warn!(path = %path.display(), error = %e, "atomic write failed");
        if let Err(cleanup) = fs::remove_file(&temp_path).await {
            if cleanup.kind() != std::io::ErrorKind::NotFound {
                tracing::debug!(path = %temp_path.display(), error = %cleanup, "failed to remove temp file");
            }
        }
    }
    result
}

fn temp_path_for(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let suffix: u32 = rand::random();
    path.with_file_name(format!(
        ".{file_name}.{}.{suffix:08x}.tmp",
        std::process::id()
    ))
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn replaces_existing_content() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("latest_bundle.txt");
        std::fs::write(&path, "old").unwrap();

        write_atomic(&path, b"new").await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "new");
    }

    #[tokio::test]
    async fn leaves_no_temp_files_behind() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("metadata.json");
        write_atomic(&path, b"{}").await.unwrap();

        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("metadata.json")]);
    }

    #[tokio::test]
    async fn missing_parent_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("absent").join("metadata.json");
        assert!(write_atomic(&path, b"{}").await.is_err());
        assert!(!path.exists());
    }

    #[test]
    fn temp_path_is_a_hidden_sibling() {
        let temp = temp_path_for(Path::new("/data/latest_bundle.txt"));
        assert_eq!(temp.parent(), Some(Path::new("/data")));
        let name = temp.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with(".latest_bundle.txt."));
        assert!(name.ends_with(".tmp"));
    }
}
