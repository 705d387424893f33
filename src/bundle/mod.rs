//! Bundles: one directory per collection run
//!
//! A [`Run`] owns a freshly created `{data_dir}/{run_id}` directory.
//! [`BundleContext`] is what producers receive: it gives them the network
//! (through the run's [`RateLimitedFetcher`]), a place to save artifacts,
//! and the configuration snapshot.

pub mod artifact;
pub mod atomic;
pub mod manifest;
pub mod retention;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::{BundleError, Result};
use crate::fetcher::{FetchRequest, RateLimitedFetcher};
use crate::types::RunId;

pub use manifest::{
    LATEST_POINTER_FILE, MANIFEST_FILE, publish_latest, read_latest, read_manifest, write_manifest,
};
pub use retention::{RetentionReport, prune_bundles, prune_older_than};

/// How many fresh ids to try if a generated directory already exists
const MAX_RUN_ID_ATTEMPTS: u32 = 8;

/// Identity and directory of one collection run
#[derive(Clone, Debug)]
pub struct Run {
    run_id: RunId,
    bundle_dir: PathBuf,
    started_at: DateTime<Utc>,
}

impl Run {
    /// Create `data_dir` if needed and a new, empty bundle directory inside it
    ///
    /// The bundle directory is created exclusively; an existing directory
    /// is never reused.
    pub async fn create(data_dir: &Path) -> std::result::Result<Self, BundleError> {
        tokio::fs::create_dir_all(data_dir)
            .await
            .map_err(|source| BundleError::CreateDir {
                path: data_dir.to_path_buf(),
                source,
            })?;

        let mut last_error = None;
        for _ in 0..MAX_RUN_ID_ATTEMPTS {
            let run_id = RunId::generate();
            let bundle_dir = data_dir.join(run_id.as_str());
            match tokio::fs::create_dir(&bundle_dir).await {
                Ok(()) => {
                    return Ok(Self {
                        run_id,
                        bundle_dir,
                        started_at: Utc::now(),
                    });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    tracing::debug!(bundle_dir = %bundle_dir.display(), "run directory exists, generating a new id");
                    last_error = Some((bundle_dir, e));
                }
                Err(source) => {
                    return Err(BundleError::CreateDir {
                        path: bundle_dir,
                        source,
                    });
                }
            }
        }

        let (path, source) = last_error.unwrap_or_else(|| {
            (
                data_dir.to_path_buf(),
                std::io::Error::new(ErrorKind::AlreadyExists, "no free run id"),
            )
        });
        Err(BundleError::CreateDir { path, source })
    }

    /// Run id
    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    /// `{data_dir}/{run_id}`
    pub fn bundle_dir(&self) -> &Path {
        &self.bundle_dir
    }

    /// When the run directory was created
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }
}

struct ContextInner {
    config: Arc<Config>,
    run: Run,
    fetcher: Arc<RateLimitedFetcher>,
    cancel: CancellationToken,
}

/// Shared per-run state handed to every producer
///
/// Cloning is cheap; all clones refer to the same run.
#[derive(Clone)]
pub struct BundleContext {
    inner: Arc<ContextInner>,
}

impl std::fmt::Debug for BundleContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BundleContext")
            .field("run_id", &self.inner.run.run_id)
            .field("bundle_dir", &self.inner.run.bundle_dir)
            .field("cancelled", &self.inner.cancel.is_cancelled())
            .finish()
    }
}

impl BundleContext {
    /// Bind a configuration, a run and an open HTTP session together
    pub fn new(
        config: Arc<Config>,
        run: Run,
        fetcher: Arc<RateLimitedFetcher>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                config,
                run,
                fetcher,
                cancel,
            }),
        }
    }

    /// Configuration snapshot
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// The run
    pub fn run(&self) -> &Run {
        &self.inner.run
    }

    /// Run id
    pub fn run_id(&self) -> &RunId {
        self.inner.run.run_id()
    }

    /// Directory artifacts are saved into
    pub fn bundle_dir(&self) -> &Path {
        self.inner.run.bundle_dir()
    }

    /// Non-empty API key by name
    pub fn api_key(&self, name: &str) -> Option<&str> {
        self.inner.config.api_key(name)
    }

    /// Whether the run has been cancelled
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    /// Fetch through the run's HTTP session
    ///
    /// Returns `None` immediately once the run is cancelled, including in
    /// the middle of a throttle wait, backoff sleep or transfer.
    pub async fn fetch(&self, request: &FetchRequest) -> Option<Bytes> {
        if self.is_cancelled() {
            return None;
        }
        tokio::select! {
            biased;
            _ = self.inner.cancel.cancelled() => {
                tracing::debug!(url = %request.url, "fetch abandoned, run cancelled");
                None
            }
            body = self.inner.fetcher.fetch(request) => body,
        }
    }

    /// GET `url`
    pub async fn get(&self, url: &str) -> Option<Bytes> {
        self.fetch(&FetchRequest::get(url)).await
    }

    /// Save `data` as an artifact of this run
    ///
    /// Returns the file name actually used (`stem_N.ext` when `name` was
    /// taken). The file is on disk and fsynced when this returns.
    pub async fn save(&self, name: &str, data: impl AsRef<[u8]>) -> Result<String> {
        let saved = artifact::save_artifact(self.bundle_dir(), name, data.as_ref()).await?;
        tracing::debug!(run_id = %self.run_id(), file = %saved, bytes = data.as_ref().len(), "saved artifact");
        Ok(saved)
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn context(data_dir: &Path) -> (BundleContext, CancellationToken) {
        let mut config = Config::default();
        config.general.data_dir = data_dir.to_path_buf();
        config.retry.initial_delay = Duration::from_millis(10);
        let config = Arc::new(config);
        let fetcher = Arc::new(RateLimitedFetcher::new(&config, None).unwrap());
        let run = Run::create(data_dir).await.unwrap();
        let cancel = CancellationToken::new();
        (
            BundleContext::new(config, run, fetcher, cancel.clone()),
            cancel,
        )
    }

    #[tokio::test]
    async fn runs_get_distinct_directories() {
        let root = TempDir::new().unwrap();
        let data_dir = root.path().join("data");
        let a = Run::create(&data_dir).await.unwrap();
        let b = Run::create(&data_dir).await.unwrap();

        assert_ne!(a.run_id(), b.run_id());
        assert_ne!(a.bundle_dir(), b.bundle_dir());
        assert!(a.bundle_dir().is_dir());
        assert_eq!(a.bundle_dir().parent(), Some(data_dir.as_path()));
        assert!(a.bundle_dir().ends_with(a.run_id().as_str()));
    }

    #[tokio::test]
    async fn run_creation_fails_when_data_dir_is_a_file() {
        let root = TempDir::new().unwrap();
        let file = root.path().join("data");
        std::fs::write(&file, "not a directory").unwrap();
        assert!(matches!(
            Run::create(&file).await,
            Err(BundleError::CreateDir { .. })
        ));
    }

    #[tokio::test]
    async fn save_writes_into_the_bundle() {
        let root = TempDir::new().unwrap();
        let (ctx, _cancel) = context(root.path()).await;

        let name = ctx.save("buoy_51001.txt", "WVHT 2.1").await.unwrap();
        assert_eq!(name, "buoy_51001.txt");
        assert_eq!(
            std::fs::read_to_string(ctx.bundle_dir().join(&name)).unwrap(),
            "WVHT 2.1"
        );
        assert!(matches!(
            ctx.save("../escape.txt", "x").await,
            Err(crate::Error::Bundle(BundleError::InvalidArtifactName { .. }))
        ));
    }

    #[tokio::test]
    async fn cancelled_context_does_not_fetch() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("x"))
            .expect(0)
            .mount(&server)
            .await;

        let root = TempDir::new().unwrap();
        let (ctx, cancel) = context(root.path()).await;
        cancel.cancel();
        assert!(ctx.is_cancelled());
        assert!(ctx.get(&server.uri()).await.is_none());
    }

    #[tokio::test]
    async fn cancellation_interrupts_an_inflight_fetch() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(10)))
            .mount(&server)
            .await;

        let root = TempDir::new().unwrap();
        let (ctx, cancel) = context(root.path()).await;
        let uri = server.uri();
        let handle = tokio::spawn(async move { ctx.get(&uri).await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
        let result = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("fetch should stop promptly")
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn api_key_reads_configuration() {
        let root = TempDir::new().unwrap();
        let mut config = Config::default();
        config.api_keys.insert("WINDY_KEY".into(), "k".into());
        let config = Arc::new(config);
        let fetcher = Arc::new(RateLimitedFetcher::new(&config, None).unwrap());
        let run = Run::create(root.path()).await.unwrap();
        let ctx = BundleContext::new(config, run, fetcher, CancellationToken::new());
        assert_eq!(ctx.api_key("WINDY_KEY"), Some("k"));
        assert_eq!(ctx.api_key("STORMGLASS_KEY"), None);
    }
}
