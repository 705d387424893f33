//! Run orchestration
//!
//! [`Collector::run`] performs one collection:
//!
//! 1. prune old bundles
//! 2. open the HTTP session and create the bundle directory
//! 3. run every enabled producer (and triggered fallbacks) concurrently
//! 4. write `metadata.json`, then point `latest_bundle.txt` at the run
//! 5. tear down, bounded by the shutdown grace period
//!
//! A failure in step 2 or 4, or a shutdown request, ends the run with an
//! error and leaves `latest_bundle.txt` untouched.

mod aggregate;
mod lifecycle;
mod tasks;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;

use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::bundle::{BundleContext, Run, prune_bundles};
use crate::config::Config;
use crate::dns::{FallbackResolver, HostResolutionFallback};
use crate::error::{Error, Result};
use crate::fetcher::RateLimitedFetcher;
use crate::producer::ProducerRegistry;
use crate::types::{Event, RunSummary};

use lifecycle::ShutdownCoordinator;
use tasks::TaskScheduler;

/// Capacity of the event channel
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Collects one bundle per [`run`](Collector::run)
///
/// The DNS fallback cache lives as long as the collector, so consecutive
/// runs share it.
pub struct Collector {
    config: Arc<Config>,
    registry: ProducerRegistry,
    event_tx: broadcast::Sender<Event>,
    shutdown: CancellationToken,
    resolver: Option<Arc<FallbackResolver>>,
}

impl std::fmt::Debug for Collector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collector")
            .field("data_dir", &self.config.data_dir())
            .field("producers", &self.registry.len())
            .field("dns_fallback", &self.resolver.is_some())
            .finish()
    }
}

impl Collector {
    /// Create a collector over `registry`
    ///
    /// When `config.dns.enabled` is set, HTTP connections resolve hosts
    /// through a [`HostResolutionFallback`] built from `config.dns`.
    pub fn new(config: Config, registry: ProducerRegistry) -> Self {
        let resolver = config.dns.enabled.then(|| {
            Arc::new(FallbackResolver::new(Arc::new(HostResolutionFallback::new(
                &config.dns,
            ))))
        });
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Self {
            config: Arc::new(config),
            registry,
            event_tx,
            shutdown: CancellationToken::new(),
            resolver,
        }
    }

    /// Resolve hosts through `fallback` regardless of `config.dns.enabled`
    pub fn with_resolution_fallback(mut self, fallback: Arc<HostResolutionFallback>) -> Self {
        self.resolver = Some(Arc::new(FallbackResolver::new(fallback)));
        self
    }

    /// Configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Subscribe to run events
    ///
    /// Events sent before subscribing are not replayed.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Token that interrupts the current and every later run when cancelled
    pub fn shutdown_handle(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Perform one collection run
    ///
    /// Returns [`Error::ShuttingDown`](crate::Error::ShuttingDown) when the
    /// shutdown handle fires before every task is terminal.
    pub async fn run(&self) -> Result<RunSummary> {
        let data_dir = self.config.data_dir().to_path_buf();
        let coordinator =
            ShutdownCoordinator::new(self.config.shutdown.grace_period, self.event_tx.clone());

        let retention = prune_bundles(&data_dir, self.config.retention.max_age).await;
        if !retention.removed.is_empty() || retention.failures > 0 {
            tracing::info!(
                removed = retention.removed.len(),
                kept = retention.kept,
                failures = retention.failures,
                "pruned old bundles"
            );
        }

        let fetcher = match RateLimitedFetcher::new(&self.config, self.resolver.clone()) {
            Ok(fetcher) => Arc::new(fetcher),
            Err(e) => {
                tracing::error!(error = %e, "cannot open HTTP session");
                coordinator.finalize(None, None, None).await;
                return Err(e);
            }
        };

        if self.shutdown.is_cancelled() {
            tracing::info!("shutdown already requested, not starting a run");
            coordinator.finalize(None, None, Some(fetcher)).await;
            return Err(Error::ShuttingDown);
        }

        let run = match Run::create(&data_dir).await {
            Ok(run) => run,
            Err(e) => {
                tracing::error!(error = %e, "cannot create bundle directory");
                coordinator.finalize(None, None, Some(fetcher)).await;
                return Err(e.into());
            }
        };

        let run_token = self.shutdown.child_token();
        let ctx = BundleContext::new(
            self.config.clone(),
            run.clone(),
            fetcher.clone(),
            run_token.clone(),
        );
        tracing::info!(run_id = %run.run_id(), bundle_dir = %run.bundle_dir().display(), "run started");
        self.event_tx
            .send(Event::RunStarted {
                run_id: run.run_id().clone(),
                bundle_dir: run.bundle_dir().to_path_buf(),
            })
            .ok();

        let mut scheduler = TaskScheduler::new(ctx, self.event_tx.clone());
        scheduler.launch(self.registry.enabled_entries(&self.config.sources));

        let outcome = match scheduler.drive(&self.shutdown).await {
            Ok(()) => {
                aggregate::publish(&run, &data_dir, scheduler.take_records(), &self.event_tx).await
            }
            Err(e) => Err(e),
        };

        let tasks = coordinator
            .finalize(Some(&run_token), Some(scheduler), Some(fetcher))
            .await;

        match outcome {
            Ok(published) => Ok(RunSummary {
                run_id: run.run_id().clone(),
                bundle_dir: run.bundle_dir().to_path_buf(),
                manifest_path: published.manifest_path,
                records: published.records,
                tasks,
                retention,
            }),
            Err(e) => {
                tracing::error!(run_id = %run.run_id(), error = %e, "run failed");
                Err(e)
            }
        }
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::test_helpers::{failing, producing, test_config, waiting};
    use super::*;
    use crate::bundle::{read_latest, read_manifest};
    use crate::error::Error;
    use crate::types::TaskStatus;
    use std::time::{Duration, Instant};
    use tempfile::TempDir;

    fn status_of<'a>(summary: &'a RunSummary, name: &str) -> &'a TaskStatus {
        &summary.tasks.iter().find(|t| t.name == name).unwrap().status
    }

    #[tokio::test]
    async fn primaries_fallbacks_and_disabled_producers() {
        let root = TempDir::new().unwrap();
        let mut config = test_config(root.path());
        for name in ["a", "b"] {
            config.sources.set(name, true);
        }
        config.sources.set("d", false);

        let mut registry = ProducerRegistry::new();
        registry.register(producing("a", 2)).unwrap();
        registry
            .register_with_fallback(failing("b"), producing("c", 1))
            .unwrap();
        registry.register(producing("d", 5)).unwrap();

        let collector = Collector::new(config, registry);
        let summary = collector.run().await.unwrap();

        assert_eq!(summary.records, 3);
        assert!(matches!(status_of(&summary, "b"), TaskStatus::Failed { .. }));
        assert_eq!(status_of(&summary, "c"), &TaskStatus::Succeeded { records: 1 });
        assert!(summary.tasks.iter().all(|t| t.name != "d"));

        let manifest = read_manifest(&summary.bundle_dir).await.unwrap();
        assert_eq!(manifest.run_id, summary.run_id);
        assert_eq!(manifest.results.len(), 3);
        assert!(manifest.results.iter().all(|r| r.source != "d"));
        for record in &manifest.results {
            assert!(summary.bundle_dir.join(&record.filename).is_file());
        }
        assert_eq!(read_latest(root.path()).await.unwrap(), Some(summary.run_id));
    }

    #[tokio::test]
    async fn empty_registry_still_writes_a_bundle() {
        let root = TempDir::new().unwrap();
        let collector = Collector::new(test_config(root.path()), ProducerRegistry::new());
        let summary = collector.run().await.unwrap();

        assert_eq!(summary.records, 0);
        assert!(summary.manifest_path.is_file());
    }

    #[tokio::test]
    async fn events_end_with_pointer_then_shutdown() {
        let root = TempDir::new().unwrap();
        let mut config = test_config(root.path());
        config.sources.set("a", true);
        let mut registry = ProducerRegistry::new();
        registry.register(producing("a", 1)).unwrap();

        let collector = Collector::new(config, registry);
        let mut rx = collector.subscribe();
        collector.run().await.unwrap();

        let mut kinds = Vec::new();
        while let Ok(event) = rx.try_recv() {
            kinds.push(serde_json::to_value(&event).unwrap()["type"].as_str().unwrap().to_string());
        }
        assert_eq!(kinds.first().map(String::as_str), Some("run_started"));
        assert_eq!(
            &kinds[kinds.len() - 3..],
            &["manifest_written", "latest_updated", "shutdown_complete"]
        );
    }

    #[tokio::test]
    async fn unwritable_data_dir_fails_without_pointer() {
        let root = TempDir::new().unwrap();
        let data_dir = root.path().join("data");
        std::fs::write(&data_dir, "a file, not a directory").unwrap();

        let collector = Collector::new(test_config(&data_dir), ProducerRegistry::new());
        let mut rx = collector.subscribe();
        assert!(matches!(collector.run().await, Err(Error::Bundle(_))));
        assert!(matches!(rx.try_recv().unwrap(), Event::ShutdownComplete));
    }

    #[tokio::test]
    async fn shutdown_interrupts_the_run_within_grace() {
        let root = TempDir::new().unwrap();
        let mut config = test_config(root.path());
        config.sources.set("slow", true);
        let mut registry = ProducerRegistry::new();
        registry.register(waiting("slow")).unwrap();

        let collector = Collector::new(config, registry);
        let handle = collector.shutdown_handle();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            handle.cancel();
        });

        let start = Instant::now();
        let result = collector.run().await;
        assert!(matches!(result, Err(Error::ShuttingDown)));
        assert!(start.elapsed() < Duration::from_secs(5));
        assert_eq!(read_latest(root.path()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn cancelled_collector_creates_no_bundle() {
        let root = TempDir::new().unwrap();
        let collector = Collector::new(test_config(root.path()), ProducerRegistry::new());
        let mut rx = collector.subscribe();
        collector.shutdown_handle().cancel();

        let result = collector.run().await;
        assert!(matches!(result, Err(Error::ShuttingDown)));
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
        assert!(matches!(rx.try_recv(), Ok(Event::ShutdownComplete)));
    }

    #[tokio::test]
    async fn old_bundles_are_pruned_before_the_run() {
        let root = TempDir::new().unwrap();
        let stale = root.path().join("stale_run");
        std::fs::create_dir(&stale).unwrap();
        std::fs::write(stale.join("metadata.json"), "{}").unwrap();
        let old = std::time::SystemTime::now() - Duration::from_secs(30 * 86_400);
        std::fs::File::open(&stale).unwrap().set_modified(old).unwrap();

        let collector = Collector::new(test_config(root.path()), ProducerRegistry::new());
        let summary = collector.run().await.unwrap();

        assert_eq!(summary.retention.removed, vec![stale.clone()]);
        assert!(!stale.exists());
        assert!(summary.bundle_dir.is_dir());
    }

    #[tokio::test]
    async fn fallback_entries_stay_with_their_primary() {
        let root = TempDir::new().unwrap();
        let mut config = test_config(root.path());
        config.sources.set("models", true);
        let mut registry = ProducerRegistry::new();
        registry
            .register_with_fallback(producing("models", 1), producing("ww3_fallback", 1))
            .unwrap();
        assert_eq!(registry.entries().len(), 1);
        assert_eq!(registry.entries()[0].name(), "models");

        let summary = Collector::new(config, registry).run().await.unwrap();
        assert_eq!(status_of(&summary, "ww3_fallback"), &TaskStatus::NotScheduled);
        assert_eq!(summary.records, 1);
    }
}
