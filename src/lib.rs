//! # swell-collector
//!
//! Concurrent collector for marine forecast data. One run fetches every
//! enabled source in parallel and assembles the results into a timestamped
//! bundle directory with a JSON manifest.
//!
//! ## Design Philosophy
//!
//! swell-collector is designed to be:
//! - **Polite to upstreams** - Per-host throttling, bounded retries with backoff
//! - **Failure tolerant** - One broken source never takes down a run
//! - **Atomic for readers** - `latest_bundle.txt` only ever names a complete bundle
//! - **Event-driven** - Consumers subscribe to run events, no polling required
//!
//! ## Quick Start
//!
//! ```no_run
//! use swell_collector::{Collector, Config, ProducerRegistry};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::load("config.ini")?;
//!     let registry = ProducerRegistry::from_config(&config)?;
//!     let collector = Collector::new(config, registry);
//!
//!     // Subscribe to events
//!     let mut events = collector.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let summary = collector.run().await?;
//!     println!("{}", summary.bundle_dir.display());
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Bundle directories, artifacts, manifest and retention
pub mod bundle;
/// Run orchestration
pub mod collector;
/// Configuration types
pub mod config;
/// Host resolution fallback
pub mod dns;
/// Error types
pub mod error;
/// Throttled, retrying HTTP fetcher
pub mod fetcher;
/// Logging setup for the binary
pub mod logging;
/// Producer trait and registry
pub mod producer;
/// Retry logic with exponential backoff
pub mod retry;
/// Core types and events
pub mod types;

// Re-export commonly used types
pub use bundle::{BundleContext, RetentionReport, Run};
pub use collector::Collector;
pub use config::{Config, FeedConfig};
pub use dns::{FallbackResolver, HostResolutionFallback};
pub use error::{BundleError, Error, FetchError, Result};
pub use fetcher::{FetchRequest, RateLimitedFetcher};
pub use producer::{FeedProducer, Producer, ProducerEntry, ProducerRegistry, from_fn};
pub use types::{Event, Manifest, Record, RunId, RunSummary, TaskReport, TaskRole, TaskStatus};

/// Run the collector, interrupting it on a termination signal.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// A signal cancels the collector's shutdown handle; the run then returns
/// [`Error::ShuttingDown`] after its grace period.
///
/// # Example
///
/// ```no_run
/// use swell_collector::{Collector, Config, ProducerRegistry, run_with_shutdown};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = Config::default();
///     let registry = ProducerRegistry::from_config(&config)?;
///     let collector = Collector::new(config, registry);
///
///     let summary = run_with_shutdown(&collector).await?;
///     println!("{} records", summary.records);
///     Ok(())
/// }
/// ```
pub async fn run_with_shutdown(collector: &Collector) -> Result<RunSummary> {
    let shutdown = collector.shutdown_handle();
    let listener = tokio::spawn(async move {
        wait_for_signal().await;
        shutdown.cancel();
    });
    let result = collector.run().await;
    listener.abort();
    result
}

/// Wait for SIGTERM or SIGINT (Ctrl+C elsewhere)
#[cfg(unix)]
pub async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Registration may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("Received SIGINT signal (Ctrl+C)");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("Received SIGTERM signal");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

/// Wait for Ctrl+C
#[cfg(not(unix))]
pub async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn run_with_shutdown_completes_without_a_signal() {
        let root = TempDir::new().unwrap();
        let mut config = Config::default();
        config.general.data_dir = root.path().to_path_buf();
        config.dns.enabled = false;
        let collector = Collector::new(config, ProducerRegistry::new());

        let summary = run_with_shutdown(&collector).await.unwrap();
        assert_eq!(summary.records, 0);
        assert!(summary.bundle_dir.is_dir());
        assert!(!collector.shutdown_handle().is_cancelled());
    }
}
