//! Producer boundary
//!
//! A [`Producer`] is one data source. It receives the run's
//! [`BundleContext`], fetches what it needs through it, saves artifacts and
//! returns one [`Record`] per saved artifact. The collector runs every
//! enabled producer concurrently and isolates their failures.
//!
//! # Examples
//!
//! ```no_run
//! use swell_collector::{BundleContext, ProducerRegistry, Record, from_fn};
//!
//! # fn example() -> swell_collector::Result<()> {
//! let mut registry = ProducerRegistry::new();
//! registry.register(from_fn("buoys", |ctx: BundleContext| async move {
//!     let mut records = Vec::new();
//!     if let Some(data) = ctx.get("https://www.ndbc.noaa.gov/data/realtime2/51001.txt").await {
//!         let name = ctx.save("ndbc_51001.txt", &data).await?;
//!         records.push(Record::new("NDBC", "realtime", name, 1).with_extra("buoy", "51001"));
//!     }
//!     Ok(records)
//! }))?;
//! # Ok(())
//! # }
//! ```

mod feed;

pub use feed::FeedProducer;

use async_trait::async_trait;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use crate::bundle::BundleContext;
use crate::config::{Config, SourcesConfig};
use crate::error::{Error, Result};
use crate::types::Record;

/// A data source run once per collection
#[async_trait]
pub trait Producer: Send + Sync {
    /// Unique name, matched against `[SOURCES] enable_<name>`
    fn name(&self) -> &str;

    /// Fetch, save and describe this source's artifacts
    ///
    /// Returning an error (or panicking) marks the task failed; records
    /// already saved by a failing producer are discarded.
    async fn collect(&self, ctx: &BundleContext) -> Result<Vec<Record>>;
}

/// [`Producer`] built from a closure, see [`from_fn`]
pub struct FnProducer<F> {
    name: String,
    f: F,
}

#[async_trait]
impl<F, Fut> Producer for FnProducer<F>
where
    F: Fn(BundleContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Vec<Record>>> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn collect(&self, ctx: &BundleContext) -> Result<Vec<Record>> {
        (self.f)(ctx.clone()).await
    }
}

/// Wrap an async closure as a producer
pub fn from_fn<F, Fut>(name: impl Into<String>, f: F) -> Arc<dyn Producer>
where
    F: Fn(BundleContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Vec<Record>>> + Send + 'static,
{
    Arc::new(FnProducer {
        name: name.into(),
        f,
    })
}

/// A primary producer and the producer that stands in for it
///
/// The fallback runs only if the primary fails or returns no records.
#[derive(Clone)]
pub struct ProducerEntry {
    /// Always scheduled when enabled
    pub primary: Arc<dyn Producer>,
    /// Scheduled after the primary settles, if triggered
    pub fallback: Option<Arc<dyn Producer>>,
}

impl ProducerEntry {
    /// Entry without a fallback
    pub fn new(primary: Arc<dyn Producer>) -> Self {
        Self {
            primary,
            fallback: None,
        }
    }

    /// Entry with a fallback
    pub fn with_fallback(primary: Arc<dyn Producer>, fallback: Arc<dyn Producer>) -> Self {
        Self {
            primary,
            fallback: Some(fallback),
        }
    }

    /// Name of the primary
    pub fn name(&self) -> &str {
        self.primary.name()
    }
}

impl std::fmt::Debug for ProducerEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProducerEntry")
            .field("primary", &self.primary.name())
            .field("fallback", &self.fallback.as_ref().map(|p| p.name()))
            .finish()
    }
}

/// All known producers, in registration order
#[derive(Clone, Debug, Default)]
pub struct ProducerRegistry {
    entries: Vec<ProducerEntry>,
}

impl ProducerRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the `[FEED <name>]` producers of `config`
    ///
    /// A feed named as another feed's `fallback` is registered only as that
    /// fallback.
    pub fn from_config(config: &Config) -> Result<Self> {
        let feeds: HashMap<&str, Arc<dyn Producer>> = config
            .feeds
            .iter()
            .map(|feed| {
                (
                    feed.name.as_str(),
                    Arc::new(FeedProducer::new(feed.clone())) as Arc<dyn Producer>,
                )
            })
            .collect();

        let fallback_only: std::collections::HashSet<&str> = config
            .feeds
            .iter()
            .filter_map(|feed| feed.fallback.as_deref())
            .collect();

        let mut registry = Self::new();
        for feed in &config.feeds {
            if fallback_only.contains(feed.name.as_str()) {
                continue;
            }
            let primary = feeds[feed.name.as_str()].clone();
            let entry = match &feed.fallback {
                Some(name) => {
                    let fallback = feeds.get(name.as_str()).cloned().ok_or_else(|| {
                        Error::config(
                            format!("fallback {name} is not a defined feed"),
                            format!("FEED {}.fallback", feed.name),
                        )
                    })?;
                    ProducerEntry::with_fallback(primary, fallback)
                }
                None => ProducerEntry::new(primary),
            };
            registry.push(entry)?;
        }
        Ok(registry)
    }

    /// Register a producer without a fallback
    pub fn register(&mut self, producer: Arc<dyn Producer>) -> Result<()> {
        self.push(ProducerEntry::new(producer))
    }

    /// Register a producer with a fallback
    pub fn register_with_fallback(
        &mut self,
        primary: Arc<dyn Producer>,
        fallback: Arc<dyn Producer>,
    ) -> Result<()> {
        self.push(ProducerEntry::with_fallback(primary, fallback))
    }

    fn push(&mut self, entry: ProducerEntry) -> Result<()> {
        if self.entries.iter().any(|e| e.name() == entry.name()) {
            return Err(Error::Other(format!(
                "producer {} is already registered",
                entry.name()
            )));
        }
        self.entries.push(entry);
        Ok(())
    }

    /// All entries, in registration order
    pub fn entries(&self) -> &[ProducerEntry] {
        &self.entries
    }

    /// Entries whose primary is enabled in `sources`
    pub fn enabled_entries(&self, sources: &SourcesConfig) -> Vec<ProducerEntry> {
        self.entries
            .iter()
            .filter(|entry| {
                let enabled = sources.is_enabled(entry.name());
                if !enabled {
                    tracing::debug!(producer = entry.name(), "producer disabled");
                }
                enabled
            })
            .cloned()
            .collect()
    }

    /// Number of registered entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is registered
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FeedConfig;

    fn noop(name: &str) -> Arc<dyn Producer> {
        from_fn(name, |_ctx| async { Ok(Vec::new()) })
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut registry = ProducerRegistry::new();
        registry.register(noop("buoys")).unwrap();
        assert!(registry.register(noop("buoys")).is_err());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn only_enabled_primaries_are_returned() {
        let mut registry = ProducerRegistry::new();
        registry.register(noop("buoys")).unwrap();
        registry
            .register_with_fallback(noop("models"), noop("ww3_fallback"))
            .unwrap();
        registry.register(noop("windy")).unwrap();

        let mut sources = SourcesConfig::default();
        sources.set("buoys", true);
        sources.set("models", true);
        sources.set("windy", false);
        // Enabling a fallback by name does not schedule it on its own
        sources.set("ww3_fallback", true);

        let enabled = registry.enabled_entries(&sources);
        let names: Vec<_> = enabled.iter().map(|e| e.name()).collect();
        assert_eq!(names, vec!["buoys", "models"]);
        assert_eq!(
            enabled[1].fallback.as_ref().map(|f| f.name()),
            Some("ww3_fallback")
        );
    }

    #[test]
    fn from_config_attaches_fallback_feeds() {
        let mut config = Config::default();
        let mut primary = FeedConfig::new("ww3", "WW3", "wave_model");
        primary.fallback = Some("ww3_mirror".into());
        config.feeds.push(primary);
        config
            .feeds
            .push(FeedConfig::new("ww3_mirror", "WW3", "wave_model"));
        config.feeds.push(FeedConfig::new("opc", "OPC", "chart"));

        let registry = ProducerRegistry::from_config(&config).unwrap();
        let entries = registry.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name(), "ww3");
        assert_eq!(
            entries[0].fallback.as_ref().map(|f| f.name()),
            Some("ww3_mirror")
        );
        assert_eq!(entries[1].name(), "opc");
        assert!(entries[1].fallback.is_none());
    }

    #[test]
    fn from_config_rejects_unknown_fallback() {
        let mut config = Config::default();
        let mut feed = FeedConfig::new("ww3", "WW3", "wave_model");
        feed.fallback = Some("nowhere".into());
        config.feeds.push(feed);
        assert!(matches!(
            ProducerRegistry::from_config(&config),
            Err(Error::Config { .. })
        ));
    }
}
