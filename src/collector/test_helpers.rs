//! Shared test helpers for collector and scheduler tests.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::bundle::{BundleContext, Run};
use crate::config::Config;
use crate::error::Error;
use crate::fetcher::RateLimitedFetcher;
use crate::producer::{Producer, from_fn};
use crate::types::Record;

/// Config writing into `data_dir`, with fast retries and no DNS fallback
pub(crate) fn test_config(data_dir: &Path) -> Config {
    let mut config = Config::default();
    config.general.data_dir = data_dir.to_path_buf();
    config.general.timeout = Duration::from_secs(5);
    config.retry.initial_delay = Duration::from_millis(5);
    config.retry.max_delay = Duration::from_millis(50);
    config.hosts.throttle.clear();
    config.dns.enabled = false;
    config.shutdown.grace_period = Duration::from_millis(100);
    config
}

/// A context over a fresh run in `data_dir`, plus its cancellation token
pub(crate) async fn test_context(data_dir: &Path) -> (BundleContext, CancellationToken) {
    let config = Arc::new(test_config(data_dir));
    let fetcher = Arc::new(RateLimitedFetcher::new(&config, None).unwrap());
    let run = Run::create(data_dir).await.unwrap();
    let cancel = CancellationToken::new();
    (
        BundleContext::new(config, run, fetcher, cancel.clone()),
        cancel,
    )
}

/// Saves `count` artifacts named `{name}_{i}.txt` and returns their records
pub(crate) fn producing(name: &str, count: usize) -> Arc<dyn Producer> {
    let source = name.to_string();
    from_fn(name, move |ctx: BundleContext| {
        let source = source.clone();
        async move {
            let mut records = Vec::with_capacity(count);
            for i in 0..count {
                let filename = ctx.save(&format!("{source}_{i}.txt"), b"data").await?;
                records.push(Record::new(source.clone(), "test", filename, 1));
            }
            Ok(records)
        }
    })
}

/// Returns an error
pub(crate) fn failing(name: &str) -> Arc<dyn Producer> {
    let owned = name.to_string();
    from_fn(name, move |_ctx| {
        let name = owned.clone();
        async move { Err(Error::producer(name, "upstream unavailable")) }
    })
}

/// Panics
pub(crate) fn panicking(name: &str) -> Arc<dyn Producer> {
    from_fn(name, |_ctx| async {
        if true {
            panic!("producer exploded");
        }
        Ok(Vec::new())
    })
}

/// Sleeps for a minute, ignoring cancellation
pub(crate) fn waiting(name: &str) -> Arc<dyn Producer> {
    from_fn(name, |_ctx| async {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(Vec::new())
    })
}
