//! Config-driven URL list producer

use async_trait::async_trait;
use reqwest::Method;

use super::Producer;
use crate::bundle::BundleContext;
use crate::config::FeedConfig;
use crate::error::{Error, Result};
use crate::fetcher::FetchRequest;
use crate::types::Record;

/// Placeholder in artifact URLs replaced by the feed's API key
const KEY_PLACEHOLDER: &str = "{key}";

/// Downloads every artifact of a [`FeedConfig`] and describes each one
#[derive(Clone, Debug)]
pub struct FeedProducer {
    config: FeedConfig,
}

impl FeedProducer {
    /// Create a producer for `config`
    pub fn new(config: FeedConfig) -> Self {
        Self { config }
    }

    fn record(&self, filename: String) -> Record {
        let mut record = Record::new(
            self.config.source.clone(),
            self.config.kind.clone(),
            filename,
            self.config.priority,
        );
        if let Some(v) = self.config.south_facing {
            record = record.south_facing(v);
        }
        if let Some(v) = self.config.north_facing {
            record = record.north_facing(v);
        }
        record
    }
}

#[async_trait]
impl Producer for FeedProducer {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn collect(&self, ctx: &BundleContext) -> Result<Vec<Record>> {
        let key = match &self.config.requires_key {
            Some(key_name) => match ctx.api_key(key_name) {
                Some(key) => Some(key.to_string()),
                None => {
                    tracing::warn!(feed = %self.config.name, key = %key_name, "API key not configured, skipping feed");
                    return Ok(Vec::new());
                }
            },
            None => None,
        };

        let method = Method::from_bytes(self.config.method.as_bytes()).map_err(|_| {
            Error::producer(
                &self.config.name,
                format!("invalid HTTP method {:?}", self.config.method),
            )
        })?;

        let mut records = Vec::new();
        for artifact in &self.config.artifacts {
            if ctx.is_cancelled() {
                break;
            }

            let carries_key = key.is_some() && artifact.url.contains(KEY_PLACEHOLDER);
            let url = match &key {
                Some(key) => artifact.url.replace(KEY_PLACEHOLDER, key),
                None => artifact.url.clone(),
            };

            let mut request = FetchRequest::new(method.clone(), url.clone());
            if let Some(body) = &self.config.body {
                request = request.with_json(body.clone());
            }

            let Some(data) = ctx.fetch(&request).await else {
                tracing::debug!(feed = %self.config.name, file = %artifact.filename, "no data");
                continue;
            };
            if data.len() < self.config.min_bytes {
                tracing::debug!(
                    feed = %self.config.name,
                    file = %artifact.filename,
                    bytes = data.len(),
                    min_bytes = self.config.min_bytes,
                    "payload too small, discarding"
                );
                continue;
            }

            let filename = ctx.save(&artifact.filename, &data).await?;
            let mut record = self.record(filename);
            if !carries_key {
                record = record.url(url);
            }
            if let Some(subtype) = &artifact.subtype {
                record = record.subtype(subtype.clone());
            }
            records.push(record);
        }

        tracing::info!(
            feed = %self.config.name,
            records = records.len(),
            artifacts = self.config.artifacts.len(),
            "feed collected"
        );
        Ok(records)
    }
}
