//! Rate-limited HTTP fetcher
//!
//! [`RateLimitedFetcher`] is the only way producers reach the network. A
//! fetch never fails with an error: every outcome that is not a 200 with a
//! readable body ends up as `None`, after the status policy in [`status`]
//! and the retry policy in [`crate::retry`] have run their course.

pub mod status;
pub mod throttle;

use bytes::Bytes;
use reqwest::{Client, Method};
use std::sync::Arc;
use url::Url;

use crate::config::{Config, HostPolicyConfig, RetryConfig, TlsConfig};
use crate::dns::FallbackResolver;
use crate::error::{Error, FetchError, Result};
use crate::retry::{IsRetryable, with_backoff};

pub use status::{StatusClass, classify};
pub use throttle::{HostPermit, HostThrottle};

/// A single logical request: method, URL and optional JSON body
#[derive(Clone, Debug)]
pub struct FetchRequest {
    /// HTTP method
    pub method: Method,
    /// Absolute URL
    pub url: String,
    /// JSON body
    pub json: Option<serde_json::Value>,
}

impl FetchRequest {
    /// Request with an arbitrary method and no body
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            json: None,
        }
    }

    /// GET request
    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    /// POST request with a JSON body
    pub fn post_json(url: impl Into<String>, body: serde_json::Value) -> Self {
        Self::new(Method::POST, url).with_json(body)
    }

    /// Attach a JSON body
    pub fn with_json(mut self, body: serde_json::Value) -> Self {
        self.json = Some(body);
        self
    }
}

/// HTTP client wrapper applying timeouts, retries, throttling and TLS exceptions
#[derive(Debug)]
pub struct RateLimitedFetcher {
    /// Verifying client used for every host not in the TLS exception list
    client: Client,
    /// Client without certificate verification, built only when exceptions exist
    relaxed_client: Option<Client>,
    tls: TlsConfig,
    retry: RetryConfig,
    hosts: HostPolicyConfig,
    throttle: HostThrottle,
}

impl RateLimitedFetcher {
    /// Open the HTTP session
    ///
    /// When `resolver` is given, both clients resolve hosts through it.
    pub fn new(config: &Config, resolver: Option<Arc<FallbackResolver>>) -> Result<Self> {
        let build = |relaxed: bool| -> Result<Client> {
            let mut builder = Client::builder()
                .user_agent(config.general.user_agent.clone())
                .timeout(config.general.timeout);
            if let Some(resolver) = &resolver {
                builder = builder.dns_resolver(resolver.clone());
            }
            if relaxed {
                builder = builder.danger_accept_invalid_certs(true);
            }
            builder.build().map_err(Error::Session)
        };

        let relaxed_client = if config.tls.disable_verification.is_empty() {
            None
        } else {
            tracing::info!(
                hosts = ?config.tls.disable_verification,
                "TLS verification disabled for configured hosts"
            );
            Some(build(true)?)
        };

        Ok(Self {
            client: build(false)?,
            relaxed_client,
            tls: config.tls.clone(),
            retry: config.retry.clone(),
            hosts: config.hosts.clone(),
            throttle: HostThrottle::new(config.hosts.clone()),
        })
    }

    /// GET `url`
    pub async fn get(&self, url: &str) -> Option<Bytes> {
        self.fetch(&FetchRequest::get(url)).await
    }

    /// Perform `request`, returning the body of a 200 response
    ///
    /// Returns `None` for an unusable URL, a terminal status (404, 403,
    /// quota-exceeded 400, unexpected codes) or once transient failures
    /// have used up the configured attempts.
    pub async fn fetch(&self, request: &FetchRequest) -> Option<Bytes> {
        let (url, host) = match parse_target(&request.url) {
            Ok(target) => target,
            Err(e) => {
                tracing::debug!(error = %e, "skipping fetch");
                return None;
            }
        };

        let _permit = self.throttle.acquire(&host).await;
        let client = self.client_for(&host);
        let quota_limited = self.hosts.is_quota_limited(&host);

        let result = with_backoff(&self.retry, || {
            self.attempt(client, request, &url, &host, quota_limited)
        })
        .await;

        match result {
            Ok(body) => body,
            Err(e) if e.is_retryable() => {
                tracing::warn!(
                    url = %request.url,
                    attempts = self.retry.max_attempts.max(1),
                    error = %e,
                    "giving up after repeated failures"
                );
                None
            }
            Err(e) => {
                tracing::warn!(url = %request.url, error = %e, "request failed");
                None
            }
        }
    }

    async fn attempt(
        &self,
        client: &Client,
        request: &FetchRequest,
        url: &Url,
        host: &str,
        quota_limited: bool,
    ) -> std::result::Result<Option<Bytes>, FetchError> {
        let transport = |source: reqwest::Error| FetchError::Transport {
            url: request.url.clone(),
            source,
        };

        let mut builder = client.request(request.method.clone(), url.clone());
        if let Some(body) = &request.json {
            builder = builder.json(body);
        }
        let response = builder.send().await.map_err(transport)?;
        let status = response.status().as_u16();

        match classify(status, quota_limited) {
            StatusClass::Success => {
                let body = response.bytes().await.map_err(transport)?;
                self.throttle.record_success(host).await;
                Ok(Some(body))
            }
            StatusClass::NotFound => {
                tracing::debug!(url = %request.url, "HTTP 404 not found");
                Ok(None)
            }
            StatusClass::Forbidden => {
                tracing::warn!(url = %request.url, "HTTP 403 forbidden");
                Ok(None)
            }
            StatusClass::QuotaExceeded => {
                tracing::debug!(url = %request.url, host, "HTTP 400 from quota-limited host");
                Ok(None)
            }
            StatusClass::Transient => Err(FetchError::Status {
                status,
                url: request.url.clone(),
            }),
            StatusClass::Unexpected => {
                tracing::info!(url = %request.url, status, "unexpected HTTP status");
                Ok(None)
            }
        }
    }

    fn client_for(&self, host: &str) -> &Client {
        match &self.relaxed_client {
            Some(relaxed) if self.tls.is_exception(host) => relaxed,
            _ => &self.client,
        }
    }

    /// Time of the last 200 from `host`
    pub async fn last_success(&self, host: &str) -> Option<tokio::time::Instant> {
        self.throttle.last_success(host).await
    }
}

/// Parse `raw` and extract its lowercase host
fn parse_target(raw: &str) -> std::result::Result<(Url, String), FetchError> {
    let url = Url::parse(raw).map_err(|e| FetchError::InvalidUrl {
        url: raw.to_string(),
        reason: e.to_string(),
    })?;
    let host = url
        .host_str()
        .map(str::to_ascii_lowercase)
        .ok_or_else(|| FetchError::InvalidUrl {
            url: raw.to_string(),
            reason: "URL has no host".to_string(),
        })?;
    Ok((url, host))
}
