//! Host resolution fallback
//!
//! Some marine data hosts are intermittently missing from local resolvers.
//! [`HostResolutionFallback`] tries, in order: its own cache, the system
//! resolver, a list of public resolvers queried through an external lookup
//! tool (`dig`, else `nslookup`), and finally a static hostname table.
//!
//! [`FallbackResolver`] plugs the chain into reqwest so ordinary requests
//! benefit from it without producers knowing.

use async_trait::async_trait;
use hyper::client::connect::dns::Name;
use reqwest::dns::{Addrs, Resolve, Resolving};
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::Mutex;

use crate::config::DnsConfig;

/// Upper bound on a single external lookup
const LOOKUP_TIMEOUT: Duration = Duration::from_secs(5);

/// Query one specific DNS server for a host's address
///
/// Implementations must not fail loudly: any problem is an absent answer.
#[async_trait]
pub trait ExternalLookup: Send + Sync {
    /// Ask `resolver` for the address of `host`
    async fn query(&self, resolver: IpAddr, host: &str) -> Option<IpAddr>;

    /// Short name for logging
    fn name(&self) -> &'static str;
}

#[derive(Debug, Clone)]
enum LookupTool {
    Dig(PathBuf),
    Nslookup(PathBuf),
}

/// [`ExternalLookup`] backed by the `dig` or `nslookup` binaries
#[derive(Debug, Clone)]
pub struct CommandLookup {
    tool: LookupTool,
}

impl CommandLookup {
    /// Find `dig` (preferred) or `nslookup` in PATH
    ///
    /// Returns `None` when neither is installed.
    pub fn from_path() -> Option<Self> {
        if let Ok(path) = which::which("dig") {
            return Some(Self {
                tool: LookupTool::Dig(path),
            });
        }
        which::which("nslookup").ok().map(|path| Self {
            tool: LookupTool::Nslookup(path),
        })
    }
}

#[async_trait]
impl ExternalLookup for CommandLookup {
    async fn query(&self, resolver: IpAddr, host: &str) -> Option<IpAddr> {
        let mut command = match &self.tool {
            LookupTool::Dig(path) => {
                let mut c = Command::new(path);
                c.arg(format!("@{resolver}")).arg(host).arg("+short");
                c
            }
            LookupTool::Nslookup(path) => {
                let mut c = Command::new(path);
                c.arg(host).arg(resolver.to_string());
                c
            }
        };
        command.kill_on_drop(true);

        let output = match tokio::time::timeout(LOOKUP_TIMEOUT, command.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                tracing::debug!(tool = self.name(), error = %e, "failed to run lookup tool");
                return None;
            }
            Err(_) => {
                tracing::debug!(tool = self.name(), %resolver, host, "lookup timed out");
                return None;
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        match self.tool {
            LookupTool::Dig(_) => parse_dig_output(&stdout),
            LookupTool::Nslookup(_) => parse_nslookup_output(&stdout, resolver),
        }
    }

    fn name(&self) -> &'static str {
        match self.tool {
            LookupTool::Dig(_) => "dig",
            LookupTool::Nslookup(_) => "nslookup",
        }
    }
}

/// First address in `dig +short` output (CNAME lines are skipped)
pub fn parse_dig_output(stdout: &str) -> Option<IpAddr> {
    stdout.lines().find_map(|line| line.trim().parse().ok())
}

/// First answer address in `nslookup` output
///
/// The header lines naming the queried server (`Address: 8.8.8.8#53`) are
/// skipped.
pub fn parse_nslookup_output(stdout: &str, resolver: IpAddr) -> Option<IpAddr> {
    stdout
        .lines()
        .filter_map(|line| {
            let (key, value) = line.trim().split_once(':')?;
            key.trim().starts_with("Address").then(|| value.trim())
        })
        .filter(|value| !value.contains('#'))
        .filter_map(|value| value.parse::<IpAddr>().ok())
        .find(|ip| *ip != resolver)
}

/// Resolution chain with a per-instance cache
pub struct HostResolutionFallback {
    cache: Mutex<HashMap<String, IpAddr>>,
    public_resolvers: Vec<IpAddr>,
    static_hosts: HashMap<String, IpAddr>,
    external: Option<Arc<dyn ExternalLookup>>,
}

impl std::fmt::Debug for HostResolutionFallback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostResolutionFallback")
            .field("public_resolvers", &self.public_resolvers)
            .field("static_hosts", &self.static_hosts.len())
            .field("external", &self.external.as_ref().map(|e| e.name()))
            .finish()
    }
}

impl HostResolutionFallback {
    /// Build the chain, looking for `dig`/`nslookup` in PATH
    pub fn new(config: &DnsConfig) -> Self {
        let external = CommandLookup::from_path().map(|lookup| Arc::new(lookup) as Arc<dyn ExternalLookup>);
        if external.is_none() {
            tracing::debug!("neither dig nor nslookup found, public resolvers will be skipped");
        }
        Self::with_external(config, external)
    }

    /// Build the chain with a specific external lookup (or none)
    pub fn with_external(config: &DnsConfig, external: Option<Arc<dyn ExternalLookup>>) -> Self {
        Self {
            cache: Mutex::new(HashMap::new()),
            public_resolvers: config.public_resolvers.clone(),
            static_hosts: config
                .static_hosts
                .iter()
                .map(|(host, ip)| (host.to_lowercase(), *ip))
                .collect(),
            external,
        }
    }

    /// Resolve `host` through the full chain
    pub async fn resolve(&self, host: &str) -> Option<IpAddr> {
        let host = host.to_lowercase();
        if let Some(ip) = self.cached(&host).await {
            return Some(ip);
        }
        if let Some(ip) = system_lookup(&host).await {
            self.remember(&host, ip).await;
            return Some(ip);
        }
        self.resolve_uncached(&host).await
    }

    /// Resolve `host` after the system resolver has already failed
    ///
    /// Skips the system lookup; consults cache, public resolvers, static table.
    pub async fn resolve_after_failure(&self, host: &str) -> Option<IpAddr> {
        let host = host.to_lowercase();
        if let Some(ip) = self.cached(&host).await {
            return Some(ip);
        }
        self.resolve_uncached(&host).await
    }

    async fn resolve_uncached(&self, host: &str) -> Option<IpAddr> {
        if let Some(external) = &self.external {
            for resolver in &self.public_resolvers {
                if let Some(ip) = external.query(*resolver, host).await {
                    tracing::info!(host, %ip, %resolver, "resolved through public resolver");
                    self.remember(host, ip).await;
                    return Some(ip);
                }
            }
        }

        if let Some(ip) = self.static_hosts.get(host).copied() {
            tracing::info!(host, %ip, "resolved from static host table");
            self.remember(host, ip).await;
            return Some(ip);
        }

        tracing::warn!(host, "all resolution methods failed");
        None
    }

    async fn cached(&self, host: &str) -> Option<IpAddr> {
        self.cache.lock().await.get(host).copied()
    }

    async fn remember(&self, host: &str, ip: IpAddr) {
        self.cache.lock().await.insert(host.to_string(), ip);
    }
}

/// Standard resolution, preferring IPv4
async fn system_lookup(host: &str) -> Option<IpAddr> {
    match tokio::net::lookup_host((host, 0)).await {
        Ok(addrs) => {
            let addrs: Vec<SocketAddr> = addrs.collect();
            addrs
                .iter()
                .find(|a| a.is_ipv4())
                .or_else(|| addrs.first())
                .map(SocketAddr::ip)
        }
        Err(e) => {
            tracing::debug!(host, error = %e, "system resolution failed");
            None
        }
    }
}

/// reqwest resolver: system resolution first, the fallback chain on failure
#[derive(Debug, Clone)]
pub struct FallbackResolver {
    fallback: Arc<HostResolutionFallback>,
}

impl FallbackResolver {
    /// Wrap a fallback chain
    pub fn new(fallback: Arc<HostResolutionFallback>) -> Self {
        Self { fallback }
    }
}

impl Resolve for FallbackResolver {
    fn resolve(&self, name: Name) -> Resolving {
        let fallback = self.fallback.clone();
        Box::pin(async move {
            let host = name.as_str().to_string();
            if let Ok(addrs) = tokio::net::lookup_host((host.as_str(), 0)).await {
                let addrs: Vec<SocketAddr> = addrs.collect();
                if !addrs.is_empty() {
                    return Ok(Box::new(addrs.into_iter()) as Addrs);
                }
            }

            match fallback.resolve_after_failure(&host).await {
                Some(ip) => Ok(Box::new(std::iter::once(SocketAddr::new(ip, 0))) as Addrs),
                None => Err(Box::new(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("could not resolve {host}"),
                )) as Box<dyn std::error::Error + Send + Sync>),
            }
        })
    }
}
