//! Configuration types for swell-collector
//!
//! A [`Config`] is loaded once per process, either from an INI file
//! (the `config.ini` layout, see [`Config::from_ini_str`]) or from JSON when the
//! path ends in `.json`. Every section is optional; missing keys fall back
//! to the `default_*` values below.

mod parser;

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// General collection settings (directories, HTTP identity, timeouts)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Directory that holds one sub-directory per run (default: "data")
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// User-Agent header sent with every request
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Per-attempt request timeout (default: 30 seconds)
    #[serde(default = "default_timeout", with = "duration_serde")]
    pub timeout: Duration,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            user_agent: default_user_agent(),
            timeout: default_timeout(),
        }
    }
}

/// Retry configuration for transient fetch failures
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total number of attempts per fetch, first one included (default: 3)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry (default: 1 second)
    #[serde(
        rename = "initial_delay_ms",
        default = "default_initial_delay",
        with = "duration_millis_serde"
    )]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 60 seconds)
    #[serde(
        rename = "max_delay_ms",
        default = "default_max_delay",
        with = "duration_millis_serde"
    )]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: false)
    #[serde(default)]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: false,
        }
    }
}

/// Per-host request policy
///
/// Host patterns match the exact host or any of its subdomains, so
/// `windy.com` covers `api.windy.com`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HostPolicyConfig {
    /// Minimum spacing between successful calls, per host pattern
    /// (default: `windy.com` = 10 seconds)
    #[serde(default = "default_throttle", with = "duration_map_serde")]
    pub throttle: HashMap<String, Duration>,

    /// Hosts whose HTTP 400 means "quota exceeded" rather than a transient
    /// failure (default: windy.com, stormglass.io)
    #[serde(default = "default_quota_limited")]
    pub quota_limited: Vec<String>,
}

impl Default for HostPolicyConfig {
    fn default() -> Self {
        Self {
            throttle: default_throttle(),
            quota_limited: default_quota_limited(),
        }
    }
}

impl HostPolicyConfig {
    /// Throttle interval that applies to `host`, if any
    ///
    /// When several patterns match, the longest interval wins.
    pub fn throttle_interval(&self, host: &str) -> Option<Duration> {
        self.throttle
            .iter()
            .filter(|(pattern, _)| host_matches(host, pattern))
            .map(|(_, interval)| *interval)
            .max()
    }

    /// Whether `host` answers over-quota requests with HTTP 400
    pub fn is_quota_limited(&self, host: &str) -> bool {
        self.quota_limited.iter().any(|p| host_matches(host, p))
    }
}

/// TLS settings
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TlsConfig {
    /// Hosts for which certificate verification is skipped
    #[serde(default)]
    pub disable_verification: Vec<String>,
}

impl TlsConfig {
    /// Whether certificate verification is relaxed for `host`
    pub fn is_exception(&self, host: &str) -> bool {
        self.disable_verification
            .iter()
            .any(|p| host_matches(host, p))
    }
}

/// Host resolution fallback settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DnsConfig {
    /// Consult the fallback chain when system resolution fails (default: true)
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Public resolvers queried in order after system resolution fails
    #[serde(default = "default_public_resolvers")]
    pub public_resolvers: Vec<IpAddr>,

    /// Last-resort hostname to address table
    #[serde(default = "default_static_hosts")]
    pub static_hosts: HashMap<String, IpAddr>,
}

impl Default for DnsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            public_resolvers: default_public_resolvers(),
            static_hosts: default_static_hosts(),
        }
    }
}

/// Which producers run
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SourcesConfig {
    /// Producer name to enabled flag; unlisted producers are disabled
    #[serde(default)]
    pub enabled: HashMap<String, bool>,
}

impl SourcesConfig {
    /// Whether the producer `name` is enabled
    pub fn is_enabled(&self, name: &str) -> bool {
        self.enabled.get(name).copied().unwrap_or(false)
    }

    /// Enable or disable a producer
    pub fn set(&mut self, name: impl Into<String>, enabled: bool) {
        self.enabled.insert(name.into(), enabled);
    }
}

/// One file fetched by a [`FeedConfig`]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedArtifact {
    /// Name to save the payload under
    pub filename: String,
    /// URL to fetch; `{key}` is replaced by the feed's API key
    pub url: String,
    /// Optional `subtype` tag for the record
    #[serde(default)]
    pub subtype: Option<String>,
}

/// A config-driven producer that downloads a fixed list of URLs
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FeedConfig {
    /// Producer name, used by `[SOURCES] enable_<name>` and `fallback`
    pub name: String,

    /// `source` tag of the produced records
    pub source: String,

    /// `type` tag of the produced records
    #[serde(rename = "type")]
    pub kind: String,

    /// Record priority, lower is more important (default: 1)
    #[serde(default = "default_priority")]
    pub priority: i32,

    /// Marks the records as relevant for south-facing shores
    #[serde(default)]
    pub south_facing: Option<bool>,

    /// Marks the records as relevant for north-facing shores
    #[serde(default)]
    pub north_facing: Option<bool>,

    /// Name of the API key (in [`Config::api_keys`]) the URLs need
    #[serde(default)]
    pub requires_key: Option<String>,

    /// HTTP method (default: GET)
    #[serde(default = "default_method")]
    pub method: String,

    /// JSON body sent with every request
    #[serde(default)]
    pub body: Option<serde_json::Value>,

    /// Payloads shorter than this are discarded (default: 0)
    #[serde(default)]
    pub min_bytes: usize,

    /// Feed to run when this one fails or produces nothing
    #[serde(default)]
    pub fallback: Option<String>,

    /// Files to download, in order
    #[serde(default)]
    pub artifacts: Vec<FeedArtifact>,
}

impl FeedConfig {
    /// Create a GET feed with no artifacts
    pub fn new(name: impl Into<String>, source: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: source.into(),
            kind: kind.into(),
            priority: default_priority(),
            south_facing: None,
            north_facing: None,
            requires_key: None,
            method: default_method(),
            body: None,
            min_bytes: 0,
            fallback: None,
            artifacts: Vec::new(),
        }
    }

    /// Append an artifact
    pub fn artifact(mut self, filename: impl Into<String>, url: impl Into<String>) -> Self {
        self.artifacts.push(FeedArtifact {
            filename: filename.into(),
            url: url.into(),
            subtype: None,
        });
        self
    }
}

/// Bundle retention
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// Bundles whose directory is older than this are deleted (default: 7 days)
    #[serde(default = "default_max_age", with = "duration_serde")]
    pub max_age: Duration,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            max_age: default_max_age(),
        }
    }
}

/// Teardown settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ShutdownConfig {
    /// How long live tasks get to unwind before they are aborted (default: 250 ms)
    #[serde(
        rename = "grace_period_ms",
        default = "default_grace_period",
        with = "duration_millis_serde"
    )]
    pub grace_period: Duration,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            grace_period: default_grace_period(),
        }
    }
}

/// Main configuration for the collector
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Directories, User-Agent, timeout
    #[serde(default)]
    pub general: GeneralConfig,

    /// Retry policy for transient failures
    #[serde(default)]
    pub retry: RetryConfig,

    /// Throttling and quota behaviour per host
    #[serde(default)]
    pub hosts: HostPolicyConfig,

    /// TLS verification exceptions
    #[serde(default)]
    pub tls: TlsConfig,

    /// Host resolution fallback
    #[serde(default)]
    pub dns: DnsConfig,

    /// Enabled producers
    #[serde(default)]
    pub sources: SourcesConfig,

    /// API keys by name (e.g. `WINDY_KEY`)
    #[serde(default)]
    pub api_keys: HashMap<String, String>,

    /// Config-driven URL feeds
    #[serde(default)]
    pub feeds: Vec<FeedConfig>,

    /// Bundle retention
    #[serde(default)]
    pub retention: RetentionConfig,

    /// Teardown
    #[serde(default)]
    pub shutdown: ShutdownConfig,
}

impl Config {
    /// Load configuration from `path`
    ///
    /// Files ending in `.json` are read as JSON, everything else as INI.
    /// The result is validated before it is returned.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;

        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

        let mut config = if is_json {
            serde_json::from_str::<Config>(&content).map_err(|e| Error::Config {
                message: format!("invalid JSON in {}: {e}", path.display()),
                key: None,
            })?
        } else {
            Self::from_ini_str(&content)?
        };

        if let Some(data_dir) = config.general.data_dir.to_str() {
            config.general.data_dir = expand_tilde(data_dir);
        }
        config.validate()?;
        Ok(config)
    }

    /// Parse the INI layout from a string
    pub fn from_ini_str(content: &str) -> Result<Self> {
        // Values carry URLs and JSON bodies verbatim
        let options = ::ini::ParseOption {
            enabled_quote: false,
            enabled_escape: false,
            ..::ini::ParseOption::default()
        };
        let parsed = ::ini::Ini::load_from_str_opt(content, options).map_err(|e| Error::Config {
            message: format!("invalid INI: {e}"),
            key: None,
        })?;
        parser::parse_ini(&parsed)
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> Result<()> {
        if self.general.timeout.is_zero() {
            return Err(Error::config("timeout must be greater than zero", "GENERAL.timeout"));
        }
        if !self.retry.backoff_multiplier.is_finite() || self.retry.backoff_multiplier < 1.0 {
            return Err(Error::config(
                "backoff multiplier must be at least 1.0",
                "retry.backoff_multiplier",
            ));
        }

        let mut names = std::collections::HashSet::new();
        for feed in &self.feeds {
            if !names.insert(feed.name.as_str()) {
                return Err(Error::config(
                    format!("feed {} is defined twice", feed.name),
                    format!("FEED {}", feed.name),
                ));
            }
            if reqwest::Method::from_bytes(feed.method.as_bytes()).is_err() {
                return Err(Error::config(
                    format!("unknown HTTP method {:?}", feed.method),
                    format!("FEED {}.method", feed.name),
                ));
            }
        }
        for feed in &self.feeds {
            if let Some(fallback) = &feed.fallback {
                if fallback == &feed.name || !names.contains(fallback.as_str()) {
                    return Err(Error::config(
                        format!("fallback {fallback} is not a defined feed"),
                        format!("FEED {}.fallback", feed.name),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Non-empty API key by name, ignoring the case of the name
    pub fn api_key(&self, name: &str) -> Option<&str> {
        self.api_keys
            .get(name)
            .or_else(|| {
                self.api_keys
                    .iter()
                    .find(|(key, _)| key.eq_ignore_ascii_case(name))
                    .map(|(_, value)| value)
            })
            .map(|k| k.trim())
            .filter(|k| !k.is_empty())
    }

    /// Directory holding the bundles
    pub fn data_dir(&self) -> &Path {
        &self.general.data_dir
    }
}

/// Whether `host` is `pattern` or one of its subdomains
pub fn host_matches(host: &str, pattern: &str) -> bool {
    let host = host.trim_end_matches('.');
    let pattern = pattern.trim().trim_end_matches('.');
    if pattern.is_empty() {
        return false;
    }
    let (host, pattern) = (host.as_bytes(), pattern.as_bytes());
    if host.eq_ignore_ascii_case(pattern) {
        return true;
    }
    host.len() > pattern.len()
        && host[host.len() - pattern.len()..].eq_ignore_ascii_case(pattern)
        && host[host.len() - pattern.len() - 1] == b'.'
}

/// Expand a leading `~/` to the home directory
pub(crate) fn expand_tilde(path: &str) -> PathBuf {
    if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_user_agent() -> String {
    format!("swell-collector/{}", env!("CARGO_PKG_VERSION"))
}

fn default_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_true() -> bool {
    true
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(60)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_throttle() -> HashMap<String, Duration> {
    HashMap::from([("windy.com".to_string(), Duration::from_secs(10))])
}

fn default_quota_limited() -> Vec<String> {
    vec!["windy.com".to_string(), "stormglass.io".to_string()]
}

fn default_public_resolvers() -> Vec<IpAddr> {
    [
        Ipv4Addr::new(8, 8, 8, 8),
        Ipv4Addr::new(1, 1, 1, 1),
        Ipv4Addr::new(9, 9, 9, 9),
        Ipv4Addr::new(208, 67, 222, 222),
    ]
    .into_iter()
    .map(IpAddr::V4)
    .collect()
}

fn default_static_hosts() -> HashMap<String, IpAddr> {
    let ncep = IpAddr::V4(Ipv4Addr::new(140, 90, 96, 19));
    HashMap::from([
        ("www.opc.ncep.noaa.gov".to_string(), ncep),
        ("ocean.weather.gov".to_string(), ncep),
        ("tgftp.nws.noaa.gov".to_string(), ncep),
        (
            "www.cdip.ucsd.edu".to_string(),
            IpAddr::V4(Ipv4Addr::new(132, 239, 120, 129)),
        ),
        (
            "www.fnmoc.navy.mil".to_string(),
            IpAddr::V4(Ipv4Addr::new(205, 128, 64, 16)),
        ),
    ])
}

fn default_priority() -> i32 {
    1
}

fn default_method() -> String {
    "GET".to_string()
}

fn default_max_age() -> Duration {
    Duration::from_secs(7 * 24 * 60 * 60)
}

fn default_grace_period() -> Duration {
    Duration::from_millis(250)
}

// Duration serialization helper
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

// Millisecond Duration serialization helper
mod duration_millis_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

// Host -> interval map, intervals as fractional seconds
mod duration_map_serde {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};
    use std::collections::HashMap;
    use std::time::Duration;

    pub fn serialize<S>(map: &HashMap<String, Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_map(map.iter().map(|(k, v)| (k, v.as_secs_f64())))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<HashMap<String, Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = HashMap::<String, f64>::deserialize(deserializer)?;
        raw.into_iter()
            .map(|(host, secs)| {
                Duration::try_from_secs_f64(secs)
                    .map(|d| (host, d))
                    .map_err(D::Error::custom)
            })
            .collect()
    }
}
