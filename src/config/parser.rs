//! INI parsing logic for converting `Ini` into a [`Config`].
//!
//! This is the single place where `config.ini` key names are mapped to
//! struct fields.

use ::ini::{Ini, Properties};
use std::net::IpAddr;
use std::time::Duration;

use super::{Config, FeedArtifact, FeedConfig};
use crate::error::{Error, Result};

const FEED_SECTION_PREFIX: &str = "FEED ";

/// Parse an `Ini` object into a `Config`.
///
/// Starts from `Config::default()` and overlays any values found in the INI.
pub(super) fn parse_ini(ini: &Ini) -> Result<Config> {
    let mut config = Config::default();

    // [GENERAL] section
    if let Some(section) = ini.section(Some("GENERAL")) {
        if let Some(v) = non_empty(section, "data_dir") {
            config.general.data_dir = v.into();
        }
        if let Some(v) = non_empty(section, "user_agent") {
            config.general.user_agent = v.to_string();
        }
        if let Some(v) = section.get("timeout") {
            config.general.timeout =
                Duration::from_secs(parse_number(v, "GENERAL", "timeout", "seconds")?);
        }
        if let Some(v) = section.get("max_retries") {
            config.retry.max_attempts = parse_number(v, "GENERAL", "max_retries", "attempts")?;
        }
        if let Some(v) = section.get("retry_initial_delay_ms") {
            config.retry.initial_delay = Duration::from_millis(parse_number(
                v,
                "GENERAL",
                "retry_initial_delay_ms",
                "milliseconds",
            )?);
        }
        if let Some(v) = section.get("retry_max_delay_ms") {
            config.retry.max_delay = Duration::from_millis(parse_number(
                v,
                "GENERAL",
                "retry_max_delay_ms",
                "milliseconds",
            )?);
        }
        if let Some(v) = section.get("retry_jitter") {
            config.retry.jitter = parse_bool(v, "GENERAL", "retry_jitter")?;
        }
        if let Some(v) = section.get("windy_throttle_seconds") {
            let secs = parse_seconds(v, "GENERAL", "windy_throttle_seconds")?;
            config.hosts.throttle.insert("windy.com".to_string(), secs);
        }
        if let Some(v) = section.get("retention_days") {
            let days: u64 = parse_number(v, "GENERAL", "retention_days", "days")?;
            config.retention.max_age = Duration::from_secs(days.saturating_mul(86_400));
        }
        if let Some(v) = section.get("shutdown_grace_ms") {
            config.shutdown.grace_period = Duration::from_millis(parse_number(
                v,
                "GENERAL",
                "shutdown_grace_ms",
                "milliseconds",
            )?);
        }
    }

    // [THROTTLE] host = seconds
    if let Some(section) = ini.section(Some("THROTTLE")) {
        for (host, v) in section.iter() {
            let secs = parse_seconds(v, "THROTTLE", host)?;
            config.hosts.throttle.insert(host.trim().to_lowercase(), secs);
        }
    }

    // [HOSTS] section
    if let Some(section) = ini.section(Some("HOSTS")) {
        if let Some(v) = section.get("quota_limited") {
            config.hosts.quota_limited = parse_list(v);
        }
    }

    // [SSL_EXCEPTIONS] section
    if let Some(section) = ini.section(Some("SSL_EXCEPTIONS")) {
        if let Some(v) = section.get("disable_verification") {
            config.tls.disable_verification = parse_list(v);
        }
    }

    // [DNS] section
    if let Some(section) = ini.section(Some("DNS")) {
        if let Some(v) = section.get("enabled") {
            config.dns.enabled = parse_bool(v, "DNS", "enabled")?;
        }
        if let Some(v) = section.get("resolvers") {
            config.dns.public_resolvers = parse_list(v)
                .iter()
                .map(|ip| parse_ip(ip, "DNS", "resolvers"))
                .collect::<Result<_>>()?;
        }
    }

    // [DNS_HOSTS] host = ip
    if let Some(section) = ini.section(Some("DNS_HOSTS")) {
        for (host, v) in section.iter() {
            let ip = parse_ip(v, "DNS_HOSTS", host)?;
            config.dns.static_hosts.insert(host.trim().to_lowercase(), ip);
        }
    }

    // [SOURCES] enable_<name> = bool
    if let Some(section) = ini.section(Some("SOURCES")) {
        for (key, v) in section.iter() {
            let key = key.trim().to_lowercase();
            if let Some(name) = key.strip_prefix("enable_") {
                let enabled = parse_bool(v, "SOURCES", &key)?;
                config.sources.set(name, enabled);
            } else {
                tracing::warn!(key = %key, "ignoring unknown key in [SOURCES]");
            }
        }
    }

    // [API] KEY_NAME = value, names are case-insensitive
    if let Some(section) = ini.section(Some("API")) {
        for (name, v) in section.iter() {
            config
                .api_keys
                .insert(name.trim().to_uppercase(), v.trim().to_string());
        }
    }

    // [FEED <name>] sections
    for (name, section) in ini.iter() {
        let Some(feed_name) = name.and_then(|n| n.strip_prefix(FEED_SECTION_PREFIX)) else {
            continue;
        };
        config.feeds.push(parse_feed(feed_name.trim(), section)?);
    }

    Ok(config)
}

fn parse_feed(name: &str, section: &Properties) -> Result<FeedConfig> {
    let section_name = format!("{FEED_SECTION_PREFIX}{name}");
    let required = |key: &str| {
        non_empty(section, key)
            .map(str::to_string)
            .ok_or_else(|| Error::config("missing required key", format!("{section_name}.{key}")))
    };

    let mut feed = FeedConfig::new(name, required("source")?, required("type")?);

    if let Some(v) = section.get("priority") {
        feed.priority = v.trim().parse().map_err(|_| {
            Error::config(
                format!("invalid value {v:?}: must be an integer"),
                format!("{section_name}.priority"),
            )
        })?;
    }
    if let Some(v) = section.get("south_facing") {
        feed.south_facing = Some(parse_bool(v, &section_name, "south_facing")?);
    }
    if let Some(v) = section.get("north_facing") {
        feed.north_facing = Some(parse_bool(v, &section_name, "north_facing")?);
    }
    feed.requires_key = non_empty(section, "requires_key").map(str::to_string);
    if let Some(v) = non_empty(section, "method") {
        feed.method = v.to_uppercase();
    }
    if let Some(v) = non_empty(section, "body") {
        feed.body = Some(serde_json::from_str(v).map_err(|e| {
            Error::config(format!("body is not valid JSON: {e}"), format!("{section_name}.body"))
        })?);
    }
    if let Some(v) = section.get("min_bytes") {
        feed.min_bytes = parse_number(v, &section_name, "min_bytes", "bytes")?;
    }
    feed.fallback = non_empty(section, "fallback").map(str::to_string);

    for line in section.get_all("artifact") {
        feed.artifacts.push(parse_artifact(line, &section_name)?);
    }

    Ok(feed)
}

/// `artifact = <filename> <url> [subtype]`
fn parse_artifact(line: &str, section_name: &str) -> Result<FeedArtifact> {
    let mut parts = line.split_whitespace();
    match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(filename), Some(url), subtype, None) => Ok(FeedArtifact {
            filename: filename.to_string(),
            url: url.to_string(),
            subtype: subtype.map(str::to_string),
        }),
        _ => Err(Error::config(
            format!("invalid artifact {line:?}: expected '<filename> <url> [subtype]'"),
            format!("{section_name}.artifact"),
        )),
    }
}

fn non_empty<'a>(section: &'a Properties, key: &str) -> Option<&'a str> {
    section.get(key).map(str::trim).filter(|v| !v.is_empty())
}

fn parse_number<T: std::str::FromStr>(value: &str, section: &str, key: &str, unit: &str) -> Result<T> {
    value.trim().parse().map_err(|_| {
        Error::config(
            format!("invalid value {value:?}: must be a non-negative integer ({unit})"),
            format!("{section}.{key}"),
        )
    })
}

fn parse_seconds(value: &str, section: &str, key: &str) -> Result<Duration> {
    value
        .trim()
        .parse::<f64>()
        .ok()
        .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
        .ok_or_else(|| {
            Error::config(
                format!("invalid value {value:?}: must be a non-negative number of seconds"),
                format!("{section}.{key}"),
            )
        })
}

/// Parse a boolean the way `configparser` does.
pub(super) fn parse_bool(value: &str, section: &str, key: &str) -> Result<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "yes" | "true" | "on" => Ok(true),
        "0" | "no" | "false" | "off" => Ok(false),
        _ => Err(Error::config(
            format!("invalid value {value:?}: must be a boolean"),
            format!("{section}.{key}"),
        )),
    }
}

fn parse_ip(value: &str, section: &str, key: &str) -> Result<IpAddr> {
    value.trim().parse().map_err(|_| {
        Error::config(
            format!("invalid value {value:?}: must be an IP address"),
            format!("{section}.{key}"),
        )
    })
}

/// Comma separated list, blanks dropped
fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
