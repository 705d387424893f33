//! Test configuration helpers

use std::path::Path;
use std::time::Duration;
use swell_collector::Config;

/// Configuration writing into `data_dir`, tuned for fast local tests
///
/// DNS fallback is off, throttling is off and retries back off in
/// milliseconds.
pub fn test_config(data_dir: &Path) -> Config {
    let mut config = Config::default();
    config.general.data_dir = data_dir.to_path_buf();
    config.general.timeout = Duration::from_secs(5);
    config.retry.max_attempts = 2;
    config.retry.initial_delay = Duration::from_millis(5);
    config.retry.max_delay = Duration::from_millis(20);
    config.hosts.throttle.clear();
    config.dns.enabled = false;
    config.shutdown.grace_period = Duration::from_millis(100);
    config
}

/// `test_config` with each of `names` enabled in `[SOURCES]`
pub fn config_enabling(data_dir: &Path, names: &[&str]) -> Config {
    let mut config = test_config(data_dir);
    for name in names {
        config.sources.set(*name, true);
    }
    config
}

/// INI configuration for `data_dir` with DNS fallback disabled
///
/// `extra` is appended verbatim.
pub fn ini_config(data_dir: &Path, extra: &str) -> String {
    format!(
        "[GENERAL]\n\
         data_dir = {}\n\
         timeout = 5\n\
         max_retries = 2\n\
         retry_initial_delay_ms = 5\n\
         retry_max_delay_ms = 20\n\
         shutdown_grace_ms = 100\n\
         \n\
         [DNS]\n\
         enabled = false\n\
         \n\
         {extra}",
        data_dir.display()
    )
}
