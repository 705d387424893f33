//! Per-host throttling
//!
//! Throttled hosts get a minimum spacing between *successful* calls. Calls
//! to the same throttled host queue on a per-host gate, so the spacing holds
//! even when several tasks hit the host at once. Unthrottled hosts never
//! touch the gate.

use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::Instant;

use crate::config::HostPolicyConfig;

/// Held for the duration of one fetch to a throttled host
#[derive(Debug)]
pub struct HostPermit {
    _gate: Option<OwnedMutexGuard<()>>,
}

/// Per-host throttle with last-success bookkeeping
#[derive(Debug)]
pub struct HostThrottle {
    policy: HostPolicyConfig,
    /// One gate per throttled host
    gates: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    /// Time of the last 200 per host
    last_success: Mutex<HashMap<String, Instant>>,
}

impl HostThrottle {
    /// Create a throttle from the host policy
    pub fn new(policy: HostPolicyConfig) -> Self {
        Self {
            policy,
            gates: Mutex::new(HashMap::new()),
            last_success: Mutex::new(HashMap::new()),
        }
    }

    /// Wait until a call to `host` may proceed
    ///
    /// For throttled hosts the returned permit must be held until the call
    /// has finished and [`record_success`](Self::record_success) has been
    /// called, otherwise a queued caller could start early.
    pub async fn acquire(&self, host: &str) -> HostPermit {
        let Some(interval) = self.policy.throttle_interval(host) else {
            return HostPermit { _gate: None };
        };

        let gate = {
            let mut gates = self.gates.lock().await;
            gates
                .entry(host.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        let guard = gate.lock_owned().await;

        if let Some(wait) = self.remaining_wait(host, interval).await {
            tracing::debug!(
                host,
                wait_ms = wait.as_millis() as u64,
                "throttling request"
            );
            tokio::time::sleep(wait).await;
        }

        HostPermit { _gate: Some(guard) }
    }

    async fn remaining_wait(&self, host: &str, interval: Duration) -> Option<Duration> {
        let last = self.last_success.lock().await.get(host).copied()?;
        let elapsed = last.elapsed();
        (elapsed < interval).then(|| interval - elapsed)
    }

    /// Record a 200 from `host`
    pub async fn record_success(&self, host: &str) {
        self.last_success
            .lock()
            .await
            .insert(host.to_string(), Instant::now());
    }

    /// Time of the last successful call to `host`
    pub async fn last_success(&self, host: &str) -> Option<Instant> {
        self.last_success.lock().await.get(host).copied()
    }
}
