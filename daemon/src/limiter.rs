use dashmap::DashMap;
use std::time::Duration;

/// Poll quantum while waiting for a host slot.
const ACQUIRE_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Sentinel host shared by every job whose URL cannot be parsed.
pub const UNKNOWN_HOST: &str = "unknown";

/// Bounds how many concurrent runs may target the same hostname,
/// independent of the global worker pool size.
///
/// Transient state: rebuilt empty on process start, owns scheduling
/// capacity only. Waiters poll; no FIFO ordering across them.
pub struct DomainLimiter {
    slots: DashMap<String, u32>,
    limit: u32,
}

impl DomainLimiter {
    pub fn new(limit: u32) -> Self {
        Self {
            slots: DashMap::new(),
            limit: limit.max(1),
        }
    }

    /// Hostname of a job URL, or the shared `"unknown"` sentinel when the
    /// URL is unparsable or host-less (e.g. `file://`).
    pub fn host_of(url: &str) -> String {
        reqwest::Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_else(|| UNKNOWN_HOST.to_string())
    }

    /// Waits until the host counter is below the limit, then increments it.
    /// Suspends the calling task only; other workers keep running.
    pub async fn acquire(&self, host: &str) {
        loop {
            {
                let mut slot = self.slots.entry(host.to_string()).or_insert(0);
                if *slot < self.limit {
                    *slot += 1;
                    return;
                }
            }
            tokio::time::sleep(ACQUIRE_POLL_INTERVAL).await;
        }
    }

    /// Decrements the host counter, floored at zero.
    pub fn release(&self, host: &str) {
        if let Some(mut slot) = self.slots.get_mut(host) {
            *slot = slot.saturating_sub(1);
        }
    }

    pub fn in_use(&self, host: &str) -> u32 {
        self.slots.get(host).map(|s| *s).unwrap_or(0)
    }
}
