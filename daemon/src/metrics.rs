use std::sync::atomic::{AtomicU64, Ordering};

/// Process-wide run counters, cumulative since daemon start.
///
/// Held explicitly (never as an ambient global) so the dispatcher can be
/// unit-tested with an isolated instance.
pub struct WorkerMetrics {
    runs_succeeded: AtomicU64,
    runs_failed: AtomicU64,
    queue_depth: AtomicU64,
}

impl WorkerMetrics {
    pub fn new() -> Self {
        Self {
            runs_succeeded: AtomicU64::new(0),
            runs_failed: AtomicU64::new(0),
            queue_depth: AtomicU64::new(0),
        }
    }

    pub fn record_success(&self) {
        self.runs_succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.runs_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_queue_depth(&self) {
        self.queue_depth.fetch_add(1, Ordering::Relaxed);
    }

    pub fn decr_queue_depth(&self) {
        // Saturating: a racing read must never observe an underflowed gauge.
        let _ = self
            .queue_depth
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |d| d.checked_sub(1));
    }

    pub fn success_count(&self) -> u64 {
        self.runs_succeeded.load(Ordering::Relaxed)
    }

    pub fn failure_count(&self) -> u64 {
        self.runs_failed.load(Ordering::Relaxed)
    }

    pub fn queue_depth(&self) -> u64 {
        self.queue_depth.load(Ordering::Relaxed)
    }

    /// Generate Prometheus-compatible metrics output
    pub fn export(&self) -> String {
        let mut output = String::new();

        output.push_str("# HELP formbot_runs_succeeded_total Total number of successful runs\n");
        output.push_str("# TYPE formbot_runs_succeeded_total counter\n");
        output.push_str(&format!(
            "formbot_runs_succeeded_total {}\n\n",
            self.success_count()
        ));

        output.push_str("# HELP formbot_runs_failed_total Total number of failed runs\n");
        output.push_str("# TYPE formbot_runs_failed_total counter\n");
        output.push_str(&format!(
            "formbot_runs_failed_total {}\n\n",
            self.failure_count()
        ));

        output.push_str("# HELP formbot_queue_depth Current job queue depth\n");
        output.push_str("# TYPE formbot_queue_depth gauge\n");
        output.push_str(&format!("formbot_queue_depth {}\n", self.queue_depth()));

        output
    }
}

impl Default for WorkerMetrics {
    fn default() -> Self {
        Self::new()
    }
}
