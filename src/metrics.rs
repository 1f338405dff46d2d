use std::sync::atomic::{AtomicU64, Ordering};

/// Process-wide counters exposed through `GET /metrics` as a flat text
/// exposition.
#[derive(Debug, Default)]
pub struct Metrics {
    pub requests_total: AtomicU64,
    pub requests_failed: AtomicU64,
    pub workflows_started: AtomicU64,
    pub workflows_completed: AtomicU64,
    pub workflows_cancelled: AtomicU64,
    pub workflows_failed: AtomicU64,
    pub instructions_submitted: AtomicU64,
    pub instructions_expired: AtomicU64,
    pub evolutions_committed: AtomicU64,
}

impl Metrics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(counter: &AtomicU64, count: u64) {
        counter.fetch_add(count, Ordering::Relaxed);
    }

    #[must_use]
    pub fn render(&self, active_workflows: u64, worker_slots_free: u64) -> String {
        let mut out = String::new();
        for (name, value) in [
            ("crewd_requests_total", &self.requests_total),
            ("crewd_requests_failed", &self.requests_failed),
            ("crewd_workflows_started", &self.workflows_started),
            ("crewd_workflows_completed", &self.workflows_completed),
            ("crewd_workflows_cancelled", &self.workflows_cancelled),
            ("crewd_workflows_failed", &self.workflows_failed),
            ("crewd_instructions_submitted", &self.instructions_submitted),
            ("crewd_instructions_expired", &self.instructions_expired),
            ("crewd_evolutions_committed", &self.evolutions_committed),
        ] {
            out.push_str(&format!("{name} {}\n", value.load(Ordering::Relaxed)));
        }
        out.push_str(&format!("crewd_active_workflows {active_workflows}\n"));
        out.push_str(&format!("crewd_worker_slots_free {worker_slots_free}\n"));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::Metrics;

    #[test]
    fn render_lists_every_counter_once() {
        let metrics = Metrics::new();
        Metrics::incr(&metrics.requests_total);
        let text = metrics.render(2, 3);
        assert!(text.contains("crewd_requests_total 1\n"));
        assert!(text.contains("crewd_active_workflows 2\n"));
        assert!(text.contains("crewd_worker_slots_free 3\n"));
    }
}
