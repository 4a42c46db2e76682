use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct MetricsRegistry {
    submissions_total: AtomicU64,
    batches_dispatched_total: AtomicU64,
    dispatch_failures_total: AtomicU64,
    callbacks_total: AtomicU64,
    callbacks_rejected_total: AtomicU64,
    callbacks_orphaned_total: AtomicU64,
    callbacks_duplicate_total: AtomicU64,
    verdicts_passed_total: AtomicU64,
    verdicts_failed_total: AtomicU64,
    watchdog_expired_total: AtomicU64,
    notifications_published_total: AtomicU64,
    live_connections: AtomicU64,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn submitted(&self) {
        self.submissions_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dispatched(&self) {
        self.batches_dispatched_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dispatch_failed(&self) {
        self.dispatch_failures_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn callback_received(&self) {
        self.callbacks_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn callback_rejected(&self) {
        self.callbacks_rejected_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn callback_orphaned(&self) {
        self.callbacks_orphaned_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn callback_duplicate(&self) {
        self.callbacks_duplicate_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn verdict_passed(&self) {
        self.verdicts_passed_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn verdict_failed(&self) {
        self.verdicts_failed_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn watchdog_expired(&self) {
        self.watchdog_expired_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn notification_published(&self) {
        self.notifications_published_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_opened(&self) {
        self.live_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        let mut current = self.live_connections.load(Ordering::Relaxed);
        while current > 0 {
            match self.live_connections.compare_exchange_weak(
                current,
                current - 1,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }

    pub fn render_prometheus(&self) -> String {
        format!(
            concat!(
                "# TYPE challenge_submissions_total counter\n",
                "challenge_submissions_total {}\n",
                "# TYPE challenge_batches_dispatched_total counter\n",
                "challenge_batches_dispatched_total {}\n",
                "# TYPE challenge_dispatch_failures_total counter\n",
                "challenge_dispatch_failures_total {}\n",
                "# TYPE challenge_callbacks_total counter\n",
                "challenge_callbacks_total {}\n",
                "# TYPE challenge_callbacks_rejected_total counter\n",
                "challenge_callbacks_rejected_total {}\n",
                "# TYPE challenge_callbacks_orphaned_total counter\n",
                "challenge_callbacks_orphaned_total {}\n",
                "# TYPE challenge_callbacks_duplicate_total counter\n",
                "challenge_callbacks_duplicate_total {}\n",
                "# TYPE challenge_verdicts_passed_total counter\n",
                "challenge_verdicts_passed_total {}\n",
                "# TYPE challenge_verdicts_failed_total counter\n",
                "challenge_verdicts_failed_total {}\n",
                "# TYPE challenge_watchdog_expired_total counter\n",
                "challenge_watchdog_expired_total {}\n",
                "# TYPE challenge_notifications_published_total counter\n",
                "challenge_notifications_published_total {}\n",
                "# TYPE challenge_live_connections gauge\n",
                "challenge_live_connections {}\n"
            ),
            self.submissions_total.load(Ordering::Relaxed),
            self.batches_dispatched_total.load(Ordering::Relaxed),
            self.dispatch_failures_total.load(Ordering::Relaxed),
            self.callbacks_total.load(Ordering::Relaxed),
            self.callbacks_rejected_total.load(Ordering::Relaxed),
            self.callbacks_orphaned_total.load(Ordering::Relaxed),
            self.callbacks_duplicate_total.load(Ordering::Relaxed),
            self.verdicts_passed_total.load(Ordering::Relaxed),
            self.verdicts_failed_total.load(Ordering::Relaxed),
            self.watchdog_expired_total.load(Ordering::Relaxed),
            self.notifications_published_total.load(Ordering::Relaxed),
            self.live_connections.load(Ordering::Relaxed),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::MetricsRegistry;

    #[test]
    fn live_connections_do_not_underflow() {
        let metrics = MetricsRegistry::new();
        metrics.connection_closed();
        let rendered = metrics.render_prometheus();
        assert!(rendered.contains("challenge_live_connections 0"));
    }

    #[test]
    fn renders_counters() {
        let metrics = MetricsRegistry::new();
        metrics.submitted();
        metrics.submitted();
        metrics.callback_orphaned();
        let rendered = metrics.render_prometheus();
        assert!(rendered.contains("challenge_submissions_total 2"));
        assert!(rendered.contains("challenge_callbacks_orphaned_total 1"));
        assert!(rendered.contains("challenge_verdicts_passed_total 0"));
    }
}
