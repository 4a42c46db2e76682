use std::{sync::Arc, time::Duration};

use anyhow::Context;
use chrono::{DateTime, Utc};
use tokio::time::MissedTickBehavior;

use crate::{
    challenge::store::ChallengeStore,
    metrics::MetricsRegistry,
    notify::{ExecutionEvent, Notifier},
};

const TIMED_OUT: &str = "execution timed out waiting for sandbox results";

/// Fails submissions whose sandbox callbacks never arrived.
pub struct Watchdog {
    store: Arc<dyn ChallengeStore>,
    notifier: Arc<dyn Notifier>,
    metrics: Arc<MetricsRegistry>,
    timeout: Duration,
}

impl Watchdog {
    pub fn new(
        store: Arc<dyn ChallengeStore>,
        notifier: Arc<dyn Notifier>,
        metrics: Arc<MetricsRegistry>,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            notifier,
            metrics,
            timeout,
        }
    }

    pub async fn sweep(&self) -> anyhow::Result<usize> {
        self.sweep_at(Utc::now()).await
    }

    async fn sweep_at(&self, now: DateTime<Utc>) -> anyhow::Result<usize> {
        let timeout =
            chrono::Duration::from_std(self.timeout).context("watchdog timeout out of range")?;
        let expired = self.store.expire_stalled(now - timeout).await?;

        for submission in &expired {
            self.metrics.watchdog_expired();
            self.metrics.verdict_failed();
            tracing::warn!(
                submission_id = submission.id,
                session = %submission.owner,
                attempt = submission.attempt,
                "submission expired without a verdict"
            );
            self.notifier
                .publish(&submission.owner, &ExecutionEvent::aborted(TIMED_OUT))
                .await;
            self.metrics.notification_published();
        }
        Ok(expired.len())
    }
}

pub fn spawn_watchdog(watchdog: Arc<Watchdog>, interval: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            match watchdog.sweep().await {
                Ok(0) => {}
                Ok(expired) => tracing::info!(expired, "watchdog sweep finished"),
                Err(err) => tracing::error!(error = %err, "watchdog sweep failed"),
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use chrono::Utc;

    use super::Watchdog;
    use crate::{
        challenge::{
            models::{SessionOwner, Verdict},
            store::{CallbackOutcome, ChallengeStore},
            testing::{FakeSandbox, Harness, callback, seed_question},
        },
        metrics::MetricsRegistry,
    };

    const OWNER: SessionOwner = SessionOwner::StaffTest(2);

    #[tokio::test]
    async fn expires_stalled_submission_and_notifies() {
        let h = Harness::new(FakeSandbox::accepting());
        let question = seed_question(&*h.store, 2).await;
        let submission = h
            .store
            .upsert_submission(OWNER, question.id, "go".into(), "package main".into())
            .await
            .unwrap();
        h.dispatcher.dispatch(&submission, &question.test_cases).await.unwrap();
        let tasks = h.sandbox.last_batch().task_ids;

        let watchdog = Watchdog::new(
            h.store.clone(),
            h.notifier.clone(),
            Arc::new(MetricsRegistry::new()),
            Duration::from_secs(60),
        );
        assert_eq!(watchdog.sweep().await.unwrap(), 0);

        let later = Utc::now() + chrono::Duration::seconds(61);
        assert_eq!(watchdog.sweep_at(later).await.unwrap(), 1);

        let view = h.store.submission_view(OWNER, question.id).await.unwrap().unwrap();
        assert_eq!(view.submission.verdict, Verdict::Failed);
        let events = h.notifier.events_for(OWNER);
        assert_eq!(events.len(), 1);
        assert!(events[0]["failed_test_case"].is_null());

        // a late callback still lands on its record but cannot change the verdict
        let outcome = h.correlator.handle(callback(&tasks[0], "successful")).await.unwrap();
        assert!(matches!(outcome, CallbackOutcome::Ignored { .. }));
        assert_eq!(h.notifier.events_for(OWNER).len(), 1);
    }
}
