use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use dashmap::DashMap;

use crate::{
    challenge::{
        models::RunStatus,
        store::{CallbackOutcome, ChallengeStore, FailedRun},
    },
    metrics::MetricsRegistry,
    notify::{ExecutionEvent, FailedTestCase, Notifier},
    sandbox::wire::CallbackPayload,
};

/// How long a callback for an unknown task id is kept for replay. The sandbox
/// may answer before the dispatcher has written the batch's records.
const EARLY_CALLBACK_TTL: Duration = Duration::from_secs(30);
const EARLY_CALLBACK_CAPACITY: usize = 4_096;

struct HeldCallback {
    payload: CallbackPayload,
    received_at: Instant,
}

/// Matches sandbox completion callbacks back to their execution records and
/// decides the submission verdict.
pub struct Correlator {
    store: Arc<dyn ChallengeStore>,
    notifier: Arc<dyn Notifier>,
    metrics: Arc<MetricsRegistry>,
    early: DashMap<String, HeldCallback>,
}

impl Correlator {
    pub fn new(
        store: Arc<dyn ChallengeStore>,
        notifier: Arc<dyn Notifier>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            store,
            notifier,
            metrics,
            early: DashMap::new(),
        }
    }

    pub async fn handle(&self, payload: CallbackPayload) -> anyhow::Result<CallbackOutcome> {
        self.metrics.callback_received();
        let outcome = self.apply(&payload).await?;
        if !matches!(outcome, CallbackOutcome::Orphan) {
            return Ok(outcome);
        }

        self.metrics.callback_orphaned();
        let task_id = payload.task_unique_id.clone();
        self.hold(payload);
        // records may have landed between the lookup and the hold
        Ok(self.retry_held(&task_id).await?.unwrap_or(outcome))
    }

    /// Re-applies callbacks that arrived before their task ids were recorded.
    /// Returns how many were replayed.
    pub async fn replay(&self, task_ids: &[String]) -> anyhow::Result<usize> {
        let mut replayed = 0;
        for task_id in task_ids {
            if let Some(outcome) = self.retry_held(task_id).await? {
                tracing::info!(
                    task_id = %task_id,
                    outcome = outcome_name(&outcome),
                    "replayed early callback"
                );
                replayed += 1;
            }
        }
        Ok(replayed)
    }

    async fn retry_held(&self, task_id: &str) -> anyhow::Result<Option<CallbackOutcome>> {
        let Some((task_id, held)) = self.early.remove(task_id) else {
            return Ok(None);
        };
        if held.received_at.elapsed() > EARLY_CALLBACK_TTL {
            return Ok(None);
        }
        let outcome = self.apply(&held.payload).await?;
        if matches!(outcome, CallbackOutcome::Orphan) {
            self.early.insert(task_id, held);
            return Ok(None);
        }
        Ok(Some(outcome))
    }

    fn hold(&self, payload: CallbackPayload) {
        if self.early.len() >= EARLY_CALLBACK_CAPACITY {
            self.early
                .retain(|_, held| held.received_at.elapsed() <= EARLY_CALLBACK_TTL);
        }
        if self.early.len() >= EARLY_CALLBACK_CAPACITY {
            tracing::warn!(
                task_id = %payload.task_unique_id,
                "callback for unknown task id dropped, early buffer full"
            );
            return;
        }
        tracing::warn!(
            task_id = %payload.task_unique_id,
            "callback for unknown task id held for replay"
        );
        self.early.insert(
            payload.task_unique_id.clone(),
            HeldCallback {
                payload,
                received_at: Instant::now(),
            },
        );
    }

    async fn apply(&self, payload: &CallbackPayload) -> anyhow::Result<CallbackOutcome> {
        let task_id = payload.task_unique_id.as_str();
        let status = RunStatus::from_sandbox(&payload.run_result.run_status);

        let outcome = self.store.apply_run_result(task_id, status).await?;
        match &outcome {
            CallbackOutcome::Orphan => {}
            CallbackOutcome::Duplicate { submission_id } => {
                self.metrics.callback_duplicate();
                tracing::debug!(task_id, submission_id, "duplicate callback ignored");
            }
            CallbackOutcome::Ignored { submission_id } => {
                tracing::debug!(task_id, submission_id, "submission already decided");
            }
            CallbackOutcome::Progress {
                submission_id,
                succeeded,
                total,
            } => {
                tracing::debug!(task_id, submission_id, succeeded, total, "test case passed");
            }
            CallbackOutcome::Failed(run) => {
                self.metrics.verdict_failed();
                tracing::info!(
                    task_id,
                    submission_id = run.submission_id,
                    test_case_id = run.test_case.id,
                    status = run.status.as_str(),
                    "submission failed"
                );
                let event = failed_event(payload, run);
                self.notifier.publish(&run.owner, &event).await;
                self.metrics.notification_published();
            }
            CallbackOutcome::Passed {
                submission_id,
                owner,
                passed_count,
            } => {
                self.metrics.verdict_passed();
                tracing::info!(submission_id, passed_count, "submission passed");
                self.notifier
                    .publish(owner, &ExecutionEvent::passed(*passed_count))
                    .await;
                self.metrics.notification_published();
            }
        }
        Ok(outcome)
    }
}

fn outcome_name(outcome: &CallbackOutcome) -> &'static str {
    match outcome {
        CallbackOutcome::Orphan => "orphan",
        CallbackOutcome::Duplicate { .. } => "duplicate",
        CallbackOutcome::Ignored { .. } => "ignored",
        CallbackOutcome::Progress { .. } => "progress",
        CallbackOutcome::Failed(_) => "failed",
        CallbackOutcome::Passed { .. } => "passed",
    }
}

fn failed_event(payload: &CallbackPayload, run: &FailedRun) -> ExecutionEvent {
    let decoded = payload.decoded();
    ExecutionEvent::failed_case(
        payload.task_unique_id.clone(),
        decoded.stdin,
        FailedTestCase {
            test_case_id: run.test_case.id,
            status: run.status.as_str().to_string(),
            execution_err: decoded.stderr,
            compilation_output: decoded.compiler_output,
            input: run.test_case.input.clone(),
            expected_output: run.test_case.expected_output.clone(),
            output: decoded.stdout,
        },
    )
}
