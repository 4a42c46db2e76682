use std::{sync::Arc, time::Instant};

use crate::{
    challenge::{
        correlator::Correlator,
        models::{Submission, TaskAssignment, TestCase},
        store::ChallengeStore,
    },
    error::ApiResult,
    metrics::MetricsRegistry,
    notify::{ExecutionEvent, Notifier},
    sandbox::{DispatchError, RunRequest, SandboxClient},
};

/// Sends a submission's test cases to the sandbox as one batch and records
/// the issued task ids.
pub struct Dispatcher {
    store: Arc<dyn ChallengeStore>,
    sandbox: Arc<dyn SandboxClient>,
    notifier: Arc<dyn Notifier>,
    correlator: Arc<Correlator>,
    metrics: Arc<MetricsRegistry>,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn ChallengeStore>,
        sandbox: Arc<dyn SandboxClient>,
        notifier: Arc<dyn Notifier>,
        correlator: Arc<Correlator>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            store,
            sandbox,
            notifier,
            correlator,
            metrics,
        }
    }

    pub async fn dispatch(&self, submission: &Submission, test_cases: &[TestCase]) -> ApiResult<()> {
        let runs = test_cases
            .iter()
            .map(|case| RunRequest {
                language: submission.language.clone(),
                source_code: submission.code.clone(),
                stdin: case.input.clone(),
                expected_output: case.expected_output.clone(),
            })
            .collect::<Vec<_>>();

        let started = Instant::now();
        let issued = self
            .sandbox
            .dispatch_batch(&runs)
            .await
            .and_then(|task_ids| {
                if task_ids.len() == runs.len() {
                    Ok(task_ids)
                } else {
                    Err(DispatchError::Malformed(format!(
                        "expected {} task ids, got {}",
                        runs.len(),
                        task_ids.len()
                    )))
                }
            });

        let task_ids = match issued {
            Ok(task_ids) => task_ids,
            Err(err) => {
                self.abandon(submission, &err).await;
                return Err(err.into());
            }
        };

        let assignments = test_cases
            .iter()
            .zip(task_ids.iter().cloned())
            .map(|(case, task_id)| TaskAssignment {
                test_case_id: case.id,
                task_id,
            })
            .collect();

        let recorded = self
            .store
            .record_dispatch(submission.id, submission.attempt, assignments)
            .await?;
        self.metrics.dispatched();

        if recorded {
            tracing::info!(
                submission_id = submission.id,
                attempt = submission.attempt,
                test_cases = runs.len(),
                sandbox = self.sandbox.name(),
                latency_ms = started.elapsed().as_millis() as u64,
                "dispatched submission to sandbox"
            );
            match self.correlator.replay(&task_ids).await {
                Ok(0) => {}
                Ok(replayed) => {
                    tracing::info!(submission_id = submission.id, replayed, "applied early callbacks")
                }
                Err(err) => tracing::error!(
                    submission_id = submission.id,
                    error = %err,
                    "failed to replay early callbacks"
                ),
            }
        } else {
            tracing::info!(
                submission_id = submission.id,
                attempt = submission.attempt,
                "dispatch superseded by a newer attempt, task ids discarded"
            );
        }
        Ok(())
    }

    async fn abandon(&self, submission: &Submission, err: &DispatchError) {
        self.metrics.dispatch_failed();
        tracing::warn!(
            submission_id = submission.id,
            attempt = submission.attempt,
            error = %err,
            "sandbox dispatch failed"
        );

        match self
            .store
            .fail_submission(submission.id, submission.attempt)
            .await
        {
            Ok(Some(failed)) => {
                self.metrics.verdict_failed();
                let event = ExecutionEvent::aborted(format!("code execution could not be started: {err}"));
                self.notifier.publish(&failed.owner, &event).await;
                self.metrics.notification_published();
            }
            Ok(None) => {}
            Err(store_err) => tracing::error!(
                submission_id = submission.id,
                error = %store_err,
                "failed to record dispatch failure"
            ),
        }
    }
}
