use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::{
    challenge::{
        dispatch::Dispatcher,
        models::{QuestionId, SessionOwner, SubmissionId},
        store::ChallengeStore,
    },
    error::{ApiError, ApiResult},
    metrics::MetricsRegistry,
};

const MAX_LANGUAGE_LEN: usize = 32;

#[derive(Debug, Clone, Deserialize)]
pub struct SubmitCode {
    pub language: String,
    pub code: String,
    pub question_id: QuestionId,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubmitReceipt {
    pub message: &'static str,
    pub submission_id: SubmissionId,
}

pub struct SubmissionIntake {
    store: Arc<dyn ChallengeStore>,
    dispatcher: Arc<Dispatcher>,
    metrics: Arc<MetricsRegistry>,
    max_code_bytes: usize,
}

impl SubmissionIntake {
    pub fn new(
        store: Arc<dyn ChallengeStore>,
        dispatcher: Arc<Dispatcher>,
        metrics: Arc<MetricsRegistry>,
        max_code_bytes: usize,
    ) -> Self {
        Self {
            store,
            dispatcher,
            metrics,
            max_code_bytes,
        }
    }

    /// Persists the attempt and hands it to the sandbox. Returns once the
    /// batch is accepted; verdicts arrive later over the live channel.
    pub async fn submit(&self, owner: SessionOwner, request: SubmitCode) -> ApiResult<SubmitReceipt> {
        validate(&request, self.max_code_bytes)?;

        let question = self
            .store
            .question(request.question_id)
            .await?
            .ok_or_else(|| {
                ApiError::Validation(format!("question {} does not exist", request.question_id))
            })?;
        if question.test_cases.is_empty() {
            return Err(ApiError::Validation(format!(
                "question {} has no test cases",
                question.id
            )));
        }

        let submission = self
            .store
            .upsert_submission(
                owner,
                question.id,
                request.language.trim().to_string(),
                request.code,
            )
            .await?;
        self.metrics.submitted();
        tracing::info!(
            submission_id = submission.id,
            session = %owner,
            question_id = question.id,
            attempt = submission.attempt,
            language = %submission.language,
            "accepted code submission"
        );

        self.dispatcher.dispatch(&submission, &question.test_cases).await?;

        Ok(SubmitReceipt {
            message: "executing",
            submission_id: submission.id,
        })
    }
}

fn validate(request: &SubmitCode, max_code_bytes: usize) -> ApiResult<()> {
    let language = request.language.trim();
    if language.is_empty() {
        return Err(ApiError::Validation("language is required".to_string()));
    }
    if language.len() > MAX_LANGUAGE_LEN {
        return Err(ApiError::Validation("language name too long".to_string()));
    }
    if request.code.trim().is_empty() {
        return Err(ApiError::Validation("code is empty".to_string()));
    }
    if request.code.len() > max_code_bytes {
        return Err(ApiError::Validation(format!(
            "code exceeds {max_code_bytes} bytes"
        )));
    }
    Ok(())
}
