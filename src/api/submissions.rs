use axum::{
    Json,
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    api::AppState,
    auth::{self, Principal},
    challenge::{
        intake::{SubmitCode, SubmitReceipt},
        models::{QuestionId, RunStatus, SessionOwner, SubmissionId},
    },
    error::{ApiError, ApiResult},
    sandbox::wire::CallbackPayload,
};

pub async fn submit(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<SubmitCode>,
) -> ApiResult<Json<SubmitReceipt>> {
    let owner = auth::session_owner(state.verifier.as_ref(), &headers)?;
    let receipt = state.intake.submit(owner, request).await?;
    Ok(Json(receipt))
}

#[derive(Debug, Deserialize)]
pub struct FetchQuery {
    question_id: QuestionId,
    #[serde(default)]
    interview_id: Option<i64>,
    #[serde(default)]
    test_response_id: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct SubmissionResponse {
    response: SubmissionBody,
    test_case_responses: Vec<TestCaseResponse>,
}

#[derive(Debug, Serialize)]
struct SubmissionBody {
    id: SubmissionId,
    code: String,
    language: String,
    passed: Option<bool>,
    /// The owning session, not the row id.
    submission_id: i64,
    question_id: QuestionId,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
struct TestCaseResponse {
    status: RunStatus,
    input: String,
    expected_output: String,
}

pub async fn fetch(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<FetchQuery>,
) -> ApiResult<Json<SubmissionResponse>> {
    let owner = match auth::principal(state.verifier.as_ref(), &headers)? {
        Principal::Session(owner) => owner,
        Principal::Company(company_id) => {
            let owner = match (query.interview_id, query.test_response_id) {
                (Some(id), None) => SessionOwner::Interview(id),
                (None, Some(id)) => SessionOwner::StaffTest(id),
                _ => {
                    return Err(ApiError::Validation(
                        "exactly one of interview_id or test_response_id is required".to_string(),
                    ));
                }
            };
            let question = state
                .store
                .question(query.question_id)
                .await?
                .ok_or(ApiError::NotFound)?;
            if question.company_id != company_id {
                return Err(ApiError::NotFound);
            }
            owner
        }
    };

    let view = state
        .store
        .submission_view(owner, query.question_id)
        .await?
        .ok_or(ApiError::NotFound)?;

    let submission = view.submission;
    Ok(Json(SubmissionResponse {
        response: SubmissionBody {
            id: submission.id,
            code: submission.code,
            language: submission.language,
            passed: submission.verdict.passed(),
            submission_id: submission.owner.session_id(),
            question_id: submission.question_id,
            created_at: submission.created_at,
            updated_at: submission.updated_at,
        },
        test_case_responses: view
            .cases
            .into_iter()
            .map(|case| TestCaseResponse {
                status: case.status,
                input: case.input,
                expected_output: case.expected_output,
            })
            .collect(),
    }))
}

/// Sandbox completion hook. Always acknowledged so the sandbox never retries
/// into a loop; problems are logged and counted instead.
pub async fn callback(State(state): State<AppState>, body: Bytes) -> StatusCode {
    let payload = match serde_json::from_slice::<CallbackPayload>(&body) {
        Ok(payload) => payload,
        Err(err) => {
            state.metrics.callback_rejected();
            tracing::warn!(error = %err, bytes = body.len(), "malformed sandbox callback");
            return StatusCode::OK;
        }
    };

    let task_id = payload.task_unique_id.clone();
    if let Err(err) = state.correlator.handle(payload).await {
        state.metrics.callback_rejected();
        tracing::error!(task_id = %task_id, error = %err, "failed to apply sandbox callback");
    }
    StatusCode::OK
}

#[derive(Debug, Serialize)]
pub struct SummaryResponse {
    dsa_score: usize,
    submissions: Vec<SummaryEntry>,
}

#[derive(Debug, Serialize)]
struct SummaryEntry {
    question_id: QuestionId,
    language: String,
    passed: Option<bool>,
    submitted_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

pub async fn summary(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<SummaryResponse>> {
    let owner = auth::session_owner(state.verifier.as_ref(), &headers)?;
    let submissions = state.store.submissions_for(owner).await?;

    let dsa_score = submissions
        .iter()
        .filter(|submission| submission.verdict.passed() == Some(true))
        .count();
    Ok(Json(SummaryResponse {
        dsa_score,
        submissions: submissions
            .into_iter()
            .map(|submission| SummaryEntry {
                question_id: submission.question_id,
                language: submission.language,
                passed: submission.verdict.passed(),
                submitted_at: submission.created_at,
                updated_at: submission.updated_at,
            })
            .collect(),
    }))
}
