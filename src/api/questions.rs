use axum::{
    Json,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
};

use crate::{
    api::AppState,
    auth,
    challenge::models::{NewQuestion, Question, QuestionId},
    error::{ApiError, ApiResult},
};

const MAX_TEST_CASES: usize = 128;

pub async fn create(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(question): Json<NewQuestion>,
) -> ApiResult<(StatusCode, Json<Question>)> {
    let company_id = auth::company_id(state.verifier.as_ref(), &headers)?;
    validate(&question)?;

    let question = state.store.create_question(company_id, question).await?;
    tracing::info!(
        question_id = question.id,
        company_id,
        test_cases = question.test_cases.len(),
        "created coding question"
    );
    Ok((StatusCode::CREATED, Json(question)))
}

pub async fn fetch(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<QuestionId>,
) -> ApiResult<Json<Question>> {
    let company_id = auth::company_id(state.verifier.as_ref(), &headers)?;
    let question = state
        .store
        .question(id)
        .await?
        .filter(|question| question.company_id == company_id)
        .ok_or(ApiError::NotFound)?;
    Ok(Json(question))
}

fn validate(question: &NewQuestion) -> ApiResult<()> {
    if question.title.trim().is_empty() {
        return Err(ApiError::Validation("title is required".to_string()));
    }
    if question.test_cases.is_empty() {
        return Err(ApiError::Validation(
            "a question needs at least one test case".to_string(),
        ));
    }
    if question.test_cases.len() > MAX_TEST_CASES {
        return Err(ApiError::Validation(format!(
            "too many test cases; max is {MAX_TEST_CASES}"
        )));
    }
    Ok(())
}
