use std::{
    collections::BTreeMap,
    sync::{
        Arc,
        atomic::{AtomicI64, Ordering},
    },
};

use anyhow::{Context, anyhow, bail};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::challenge::models::{
    ExecutionRecord, NewQuestion, Question, QuestionId, RunStatus, SessionOwner, Submission,
    SubmissionId, TaskAssignment, TestCase, TestCaseId, Verdict,
};

/// What applying one sandbox callback did to the persisted state.
#[derive(Debug, Clone)]
pub enum CallbackOutcome {
    /// No live record carries this task id.
    Orphan,
    /// The record already holds a terminal status.
    Duplicate { submission_id: SubmissionId },
    /// Record updated, but the submission already has a terminal verdict.
    Ignored { submission_id: SubmissionId },
    /// Record succeeded; more test cases are outstanding.
    Progress {
        submission_id: SubmissionId,
        succeeded: usize,
        total: usize,
    },
    Failed(FailedRun),
    Passed {
        submission_id: SubmissionId,
        owner: SessionOwner,
        passed_count: usize,
    },
}

#[derive(Debug, Clone)]
pub struct FailedRun {
    pub submission_id: SubmissionId,
    pub owner: SessionOwner,
    pub test_case: TestCase,
    pub status: RunStatus,
}

#[derive(Debug, Clone)]
pub struct SubmissionView {
    pub submission: Submission,
    pub cases: Vec<CaseView>,
}

#[derive(Debug, Clone)]
pub struct CaseView {
    pub status: RunStatus,
    pub input: String,
    pub expected_output: String,
}

/// Durable state of the challenge pipeline. Every method that touches a
/// submission and its execution records must do so atomically.
#[async_trait]
pub trait ChallengeStore: Send + Sync {
    async fn create_question(&self, company_id: i64, question: NewQuestion)
    -> anyhow::Result<Question>;

    async fn question(&self, id: QuestionId) -> anyhow::Result<Option<Question>>;

    /// Creates or overwrites the submission for `(owner, question_id)`, starting
    /// a new dispatch attempt and discarding the previous attempt's records.
    async fn upsert_submission(
        &self,
        owner: SessionOwner,
        question_id: QuestionId,
        language: String,
        code: String,
    ) -> anyhow::Result<Submission>;

    /// Writes one pending record per assignment. Returns `false` without writing
    /// anything when `attempt` is no longer current.
    async fn record_dispatch(
        &self,
        submission_id: SubmissionId,
        attempt: u64,
        assignments: Vec<TaskAssignment>,
    ) -> anyhow::Result<bool>;

    /// Moves an executing submission to failed if it is still on `attempt`.
    async fn fail_submission(
        &self,
        submission_id: SubmissionId,
        attempt: u64,
    ) -> anyhow::Result<Option<Submission>>;

    async fn apply_run_result(
        &self,
        task_id: &str,
        status: RunStatus,
    ) -> anyhow::Result<CallbackOutcome>;

    async fn submission_view(
        &self,
        owner: SessionOwner,
        question_id: QuestionId,
    ) -> anyhow::Result<Option<SubmissionView>>;

    async fn submissions_for(&self, owner: SessionOwner) -> anyhow::Result<Vec<Submission>>;

    /// Fails every executing submission last dispatched before `cutoff`.
    async fn expire_stalled(&self, cutoff: DateTime<Utc>) -> anyhow::Result<Vec<Submission>>;
}

#[derive(Debug, Clone, Copy)]
struct TaskRef {
    submission_id: SubmissionId,
    test_case_id: TestCaseId,
}

struct SubmissionState {
    submission: Submission,
    records: BTreeMap<TestCaseId, ExecutionRecord>,
}

pub struct InMemoryChallengeStore {
    next_id: AtomicI64,
    questions: DashMap<QuestionId, Question>,
    by_owner: DashMap<(SessionOwner, QuestionId), SubmissionId>,
    submissions: DashMap<SubmissionId, Arc<Mutex<SubmissionState>>>,
    tasks: DashMap<String, TaskRef>,
}

impl InMemoryChallengeStore {
    pub fn new() -> Self {
        Self {
            next_id: AtomicI64::new(1),
            questions: DashMap::new(),
            by_owner: DashMap::new(),
            submissions: DashMap::new(),
            tasks: DashMap::new(),
        }
    }

    fn allocate_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn state(&self, id: SubmissionId) -> Option<Arc<Mutex<SubmissionState>>> {
        self.submissions.get(&id).map(|entry| entry.value().clone())
    }

    fn test_case(&self, question_id: QuestionId, test_case_id: TestCaseId) -> Option<TestCase> {
        self.questions.get(&question_id).and_then(|question| {
            question
                .test_cases
                .iter()
                .find(|case| case.id == test_case_id)
                .cloned()
        })
    }

    fn test_case_total(&self, question_id: QuestionId) -> Option<usize> {
        self.questions
            .get(&question_id)
            .map(|question| question.test_cases.len())
    }
}

impl Default for InMemoryChallengeStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChallengeStore for InMemoryChallengeStore {
    async fn create_question(
        &self,
        company_id: i64,
        question: NewQuestion,
    ) -> anyhow::Result<Question> {
        let id = self.allocate_id();
        let test_cases = question
            .test_cases
            .into_iter()
            .map(|case| TestCase {
                id: self.allocate_id(),
                question_id: id,
                input: case.input,
                expected_output: case.expected_output,
            })
            .collect();

        let question = Question {
            id,
            company_id,
            title: question.title,
            description: question.description,
            difficulty: question.difficulty,
            time_minutes: question.time_minutes,
            test_cases,
            created_at: Utc::now(),
        };
        self.questions.insert(id, question.clone());
        Ok(question)
    }

    async fn question(&self, id: QuestionId) -> anyhow::Result<Option<Question>> {
        Ok(self.questions.get(&id).map(|q| q.value().clone()))
    }

    async fn upsert_submission(
        &self,
        owner: SessionOwner,
        question_id: QuestionId,
        language: String,
        code: String,
    ) -> anyhow::Result<Submission> {
        let now = Utc::now();
        let id = *self
            .by_owner
            .entry((owner, question_id))
            .or_insert_with(|| self.allocate_id());

        let state = self
            .submissions
            .entry(id)
            .or_insert_with(|| {
                Arc::new(Mutex::new(SubmissionState {
                    submission: Submission {
                        id,
                        owner,
                        question_id,
                        language: String::new(),
                        code: String::new(),
                        verdict: Verdict::Executing,
                        attempt: 0,
                        created_at: now,
                        updated_at: now,
                    },
                    records: BTreeMap::new(),
                }))
            })
            .clone();

        let mut state = state.lock().await;
        for record in std::mem::take(&mut state.records).into_values() {
            self.tasks.remove(&record.task_id);
        }
        let submission = &mut state.submission;
        submission.language = language;
        submission.code = code;
        submission.verdict = Verdict::Executing;
        submission.attempt += 1;
        submission.updated_at = now;
        Ok(submission.clone())
    }

    async fn record_dispatch(
        &self,
        submission_id: SubmissionId,
        attempt: u64,
        assignments: Vec<TaskAssignment>,
    ) -> anyhow::Result<bool> {
        let state = self
            .state(submission_id)
            .with_context(|| format!("submission {submission_id} does not exist"))?;
        let mut state = state.lock().await;
        if state.submission.attempt != attempt || state.submission.verdict.is_terminal() {
            return Ok(false);
        }

        for assignment in assignments {
            self.tasks.insert(
                assignment.task_id.clone(),
                TaskRef {
                    submission_id,
                    test_case_id: assignment.test_case_id,
                },
            );
            let previous = state.records.insert(
                assignment.test_case_id,
                ExecutionRecord {
                    test_case_id: assignment.test_case_id,
                    task_id: assignment.task_id.clone(),
                    status: RunStatus::Pending,
                },
            );
            if let Some(previous) = previous
                && previous.task_id != assignment.task_id
            {
                self.tasks.remove(&previous.task_id);
            }
        }
        state.submission.updated_at = Utc::now();
        Ok(true)
    }

    async fn fail_submission(
        &self,
        submission_id: SubmissionId,
        attempt: u64,
    ) -> anyhow::Result<Option<Submission>> {
        let Some(state) = self.state(submission_id) else {
            return Ok(None);
        };
        let mut state = state.lock().await;
        if state.submission.attempt != attempt || state.submission.verdict.is_terminal() {
            return Ok(None);
        }
        state.submission.verdict = Verdict::Failed;
        state.submission.updated_at = Utc::now();
        Ok(Some(state.submission.clone()))
    }

    async fn apply_run_result(
        &self,
        task_id: &str,
        status: RunStatus,
    ) -> anyhow::Result<CallbackOutcome> {
        if !status.is_terminal() {
            bail!("callback status for task {task_id} is not terminal");
        }

        let Some(task) = self.tasks.get(task_id).map(|entry| *entry.value()) else {
            return Ok(CallbackOutcome::Orphan);
        };
        let Some(state) = self.state(task.submission_id) else {
            return Ok(CallbackOutcome::Orphan);
        };

        let mut guard = state.lock().await;
        let state = &mut *guard;
        let submission_id = state.submission.id;

        {
            let Some(record) = state.records.get_mut(&task.test_case_id) else {
                return Ok(CallbackOutcome::Orphan);
            };
            // superseded by a resubmission between the index lookup and the lock
            if record.task_id != task_id {
                return Ok(CallbackOutcome::Orphan);
            }
            if record.status.is_terminal() {
                return Ok(CallbackOutcome::Duplicate { submission_id });
            }
            record.status = status.clone();
        }

        if state.submission.verdict.is_terminal() {
            return Ok(CallbackOutcome::Ignored { submission_id });
        }

        let question_id = state.submission.question_id;
        match status {
            RunStatus::Succeeded => {
                let succeeded = state
                    .records
                    .values()
                    .filter(|record| record.status == RunStatus::Succeeded)
                    .count();
                let total = self
                    .test_case_total(question_id)
                    .ok_or_else(|| anyhow!("question {question_id} disappeared"))?;

                if succeeded == total {
                    state.submission.verdict = Verdict::Passed;
                    state.submission.updated_at = Utc::now();
                    Ok(CallbackOutcome::Passed {
                        submission_id,
                        owner: state.submission.owner,
                        passed_count: succeeded,
                    })
                } else {
                    Ok(CallbackOutcome::Progress {
                        submission_id,
                        succeeded,
                        total,
                    })
                }
            }
            status => {
                let test_case = self
                    .test_case(question_id, task.test_case_id)
                    .ok_or_else(|| anyhow!("test case {} disappeared", task.test_case_id))?;
                state.submission.verdict = Verdict::Failed;
                state.submission.updated_at = Utc::now();
                Ok(CallbackOutcome::Failed(FailedRun {
                    submission_id,
                    owner: state.submission.owner,
                    test_case,
                    status,
                }))
            }
        }
    }

    async fn submission_view(
        &self,
        owner: SessionOwner,
        question_id: QuestionId,
    ) -> anyhow::Result<Option<SubmissionView>> {
        let Some(id) = self.by_owner.get(&(owner, question_id)).map(|e| *e.value()) else {
            return Ok(None);
        };
        let Some(state) = self.state(id) else {
            return Ok(None);
        };
        let state = state.lock().await;

        let cases = state
            .records
            .values()
            .filter_map(|record| {
                self.test_case(question_id, record.test_case_id)
                    .map(|case| CaseView {
                        status: record.status.clone(),
                        input: case.input,
                        expected_output: case.expected_output,
                    })
            })
            .collect();

        Ok(Some(SubmissionView {
            submission: state.submission.clone(),
            cases,
        }))
    }

    async fn submissions_for(&self, owner: SessionOwner) -> anyhow::Result<Vec<Submission>> {
        let ids = self
            .by_owner
            .iter()
            .filter(|entry| entry.key().0 == owner)
            .map(|entry| *entry.value())
            .collect::<Vec<_>>();

        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(state) = self.state(id) {
                out.push(state.lock().await.submission.clone());
            }
        }
        out.sort_by_key(|submission| submission.question_id);
        Ok(out)
    }

    async fn expire_stalled(&self, cutoff: DateTime<Utc>) -> anyhow::Result<Vec<Submission>> {
        let states = self
            .submissions
            .iter()
            .map(|entry| entry.value().clone())
            .collect::<Vec<_>>();

        let mut expired = Vec::new();
        for state in states {
            let mut state = state.lock().await;
            if state.submission.verdict == Verdict::Executing
                && state.submission.updated_at < cutoff
            {
                state.submission.verdict = Verdict::Failed;
                state.submission.updated_at = Utc::now();
                expired.push(state.submission.clone());
            }
        }
        Ok(expired)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::{CallbackOutcome, ChallengeStore, InMemoryChallengeStore};
    use crate::challenge::{
        models::{RunStatus, SessionOwner, TaskAssignment, Verdict},
        testing::seed_question,
    };

    const OWNER: SessionOwner = SessionOwner::Interview(11);

    #[tokio::test]
    async fn resubmission_reuses_row_and_bumps_attempt() {
        let store = InMemoryChallengeStore::new();
        let question = seed_question(&store, 2).await;

        let first = store
            .upsert_submission(OWNER, question.id, "python".into(), "print(1)".into())
            .await
            .unwrap();
        let second = store
            .upsert_submission(OWNER, question.id, "python".into(), "print(2)".into())
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.attempt, first.attempt + 1);
        assert_eq!(second.code, "print(2)");
        assert_eq!(store.submissions_for(OWNER).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn redispatch_replaces_records_instead_of_duplicating() {
        let store = InMemoryChallengeStore::new();
        let question = seed_question(&store, 2).await;
        let assign = |prefix: &str| {
            question
                .test_cases
                .iter()
                .map(|case| TaskAssignment {
                    test_case_id: case.id,
                    task_id: format!("{prefix}-{}", case.id),
                })
                .collect::<Vec<_>>()
        };

        let first = store
            .upsert_submission(OWNER, question.id, "python".into(), "a".into())
            .await
            .unwrap();
        assert!(store.record_dispatch(first.id, first.attempt, assign("old")).await.unwrap());

        let second = store
            .upsert_submission(OWNER, question.id, "python".into(), "b".into())
            .await
            .unwrap();
        assert!(store.record_dispatch(second.id, second.attempt, assign("new")).await.unwrap());

        let view = store.submission_view(OWNER, question.id).await.unwrap().unwrap();
        assert_eq!(view.cases.len(), 2);
        assert!(view.cases.iter().all(|case| case.status == RunStatus::Pending));

        let old_task = format!("old-{}", question.test_cases[0].id);
        let outcome = store
            .apply_run_result(&old_task, RunStatus::Succeeded)
            .await
            .unwrap();
        assert!(matches!(outcome, CallbackOutcome::Orphan));
    }

    #[tokio::test]
    async fn stale_attempt_does_not_write_records() {
        let store = InMemoryChallengeStore::new();
        let question = seed_question(&store, 1).await;
        let first = store
            .upsert_submission(OWNER, question.id, "c".into(), "x".into())
            .await
            .unwrap();
        store
            .upsert_submission(OWNER, question.id, "c".into(), "y".into())
            .await
            .unwrap();

        let written = store
            .record_dispatch(
                first.id,
                first.attempt,
                vec![TaskAssignment {
                    test_case_id: question.test_cases[0].id,
                    task_id: "late".into(),
                }],
            )
            .await
            .unwrap();

        assert!(!written);
        let view = store.submission_view(OWNER, question.id).await.unwrap().unwrap();
        assert!(view.cases.is_empty());
        assert!(matches!(
            store.apply_run_result("late", RunStatus::Succeeded).await.unwrap(),
            CallbackOutcome::Orphan
        ));
    }

    #[tokio::test]
    async fn fail_submission_only_applies_to_current_executing_attempt() {
        let store = InMemoryChallengeStore::new();
        let question = seed_question(&store, 1).await;
        let submission = store
            .upsert_submission(OWNER, question.id, "c".into(), "x".into())
            .await
            .unwrap();

        assert!(
            store
                .fail_submission(submission.id, submission.attempt + 1)
                .await
                .unwrap()
                .is_none()
        );
        let failed = store
            .fail_submission(submission.id, submission.attempt)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(failed.verdict, Verdict::Failed);
        assert!(
            store
                .fail_submission(submission.id, submission.attempt)
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn rejects_non_terminal_callback_status() {
        let store = InMemoryChallengeStore::new();
        assert!(store.apply_run_result("t1", RunStatus::Pending).await.is_err());
    }

    #[tokio::test]
    async fn expires_only_stalled_executing_submissions() {
        let store = InMemoryChallengeStore::new();
        let question = seed_question(&store, 1).await;
        let other = seed_question(&store, 1).await;
        let stalled = store
            .upsert_submission(OWNER, question.id, "c".into(), "x".into())
            .await
            .unwrap();
        let done = store
            .upsert_submission(OWNER, other.id, "c".into(), "y".into())
            .await
            .unwrap();
        store.fail_submission(done.id, done.attempt).await.unwrap();

        let expired = store
            .expire_stalled(Utc::now() + Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].id, stalled.id);

        let again = store
            .expire_stalled(Utc::now() + Duration::seconds(1))
            .await
            .unwrap();
        assert!(again.is_empty());
    }
}
