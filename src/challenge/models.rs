use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};

pub type QuestionId = i64;
pub type TestCaseId = i64;
pub type SubmissionId = i64;

/// Who a submission belongs to. Derived once from the verified session token
/// and threaded unchanged through intake, dispatch and correlation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionOwner {
    Interview(i64),
    StaffTest(i64),
}

impl SessionOwner {
    pub fn session_id(&self) -> i64 {
        match self {
            Self::Interview(id) | Self::StaffTest(id) => *id,
        }
    }

    /// Key used by the live channel registry and the pub/sub fabric.
    pub fn channel_key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for SessionOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Interview(id) => write!(f, "interview:{id}"),
            Self::StaffTest(id) => write!(f, "test:{id}"),
        }
    }
}

/// Status of one test case execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStatus {
    Pending,
    Succeeded,
    Failed(String),
}

impl RunStatus {
    pub const SANDBOX_SUCCESS: &'static str = "successful";

    /// Anything other than the sandbox's literal success string is a failure.
    pub fn from_sandbox(raw: &str) -> Self {
        let raw = raw.trim();
        if raw == Self::SANDBOX_SUCCESS {
            Self::Succeeded
        } else if raw.is_empty() {
            Self::Failed("unknown".to_string())
        } else {
            Self::Failed(raw.to_string())
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Pending => "pending",
            Self::Succeeded => Self::SANDBOX_SUCCESS,
            Self::Failed(reason) => reason,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl Serialize for RunStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Executing,
    Passed,
    Failed,
}

impl Verdict {
    pub fn passed(&self) -> Option<bool> {
        match self {
            Self::Executing => None,
            Self::Passed => Some(true),
            Self::Failed => Some(false),
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Executing)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TestCase {
    pub id: TestCaseId,
    pub question_id: QuestionId,
    pub input: String,
    pub expected_output: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Question {
    pub id: QuestionId,
    pub company_id: i64,
    pub title: String,
    pub description: String,
    pub difficulty: String,
    pub time_minutes: Option<u32>,
    pub test_cases: Vec<TestCase>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewTestCase {
    pub input: String,
    pub expected_output: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewQuestion {
    pub title: String,
    pub description: String,
    pub difficulty: String,
    #[serde(default)]
    pub time_minutes: Option<u32>,
    pub test_cases: Vec<NewTestCase>,
}

#[derive(Debug, Clone)]
pub struct Submission {
    pub id: SubmissionId,
    pub owner: SessionOwner,
    pub question_id: QuestionId,
    pub language: String,
    pub code: String,
    pub verdict: Verdict,
    /// Bumped on every resubmission; dispatch results for an older attempt are discarded.
    pub attempt: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ExecutionRecord {
    pub test_case_id: TestCaseId,
    pub task_id: String,
    pub status: RunStatus,
}

/// Positional pairing of a test case with the task id the sandbox minted for it.
#[derive(Debug, Clone)]
pub struct TaskAssignment {
    pub test_case_id: TestCaseId,
    pub task_id: String,
}

#[cfg(test)]
mod tests {
    use super::{RunStatus, SessionOwner, Verdict};

    #[test]
    fn translates_sandbox_status_strings() {
        assert_eq!(RunStatus::from_sandbox("successful"), RunStatus::Succeeded);
        assert_eq!(
            RunStatus::from_sandbox("compilation-error"),
            RunStatus::Failed("compilation-error".into())
        );
        assert_eq!(RunStatus::from_sandbox(""), RunStatus::Failed("unknown".into()));
        assert_eq!(
            RunStatus::from_sandbox("Successful"),
            RunStatus::Failed("Successful".into())
        );
    }

    #[test]
    fn status_serializes_as_plain_string() {
        let json = serde_json::to_string(&RunStatus::Failed("time-limit-exceeded".into()))
            .unwrap();
        assert_eq!(json, "\"time-limit-exceeded\"");
        assert_eq!(serde_json::to_string(&RunStatus::Pending).unwrap(), "\"pending\"");
    }

    #[test]
    fn channel_keys_distinguish_owner_kinds() {
        assert_eq!(SessionOwner::Interview(4).channel_key(), "interview:4");
        assert_eq!(SessionOwner::StaffTest(4).channel_key(), "test:4");
        assert_ne!(SessionOwner::Interview(4), SessionOwner::StaffTest(4));
    }

    #[test]
    fn only_executing_verdict_is_unresolved() {
        assert_eq!(Verdict::Executing.passed(), None);
        assert_eq!(Verdict::Passed.passed(), Some(true));
        assert_eq!(Verdict::Failed.passed(), Some(false));
        assert!(Verdict::Failed.is_terminal());
    }
}
