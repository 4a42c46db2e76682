pub mod fabric;
pub mod registry;

use async_trait::async_trait;
use serde::Serialize;

use crate::challenge::models::{SessionOwner, TestCaseId};

pub use fabric::RedisNotifier;
pub use registry::ConnectionRegistry;

const EXECUTION_RESULT: &str = "execution_result";

/// Server-to-client message on the live channel.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionEvent {
    event: &'static str,
    #[serde(flatten)]
    pub result: ExecutionResult,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExecutionResult {
    Failed {
        #[serde(rename = "taskUID", skip_serializing_if = "Option::is_none")]
        task_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        input: Option<String>,
        failed_test_case: Option<FailedTestCase>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    Successful {
        passed_count: usize,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct FailedTestCase {
    pub test_case_id: TestCaseId,
    pub status: String,
    pub execution_err: String,
    pub compilation_output: String,
    pub input: String,
    pub expected_output: String,
    pub output: String,
}

impl ExecutionEvent {
    pub fn passed(passed_count: usize) -> Self {
        Self {
            event: EXECUTION_RESULT,
            result: ExecutionResult::Successful { passed_count },
        }
    }

    pub fn failed_case(task_id: String, stdin: String, case: FailedTestCase) -> Self {
        Self {
            event: EXECUTION_RESULT,
            result: ExecutionResult::Failed {
                task_id: Some(task_id),
                input: Some(stdin),
                failed_test_case: Some(case),
                error: None,
            },
        }
    }

    /// Failure not attributable to a single test case (dispatch error, timeout).
    pub fn aborted(error: impl Into<String>) -> Self {
        Self {
            event: EXECUTION_RESULT,
            result: ExecutionResult::Failed {
                task_id: None,
                input: None,
                failed_test_case: None,
                error: Some(error.into()),
            },
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Best-effort delivery of execution events to a session's live connection.
/// Nothing here is authoritative: the verdict is already persisted.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn publish(&self, owner: &SessionOwner, event: &ExecutionEvent);
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{ExecutionEvent, FailedTestCase};

    #[test]
    fn success_event_shape() {
        let value = serde_json::to_value(ExecutionEvent::passed(3)).unwrap();
        assert_eq!(
            value,
            json!({ "event": "execution_result", "status": "successful", "passed_count": 3 })
        );
    }

    #[test]
    fn failure_event_shape() {
        let event = ExecutionEvent::failed_case(
            "t3".into(),
            "1 2".into(),
            FailedTestCase {
                test_case_id: 9,
                status: "wrong-answer".into(),
                execution_err: String::new(),
                compilation_output: String::new(),
                input: "1 2".into(),
                expected_output: "3".into(),
                output: "4".into(),
            },
        );
        let value = serde_json::to_value(event).unwrap();

        assert_eq!(value["event"], "execution_result");
        assert_eq!(value["status"], "failed");
        assert_eq!(value["taskUID"], "t3");
        assert_eq!(value["failed_test_case"]["test_case_id"], 9);
        assert_eq!(value["failed_test_case"]["status"], "wrong-answer");
        assert_eq!(value["failed_test_case"]["expected_output"], "3");
        assert_eq!(value["failed_test_case"]["output"], "4");
        assert!(value.get("error").is_none());
    }

    #[test]
    fn aborted_event_has_null_test_case_and_error() {
        let value = serde_json::to_value(ExecutionEvent::aborted("execution timed out")).unwrap();
        assert_eq!(value["status"], "failed");
        assert!(value["failed_test_case"].is_null());
        assert_eq!(value["error"], "execution timed out");
        assert!(value.get("taskUID").is_none());
    }
}
