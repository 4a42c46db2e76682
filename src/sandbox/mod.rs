mod client;
pub mod wire;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub use client::HttpSandboxClient;

/// One test case run: the candidate's program against a single input.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub language: String,
    pub source_code: String,
    pub stdin: String,
    pub expected_output: String,
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("sandbox request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("sandbox did not answer within {0:?}")]
    Timeout(Duration),
    #[error("sandbox responded with status {0}")]
    Status(http::StatusCode),
    #[error("sandbox response malformed: {0}")]
    Malformed(String),
}

/// Remote execution service accepting a batch of runs and completing them
/// asynchronously through a callback.
#[async_trait]
pub trait SandboxClient: Send + Sync {
    fn name(&self) -> &'static str;

    /// Returns one task id per run, in the order the runs were given.
    async fn dispatch_batch(&self, runs: &[RunRequest]) -> Result<Vec<String>, DispatchError>;
}
