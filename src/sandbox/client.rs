use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::{
    config::{RunLimits, SandboxConfig},
    sandbox::{
        DispatchError, RunRequest, SandboxClient,
        wire::{BatchEnvelope, BatchResult, RunEntry},
    },
};

const API_KEY_HEADER: &str = "FERMION-API-KEY";

pub struct HttpSandboxClient {
    client: reqwest::Client,
    batch_url: String,
    api_key: String,
    callback_url: String,
    limits: RunLimits,
    timeout: Duration,
}

impl HttpSandboxClient {
    pub fn new(config: &SandboxConfig, limits: RunLimits) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .pool_idle_timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(8)
            .tcp_nodelay(true)
            .build()?;

        Ok(Self {
            client,
            batch_url: config.batch_url.clone(),
            api_key: config.api_key.clone(),
            callback_url: config.callback_url.clone(),
            limits,
            timeout: config.timeout,
        })
    }
}

#[async_trait]
impl SandboxClient for HttpSandboxClient {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn dispatch_batch(&self, runs: &[RunRequest]) -> Result<Vec<String>, DispatchError> {
        let entries = runs
            .iter()
            .map(|run| RunEntry::new(run, &self.callback_url, &self.limits))
            .collect();

        let started = Instant::now();
        let response = self
            .client
            .post(&self.batch_url)
            .header(API_KEY_HEADER, &self.api_key)
            .json(&BatchEnvelope::new(entries))
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    DispatchError::Timeout(self.timeout)
                } else {
                    DispatchError::Transport(err)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(DispatchError::Status(status));
        }

        let results: Vec<BatchResult> = response
            .json()
            .await
            .map_err(|err| DispatchError::Malformed(err.to_string()))?;

        tracing::debug!(
            runs = runs.len(),
            latency_ms = started.elapsed().as_millis() as u64,
            "sandbox accepted batch"
        );

        results
            .into_iter()
            .next()
            .map(BatchResult::into_task_ids)
            .ok_or_else(|| DispatchError::Malformed("batch response was empty".to_string()))
    }
}
