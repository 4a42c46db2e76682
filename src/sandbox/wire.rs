//! JSON shapes exchanged with the remote execution sandbox.
//!
//! Every text payload crosses the wire as URL-safe base64 with the padding
//! stripped. Decoding re-pads first.

use base64::{
    Engine,
    engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD},
};
use serde::{Deserialize, Serialize};

use crate::{config::RunLimits, sandbox::RunRequest};

pub const OUTPUT_MATCHER: &str = "IgnoreWhitespaceAtStartAndEndForEveryLine";

pub fn encode(text: &str) -> String {
    URL_SAFE_NO_PAD.encode(text.as_bytes())
}

pub fn decode(raw: &str) -> Result<String, base64::DecodeError> {
    let trimmed = raw.trim().trim_end_matches('=');
    let mut padded = String::with_capacity(trimmed.len() + 3);
    padded.push_str(trimmed);
    while padded.len() % 4 != 0 {
        padded.push('=');
    }
    let bytes = URL_SAFE.decode(padded)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Absent fields decode to an empty string; undecodable ones are logged and blanked.
pub fn decode_or_empty(field: &'static str, raw: Option<&str>) -> String {
    match raw.filter(|raw| !raw.is_empty()) {
        None => String::new(),
        Some(raw) => decode(raw).unwrap_or_else(|err| {
            tracing::warn!(field, error = %err, "sandbox sent undecodable base64");
            String::new()
        }),
    }
}

#[derive(Debug, Serialize)]
pub struct BatchEnvelope {
    data: Vec<BatchItem>,
}

#[derive(Debug, Serialize)]
struct BatchItem {
    data: BatchEntries,
}

#[derive(Debug, Serialize)]
struct BatchEntries {
    entries: Vec<RunEntry>,
}

impl BatchEnvelope {
    pub fn new(entries: Vec<RunEntry>) -> Self {
        Self {
            data: vec![BatchItem {
                data: BatchEntries { entries },
            }],
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunEntry {
    language: String,
    run_config: RunConfig,
    source_code_as_base64_url_encoded: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RunConfig {
    custom_matcher_to_use_for_expected_output: &'static str,
    expected_output_as_base64_url_encoded: String,
    stdin_string_as_base64_url_encoded: String,
    callback_url_on_execution_completion: String,
    should_enable_per_process_and_thread_cpu_time_limit: bool,
    should_enable_per_process_and_thread_memory_limit: bool,
    should_allow_internet_access: bool,
    max_file_size_in_kilobytes_files_created_or_modified: u64,
    stack_size_limit_in_kilobytes: u64,
    cpu_time_limit_in_milliseconds: u64,
    wall_time_limit_in_milliseconds: u64,
    memory_limit_in_kilobyte: u64,
    max_processes_and_or_threads: u32,
}

impl RunEntry {
    pub fn new(run: &RunRequest, callback_url: &str, limits: &RunLimits) -> Self {
        Self {
            language: run.language.clone(),
            run_config: RunConfig {
                custom_matcher_to_use_for_expected_output: OUTPUT_MATCHER,
                expected_output_as_base64_url_encoded: encode(&run.expected_output),
                stdin_string_as_base64_url_encoded: encode(&run.stdin),
                callback_url_on_execution_completion: callback_url.to_string(),
                should_enable_per_process_and_thread_cpu_time_limit: false,
                should_enable_per_process_and_thread_memory_limit: false,
                should_allow_internet_access: false,
                max_file_size_in_kilobytes_files_created_or_modified: limits.max_file_size_kb,
                stack_size_limit_in_kilobytes: limits.stack_size_limit_kb,
                cpu_time_limit_in_milliseconds: limits.cpu_time_limit_ms,
                wall_time_limit_in_milliseconds: limits.wall_time_limit_ms,
                memory_limit_in_kilobyte: limits.memory_limit_kb,
                max_processes_and_or_threads: limits.max_processes,
            },
            source_code_as_base64_url_encoded: encode(&run.source_code),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct BatchResult {
    output: BatchOutput,
}

#[derive(Debug, Deserialize)]
struct BatchOutput {
    data: TaskIds,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TaskIds {
    task_ids: Vec<String>,
}

impl BatchResult {
    pub fn into_task_ids(self) -> Vec<String> {
        self.output.data.task_ids
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallbackPayload {
    pub task_unique_id: String,
    pub run_result: RunResult,
    #[serde(default)]
    pub run_config: Option<CallbackRunConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunResult {
    pub run_status: String,
    #[serde(default)]
    pub compiler_output_after_compilation_base64_url_encoded: Option<String>,
    #[serde(default)]
    pub program_run_data: Option<ProgramRunData>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgramRunData {
    #[serde(default)]
    pub stdout_base64_url_encoded: Option<String>,
    #[serde(default)]
    pub stderr_base64_url_encoded: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallbackRunConfig {
    #[serde(default)]
    pub stdin_string_as_base64_url_encoded: Option<String>,
}

/// Plain-text view of a callback's program data.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodedRun {
    pub stdin: String,
    pub stdout: String,
    pub stderr: String,
    pub compiler_output: String,
}

impl CallbackPayload {
    pub fn decoded(&self) -> DecodedRun {
        let program = self.run_result.program_run_data.as_ref();
        DecodedRun {
            stdin: decode_or_empty(
                "stdin",
                self.run_config
                    .as_ref()
                    .and_then(|c| c.stdin_string_as_base64_url_encoded.as_deref()),
            ),
            stdout: decode_or_empty(
                "stdout",
                program.and_then(|p| p.stdout_base64_url_encoded.as_deref()),
            ),
            stderr: decode_or_empty(
                "stderr",
                program.and_then(|p| p.stderr_base64_url_encoded.as_deref()),
            ),
            compiler_output: decode_or_empty(
                "compiler_output",
                self.run_result
                    .compiler_output_after_compilation_base64_url_encoded
                    .as_deref(),
            ),
        }
    }
}
