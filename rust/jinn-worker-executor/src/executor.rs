//! Executor (spec §4.F): runs one claimed job to completion or to a bounded
//! failure, tying together environment construction, the optional Chrome
//! pre-launch, subprocess spawn, loop protection, status extraction, and
//! telemetry parsing.

use crate::chrome::{launch_headless_chrome, patch_extension_config, ChromeHandle};
use crate::env_builder::{build_subprocess_env, JobContext};
use crate::loop_protection::LoopGuard;
use crate::runtime_home::{copy_oauth_credentials, ensure_extensions_installed};
use crate::spawn::{spawn_subprocess, PromptDelivery, SpawnRequest};
use crate::status_extraction::StatusExtractor;
use crate::telemetry_parser::parse_telemetry_file;
use jinn_worker_config::env_allowlist::EnvAllowlist;
use jinn_worker_config::schema::ExecutorSection;
use jinn_worker_types::{ExecutionTelemetry, JobError, JobErrorKind, Request};
use std::path::Path;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{info, instrument, warn};

/// "Tool not found in registry" is downgraded to a warning rather than
/// classified as an API error (spec §4.F failure classification).
const TOOL_NOT_FOUND_PATTERN: &str = "tool not found in registry";

/// Substrings in stderr that indicate the marketplace API rejected the
/// request, used by the failure classifier.
const API_ERROR_MARKERS: &[&str] = &["marketplace api error", "api request failed", "401 unauthorized", "429 too many requests"];

pub struct ExecutionRequest<'a> {
    pub request: &'a Request,
    pub prompt: &'a str,
    pub binary: &'a str,
    pub chrome_binary: Option<&'a str>,
    pub browser_mcp_config_path: Option<&'a Path>,
    pub workspace_dir: &'a Path,
    pub telemetry_file: &'a Path,
    pub signing_proxy_base_url: &'a str,
    pub signing_proxy_bearer_token: &'a str,
}

pub struct ExecutionOutcome {
    pub output: String,
    pub last_status: Option<String>,
    pub telemetry: ExecutionTelemetry,
    pub termination_reason: Option<String>,
    pub exit_code: i32,
}

/// Runs one job end to end. `inherited_env` is normally `std::env::vars()`;
/// accepted as a parameter so tests can supply a controlled environment.
#[instrument(skip(inherited_env, allowlist), fields(request_id = %exec.request.id))]
pub async fn run_job(
    exec: ExecutionRequest<'_>,
    config: &ExecutorSection,
    allowlist: &EnvAllowlist,
    inherited_env: Vec<(String, String)>,
) -> Result<ExecutionOutcome, JobError> {
    if let Err(e) = ensure_extensions_installed(&config.runtime_home, &config.required_extensions, config.extension_bundle_dir.as_deref()).await {
        warn!(error = %e, "failed to stage required extensions into runtime home");
    }
    if let Err(e) = copy_oauth_credentials(config.default_llm_home.as_deref(), &config.runtime_home).await {
        warn!(error = %e, "failed to copy oauth credentials into runtime home");
    }

    let chrome = if config.browser_tools_enabled {
        match exec.chrome_binary {
            Some(binary) => match launch_headless_chrome(binary).await {
                Ok(handle) => {
                    if let Some(config_path) = exec.browser_mcp_config_path {
                        if let Err(e) = patch_extension_config(config_path, &handle.devtools_url()).await {
                            warn!(error = %e, "failed to patch browser-mcp extension config");
                        }
                    }
                    Some(handle)
                }
                Err(e) => {
                    warn!(error = %e, "chrome pre-launch failed, continuing without browser tools");
                    None
                }
            },
            None => None,
        }
    } else {
        None
    };

    let result = run_subprocess(&exec, config, allowlist, inherited_env).await;
    cleanup(chrome).await;
    result
}

async fn cleanup(chrome: Option<ChromeHandle>) {
    if let Some(handle) = chrome {
        handle.shutdown().await;
    }
}

async fn run_subprocess(
    exec: &ExecutionRequest<'_>,
    config: &ExecutorSection,
    allowlist: &EnvAllowlist,
    inherited_env: Vec<(String, String)>,
) -> Result<ExecutionOutcome, JobError> {
    let ctx = JobContext {
        request: exec.request,
        telemetry_file: exec.telemetry_file,
        signing_proxy_base_url: exec.signing_proxy_base_url,
        signing_proxy_bearer_token: exec.signing_proxy_bearer_token,
        runtime_home: &config.runtime_home,
    };
    let env = build_subprocess_env(allowlist, inherited_env, &ctx);

    let spawn_request = SpawnRequest {
        binary: exec.binary,
        prompt: exec.prompt,
        workspace_dir: exec.workspace_dir,
        env,
    };

    let mut spawned = spawn_subprocess(&spawn_request, config)
        .map_err(|e| JobError::new(JobErrorKind::SystemError, format!("failed to spawn subprocess: {e}")))?;

    if matches!(spawned.delivery, PromptDelivery::Stdin) {
        if let Some(mut stdin) = spawned.child.stdin.take() {
            if let Err(e) = stdin.write_all(exec.prompt.as_bytes()).await {
                return Err(JobError::new(JobErrorKind::ProcessError, format!("failed to write prompt to stdin: {e}")));
            }
            drop(stdin);
        }
    }

    let mut stdout = spawned
        .child
        .stdout
        .take()
        .ok_or_else(|| JobError::new(JobErrorKind::SystemError, "subprocess stdout was not piped"))?;
    let mut stderr = spawned
        .child
        .stderr
        .take()
        .ok_or_else(|| JobError::new(JobErrorKind::SystemError, "subprocess stderr was not piped"))?;

    let mut guard = LoopGuard::new(config);
    let mut status_extractor = StatusExtractor::new();
    let mut output = Vec::new();
    let mut line_buffer = String::new();
    let mut chunk = [0u8; 8 * 1024];
    let mut termination_reason: Option<String> = None;

    let read_loop = async {
        loop {
            let n = match stdout.read(&mut chunk).await {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    termination_reason = Some(format!("stdout read error: {e}"));
                    break;
                }
            };
            let bytes = &chunk[..n];
            output.extend_from_slice(bytes);

            if let Some(reason) = guard.observe_chunk(bytes) {
                termination_reason = Some(reason);
                break;
            }

            for byte in bytes {
                if *byte == b'\n' {
                    let stripped = crate::status_extraction::strip_ansi(&line_buffer);
                    if let Some(reason) = guard.observe_line(&stripped) {
                        termination_reason = Some(reason);
                        line_buffer.clear();
                        break;
                    }
                    status_extractor.feed_line(&stripped);
                    line_buffer.clear();
                } else {
                    line_buffer.push(*byte as char);
                }
            }
            if termination_reason.is_some() {
                break;
            }
        }
    };

    let timed_out = tokio::time::timeout(config.subprocess_timeout, read_loop).await.is_err();
    if timed_out {
        termination_reason = Some(format!(
            "subprocess exceeded wall-clock timeout of {:?}",
            config.subprocess_timeout
        ));
    }

    if termination_reason.is_some() {
        let _ = spawned.child.kill().await;
    }

    let mut stderr_text = String::new();
    let _ = stderr.read_to_string(&mut stderr_text).await;

    let exit_status = spawned.child.wait().await;
    let exit_code = match &exit_status {
        Ok(status) => status.code().unwrap_or(-1),
        Err(_) => -1,
    };

    let output_text = String::from_utf8_lossy(&output).to_string();

    let telemetry = parse_telemetry_file(exec.telemetry_file, config.telemetry_wait_timeout, config.telemetry_max_file_bytes)
        .await
        .unwrap_or_default();

    if let Err(e) = tokio::fs::remove_file(exec.telemetry_file).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(error = %e, "failed to remove telemetry file during cleanup");
        }
    }

    if let Some(reason) = &termination_reason {
        let kind = if reason.contains("wall-clock timeout") {
            JobErrorKind::Timeout
        } else {
            JobErrorKind::LoopProtection
        };
        return Err(JobError::new(kind, reason.clone())
            .with_telemetry(telemetry)
            .with_termination_reason(reason.clone()));
    }

    classify_exit(exit_code, &output_text, &stderr_text, telemetry, status_extractor.last_status)
}

fn classify_exit(
    exit_code: i32,
    output_text: &str,
    stderr_text: &str,
    telemetry: ExecutionTelemetry,
    last_status: Option<String>,
) -> Result<ExecutionOutcome, JobError> {
    let stderr_lower = stderr_text.to_lowercase();

    if stderr_lower.contains(TOOL_NOT_FOUND_PATTERN) {
        info!(pattern = TOOL_NOT_FOUND_PATTERN, "downgraded to warning, treating exit as success");
        return Ok(ExecutionOutcome {
            output: output_text.to_string(),
            last_status,
            telemetry,
            termination_reason: None,
            exit_code: 0,
        });
    }

    if exit_code != 0 {
        if API_ERROR_MARKERS.iter().any(|marker| stderr_lower.contains(marker)) {
            return Err(JobError::new(JobErrorKind::ApiError, format!("subprocess reported an API error (exit {exit_code})"))
                .with_telemetry(telemetry));
        }
        return Err(JobError::new(JobErrorKind::ProcessError, format!("subprocess exited with status {exit_code}"))
            .with_telemetry(telemetry));
    }

    Ok(ExecutionOutcome {
        output: output_text.to_string(),
        last_status,
        telemetry,
        termination_reason: None,
        exit_code,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use jinn_worker_config::schema::ExecutorSection;

    fn request() -> Request {
        Request {
            id: "0xabc".to_string(),
            mech: "0xMECH".to_string(),
            sender: "0xSENDER".to_string(),
            workstream_id: None,
            block_timestamp: 0,
            ipfs_hash: "Qm".to_string(),
            delivered: false,
            dependencies: None,
            response_timeout: None,
            required_tools: None,
            job_name: None,
        }
    }

    #[tokio::test]
    async fn successful_echo_subprocess_produces_output_and_zero_exit() {
        let allowlist = EnvAllowlist::new();
        let request = request();
        let dir = tempfile::tempdir().unwrap();
        let telemetry_file = dir.path().join("telemetry.json");

        let exec = ExecutionRequest {
            request: &request,
            prompt: "hello world",
            binary: "/bin/echo",
            chrome_binary: None,
            browser_mcp_config_path: None,
            workspace_dir: dir.path(),
            telemetry_file: &telemetry_file,
            signing_proxy_base_url: "http://127.0.0.1:1",
            signing_proxy_bearer_token: "tok",
        };
        let mut config = ExecutorSection::default();
        config.telemetry_wait_timeout = std::time::Duration::from_millis(50);

        let outcome = run_job(exec, &config, &allowlist, Vec::new()).await.unwrap();
        assert_eq!(outcome.exit_code, 0);
        assert!(outcome.termination_reason.is_none());
    }

    #[tokio::test]
    async fn nonzero_exit_is_classified_as_process_error() {
        let allowlist = EnvAllowlist::new();
        let request = request();
        let dir = tempfile::tempdir().unwrap();
        let telemetry_file = dir.path().join("telemetry.json");

        let exec = ExecutionRequest {
            request: &request,
            prompt: "x",
            binary: "/bin/false",
            chrome_binary: None,
            browser_mcp_config_path: None,
            workspace_dir: dir.path(),
            telemetry_file: &telemetry_file,
            signing_proxy_base_url: "http://127.0.0.1:1",
            signing_proxy_bearer_token: "tok",
        };
        let mut config = ExecutorSection::default();
        config.telemetry_wait_timeout = std::time::Duration::from_millis(50);

        let err = run_job(exec, &config, &allowlist, Vec::new()).await.unwrap_err();
        assert_eq!(err.kind, JobErrorKind::ProcessError);
    }

    #[test]
    fn tool_not_found_stderr_is_downgraded_to_success() {
        let outcome = classify_exit(1, "done", "warning: tool not found in registry: foo", ExecutionTelemetry::default(), None).unwrap();
        assert_eq!(outcome.exit_code, 0);
    }

    #[test]
    fn api_error_marker_classified_as_api_error() {
        let err = classify_exit(1, "", "marketplace api error: rejected", ExecutionTelemetry::default(), None).unwrap_err();
        assert_eq!(err.kind, JobErrorKind::ApiError);
    }
}
