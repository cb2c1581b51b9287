//! Telemetry parsing (spec §4.F): the subprocess writes JSON-encoded
//! OpenTelemetry events to a file. This module stream-parses that file
//! character-by-character (tracking brace depth and string-escape state so
//! it never needs the whole file loaded as one `serde_json::Value`) and
//! dispatches each completed top-level object into a `TelemetryEvent`.

use jinn_worker_types::{ExecutionTelemetry, TelemetryEvent};
use std::path::Path;
use std::time::Duration;
use tracing::{instrument, warn};

/// Streaming scanner for top-level JSON objects inside a concatenated
/// stream of `{...}{...}{...}` values (not a JSON array — each object
/// appears back-to-back as the subprocess appends to the file).
#[derive(Default)]
pub struct TelemetryObjectScanner {
    buffer: String,
    depth: i32,
    in_string: bool,
    escape: bool,
}

impl TelemetryObjectScanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of file content, returning every top-level JSON object
    /// string completed by this chunk (objects may also complete using
    /// bytes fed in an earlier call).
    pub fn feed(&mut self, chunk: &str) -> Vec<String> {
        let mut completed = Vec::new();
        for c in chunk.chars() {
            if self.escape {
                self.escape = false;
            } else if c == '\\' && self.in_string {
                self.escape = true;
            } else if c == '"' {
                self.in_string = !self.in_string;
            } else if c == '{' && !self.in_string {
                self.depth += 1;
            } else if c == '}' && !self.in_string {
                self.depth -= 1;
            }

            if self.depth > 0 || (c == '}' && self.depth == 0) {
                self.buffer.push(c);
            }

            if self.depth == 0 && c == '}' && !self.buffer.is_empty() {
                completed.push(std::mem::take(&mut self.buffer));
            }
        }
        completed
    }
}

/// Parse one decoded JSON object into a `TelemetryEvent`, dispatching on
/// the event-kind names enumerated in spec §4.F. Anything unrecognized is
/// preserved as `Unknown` rather than dropped.
pub fn parse_event(raw: &str) -> TelemetryEvent {
    let value: serde_json::Value = match serde_json::from_str(raw) {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, "telemetry object failed to parse as JSON");
            return TelemetryEvent::Unknown { raw: raw.to_string() };
        }
    };

    let name = value
        .get("name")
        .or_else(|| value.get("event.name"))
        .and_then(|v| v.as_str())
        .unwrap_or_default();

    let attributes = value.get("attributes").unwrap_or(&serde_json::Value::Null).clone();

    match name {
        "gemini_cli.user_prompt" => TelemetryEvent::UserPrompt {
            text: attributes
                .get("prompt")
                .or_else(|| attributes.get("text"))
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
        },
        "gemini_cli.api_request" => TelemetryEvent::ApiRequest {
            raw: attributes
                .get("request")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string())
                .unwrap_or_else(|| attributes.to_string()),
        },
        "gemini_cli.api_response" => TelemetryEvent::ApiResponse {
            input_tokens: attributes.get("input_tokens").and_then(|v| v.as_u64()).unwrap_or(0),
            output_tokens: attributes.get("output_tokens").and_then(|v| v.as_u64()).unwrap_or(0),
            total_tokens: attributes.get("total_tokens").and_then(|v| v.as_u64()).unwrap_or(0),
            text: attributes
                .get("response_text")
                .or_else(|| attributes.get("text"))
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
        },
        "gemini_cli.tool_call" | "function_call" => TelemetryEvent::ToolCall {
            name: attributes
                .get("function_name")
                .or_else(|| attributes.get("name"))
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
            success: attributes.get("success").and_then(|v| v.as_bool()).unwrap_or(false),
            duration_ms: attributes.get("duration_ms").and_then(|v| v.as_u64()).unwrap_or(0),
            args_json: attributes
                .get("args")
                .map(|v| v.to_string())
                .unwrap_or_else(|| "{}".to_string()),
        },
        _ => TelemetryEvent::Unknown { raw: raw.to_string() },
    }
}

/// Wait for `path` to appear and become non-empty, up to `timeout`, then
/// stream-parse every top-level object into `ExecutionTelemetry`. Returns
/// an empty (default) telemetry record if the file never appears — this is
/// not an error, the subprocess may simply have emitted nothing before
/// being killed by loop protection.
#[instrument(skip(path))]
pub async fn parse_telemetry_file(
    path: &Path,
    wait_timeout: Duration,
    max_file_bytes: usize,
) -> std::io::Result<ExecutionTelemetry> {
    let deadline = tokio::time::Instant::now() + wait_timeout;
    loop {
        match tokio::fs::metadata(path).await {
            Ok(meta) if meta.len() > 0 => break,
            _ => {
                if tokio::time::Instant::now() >= deadline {
                    warn!(path = %path.display(), "telemetry file never appeared within wait timeout");
                    return Ok(ExecutionTelemetry::default());
                }
                tokio::time::sleep(Duration::from_millis(200)).await;
            }
        }
    }

    let mut content = tokio::fs::read_to_string(path).await?;
    if content.len() > max_file_bytes {
        warn!(
            bytes = content.len(),
            cap = max_file_bytes,
            "telemetry file exceeded size cap, truncating"
        );
        content.truncate(max_file_bytes);
    }

    let mut scanner = TelemetryObjectScanner::new();
    let mut telemetry = ExecutionTelemetry::default();
    for object in scanner.feed(&content) {
        telemetry.ingest(parse_event(&object));
    }

    backfill_tool_results_from_history(&mut telemetry);
    Ok(telemetry)
}

/// Spec §4.F: "Attach tool results back onto tool-call records by parsing
/// the accumulated conversation history for `functionResponse` entries
/// matching each tool call that lacks a result." The conversation history
/// is the concatenation of every `api_request` raw payload.
fn backfill_tool_results_from_history(telemetry: &mut ExecutionTelemetry) {
    let responses = extract_function_responses(&telemetry.conversation_history);
    telemetry.backfill_tool_results(responses.iter().map(|(n, r)| (n.as_str(), r.clone())));
}

/// Scans raw conversation-history text for `functionResponse` entries of
/// shape `{"functionResponse": {"name": "...", "response": {...}}}` and
/// returns (name, response-as-string) pairs in order of appearance.
fn extract_function_responses(history: &str) -> Vec<(String, String)> {
    let mut scanner = TelemetryObjectScanner::new();
    let mut out = Vec::new();
    for object in scanner.feed(history) {
        let Ok(value) = serde_json::from_str::<serde_json::Value>(&object) else {
            continue;
        };
        let Some(function_response) = value.get("functionResponse") else {
            continue;
        };
        let Some(name) = function_response.get("name").and_then(|v| v.as_str()) else {
            continue;
        };
        let response = function_response
            .get("response")
            .map(|v| v.to_string())
            .unwrap_or_default();
        out.push((name.to_string(), response));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scanner_splits_back_to_back_objects() {
        let mut scanner = TelemetryObjectScanner::new();
        let objects = scanner.feed(r#"{"a":1}{"b":2}"#);
        assert_eq!(objects, vec![r#"{"a":1}"#, r#"{"b":2}"#]);
    }

    #[test]
    fn scanner_handles_nested_braces_and_escaped_quotes() {
        let mut scanner = TelemetryObjectScanner::new();
        let objects = scanner.feed(r#"{"a":{"b":"x\"y"}}"#);
        assert_eq!(objects, vec![r#"{"a":{"b":"x\"y"}}"#]);
    }

    #[test]
    fn scanner_handles_chunk_boundaries_mid_object() {
        let mut scanner = TelemetryObjectScanner::new();
        assert!(scanner.feed(r#"{"a":"hel"#).is_empty());
        let objects = scanner.feed(r#"lo"}"#);
        assert_eq!(objects, vec![r#"{"a":"hello"}"#]);
    }

    #[test]
    fn parse_event_dispatches_known_kinds() {
        let event = parse_event(r#"{"name":"gemini_cli.user_prompt","attributes":{"prompt":"hi"}}"#);
        assert_eq!(event, TelemetryEvent::UserPrompt { text: "hi".to_string() });

        let event = parse_event(
            r#"{"name":"gemini_cli.api_response","attributes":{"input_tokens":5,"output_tokens":2,"total_tokens":7,"text":"ok"}}"#,
        );
        assert_eq!(
            event,
            TelemetryEvent::ApiResponse {
                input_tokens: 5,
                output_tokens: 2,
                total_tokens: 7,
                text: "ok".to_string(),
            }
        );
    }

    #[test]
    fn parse_event_unknown_kind_preserved_raw() {
        let raw = r#"{"name":"something_else"}"#;
        let event = parse_event(raw);
        assert_eq!(event, TelemetryEvent::Unknown { raw: raw.to_string() });
    }

    #[test]
    fn backfill_matches_function_response_by_name() {
        let mut telemetry = ExecutionTelemetry::default();
        telemetry.ingest(TelemetryEvent::ToolCall {
            name: "grep".to_string(),
            success: true,
            duration_ms: 1,
            args_json: "{}".to_string(),
        });
        telemetry.conversation_history =
            r#"{"functionResponse":{"name":"grep","response":{"matches":3}}}"#.to_string();

        backfill_tool_results_from_history(&mut telemetry);
        assert_eq!(
            telemetry.tool_calls[0].result_json.as_deref(),
            Some(r#"{"matches":3}"#)
        );
    }

    #[tokio::test]
    async fn parse_telemetry_file_returns_default_when_file_never_appears() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("never-written.json");
        let telemetry = parse_telemetry_file(&missing, Duration::from_millis(50), 1024)
            .await
            .unwrap();
        assert_eq!(telemetry.tool_calls.len(), 0);
    }

    #[tokio::test]
    async fn parse_telemetry_file_ingests_written_events() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("telemetry.json");
        tokio::fs::write(
            &path,
            r#"{"name":"gemini_cli.user_prompt","attributes":{"prompt":"build it"}}{"name":"gemini_cli.tool_call","attributes":{"name":"grep","success":true,"duration_ms":5,"args":{}}}"#,
        )
        .await
        .unwrap();

        let telemetry = parse_telemetry_file(&path, Duration::from_secs(1), 1024 * 1024)
            .await
            .unwrap();
        assert_eq!(telemetry.prompt.as_deref(), Some("build it"));
        assert_eq!(telemetry.tool_calls.len(), 1);
        assert_eq!(telemetry.tool_calls[0].name, "grep");
    }
}
