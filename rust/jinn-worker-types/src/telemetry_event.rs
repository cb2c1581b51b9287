//! Tagged telemetry event variants (spec §9 design note), replacing
//! runtime JSON introspection of the subprocess's OpenTelemetry stream.

use serde::{Deserialize, Serialize};

/// One decoded OpenTelemetry-shaped event emitted by the LLM subprocess.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum TelemetryEvent {
    UserPrompt { text: String },
    ApiRequest { raw: String },
    ApiResponse {
        input_tokens: u64,
        output_tokens: u64,
        total_tokens: u64,
        text: String,
    },
    ToolCall {
        name: String,
        success: bool,
        duration_ms: u64,
        args_json: String,
    },
    /// Anything not matching a recognized event kind; preserved raw rather
    /// than dropped, so the Deliverer can still attach it as evidence.
    Unknown { raw: String },
}

/// Record of one tool invocation, with its result backfilled from the
/// accumulated conversation history after the subprocess exits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub name: String,
    pub success: bool,
    pub duration_ms: u64,
    pub args_json: String,
    pub result_json: Option<String>,
}

/// Accumulated telemetry for one job execution, built by streaming over
/// the subprocess's telemetry file (spec §4.F).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionTelemetry {
    pub prompt: Option<String>,
    /// Concatenated raw api_request payloads, used to backfill tool results.
    pub conversation_history: String,
    pub max_total_tokens: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub last_response_text: Option<String>,
    pub tool_calls: Vec<ToolCallRecord>,
}

impl ExecutionTelemetry {
    pub fn ingest(&mut self, event: TelemetryEvent) {
        match event {
            TelemetryEvent::UserPrompt { text } => {
                self.prompt = Some(text);
            }
            TelemetryEvent::ApiRequest { raw } => {
                self.conversation_history.push_str(&raw);
                self.conversation_history.push('\n');
            }
            TelemetryEvent::ApiResponse {
                input_tokens,
                output_tokens,
                total_tokens,
                text,
            } => {
                self.max_total_tokens = self.max_total_tokens.max(total_tokens);
                self.input_tokens += input_tokens;
                self.output_tokens += output_tokens;
                self.last_response_text = Some(text);
            }
            TelemetryEvent::ToolCall {
                name,
                success,
                duration_ms,
                args_json,
            } => {
                self.tool_calls.push(ToolCallRecord {
                    name,
                    success,
                    duration_ms,
                    args_json,
                    result_json: None,
                });
            }
            TelemetryEvent::Unknown { .. } => {}
        }
    }

    /// Attach a `functionResponse` result parsed out of the accumulated
    /// conversation history onto any tool call still missing one. Matches
    /// by tool name and takes calls in declaration order, mirroring how the
    /// source backfills results after the process exits.
    pub fn backfill_tool_results<'a>(&mut self, responses: impl IntoIterator<Item = (&'a str, String)>) {
        for (name, result) in responses {
            if let Some(call) = self
                .tool_calls
                .iter_mut()
                .find(|c| c.name == name && c.result_json.is_none())
            {
                call.result_json = Some(result);
            }
        }
    }
}
