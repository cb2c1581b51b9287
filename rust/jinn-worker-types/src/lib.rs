//! Shared data model for the Jinn worker core.
//!
//! Every type here is a plain record or tagged enum — no runtime schema
//! introspection. Downstream crates (`jinn-worker-discovery`,
//! `jinn-worker-executor`, ...) build on these rather than passing around
//! loosely-typed JSON.

pub mod content;
pub mod job_definition;
pub mod request;
pub mod service;
pub mod session;
pub mod telemetry_event;
pub mod worker_id;

pub use content::{Artifact, DeliveryPayload, RequestContent};
pub use job_definition::{CodeMetadata, JobDefinition, JobDefinitionStatus};
pub use request::Request;
pub use service::{ActiveServiceContext, ActiveServiceHandle, ServiceRecord};
pub use session::{EpochGateState, SessionState};
pub use telemetry_event::{ExecutionTelemetry, TelemetryEvent, ToolCallRecord};
pub use worker_id::WorkerId;

use thiserror::Error;

/// Classification of how a job execution failed, named (not typed) after
/// the error kinds enumerated in the spec's error-handling design.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum JobErrorKind {
    Timeout,
    LoopProtection,
    ProcessError,
    ApiError,
    NetworkError,
    ToolError,
    SystemError,
}

/// Sum-typed result returned by the Executor on failure, replacing the
/// `throw { error, telemetry }` pattern the source uses.
#[derive(Debug, Clone, Error)]
#[error("job execution failed ({kind:?}): {message}")]
pub struct JobError {
    pub kind: JobErrorKind,
    pub message: String,
    pub telemetry: Option<ExecutionTelemetry>,
    pub termination_reason: Option<String>,
}

impl JobError {
    pub fn new(kind: JobErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            telemetry: None,
            termination_reason: None,
        }
    }

    pub fn with_telemetry(mut self, telemetry: ExecutionTelemetry) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    pub fn with_termination_reason(mut self, reason: impl Into<String>) -> Self {
        self.termination_reason = Some(reason.into());
        self
    }
}

/// Reserved job name that skips the LLM entirely and is delivered as an
/// empty heartbeat payload.
pub const HEARTBEAT_JOB_NAME: &str = "__heartbeat__";
