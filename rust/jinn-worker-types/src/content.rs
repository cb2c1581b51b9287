//! Delivery payload content (spec §4.G), modeled as tagged variants per the
//! design note rather than an untyped JSON blob.

use crate::telemetry_event::ExecutionTelemetry;
use serde::{Deserialize, Serialize};

/// An IPFS content descriptor parsed from telemetry and output, attached to
/// a delivery as an artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub ipfs_hash: String,
    pub name: Option<String>,
    pub mime_type: Option<String>,
}

/// Versioned shape of a request's content blob. `V1` is what this
/// workspace produces; `V2` is reserved for a future wire revision so
/// deserializing an older or newer delivery never panics this crate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "version")]
pub enum RequestContent {
    #[serde(rename = "1")]
    V1 {
        output: String,
        status: Option<String>,
        artifacts: Vec<Artifact>,
    },
    #[serde(rename = "2")]
    V2 {
        output: String,
        summary: Option<String>,
        status: Option<String>,
        artifacts: Vec<Artifact>,
    },
}

/// The complete payload the Deliverer submits via the multisig helper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryPayload {
    pub request_id: String,
    pub output: String,
    pub summary: Option<String>,
    pub last_status: Option<String>,
    pub telemetry: Option<ExecutionTelemetry>,
    pub artifacts: Vec<Artifact>,
    pub cancelled: bool,
}

impl DeliveryPayload {
    pub fn success(request_id: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            output: output.into(),
            summary: None,
            last_status: None,
            telemetry: None,
            artifacts: Vec::new(),
            cancelled: false,
        }
    }

    /// A synthetic "cancelled: missing dependency" delivery (spec §4.D).
    pub fn cancelled_missing_dependency(request_id: impl Into<String>, dependency: &str) -> Self {
        Self {
            request_id: request_id.into(),
            output: format!("cancelled: missing dependency '{dependency}'"),
            summary: None,
            last_status: Some("cancelled".to_string()),
            telemetry: None,
            artifacts: Vec::new(),
            cancelled: true,
        }
    }

    /// An empty heartbeat delivery (spec §4.E).
    pub fn heartbeat(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            output: String::new(),
            summary: None,
            last_status: None,
            telemetry: None,
            artifacts: Vec::new(),
            cancelled: false,
        }
    }

    pub fn to_content(&self) -> RequestContent {
        RequestContent::V1 {
            output: self.output.clone(),
            status: self.last_status.clone(),
            artifacts: self.artifacts.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancelled_payload_contains_missing_dependency_marker() {
        let payload = DeliveryPayload::cancelled_missing_dependency("0xabc", "build-step");
        assert!(payload.cancelled);
        assert!(payload.output.contains("missing dependency"));
        assert!(payload.output.contains("build-step"));
    }

    #[test]
    fn heartbeat_payload_has_empty_output() {
        let payload = DeliveryPayload::heartbeat("0xabc");
        assert!(!payload.cancelled);
        assert!(payload.output.is_empty());
    }

    #[test]
    fn content_round_trips_through_json() {
        let payload = DeliveryPayload::success("0xabc", "done");
        let content = payload.to_content();
        let json = serde_json::to_string(&content).unwrap();
        let back: RequestContent = serde_json::from_str(&json).unwrap();
        assert_eq!(content, back);
    }
}
