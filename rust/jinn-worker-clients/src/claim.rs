//! Claim arbitration client (spec §4.E, §6): a signed HTTPS POST asking a
//! third party to arbitrate which mech gets to execute a request.

use crate::error::ClientError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;

/// Outbound claim body. `signature` and `signed_at` are produced by the
/// signing proxy before this struct is constructed; this client never
/// touches key material.
#[derive(Debug, Clone, Serialize)]
pub struct ClaimRequest {
    pub request_id: String,
    pub mech_address: String,
    pub service_id: u64,
    pub signed_at: i64,
    pub signature: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(tag = "verdict", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClaimVerdict {
    Accepted,
    AlreadyClaimed { by_mech: Option<String> },
    InProgress { by_mech: Option<String> },
    Completed,
    Rejected { reason: String },
}

impl ClaimVerdict {
    /// Whether the caller should proceed to execute the request.
    pub fn grants_execution(&self) -> bool {
        matches!(self, ClaimVerdict::Accepted)
    }
}

#[async_trait]
pub trait ClaimClient: Send + Sync {
    async fn submit_claim(&self, request: &ClaimRequest) -> Result<ClaimVerdict, ClientError>;
}

/// Production implementation: a single signed POST to the claim-service
/// base URL, `{base}/claims`.
pub struct HttpClaimClient {
    http: reqwest::Client,
    base_url: String,
}

impl HttpClaimClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl ClaimClient for HttpClaimClient {
    async fn submit_claim(&self, request: &ClaimRequest) -> Result<ClaimVerdict, ClientError> {
        let url = format!("{}/claims", self.base_url.trim_end_matches('/'));
        let response = self.http.post(&url).json(request).send().await?;

        if response.status() == reqwest::StatusCode::CONFLICT {
            let verdict: ClaimVerdict = response
                .json()
                .await
                .map_err(|e| ClientError::Deserialize(e.to_string()))?;
            return Ok(verdict);
        }
        if !response.status().is_success() {
            return Err(ClientError::Transport(format!(
                "claim service returned status {}",
                response.status()
            )));
        }
        response
            .json::<ClaimVerdict>()
            .await
            .map_err(|e| ClientError::Deserialize(e.to_string()))
    }
}

/// Programmable mock: a scripted verdict per request id, falling back to
/// `default_verdict` for ids not explicitly scripted.
pub struct MockClaimClient {
    scripted: Mutex<HashMap<String, ClaimVerdict>>,
    default_verdict: ClaimVerdict,
    pub submissions: Mutex<Vec<ClaimRequest>>,
}

impl MockClaimClient {
    pub fn new(default_verdict: ClaimVerdict) -> Self {
        Self {
            scripted: Mutex::new(HashMap::new()),
            default_verdict,
            submissions: Mutex::new(Vec::new()),
        }
    }

    pub fn script(&self, request_id: impl Into<String>, verdict: ClaimVerdict) {
        self.scripted.lock().unwrap().insert(request_id.into(), verdict);
    }
}

#[async_trait]
impl ClaimClient for MockClaimClient {
    async fn submit_claim(&self, request: &ClaimRequest) -> Result<ClaimVerdict, ClientError> {
        self.submissions.lock().unwrap().push(request.clone());
        let scripted = self.scripted.lock().unwrap();
        Ok(scripted
            .get(&request.request_id)
            .cloned()
            .unwrap_or_else(|| self.default_verdict.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_request() -> ClaimRequest {
        ClaimRequest {
            request_id: "0x1".to_string(),
            mech_address: "0xMECH".to_string(),
            service_id: 7,
            signed_at: 1_700_000_000,
            signature: "deadbeef".to_string(),
        }
    }

    #[tokio::test]
    async fn mock_scripts_per_request_id_and_falls_back_to_default() {
        let mock = MockClaimClient::new(ClaimVerdict::Accepted);
        mock.script(
            "0x1",
            ClaimVerdict::AlreadyClaimed {
                by_mech: Some("0xOTHER".to_string()),
            },
        );

        let verdict = mock.submit_claim(&sample_request()).await.unwrap();
        assert!(!verdict.grants_execution());

        let mut other = sample_request();
        other.request_id = "0x2".to_string();
        let verdict = mock.submit_claim(&other).await.unwrap();
        assert!(verdict.grants_execution());

        assert_eq!(mock.submissions.lock().unwrap().len(), 2);
    }
}
