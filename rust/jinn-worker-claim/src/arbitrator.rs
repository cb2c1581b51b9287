//! Claim Arbitrator (spec §4.E): asks a third-party claim service to
//! arbitrate which mech executes a request, signing the request with the
//! key held by the in-process signing proxy.

use jinn_worker_clients::{ClaimClient, ClaimRequest, ClaimVerdict, ClientError, CredentialBridgeClient};
use jinn_worker_types::{Request, HEARTBEAT_JOB_NAME};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::instrument;

/// `__heartbeat__` requests bypass claim arbitration entirely: there is
/// nothing to contend over, so the worker proceeds straight to execution
/// (spec §4.E, §3 glossary).
pub fn is_heartbeat_shortcut(request: &Request) -> bool {
    request.job_name.as_deref() == Some(HEARTBEAT_JOB_NAME)
}

/// Spec §4.E priority-mech pre-execution refinement: even if a request
/// passed Eligibility, a worker skips claiming it if another mech still
/// holds exclusive priority and the response-timeout window has not
/// elapsed.
pub fn should_attempt_claim(request: &Request, our_mech: &str, now_unix: i64) -> bool {
    !request.is_reserved_for_other_mech(our_mech, now_unix)
}

/// Spec §4.E step 1: if the candidate requires credentials, re-probe the
/// credential bridge with the request id so it can verify venture-scoped
/// credentials more precisely than the broader Eligibility-stage probe
/// could. Returns `false` (insufficient, caller should skip) when the
/// bridge has no record, the operator isn't registered, or any required
/// tool is missing from the verified set.
#[instrument(skip(bridge))]
pub async fn credential_reprobe_sufficient(
    request: &Request,
    bridge: &Arc<dyn CredentialBridgeClient>,
    operator_id: &str,
    venture_id: &str,
) -> Result<bool, ClientError> {
    if !request.requires_tools() {
        return Ok(true);
    }
    let tools = request.required_tools.as_ref().expect("requires_tools implies required_tools is Some");

    let credentials = bridge.credentials_for_request(operator_id, venture_id, &request.id).await?;
    Ok(match credentials {
        None => false,
        Some(creds) => creds.registered && tools.iter().all(|tool| creds.venture_scoped_tools.iter().any(|t| t == tool)),
    })
}

fn canonical_claim_message(request_id: &str, mech_address: &str, service_id: u64, signed_at: i64) -> String {
    format!("{request_id}|{mech_address}|{service_id}|{signed_at}")
}

fn claim_message_digest_hex(request_id: &str, mech_address: &str, service_id: u64, signed_at: i64) -> String {
    let message = canonical_claim_message(request_id, mech_address, service_id, signed_at);
    let digest = Sha256::digest(message.as_bytes());
    hex::encode(digest)
}

/// Posts the claim digest to the signing proxy's `/sign/message` route and
/// returns the hex-encoded signature. The proxy is the only component that
/// ever touches the private key (spec §4.I, §4.J).
async fn sign_claim_digest(
    http: &reqwest::Client,
    proxy_base_url: &str,
    proxy_bearer_token: &str,
    message_hex: &str,
) -> Result<String, ClientError> {
    let response = http
        .post(format!("{proxy_base_url}/sign/message"))
        .bearer_auth(proxy_bearer_token)
        .json(&serde_json::json!({ "message_hex": message_hex }))
        .send()
        .await?;
    if !response.status().is_success() {
        return Err(ClientError::Transport(format!(
            "signing proxy returned status {}",
            response.status()
        )));
    }
    let body: serde_json::Value = response.json().await.map_err(|e| ClientError::Deserialize(e.to_string()))?;
    body.get("signature_hex")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| ClientError::UnexpectedResponse("missing signature_hex".to_string()))
}

/// Builds, signs, and submits a claim for `request`. Returns the verdict
/// exactly as the claim service reported it; the caller decides what to do
/// with `AlreadyClaimed`/`InProgress`/`Completed`/`Rejected`.
#[instrument(skip(claim_client, http, proxy_bearer_token))]
pub async fn submit_claim(
    request: &Request,
    claim_client: &Arc<dyn ClaimClient>,
    http: &reqwest::Client,
    proxy_base_url: &str,
    proxy_bearer_token: &str,
    mech_address: &str,
    service_id: u64,
    now_unix: i64,
) -> Result<ClaimVerdict, ClientError> {
    let message_hex = claim_message_digest_hex(&request.id, mech_address, service_id, now_unix);
    let signature = sign_claim_digest(http, proxy_base_url, proxy_bearer_token, &message_hex).await?;

    let claim_request = ClaimRequest {
        request_id: request.id.clone(),
        mech_address: mech_address.to_string(),
        service_id,
        signed_at: now_unix,
        signature,
    };
    claim_client.submit_claim(&claim_request).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use jinn_worker_clients::{MockCredentialBridgeClient, OperatorCredentials};
    use std::collections::HashSet;

    fn req(job_name: Option<&str>) -> Request {
        Request {
            id: "0x1".to_string(),
            mech: "0xMECH".to_string(),
            sender: "0xSENDER".to_string(),
            workstream_id: None,
            block_timestamp: 0,
            ipfs_hash: "Qm".to_string(),
            delivered: false,
            dependencies: None,
            response_timeout: None,
            required_tools: None,
            job_name: job_name.map(|s| s.to_string()),
        }
    }

    #[test]
    fn heartbeat_shortcut_detected() {
        assert!(is_heartbeat_shortcut(&req(Some(HEARTBEAT_JOB_NAME))));
        assert!(!is_heartbeat_shortcut(&req(Some("build"))));
        assert!(!is_heartbeat_shortcut(&req(None)));
    }

    #[test]
    fn claim_skipped_while_reserved_for_other_mech() {
        let mut request = req(Some("build"));
        request.response_timeout = Some(5_000);
        assert!(!should_attempt_claim(&request, "0xOTHER", 1_000));
        assert!(should_attempt_claim(&request, "0xOTHER", 6_000));
        assert!(should_attempt_claim(&request, "0xMECH", 1_000));
    }

    #[test]
    fn digest_is_deterministic_and_order_sensitive() {
        let a = claim_message_digest_hex("0x1", "0xMECH", 7, 100);
        let b = claim_message_digest_hex("0x1", "0xMECH", 7, 100);
        let c = claim_message_digest_hex("0x1", "0xMECH", 8, 100);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[tokio::test]
    async fn credential_reprobe_passes_when_request_needs_no_tools() {
        let bridge: Arc<dyn CredentialBridgeClient> = Arc::new(MockCredentialBridgeClient::new());
        let request = req(Some("build"));
        assert!(credential_reprobe_sufficient(&request, &bridge, "op-1", "venture-1").await.unwrap());
    }

    #[tokio::test]
    async fn credential_reprobe_fails_when_bridge_has_no_record() {
        let bridge: Arc<dyn CredentialBridgeClient> = Arc::new(MockCredentialBridgeClient::new());
        let mut request = req(Some("build"));
        request.required_tools = Some(HashSet::from(["github".to_string()]));
        assert!(!credential_reprobe_sufficient(&request, &bridge, "op-1", "venture-1").await.unwrap());
    }

    #[tokio::test]
    async fn credential_reprobe_fails_on_partial_tool_coverage() {
        let mock = Arc::new(MockCredentialBridgeClient::new());
        mock.set(
            "op-1",
            OperatorCredentials {
                operator_id: "op-1".to_string(),
                registered: true,
                venture_scoped_tools: vec!["github".to_string()],
                trusted: false,
            },
        );
        let bridge: Arc<dyn CredentialBridgeClient> = mock;
        let mut request = req(Some("build"));
        request.required_tools = Some(HashSet::from(["github".to_string(), "aws".to_string()]));
        assert!(!credential_reprobe_sufficient(&request, &bridge, "op-1", "venture-1").await.unwrap());
    }

    #[tokio::test]
    async fn credential_reprobe_passes_when_fully_covered() {
        let mock = Arc::new(MockCredentialBridgeClient::new());
        mock.set(
            "op-1",
            OperatorCredentials {
                operator_id: "op-1".to_string(),
                registered: true,
                venture_scoped_tools: vec!["github".to_string(), "aws".to_string()],
                trusted: false,
            },
        );
        let bridge: Arc<dyn CredentialBridgeClient> = mock;
        let mut request = req(Some("build"));
        request.required_tools = Some(HashSet::from(["github".to_string()]));
        assert!(credential_reprobe_sufficient(&request, &bridge, "op-1", "venture-1").await.unwrap());
    }
}
