//! Deliverer (spec §4.G): posts the result on-chain through the service
//! Safe, grounded on the same sign-then-submit shape
//! `jinn-worker-claim::arbitrator::submit_claim` uses for claim requests.

use crate::content::{clean_output, extract_artifacts, extract_summary};
use jinn_worker_clients::{ClientError, DeliveryOutcome, MultisigDeliverer};
use jinn_worker_config::schema::DeliverySection;
use jinn_worker_executor::{extract_last_status, ExecutionOutcome};
use jinn_worker_types::{DeliveryPayload, ExecutionTelemetry, SessionState};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Result of one delivery attempt (spec §9 Open Question resolution #1):
/// `needs_external_retry` is set whenever the delivery attempt did not
/// reach on-chain confirmation, even though the job is still marked
/// executed-this-session to preserve the source's dedup behavior.
#[derive(Debug, Clone)]
pub struct DeliveryResult {
    pub outcome: DeliveryOutcome,
    pub needs_external_retry: bool,
}

/// Builds the `DeliveryPayload` from a completed execution, following spec
/// §4.G step 1: ANSI-stripped/OTel-scrubbed output, a structured summary,
/// the last status (stream-extracted, falling back to a second scan of the
/// full output), telemetry, and IPFS artifact descriptors.
pub fn build_delivery_payload(request_id: &str, outcome: &ExecutionOutcome) -> DeliveryPayload {
    let cleaned_output = clean_output(&outcome.output);
    let summary = extract_summary(&cleaned_output);
    let last_status = outcome.last_status.clone().or_else(|| extract_last_status(&cleaned_output));

    let mut artifact_source = cleaned_output.clone();
    if let Some(prompt) = &outcome.telemetry.prompt {
        artifact_source.push('\n');
        artifact_source.push_str(prompt);
    }
    let artifacts = extract_artifacts(&artifact_source);

    DeliveryPayload {
        request_id: request_id.to_string(),
        output: cleaned_output,
        summary,
        last_status,
        telemetry: Some(outcome.telemetry.clone()),
        artifacts,
        cancelled: false,
    }
}

fn canonical_delivery_digest_hex(payload: &DeliveryPayload) -> Result<String, ClientError> {
    let content = payload.to_content();
    let serialized = serde_json::to_string(&content).map_err(|e| ClientError::Deserialize(e.to_string()))?;
    let message = format!("{}|{}", payload.request_id, serialized);
    Ok(hex::encode(Sha256::digest(message.as_bytes())))
}

async fn sign_delivery_digest(
    http: &reqwest::Client,
    proxy_base_url: &str,
    proxy_bearer_token: &str,
    message_hex: &str,
) -> Result<String, ClientError> {
    let response = http
        .post(format!("{proxy_base_url}/sign/transaction"))
        .bearer_auth(proxy_bearer_token)
        .json(&serde_json::json!({ "tx_hex": message_hex }))
        .send()
        .await?;
    if !response.status().is_success() {
        return Err(ClientError::Transport(format!("signing proxy returned status {}", response.status())));
    }
    let body: serde_json::Value = response.json().await.map_err(|e| ClientError::Deserialize(e.to_string()))?;
    body.get("signature_hex")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| ClientError::UnexpectedResponse("missing signature_hex".to_string()))
}

/// Runs the full deliver algorithm (spec §4.G): build the calldata, sign it
/// through the proxy, submit via the multisig, and mark the session map on
/// success or attempted-failure alike. `session` is locked by the caller
/// for the duration of the cycle; this function only mutates it.
#[allow(clippy::too_many_arguments)]
#[instrument(skip(multisig, http, proxy_bearer_token, session, config))]
pub async fn deliver(
    payload: &DeliveryPayload,
    multisig: &Arc<dyn MultisigDeliverer>,
    http: &reqwest::Client,
    proxy_base_url: &str,
    proxy_bearer_token: &str,
    safe_address: &str,
    config: &DeliverySection,
    session: &mut SessionState,
    now_unix: i64,
) -> Result<DeliveryResult, ClientError> {
    let digest = canonical_delivery_digest_hex(payload)?;
    let signature = sign_delivery_digest(http, proxy_base_url, proxy_bearer_token, &digest).await?;
    let calldata_hex = format!("{digest}{signature}");

    let outcome = multisig.deliver(safe_address, &calldata_hex, config.confirmation_timeout).await?;

    // Spec Open Question #1: mark executed-this-session unconditionally
    // once a delivery attempt has been made, even when confirmation timed
    // out, to preserve the source's dedup semantics.
    session.mark_executed(&payload.request_id, now_unix);

    let needs_external_retry = matches!(outcome, DeliveryOutcome::TimedOut { .. });
    if needs_external_retry {
        warn!(request_id = %payload.request_id, "delivery confirmation timed out, external retry required");
    } else {
        info!(request_id = %payload.request_id, "delivery confirmed");
    }

    Ok(DeliveryResult {
        outcome,
        needs_external_retry,
    })
}

/// Applies the configured post-delivery delay to smooth API usage (spec
/// §4.G step 4). A no-op when `post_delivery_delay` is zero.
pub async fn apply_post_delivery_delay(config: &DeliverySection) {
    if !config.post_delivery_delay.is_zero() {
        tokio::time::sleep(config.post_delivery_delay).await;
    }
}
