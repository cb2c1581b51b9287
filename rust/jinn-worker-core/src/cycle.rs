//! Main per-cycle orchestration (spec §2, §4): Discovery → Eligibility →
//! Claim → Executor → Deliverer → Staking → Rotator, in that strict
//! sequential order within one cycle.

use std::path::PathBuf;

use jinn_worker_claim::arbitrator::{credential_reprobe_sufficient, is_heartbeat_shortcut, should_attempt_claim, submit_claim};
use jinn_worker_delivery::content::clean_output;
use jinn_worker_delivery::deliverer::{apply_post_delivery_delay, build_delivery_payload, deliver};
use jinn_worker_discovery::discovery::{discover_candidates, verify_delivery_mech};
use jinn_worker_discovery::eligibility::{evaluate_eligibility, reorder_trusted_operator_first, should_exit_for_stuck_cycles, EligibilityDecision};
use jinn_worker_executor::{run_job, ExecutionOutcome, ExecutionRequest};
use jinn_worker_staking::epoch_gate::{refresh_epoch_gate, should_skip_discovery};
use jinn_worker_staking::rotator::evaluate_and_rotate;
use jinn_worker_types::{DeliveryPayload, ExecutionTelemetry, Request, ServiceRecord};

use crate::state::WorkerState;

/// Cache TTL for the staking epoch gate; refreshed lazily whenever it goes
/// stale rather than on a fixed cycle cadence (spec §4.H step 1).
const EPOCH_GATE_CACHE_TTL_SECS: i64 = 300;

#[derive(Debug, Clone, Copy, Default)]
pub struct CycleOutcome {
    pub processed_request: bool,
    pub stuck_exit: bool,
}

/// Runs one full cycle: the staking activity gate, Discovery, Eligibility,
/// Claim, Executor, Deliverer, then Rotator evaluation. Non-fatal errors
/// from any one candidate are logged and the loop moves on to the next.
pub async fn run_cycle(state: &mut WorkerState, now_unix: i64) -> CycleOutcome {
    let active = state.active.snapshot();
    let active_record = state.records_by_config_id.get(&active.config_id).cloned();

    if let Some(record) = &active_record {
        match refresh_epoch_gate(
            &state.clients.chain_reader,
            &record.staking_contract_address,
            active.service_id,
            &record.service_safe_address,
            None,
            state.config.staking.activity_target_requests,
            state.epoch_gate,
            now_unix,
            EPOCH_GATE_CACHE_TTL_SECS,
        )
        .await
        {
            Ok(gate) => state.epoch_gate = gate,
            Err(err) => tracing::warn!(error = %err, "epoch gate refresh failed, proceeding with stale cache"),
        }

        if should_skip_discovery(&state.epoch_gate) {
            tracing::debug!(service_id = active.service_id, "activity target already met, skipping discovery");
            return finish(state, false);
        }
    }

    let candidates = match discover_candidates(&state.clients.indexer, &state.clients.chain_reader, &state.config.discovery).await {
        Ok(candidates) => candidates,
        Err(err) => {
            tracing::warn!(error = %err, "discovery failed this cycle");
            return finish(state, false);
        }
    };

    let mut verified = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        match verify_delivery_mech(&state.clients.chain_reader, &candidate, &active.mech_address, now_unix).await {
            Ok(true) => verified.push(candidate),
            Ok(false) => {}
            Err(err) => {
                // Spec §4.C step 4 failure semantics: fail open and keep
                // the candidate; Claim will reject it if another mech
                // actually holds delivery rights.
                tracing::warn!(request_id = %candidate.id, error = %err, "delivery-mech verification failed, keeping candidate");
                verified.push(candidate);
            }
        }
    }

    let discovery_order = verified.clone();
    let verified = match reorder_trusted_operator_first(
        verified,
        &state.clients.credential_bridge,
        &state.config.worker.operator_id,
        &state.config.worker.venture_id,
    )
    .await
    {
        Ok(reordered) => reordered,
        Err(err) => {
            tracing::warn!(error = %err, "trusted-operator reorder failed, using discovery order");
            discovery_order
        }
    };

    let mut any_eligible = false;
    let mut processed_request = false;

    for candidate in &verified {
        let decision = match evaluate_eligibility(
            candidate,
            &state.clients.indexer,
            &state.clients.credential_bridge,
            &state.session,
            &state.config.eligibility,
            &state.config.worker.operator_id,
            &state.config.worker.venture_id,
            now_unix,
        )
        .await
        {
            Ok(decision) => decision,
            Err(err) => {
                tracing::warn!(request_id = %candidate.id, error = %err, "eligibility evaluation failed");
                continue;
            }
        };

        match decision {
            EligibilityDecision::Eligible => {
                any_eligible = true;
                if try_process_candidate(state, active_record.as_ref(), candidate, now_unix).await {
                    processed_request = true;
                    break;
                }
            }
            EligibilityDecision::AlreadyExecuted
            | EligibilityDecision::MissingCapability(_)
            | EligibilityDecision::MissingCredential(_)
            | EligibilityDecision::WaitingOnDependency { .. } => {}
            EligibilityDecision::RedispatchDependency { workstream, dependency } => {
                state.session.mark_redispatched(&workstream, &dependency, now_unix);
                tracing::info!(%workstream, %dependency, "redispatched stale dependency");
            }
            EligibilityDecision::CancelMissingDependency { dependency } => {
                state.session.mark_cancelled(&candidate.id, &dependency, now_unix);
                tracing::info!(request_id = %candidate.id, %dependency, "auto-cancelling request with missing dependency");
                deliver_cancellation(state, &candidate.id, &dependency, &active.mech_address, now_unix).await;
            }
        }
    }

    if any_eligible {
        state.session.reset_stuck_cycles();
    } else {
        state.session.record_stuck_cycle();
    }
    let stuck_exit = should_exit_for_stuck_cycles(&state.session, state.config.worker.max_stuck_cycles);

    maybe_rotate(state, now_unix).await;

    CycleOutcome {
        processed_request,
        stuck_exit,
    }
}

fn finish(state: &mut WorkerState, processed_request: bool) -> CycleOutcome {
    let stuck_exit = should_exit_for_stuck_cycles(&state.session, state.config.worker.max_stuck_cycles);
    CycleOutcome {
        processed_request,
        stuck_exit,
    }
}

/// Attempts to claim, execute, and deliver one eligible candidate. Returns
/// `true` if a job was actually processed (claim granted and a delivery
/// attempt made), regardless of whether delivery itself confirmed.
async fn try_process_candidate(
    state: &mut WorkerState,
    record: Option<&ServiceRecord>,
    candidate: &Request,
    now_unix: i64,
) -> bool {
    let active = state.active.snapshot();

    let heartbeat = is_heartbeat_shortcut(candidate);
    if !heartbeat {
        if !should_attempt_claim(candidate, &active.mech_address, now_unix) {
            return false;
        }

        match credential_reprobe_sufficient(
            candidate,
            &state.clients.credential_bridge,
            &state.config.worker.operator_id,
            &state.config.worker.venture_id,
        )
        .await
        {
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!(request_id = %candidate.id, "request-scoped credential re-probe insufficient, skipping claim");
                return false;
            }
            Err(err) => {
                tracing::warn!(request_id = %candidate.id, error = %err, "credential re-probe failed, skipping claim");
                return false;
            }
        }

        let verdict = match submit_claim(
            candidate,
            &state.clients.claim,
            &state.http,
            &state.signing_proxy.base_url,
            &state.signing_proxy.bearer_token,
            &active.mech_address,
            active.service_id,
            now_unix,
        )
        .await
        {
            Ok(verdict) => verdict,
            Err(err) => {
                tracing::warn!(request_id = %candidate.id, error = %err, "claim submission failed");
                return false;
            }
        };
        if !verdict.grants_execution() {
            tracing::debug!(request_id = %candidate.id, verdict = ?verdict, "claim not granted");
            return false;
        }
    }

    let outcome = if heartbeat {
        Ok(ExecutionOutcome {
            output: String::new(),
            last_status: Some("heartbeat".to_string()),
            telemetry: ExecutionTelemetry::default(),
            termination_reason: None,
            exit_code: 0,
        })
    } else {
        execute_job(state, candidate).await
    };

    let payload = match outcome {
        Ok(_outcome) if heartbeat => DeliveryPayload::heartbeat(&candidate.id),
        Ok(outcome) => build_delivery_payload(&candidate.id, &outcome),
        Err(job_error) => DeliveryPayload {
            request_id: candidate.id.clone(),
            output: clean_output(&job_error.message),
            summary: None,
            last_status: Some(format!("failed: {:?}", job_error.kind)),
            telemetry: job_error.telemetry.clone(),
            artifacts: Vec::new(),
            cancelled: false,
        },
    };

    let Some(record) = record else {
        tracing::warn!(request_id = %candidate.id, "no active service record, cannot deliver");
        return true;
    };

    match deliver(
        &payload,
        &state.clients.multisig,
        &state.http,
        &state.signing_proxy.base_url,
        &state.signing_proxy.bearer_token,
        &record.service_safe_address,
        &state.config.delivery,
        &mut state.session,
        now_unix,
    )
    .await
    {
        Ok(result) => {
            if result.needs_external_retry {
                state.pending_redeliveries.insert(candidate.id.clone(), payload);
            } else {
                state.pending_redeliveries.remove(&candidate.id);
            }
        }
        Err(err) => {
            tracing::warn!(request_id = %candidate.id, error = %err, "delivery call failed outright");
            state.pending_redeliveries.insert(candidate.id.clone(), payload);
        }
    }

    apply_post_delivery_delay(&state.config.delivery).await;
    true
}

async fn execute_job(state: &mut WorkerState, candidate: &Request) -> Result<ExecutionOutcome, jinn_worker_types::JobError> {
    let prompt = match state.clients.ipfs.fetch_content(&candidate.ipfs_hash).await {
        Ok(content) => content,
        Err(err) => {
            return Err(jinn_worker_types::JobError::new(
                jinn_worker_types::JobErrorKind::NetworkError,
                format!("failed to fetch job content from ipfs: {err}"),
            ));
        }
    };

    let workspace_dir: PathBuf = state.config.executor.workspace_root.join(&candidate.id);
    if let Err(err) = tokio::fs::create_dir_all(&workspace_dir).await {
        return Err(jinn_worker_types::JobError::new(
            jinn_worker_types::JobErrorKind::SystemError,
            format!("failed to create job workspace: {err}"),
        ));
    }
    let telemetry_file = workspace_dir.join("telemetry.jsonl");

    let binary_path = state.config.executor.binary_path.display().to_string();
    let chrome_binary_path = state.config.executor.chrome_binary_path.clone();
    let browser_mcp_config_path = state.config.executor.browser_mcp_config_path.clone();

    let allowlist = jinn_worker_config::env_allowlist::EnvAllowlist::new();
    let inherited_env: Vec<(String, String)> = std::env::vars().collect();

    let exec = ExecutionRequest {
        request: candidate,
        prompt: &prompt,
        binary: &binary_path,
        chrome_binary: chrome_binary_path.as_deref().map(|p| p.to_str().unwrap_or_default()),
        browser_mcp_config_path: browser_mcp_config_path.as_deref(),
        workspace_dir: &workspace_dir,
        telemetry_file: &telemetry_file,
        signing_proxy_base_url: &state.signing_proxy.base_url,
        signing_proxy_bearer_token: &state.signing_proxy.bearer_token,
    };

    run_job(exec, &state.config.executor, &allowlist, inherited_env).await
}

async fn deliver_cancellation(state: &mut WorkerState, request_id: &str, dependency: &str, _our_mech: &str, now_unix: i64) {
    let active = state.active.snapshot();
    let Some(record) = state.records_by_config_id.get(&active.config_id).cloned() else {
        return;
    };
    let payload = DeliveryPayload::cancelled_missing_dependency(request_id, dependency);

    match deliver(
        &payload,
        &state.clients.multisig,
        &state.http,
        &state.signing_proxy.base_url,
        &state.signing_proxy.bearer_token,
        &record.service_safe_address,
        &state.config.delivery,
        &mut state.session,
        now_unix,
    )
    .await
    {
        Ok(result) if result.needs_external_retry => {
            state.pending_redeliveries.insert(request_id.to_string(), payload);
        }
        Ok(_) => {
            state.pending_redeliveries.remove(request_id);
        }
        Err(err) => tracing::warn!(%request_id, error = %err, "cancellation delivery failed"),
    }
}

async fn maybe_rotate(state: &mut WorkerState, now_unix: i64) {
    if !state.config.worker.multi_service {
        return;
    }
    if state.records_by_config_id.len() <= 1 {
        return;
    }

    let mut candidates = Vec::new();
    for record in state.other_service_records() {
        let staking_state = match state.clients.chain_reader.staking_state(&record.staking_contract_address, record.service_id).await {
            Ok(s) => s,
            Err(err) => {
                tracing::warn!(config_id = %record.config_id, error = %err, "failed to read staking state for rotation candidate");
                continue;
            }
        };
        let request_count = match state.clients.chain_reader.request_count(&record.service_safe_address).await {
            Ok(count) => count,
            Err(err) => {
                tracing::warn!(config_id = %record.config_id, error = %err, "failed to read request count for rotation candidate");
                continue;
            }
        };
        let epoch = jinn_worker_staking::epoch_gate::build_epoch_gate(
            &staking_state,
            request_count,
            state.config.staking.activity_target_requests,
            now_unix,
        );
        candidates.push(jinn_worker_staking::rotator::RotationCandidate {
            config_id: record.config_id.clone(),
            mech_address: record.mech_address.clone(),
            service_id: record.service_id,
            staking_state: staking_state.state,
            epoch,
        });
    }

    if candidates.is_empty() {
        return;
    }

    let key_provider = state.key_provider.clone();
    if let Some(outcome) = evaluate_and_rotate(&state.active, &candidates, &state.records_by_config_id, key_provider.as_ref()).await {
        tracing::info!(from = %outcome.previous_config_id, to = %outcome.new_config_id, "rotated active service");
        let old_proxy = std::mem::replace(&mut state.signing_proxy, outcome.new_proxy);
        old_proxy.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycle_outcome_default_is_idle() {
        let outcome = CycleOutcome::default();
        assert!(!outcome.processed_request);
        assert!(!outcome.stuck_exit);
    }
}
