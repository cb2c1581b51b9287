//! Pre-cycle maintenance (spec §4.B): session GC, checkpoint trigger,
//! leader-only heartbeat submission, auto-repost of previously-attempted
//! deliveries, and the fund top-up check. Runs once at the top of every
//! cycle, before Discovery, each step gated by its own cycle-count
//! subcycle so a single slow collaborator cannot block the others.

use jinn_worker_clients::DeliveryOutcome;
use jinn_worker_delivery::deliverer::deliver;
use jinn_worker_staking::coordinator::{
    checkpoint_due, cycle_due, evaluate_and_restake, submit_heartbeats_if_leader, trigger_checkpoint, HeartbeatTarget, RestakeDecision,
};

use crate::state::WorkerState;

/// Run every maintenance subcycle that is due this cycle. Non-fatal: a
/// failure in any one step is logged and the others still run.
pub async fn run_maintenance(state: &mut WorkerState, now_unix: i64) {
    let cycle_count = state.cycle.cycle_count();
    let staking_cfg = state.config.staking.clone();

    if cycle_due(cycle_count, staking_cfg.maintenance_every_cycles) {
        let before = state.session.executed_len();
        state.session.evict_expired(now_unix);
        tracing::debug!(evicted_from = before, evicted_to = state.session.executed_len(), "session map GC");
    }

    if cycle_due(cycle_count, staking_cfg.checkpoint_every_cycles) {
        maybe_checkpoint(state, now_unix).await;
    }

    if cycle_due(cycle_count, staking_cfg.heartbeat_every_cycles) {
        submit_heartbeats(state).await;
    }

    auto_repost(state, now_unix).await;

    if cycle_due(cycle_count, staking_cfg.fund_check_every_cycles) {
        check_and_top_up_funds(state).await;
    }

    if cycle_count == 0 || cycle_due(cycle_count, staking_cfg.fund_check_every_cycles) {
        run_auto_restake(state, now_unix).await;
    }
}

/// Spec §4.H auto-restake: runs at startup (`cycle_count == 0`) and
/// thereafter on the same cadence as the fund check, since both poll
/// on-chain service state. Each record's own cooldown (not the cycle
/// cadence) is what actually throttles middleware calls.
async fn run_auto_restake(state: &mut WorkerState, now_unix: i64) {
    let cooldown_secs = state.config.staking.restake_cooldown.as_secs() as i64;
    let records: Vec<_> = state.records_by_config_id.values().cloned().collect();
    for record in records {
        let decision = evaluate_and_restake(
            &record,
            &state.clients.chain_reader,
            &state.clients.middleware,
            &mut state.restake_cooldown,
            cooldown_secs,
            now_unix,
        )
        .await;
        match decision {
            Ok(RestakeDecision::AlreadyStaked) | Ok(RestakeDecision::NotConfigured) => {}
            Ok(RestakeDecision::Attempted { reverified }) => {
                tracing::info!(config_id = %record.config_id, ?reverified, "auto-restake attempted");
            }
            Ok(RestakeDecision::Blocked { retry_after_unix }) => {
                tracing::debug!(config_id = %record.config_id, retry_after_unix, "auto-restake blocked by cooldown");
            }
            Ok(RestakeDecision::Failed { reason }) => {
                tracing::warn!(config_id = %record.config_id, %reason, "auto-restake middleware call failed");
            }
            Err(err) => {
                tracing::warn!(config_id = %record.config_id, error = %err, "auto-restake staking-state query failed");
            }
        }
    }
}

async fn maybe_checkpoint(state: &mut WorkerState, now_unix: i64) {
    if !checkpoint_due(state.epoch_gate.next_checkpoint, now_unix) {
        return;
    }
    let active = state.active.snapshot();
    let Some(record) = state.records_by_config_id.get(&active.config_id) else {
        return;
    };
    match trigger_checkpoint(&state.clients.chain_writer, &record.staking_contract_address, active.service_id).await {
        Ok(tx_hash) => tracing::info!(%tx_hash, service_id = active.service_id, "staking checkpoint submitted"),
        Err(err) => tracing::warn!(error = %err, service_id = active.service_id, "staking checkpoint failed"),
    }
}

async fn submit_heartbeats(state: &mut WorkerState) {
    if state.records_by_config_id.is_empty() {
        return;
    }
    let targets: Vec<HeartbeatTarget> = state
        .records_by_config_id
        .values()
        .map(|record| HeartbeatTarget {
            config_id: record.config_id.clone(),
            mech_address: record.mech_address.clone(),
            safe_address: record.service_safe_address.clone(),
            epoch: state.epoch_gate.clone(),
        })
        .collect();

    let marketplace_contract = state.config.contracts.marketplace_address.clone();
    let outcomes = submit_heartbeats_if_leader(&state.worker_id, &state.clients.chain_writer, &marketplace_contract, &targets).await;
    for outcome in outcomes {
        match outcome.result {
            Ok(tx_hash) => tracing::info!(%tx_hash, config_id = %outcome.config_id, "heartbeat submitted"),
            Err(err) => tracing::warn!(error = %err, config_id = %outcome.config_id, "heartbeat submission failed"),
        }
    }
}

/// Re-attempt delivery for jobs whose prior delivery call set
/// `needs_external_retry`, once the delivery section's repost cooldown has
/// elapsed since the last attempt (spec §4.B step 4, named "auto-repost" in
/// the component table of spec §2).
async fn auto_repost(state: &mut WorkerState, now_unix: i64) {
    if state.pending_redeliveries.is_empty() {
        return;
    }
    let cooldown_secs = state.config.delivery.repost_cooldown.as_secs() as i64;
    let due: Vec<String> = state
        .pending_redeliveries
        .keys()
        .filter(|request_id| !state.session.repost_on_cooldown(request_id, now_unix, cooldown_secs))
        .cloned()
        .collect();

    for request_id in due {
        let Some(payload) = state.pending_redeliveries.get(&request_id).cloned() else {
            continue;
        };
        let active = state.active.snapshot();
        let Some(record) = state.records_by_config_id.get(&active.config_id) else {
            continue;
        };
        let safe_address = record.service_safe_address.clone();
        let proxy_base_url = state.signing_proxy.base_url.clone();
        let proxy_bearer_token = state.signing_proxy.bearer_token.clone();
        let delivery_cfg = state.config.delivery.clone();

        state.session.mark_reposted(&request_id, now_unix);
        match deliver(
            &payload,
            &state.clients.multisig,
            &state.http,
            &proxy_base_url,
            &proxy_bearer_token,
            &safe_address,
            &delivery_cfg,
            &mut state.session,
            now_unix,
        )
        .await
        {
            Ok(result) => {
                tracing::info!(%request_id, needs_external_retry = result.needs_external_retry, "auto-repost attempted");
                if result.needs_external_retry {
                    continue;
                }
                state.pending_redeliveries.remove(&request_id);
            }
            Err(err) => tracing::warn!(%request_id, error = %err, "auto-repost delivery call failed"),
        }
    }
}

async fn check_and_top_up_funds(state: &mut WorkerState) {
    let Some(floor_str) = state.config.staking.funding_floor.clone() else {
        return;
    };
    let Ok(floor) = floor_str.parse::<u128>() else {
        tracing::warn!(floor = %floor_str, "ignoring malformed funding_floor");
        return;
    };

    let active = state.active.snapshot();
    let Some(record) = state.records_by_config_id.get(&active.config_id) else {
        return;
    };
    let token_contract = state.config.contracts.funding_token_address.clone();

    let balance = match state.clients.chain_reader.token_balance_of(&token_contract, &record.service_safe_address).await {
        Ok(balance) => balance,
        Err(err) => {
            tracing::warn!(error = %err, "fund check: balance query failed");
            return;
        }
    };

    if balance >= floor {
        return;
    }
    let shortfall = floor - balance;
    match state.clients.middleware.fund(record.service_id, shortfall).await {
        Ok(()) => tracing::info!(service_id = record.service_id, shortfall, "fund top-up requested"),
        Err(err) => tracing::warn!(error = %err, "fund top-up request failed"),
    }
}
