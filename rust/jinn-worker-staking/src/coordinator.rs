//! Staking Coordinator (spec §4.H): checkpoint triggering, leader-only
//! heartbeats, and auto-restake for evicted or unstaked services.

use jinn_worker_clients::{ChainReader, ChainWriter, ClientError, MiddlewareClient, ServiceStakingState};
use jinn_worker_types::{EpochGateState, ServiceRecord, WorkerId};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{instrument, warn};

/// True every `every` cycles; `every == 0` disables the subcycle entirely.
pub fn cycle_due(cycle_count: u64, every: u32) -> bool {
    every > 0 && cycle_count % every as u64 == 0
}

/// Spec §4.H checkpoint trigger: `getNextRewardCheckpointTimestamp()` has
/// passed.
pub fn checkpoint_due(next_reward_checkpoint_ts: i64, now_unix: i64) -> bool {
    now_unix >= next_reward_checkpoint_ts
}

/// Permissionless checkpoint call. Failures are non-fatal; the caller logs
/// and retries on the next `checkpoint_every_cycles` subcycle.
#[instrument(skip(chain))]
pub async fn trigger_checkpoint(chain: &Arc<dyn ChainWriter>, staking_contract: &str, service_id: u64) -> Result<String, ClientError> {
    chain.checkpoint(staking_contract, service_id).await
}

/// One service's heartbeat eligibility, as assembled by the caller from its
/// cached epoch-gate snapshot.
pub struct HeartbeatTarget {
    pub config_id: String,
    pub mech_address: String,
    pub safe_address: String,
    pub epoch: EpochGateState,
}

pub struct HeartbeatOutcome {
    pub config_id: String,
    pub result: Result<String, ClientError>,
}

/// Submits one `__heartbeat__` request per target whose epoch target is
/// still unmet, but only for the leader worker (spec §4.H step 3). Silently
/// returns an empty list for non-leaders and for targets already at target.
#[instrument(skip(chain, targets))]
pub async fn submit_heartbeats_if_leader(
    worker_id: &WorkerId,
    chain: &Arc<dyn ChainWriter>,
    marketplace_contract: &str,
    targets: &[HeartbeatTarget],
) -> Vec<HeartbeatOutcome> {
    if !worker_id.is_leader() {
        return Vec::new();
    }
    let mut outcomes = Vec::new();
    for target in targets {
        if target.epoch.target_met() {
            continue;
        }
        let result = chain
            .submit_heartbeat_request(marketplace_contract, &target.mech_address, &target.safe_address)
            .await;
        if let Err(err) = &result {
            warn!(config_id = %target.config_id, error = %err, "heartbeat submission failed");
        }
        outcomes.push(HeartbeatOutcome {
            config_id: target.config_id.clone(),
            result,
        });
    }
    outcomes
}

/// Per-process cooldown bookkeeping for restake attempts, keyed by the
/// service's local `config_id`. Lives alongside `SessionState` in spirit but
/// is private to this crate since nothing outside staking needs it.
#[derive(Debug, Default)]
pub struct RestakeCooldownTracker {
    last_attempt: HashMap<String, i64>,
}

impl RestakeCooldownTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_cooldown(&self, config_id: &str, now_unix: i64, cooldown_secs: i64) -> bool {
        self.last_attempt
            .get(config_id)
            .map(|ts| now_unix - ts < cooldown_secs)
            .unwrap_or(false)
    }

    pub fn record_attempt(&mut self, config_id: &str, now_unix: i64) {
        self.last_attempt.insert(config_id.to_string(), now_unix);
    }

    /// When a service is blocked, the timestamp after which the main loop
    /// should retry (spec §4.H: "report blocked services with their
    /// unstake-available-at timestamp").
    pub fn retry_after(&self, config_id: &str, cooldown_secs: i64) -> Option<i64> {
        self.last_attempt.get(config_id).map(|ts| ts + cooldown_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestakeDecision {
    /// Already staked; nothing to do.
    AlreadyStaked,
    /// No staking contract configured for this service record.
    NotConfigured,
    /// Restake was attempted; carries the on-chain state observed on
    /// re-verification.
    Attempted { reverified: ServiceStakingState },
    /// Pre-flight cooldown not yet elapsed.
    Blocked { retry_after_unix: i64 },
    /// Middleware call failed.
    Failed { reason: String },
}

/// Spec §4.H auto-restake: checks one service's on-chain staking state and,
/// if `Evicted` or `Unstaked` (with a staking contract configured), attempts
/// a restake through the middleware daemon once the cooldown has elapsed.
#[instrument(skip(chain_reader, middleware, cooldown))]
pub async fn evaluate_and_restake(
    record: &ServiceRecord,
    chain_reader: &Arc<dyn ChainReader>,
    middleware: &Arc<dyn MiddlewareClient>,
    cooldown: &mut RestakeCooldownTracker,
    cooldown_secs: i64,
    now_unix: i64,
) -> Result<RestakeDecision, ClientError> {
    if record.staking_contract_address.is_empty() {
        return Ok(RestakeDecision::NotConfigured);
    }

    let state = chain_reader.staking_state(&record.staking_contract_address, record.service_id).await?;
    if state.state == ServiceStakingState::Staked {
        return Ok(RestakeDecision::AlreadyStaked);
    }

    if cooldown.on_cooldown(&record.config_id, now_unix, cooldown_secs) {
        let retry_after_unix = cooldown.retry_after(&record.config_id, cooldown_secs).unwrap_or(now_unix);
        return Ok(RestakeDecision::Blocked { retry_after_unix });
    }

    cooldown.record_attempt(&record.config_id, now_unix);
    if let Err(err) = middleware.restake(record.service_id).await {
        return Ok(RestakeDecision::Failed { reason: err.to_string() });
    }

    let reverified = chain_reader
        .staking_state(&record.staking_contract_address, record.service_id)
        .await?
        .state;
    Ok(RestakeDecision::Attempted { reverified })
}

#[cfg(test)]
mod tests {
    use super::*;
    use jinn_worker_clients::{MockChainClient, MockMiddlewareClient, StakingState};

    fn record(config_id: &str, staking_contract: &str) -> ServiceRecord {
        ServiceRecord {
            config_id: config_id.to_string(),
            service_id: 1,
            mech_address: "0xMECH".to_string(),
            service_safe_address: "0xSAFE".to_string(),
            agent_address: "0xAGENT".to_string(),
            agent_private_key_encrypted: vec![],
            staking_contract_address: staking_contract.to_string(),
            chain_id: 1,
        }
    }

    #[test]
    fn checkpoint_due_at_or_after_timestamp() {
        assert!(checkpoint_due(1_000, 1_000));
        assert!(checkpoint_due(1_001, 1_000));
        assert!(!checkpoint_due(999, 1_000));
    }

    #[test]
    fn cycle_due_respects_modulus_and_disable() {
        assert!(cycle_due(60, 60));
        assert!(cycle_due(120, 60));
        assert!(!cycle_due(61, 60));
        assert!(!cycle_due(60, 0));
    }

    #[tokio::test]
    async fn non_leader_submits_no_heartbeats() {
        let chain: Arc<dyn ChainWriter> = Arc::new(MockChainClient::new());
        let worker_id = WorkerId::new("svc-1");
        let targets = vec![HeartbeatTarget {
            config_id: "svc".to_string(),
            mech_address: "0xMECH".to_string(),
            safe_address: "0xSAFE".to_string(),
            epoch: EpochGateState::default(),
        }];
        let outcomes = submit_heartbeats_if_leader(&worker_id, &chain, "0xmarket", &targets).await;
        assert!(outcomes.is_empty());
    }

    #[tokio::test]
    async fn leader_skips_targets_already_at_epoch_target() {
        let mock = MockChainClient::new();
        let chain: Arc<dyn ChainWriter> = Arc::new(mock);
        let worker_id = WorkerId::new("svc-0");
        let targets = vec![HeartbeatTarget {
            config_id: "svc".to_string(),
            mech_address: "0xMECH".to_string(),
            safe_address: "0xSAFE".to_string(),
            epoch: EpochGateState {
                ts_checkpoint: 0,
                next_checkpoint: 0,
                request_count: 5,
                target_count: 5,
                cached_at: 0,
            },
        }];
        let outcomes = submit_heartbeats_if_leader(&worker_id, &chain, "0xmarket", &targets).await;
        assert!(outcomes.is_empty());
    }

    #[tokio::test]
    async fn leader_submits_heartbeat_for_unmet_target() {
        let mock = MockChainClient::new();
        let chain: Arc<dyn ChainWriter> = Arc::new(mock);
        let worker_id = WorkerId::new("svc-0");
        let targets = vec![HeartbeatTarget {
            config_id: "svc".to_string(),
            mech_address: "0xMECH".to_string(),
            safe_address: "0xSAFE".to_string(),
            epoch: EpochGateState {
                ts_checkpoint: 0,
                next_checkpoint: 0,
                request_count: 0,
                target_count: 5,
                cached_at: 0,
            },
        }];
        let outcomes = submit_heartbeats_if_leader(&worker_id, &chain, "0xmarket", &targets).await;
        assert_eq!(outcomes.len(), 1);
        assert!(outcomes[0].result.is_ok());
    }

    #[tokio::test]
    async fn restake_skipped_without_staking_contract() {
        let chain_reader: Arc<dyn ChainReader> = Arc::new(MockChainClient::new());
        let middleware: Arc<dyn MiddlewareClient> = Arc::new(MockMiddlewareClient::new());
        let mut cooldown = RestakeCooldownTracker::new();
        let decision = evaluate_and_restake(&record("svc", ""), &chain_reader, &middleware, &mut cooldown, 3_600, 1_000)
            .await
            .unwrap();
        assert_eq!(decision, RestakeDecision::NotConfigured);
    }

    #[tokio::test]
    async fn already_staked_service_needs_no_restake() {
        let mock = MockChainClient::new();
        mock.staking_states.insert(
            ("0xstaking".to_string(), 1),
            StakingState {
                state: ServiceStakingState::Staked,
                ts_checkpoint: 0,
                liveness_period_secs: 86_400,
                next_reward_checkpoint: 0,
                available_rewards: 0,
            },
        );
        let chain_reader: Arc<dyn ChainReader> = Arc::new(mock);
        let middleware: Arc<dyn MiddlewareClient> = Arc::new(MockMiddlewareClient::new());
        let mut cooldown = RestakeCooldownTracker::new();
        let decision = evaluate_and_restake(&record("svc", "0xstaking"), &chain_reader, &middleware, &mut cooldown, 3_600, 1_000)
            .await
            .unwrap();
        assert_eq!(decision, RestakeDecision::AlreadyStaked);
    }

    #[tokio::test]
    async fn evicted_service_is_restaked_then_reverified() {
        let mock = MockChainClient::new();
        mock.staking_states.insert(
            ("0xstaking".to_string(), 1),
            StakingState {
                state: ServiceStakingState::Evicted,
                ts_checkpoint: 0,
                liveness_period_secs: 86_400,
                next_reward_checkpoint: 0,
                available_rewards: 0,
            },
        );
        let chain_reader: Arc<dyn ChainReader> = Arc::new(mock);
        let middleware: Arc<dyn MiddlewareClient> = Arc::new(MockMiddlewareClient::new());
        let mut cooldown = RestakeCooldownTracker::new();
        let decision = evaluate_and_restake(&record("svc", "0xstaking"), &chain_reader, &middleware, &mut cooldown, 3_600, 1_000)
            .await
            .unwrap();
        // the mock's restake call doesn't mutate its own staking_states map,
        // so reverification observes the same pre-restake state.
        assert_eq!(decision, RestakeDecision::Attempted { reverified: ServiceStakingState::Evicted });
    }

    #[tokio::test]
    async fn restake_blocked_while_on_cooldown() {
        let mock = MockChainClient::new();
        mock.staking_states.insert(
            ("0xstaking".to_string(), 1),
            StakingState {
                state: ServiceStakingState::Unstaked,
                ts_checkpoint: 0,
                liveness_period_secs: 86_400,
                next_reward_checkpoint: 0,
                available_rewards: 0,
            },
        );
        let chain_reader: Arc<dyn ChainReader> = Arc::new(mock);
        let middleware: Arc<dyn MiddlewareClient> = Arc::new(MockMiddlewareClient::new());
        let mut cooldown = RestakeCooldownTracker::new();
        cooldown.record_attempt("svc", 900);
        let decision = evaluate_and_restake(&record("svc", "0xstaking"), &chain_reader, &middleware, &mut cooldown, 3_600, 1_000)
            .await
            .unwrap();
        assert_eq!(decision, RestakeDecision::Blocked { retry_after_unix: 900 + 3_600 });
    }
}
