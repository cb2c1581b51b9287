//! Activity-target gate (spec §4.H step 1): decides whether this cycle's
//! epoch has already earned its reward, in which case Discovery and
//! execution are skipped entirely.

use jinn_worker_clients::{ChainReader, ClientError, StakingState};
use jinn_worker_types::EpochGateState;
use std::sync::Arc;

/// Prefers the indexer's live count (caller-supplied, `None` if the indexer
/// call failed or was skipped) and falls back to the chain's own request
/// counter, mirroring the reconciliation note on `ChainReader::request_count`.
pub async fn resolve_request_count(
    chain: &Arc<dyn ChainReader>,
    indexer_count: Option<u64>,
    safe_address: &str,
) -> Result<u64, ClientError> {
    match indexer_count {
        Some(count) => Ok(count),
        None => chain.request_count(safe_address).await,
    }
}

/// Builds a fresh `EpochGateState` snapshot from on-chain staking state plus
/// a resolved request count. Callers cache the result and only call this
/// again once `EpochGateState::is_fresh` says the cache has expired.
pub fn build_epoch_gate(staking_state: &StakingState, request_count: u64, activity_target: u64, now_unix: i64) -> EpochGateState {
    EpochGateState {
        ts_checkpoint: staking_state.ts_checkpoint,
        next_checkpoint: staking_state.next_reward_checkpoint,
        request_count,
        target_count: activity_target,
        cached_at: now_unix,
    }
}

/// Fetches (or reuses, if still fresh) the epoch-gate snapshot for one
/// service and reports whether Discovery should be skipped this cycle.
pub async fn refresh_epoch_gate(
    chain: &Arc<dyn ChainReader>,
    staking_contract: &str,
    service_id: u64,
    safe_address: &str,
    indexer_count: Option<u64>,
    activity_target: u64,
    cached: EpochGateState,
    now_unix: i64,
    cache_ttl_secs: i64,
) -> Result<EpochGateState, ClientError> {
    if cached.is_fresh(now_unix, cache_ttl_secs) {
        return Ok(cached);
    }
    let staking_state = chain.staking_state(staking_contract, service_id).await?;
    let request_count = resolve_request_count(chain, indexer_count, safe_address).await?;
    Ok(build_epoch_gate(&staking_state, request_count, activity_target, now_unix))
}

/// True when the epoch's request target is already met and work this cycle
/// would not earn additional rewards (spec §4.H step 1).
pub fn should_skip_discovery(epoch: &EpochGateState) -> bool {
    epoch.target_met()
}

#[cfg(test)]
mod tests {
    use super::*;
    use jinn_worker_clients::{MockChainClient, ServiceStakingState};

    fn staking_state() -> StakingState {
        StakingState {
            state: ServiceStakingState::Staked,
            ts_checkpoint: 1_000,
            liveness_period_secs: 86_400,
            next_reward_checkpoint: 87_400,
            available_rewards: 0,
        }
    }

    #[test]
    fn gate_reports_skip_once_target_met() {
        let epoch = build_epoch_gate(&staking_state(), 1, 1, 1_500);
        assert!(should_skip_discovery(&epoch));

        let epoch = build_epoch_gate(&staking_state(), 0, 1, 1_500);
        assert!(!should_skip_discovery(&epoch));
    }

    #[tokio::test]
    async fn resolve_request_count_prefers_indexer_value() {
        let chain: Arc<dyn ChainReader> = Arc::new(MockChainClient::new());
        let count = resolve_request_count(&chain, Some(7), "0xsafe").await.unwrap();
        assert_eq!(count, 7);
    }

    #[tokio::test]
    async fn resolve_request_count_falls_back_to_chain() {
        let mock = MockChainClient::new();
        mock.request_counts.insert("0xsafe".to_string(), 3);
        let chain: Arc<dyn ChainReader> = Arc::new(mock);
        let count = resolve_request_count(&chain, None, "0xsafe").await.unwrap();
        assert_eq!(count, 3);
    }

    #[tokio::test]
    async fn cached_snapshot_is_reused_while_fresh() {
        let chain: Arc<dyn ChainReader> = Arc::new(MockChainClient::new());
        let cached = EpochGateState {
            ts_checkpoint: 1,
            next_checkpoint: 2,
            request_count: 9,
            target_count: 1,
            cached_at: 1_000,
        };
        let refreshed = refresh_epoch_gate(&chain, "0xstaking", 1, "0xsafe", None, 1, cached, 1_100, 300)
            .await
            .unwrap();
        assert_eq!(refreshed.request_count, 9);
    }
}
