//! Rotator (spec §4.I): in multi-service mode, keeps the worker acting as
//! whichever owned service has the greatest near-term reward risk.
//!
//! A no-op for single-service deployments (spec §9 open question
//! resolution): `jinn-worker-core` only calls into this module when
//! `worker.multi_service` is set.

use ed25519_dalek::SigningKey;
use jinn_worker_clients::{start_signing_proxy, ClientError, ServiceStakingState, SigningProxyHandle};
use jinn_worker_types::{ActiveServiceContext, ActiveServiceHandle, EpochGateState, ServiceRecord};
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// One service's rotation-relevant snapshot, assembled by the caller from
/// the staking coordinator's cached epoch-gate state.
#[derive(Debug, Clone)]
pub struct RotationCandidate {
    pub config_id: String,
    pub mech_address: String,
    pub service_id: u64,
    pub staking_state: ServiceStakingState,
    pub epoch: EpochGateState,
}

/// Picks the service that is staked, has not met this epoch's target, and
/// (tiebreak) has been inactive the longest (spec §4.I step 2).
pub fn select_best_candidate(candidates: &[RotationCandidate]) -> Option<&RotationCandidate> {
    candidates
        .iter()
        .filter(|c| c.staking_state == ServiceStakingState::Staked && !c.epoch.target_met())
        .max_by_key(|c| c.epoch.inactivity_epochs())
}

/// True when `best` is not the service the worker is currently acting as.
pub fn should_rotate(current: &ActiveServiceContext, best: &RotationCandidate) -> bool {
    best.config_id != current.config_id
}

/// Decrypts the key material behind a `ServiceRecord`. Kept as a trait
/// rather than a concrete crypto dependency here, since keystore decryption
/// needs the on-disk working-directory layout that only `jinn-worker-core`
/// owns; this crate only needs the resulting signing key.
pub trait KeyMaterialProvider: Send + Sync {
    fn signing_key_for(&self, record: &ServiceRecord) -> Result<SigningKey, ClientError>;
}

/// Result of a completed rotation. The caller (the cycle controller) is
/// responsible for shutting down `previous_proxy` once it has finished
/// draining in-flight signing requests, and for flushing the credential and
/// signer caches it owns — the Rotator only swaps the active-service
/// pointer and starts the replacement proxy.
pub struct RotationOutcome {
    pub previous_config_id: String,
    pub new_config_id: String,
    pub new_proxy: SigningProxyHandle,
}

/// Performs the switch described in spec §4.I step 3: starts a fresh
/// signing proxy for `target`'s key, then atomically swaps the active
/// service context. Rotation failures are non-fatal (spec §4.I "Failure
/// semantics"); on error the active context is left untouched.
#[instrument(skip(active, target, key_provider))]
pub async fn perform_rotation(
    active: &ActiveServiceHandle,
    target: &ServiceRecord,
    key_provider: &dyn KeyMaterialProvider,
) -> Result<RotationOutcome, ClientError> {
    let signing_key = key_provider.signing_key_for(target)?;
    let new_proxy = start_signing_proxy(signing_key)
        .await
        .map_err(|e| ClientError::Transport(format!("failed to start signing proxy: {e}")))?;

    let previous = active.swap(ActiveServiceContext {
        mech_address: target.mech_address.clone(),
        service_id: target.service_id,
        config_id: target.config_id.clone(),
    });

    info!(from = %previous.config_id, to = %target.config_id, "rotated active service");
    Ok(RotationOutcome {
        previous_config_id: previous.config_id.clone(),
        new_config_id: target.config_id.clone(),
        new_proxy,
    })
}

/// Full rotation decision + execution for one cycle. Returns `None` when no
/// rotation is needed (including the single-candidate/no-candidate case);
/// logs and returns `None` on a non-fatal rotation failure, matching spec
/// §4.I's "the old active service remains" semantics.
pub async fn evaluate_and_rotate(
    active: &ActiveServiceHandle,
    candidates: &[RotationCandidate],
    records_by_config_id: &std::collections::HashMap<String, ServiceRecord>,
    key_provider: &dyn KeyMaterialProvider,
) -> Option<RotationOutcome> {
    let best = select_best_candidate(candidates)?;
    let current = active.snapshot();
    if !should_rotate(&current, best) {
        return None;
    }
    let Some(target) = records_by_config_id.get(&best.config_id) else {
        warn!(config_id = %best.config_id, "rotation candidate has no local service record, skipping");
        return None;
    };
    match perform_rotation(active, target, key_provider).await {
        Ok(outcome) => Some(outcome),
        Err(err) => {
            warn!(config_id = %best.config_id, error = %err, "rotation failed, keeping current active service");
            None
        }
    }
}
