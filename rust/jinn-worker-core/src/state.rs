//! `WorkerState` (spec §5, §9 Design Note): the single record threaded
//! through every phase function, owning the session maps, the active
//! service handle, the cached clients, and the signing-proxy listener.

use std::collections::HashMap;
use std::sync::Arc;

use jinn_worker_clients::ClientBundle;
use jinn_worker_clients::SigningProxyHandle;
use jinn_worker_config::schema::WorkerConfig;
use jinn_worker_staking::coordinator::RestakeCooldownTracker;
use jinn_worker_staking::rotator::KeyMaterialProvider;
use jinn_worker_types::{ActiveServiceHandle, DeliveryPayload, EpochGateState, ServiceRecord, SessionState, WorkerId};

use crate::cycle_control::CycleController;

/// Everything the main loop carries from one cycle to the next. Threaded
/// through every phase by `&mut` so no phase function needs more than a
/// handful of parameters.
pub struct WorkerState {
    pub worker_id: WorkerId,
    pub config: WorkerConfig,
    pub clients: ClientBundle,
    pub active: ActiveServiceHandle,
    pub session: SessionState,
    pub restake_cooldown: RestakeCooldownTracker,
    pub epoch_gate: EpochGateState,
    /// Payloads whose last delivery attempt set `needs_external_retry`,
    /// keyed by request id, re-attempted by the auto-repost maintenance
    /// subcycle (spec §4.B).
    pub pending_redeliveries: HashMap<String, DeliveryPayload>,
    pub signing_proxy: SigningProxyHandle,
    pub http: reqwest::Client,
    pub cycle: CycleController,
    pub records_by_config_id: HashMap<String, ServiceRecord>,
    pub key_provider: Arc<dyn KeyMaterialProvider>,
}

impl WorkerState {
    /// Records of every service this worker is configured to operate,
    /// other than the one currently active — candidates the Rotator may
    /// promote (spec §4.I).
    pub fn other_service_records(&self) -> impl Iterator<Item = &ServiceRecord> {
        let current = self.active.snapshot().config_id.clone();
        self.records_by_config_id
            .values()
            .filter(move |record| record.config_id != current)
    }
}
