//! `ServiceRecord` and `ActiveServiceContext` (spec §3).

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::RwLock;

/// Locally persisted configuration describing one staked service owned by
/// this operator. Created during initial setup, mutated only by management
/// commands, destroyed by terminate-and-withdraw — none of which live in
/// this crate; it is a read/write record, not a state machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRecord {
    /// Directory name under `<workDir>/.operate/services/`.
    pub config_id: String,
    pub service_id: u64,
    pub mech_address: String,
    pub service_safe_address: String,
    pub agent_address: String,
    /// Encrypted keystore bytes. Never the plaintext private key — holders
    /// of a `ServiceRecord` must decrypt through the keystore before handing
    /// key material to the signing proxy.
    pub agent_private_key_encrypted: Vec<u8>,
    pub staking_contract_address: String,
    pub chain_id: u64,
}

/// Process-wide singleton holding "which service is the worker currently
/// acting as". Readers always get a consistent (mech, service id) snapshot;
/// writes are atomic swaps performed only by the Rotator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveServiceContext {
    pub mech_address: String,
    pub service_id: u64,
    pub config_id: String,
}

/// Shared, swappable handle to the current `ActiveServiceContext`.
///
/// Grounded on the same `Arc<RwLock<..>>` snapshot pattern
/// `knhk-autonomous-loop::loop_controller::AutonomousLoopController` uses
/// for its `LoopState`, but swaps the whole context atomically rather than
/// mutating fields in place, so readers never observe a half-updated
/// (mech, service id) pair.
#[derive(Clone)]
pub struct ActiveServiceHandle {
    inner: Arc<RwLock<Arc<ActiveServiceContext>>>,
}

impl ActiveServiceHandle {
    pub fn new(initial: ActiveServiceContext) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(initial))),
        }
    }

    /// Consistent snapshot of the active service.
    pub fn snapshot(&self) -> Arc<ActiveServiceContext> {
        self.inner.read().expect("active service lock poisoned").clone()
    }

    /// Atomically replace the active service. Called only by the Rotator.
    pub fn swap(&self, new_context: ActiveServiceContext) -> Arc<ActiveServiceContext> {
        let new_arc = Arc::new(new_context);
        let mut guard = self.inner.write().expect("active service lock poisoned");
        std::mem::replace(&mut *guard, new_arc)
    }
}
