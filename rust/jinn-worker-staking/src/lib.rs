//! Staking Coordinator (spec §4.H) and Rotator (spec §4.I): keeps the
//! worker's service(s) active in the staking contract and, in multi-service
//! mode, steers the active identity toward whichever owned service has the
//! greatest near-term reward risk.

pub mod coordinator;
pub mod epoch_gate;
pub mod rotator;

pub use coordinator::{
    checkpoint_due, cycle_due, evaluate_and_restake, submit_heartbeats_if_leader, trigger_checkpoint, HeartbeatOutcome,
    HeartbeatTarget, RestakeCooldownTracker, RestakeDecision,
};
pub use epoch_gate::{build_epoch_gate, refresh_epoch_gate, resolve_request_count, should_skip_discovery};
pub use rotator::{evaluate_and_rotate, perform_rotation, select_best_candidate, should_rotate, KeyMaterialProvider, RotationCandidate, RotationOutcome};
