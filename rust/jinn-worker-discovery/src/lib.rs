//! Discovery and Eligibility (spec §4.C, §4.D): turns indexer/chain state
//! into an ordered list of requests this worker may attempt to claim.

pub mod discovery;
pub mod eligibility;

pub use discovery::{discover_candidates, resolve_mech_filter, verify_delivery_mech};
pub use eligibility::{
    capability_filter, credential_filter, dependency_filter, evaluate_eligibility,
    reorder_trusted_operator_first, session_dedup_filter, should_exit_for_stuck_cycles,
    EligibilityDecision,
};
