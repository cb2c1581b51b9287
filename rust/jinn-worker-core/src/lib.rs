//! Cycle Controller, pre-cycle maintenance, and main-loop orchestration
//! (spec §4.A, §4.B) tying Discovery → Eligibility → Claim → Executor →
//! Deliverer → Staking → Rotator into one cooperative process.

pub mod cycle;
pub mod cycle_control;
pub mod keystore;
pub mod maintenance;
pub mod runner;
pub mod service_store;
pub mod state;

pub use cycle::{run_cycle, CycleOutcome};
pub use cycle_control::{CycleController, Decision, StopReason};
pub use keystore::Keystore;
pub use maintenance::run_maintenance;
pub use runner::{run, RunMode};
pub use service_store::{load_all_service_records, load_service_record, save_service_record, ServiceStoreError};
pub use state::WorkerState;
