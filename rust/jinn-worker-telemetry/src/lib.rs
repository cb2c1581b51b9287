//! Tracing/subscriber initialization and structured cycle-event emission.
//!
//! Grounded on `knhk-autonomous-loop::telemetry::LoopTelemetry`: each phase
//! gets a named span plus leveled events carrying structured fields, rather
//! than ad hoc `println!`.

use jinn_worker_types::JobErrorKind;
use tracing::{info, instrument, warn};
use tracing_subscriber::{fmt, EnvFilter};

/// Initialize the global tracing subscriber. Call once, at process start.
/// `json` selects JSON-formatted output (suitable for log aggregation);
/// otherwise a compact human-readable format is used.
pub fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = fmt().with_env_filter(filter);
    if json {
        let _ = subscriber.json().try_init();
    } else {
        let _ = subscriber.try_init();
    }
}

/// Cycle-scoped telemetry emitter. One instance is created per main-loop
/// cycle and dropped at its end; spans nest under `worker.cycle`.
pub struct CycleTelemetry {
    worker_id: String,
    cycle_number: u64,
}

impl CycleTelemetry {
    pub fn new(worker_id: impl Into<String>, cycle_number: u64) -> Self {
        Self {
            worker_id: worker_id.into(),
            cycle_number,
        }
    }

    #[instrument(skip(self), fields(worker.id = %self.worker_id, cycle = self.cycle_number))]
    pub fn emit_cycle_started(&self) {
        info!("cycle started");
    }

    #[instrument(skip(self), fields(worker.id = %self.worker_id, cycle = self.cycle_number))]
    pub fn emit_discovery_result(&self, candidate_count: usize) {
        info!(candidates = candidate_count, "discovery completed");
    }

    #[instrument(skip(self), fields(worker.id = %self.worker_id, cycle = self.cycle_number))]
    pub fn emit_claim_result(&self, request_id: &str, claimed: bool) {
        if claimed {
            info!(request.id = request_id, "claim acquired");
        } else {
            info!(request.id = request_id, "claim lost or skipped");
        }
    }

    #[instrument(skip(self), fields(worker.id = %self.worker_id, cycle = self.cycle_number))]
    pub fn emit_execution_result(&self, request_id: &str, success: bool, error_kind: Option<JobErrorKind>) {
        if success {
            info!(request.id = request_id, "job execution succeeded");
        } else {
            warn!(request.id = request_id, ?error_kind, "job execution failed");
        }
    }

    #[instrument(skip(self), fields(worker.id = %self.worker_id, cycle = self.cycle_number))]
    pub fn emit_delivery_result(&self, request_id: &str, success: bool) {
        if success {
            info!(request.id = request_id, "delivery succeeded");
        } else {
            warn!(request.id = request_id, "delivery failed, left for external retry");
        }
    }

    #[instrument(skip(self), fields(worker.id = %self.worker_id, cycle = self.cycle_number))]
    pub fn emit_staking_gate(&self, target_met: bool, request_count: u64, target_count: u64) {
        info!(target_met, request_count, target_count, "activity target evaluated");
    }

    #[instrument(skip(self), fields(worker.id = %self.worker_id, cycle = self.cycle_number))]
    pub fn emit_rotation(&self, from_service: u64, to_service: u64) {
        if from_service != to_service {
            info!(from_service, to_service, "active service rotated");
        }
    }

    #[instrument(skip(self), fields(worker.id = %self.worker_id, cycle = self.cycle_number))]
    pub fn emit_cycle_completed(&self, processed_request: bool, duration_ms: u64) {
        info!(processed_request, duration_ms, "cycle completed");
    }
}
