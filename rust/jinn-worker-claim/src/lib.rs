//! Claim Arbitrator (spec §4.E): signs and submits claim requests, and
//! interprets the arbitration verdict.

pub mod arbitrator;

pub use arbitrator::{credential_reprobe_sufficient, is_heartbeat_shortcut, should_attempt_claim, submit_claim};
