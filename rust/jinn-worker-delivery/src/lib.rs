//! Deliverer (spec §4.G): assembles the result payload from a completed
//! execution and posts it on-chain through the service multisig.

pub mod content;
pub mod deliverer;

pub use content::{clean_output, extract_artifacts, extract_summary};
pub use deliverer::{apply_post_delivery_delay, build_delivery_payload, deliver, DeliveryResult};
