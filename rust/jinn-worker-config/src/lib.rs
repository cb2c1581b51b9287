//! Layered configuration loading, the earning-window parser, and the
//! subprocess environment allowlist for the Jinn worker core.

pub mod earning_window;
pub mod env;
pub mod env_allowlist;
mod error;
pub mod schema;

pub use earning_window::EarningWindow;
pub use env_allowlist::EnvAllowlist;
pub use error::ConfigError;
pub use schema::{
    DeliverySection, DiscoverySection, EligibilitySection, EndpointsSection, ExecutorSection,
    MechFilterMode, StakingSection, WorkerConfig, WorkerSection,
};
