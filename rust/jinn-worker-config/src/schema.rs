//! Worker configuration schema (spec §4.A, §4.C, §4.F, §4.H, §6).

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum MechFilterMode {
    Single { address: String },
    List { addresses: Vec<String> },
    Staking { staking_contract: String },
    Any,
}

impl Default for MechFilterMode {
    fn default() -> Self {
        MechFilterMode::Any
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    #[serde(default)]
    pub worker: WorkerSection,
    #[serde(default)]
    pub discovery: DiscoverySection,
    #[serde(default)]
    pub eligibility: EligibilitySection,
    #[serde(default)]
    pub executor: ExecutorSection,
    #[serde(default)]
    pub delivery: DeliverySection,
    #[serde(default)]
    pub staking: StakingSection,
    #[serde(default)]
    pub endpoints: EndpointsSection,
    #[serde(default)]
    pub contracts: ContractsSection,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker: WorkerSection::default(),
            discovery: DiscoverySection::default(),
            eligibility: EligibilitySection::default(),
            executor: ExecutorSection::default(),
            delivery: DeliverySection::default(),
            staking: StakingSection::default(),
            endpoints: EndpointsSection::default(),
            contracts: ContractsSection::default(),
        }
    }
}

/// On-chain contract addresses fixed per deployment (spec §6 "On-chain").
/// `mech_address` and `service_safe_address` live on `ServiceRecord`
/// instead, since they vary per owned service rather than per chain.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContractsSection {
    pub marketplace_address: String,
    /// Native or OLAS token contract checked by the fund top-up subcycle
    /// (spec §4.B step 5).
    pub funding_token_address: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerSection {
    pub worker_id: String,
    pub stop_file: PathBuf,
    pub max_runs: Option<u64>,
    pub max_cycles: Option<u64>,
    #[serde(default = "default_max_stuck_cycles")]
    pub max_stuck_cycles: u32,
    #[serde(default = "default_base_poll_interval", with = "humantime_serde")]
    pub base_poll_interval: Duration,
    #[serde(default = "default_max_poll_interval", with = "humantime_serde")]
    pub max_poll_interval: Duration,
    #[serde(default = "default_poll_factor")]
    pub poll_factor: f64,
    /// `HH:MM-HH:MM` local time, may wrap over midnight. `None` means
    /// always in-window.
    pub earning_window: Option<String>,
    pub earning_window_max_jobs: Option<u32>,
    #[serde(default)]
    pub multi_service: bool,
    /// Marketplace-registered operator id used by the credential bridge and
    /// the trusted-operator reordering step (spec §4.D).
    #[serde(default)]
    pub operator_id: String,
    /// Venture the operator's credentials are scoped to (spec §4.D).
    #[serde(default)]
    pub venture_id: String,
    /// `.operate` root holding `services/<configId>/` directories (spec §6
    /// on-disk layout).
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,
}

fn default_work_dir() -> PathBuf {
    PathBuf::from(".operate")
}

fn default_max_stuck_cycles() -> u32 {
    5
}
fn default_base_poll_interval() -> Duration {
    Duration::from_secs(30)
}
fn default_max_poll_interval() -> Duration {
    Duration::from_secs(5 * 60)
}
fn default_poll_factor() -> f64 {
    1.5
}

impl Default for WorkerSection {
    fn default() -> Self {
        Self {
            worker_id: "worker-0".to_string(),
            stop_file: PathBuf::from("/tmp/jinn-stop-cycle-worker-0"),
            max_runs: None,
            max_cycles: None,
            max_stuck_cycles: default_max_stuck_cycles(),
            base_poll_interval: default_base_poll_interval(),
            max_poll_interval: default_max_poll_interval(),
            poll_factor: default_poll_factor(),
            earning_window: None,
            earning_window_max_jobs: None,
            multi_service: false,
            operator_id: String::new(),
            venture_id: String::new(),
            work_dir: default_work_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoverySection {
    #[serde(default)]
    pub mech_filter: MechFilterMode,
    pub workstream_filter: Option<Vec<String>>,
    pub venture_filter: Option<Vec<String>>,
    /// Presence enables the template-pickup second query (spec §4.C step 3).
    pub service_registry_url: Option<String>,
    pub template_allow_list: Option<Vec<String>>,
    #[serde(default = "default_discovery_limit")]
    pub limit: usize,
}

fn default_discovery_limit() -> usize {
    50
}

impl Default for DiscoverySection {
    fn default() -> Self {
        Self {
            mech_filter: MechFilterMode::default(),
            workstream_filter: None,
            venture_filter: None,
            service_registry_url: None,
            template_allow_list: None,
            limit: default_discovery_limit(),
        }
    }
}

impl DiscoverySection {
    pub fn template_pickup_enabled(&self) -> bool {
        self.service_registry_url.is_some() || self.template_allow_list.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EligibilitySection {
    #[serde(default = "default_true")]
    pub dependency_redispatch_enabled: bool,
    #[serde(default = "default_true")]
    pub dependency_autofail_enabled: bool,
    #[serde(default = "default_stale_threshold", with = "humantime_serde")]
    pub stale_dependency_threshold: Duration,
    #[serde(default = "default_redispatch_cooldown", with = "humantime_serde")]
    pub redispatch_cooldown: Duration,
    #[serde(default = "default_stale_threshold", with = "humantime_serde")]
    pub missing_dependency_age_threshold: Duration,
    #[serde(default = "default_redispatch_cooldown", with = "humantime_serde")]
    pub cancel_cooldown: Duration,
    #[serde(default)]
    pub operator_capabilities: Vec<String>,
    #[serde(default)]
    pub trusted_operator: bool,
}

fn default_true() -> bool {
    true
}
fn default_stale_threshold() -> Duration {
    Duration::from_secs(2 * 3_600)
}
fn default_redispatch_cooldown() -> Duration {
    Duration::from_secs(3_600)
}

impl Default for EligibilitySection {
    fn default() -> Self {
        Self {
            dependency_redispatch_enabled: true,
            dependency_autofail_enabled: true,
            stale_dependency_threshold: default_stale_threshold(),
            redispatch_cooldown: default_redispatch_cooldown(),
            missing_dependency_age_threshold: default_stale_threshold(),
            cancel_cooldown: default_redispatch_cooldown(),
            operator_capabilities: Vec::new(),
            trusted_operator: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorSection {
    #[serde(default = "default_max_stdout_bytes")]
    pub max_stdout_bytes: usize,
    #[serde(default = "default_max_chunk_bytes")]
    pub max_chunk_bytes: usize,
    #[serde(default = "default_repeat_line_threshold")]
    pub repeat_line_threshold: u32,
    #[serde(default = "default_identical_chunk_window")]
    pub identical_chunk_window: usize,
    #[serde(default = "default_subprocess_timeout", with = "humantime_serde")]
    pub subprocess_timeout: Duration,
    #[serde(default = "default_stdin_threshold")]
    pub stdin_prompt_threshold_bytes: usize,
    #[serde(default = "default_telemetry_wait", with = "humantime_serde")]
    pub telemetry_wait_timeout: Duration,
    #[serde(default = "default_telemetry_max_bytes")]
    pub telemetry_max_file_bytes: usize,
    #[serde(default)]
    pub browser_tools_enabled: bool,
    #[serde(default = "default_model_name")]
    pub model_name: String,
    #[serde(default)]
    pub workspace_include_dirs: Vec<PathBuf>,
    /// Path to the LLM subprocess binary (spec §4.F).
    #[serde(default = "default_binary_path")]
    pub binary_path: PathBuf,
    /// Chrome/Chromium binary for the optional headless pre-launch.
    /// `None` leaves `browser_tools_enabled` effectively disabled even if set.
    pub chrome_binary_path: Option<PathBuf>,
    pub browser_mcp_config_path: Option<PathBuf>,
    /// Parent directory under which a fresh per-job workspace is created.
    #[serde(default = "default_workspace_root")]
    pub workspace_root: PathBuf,
    /// Runtime LLM-tool home the subprocess runs against: extensions and
    /// OAuth credentials are staged here rather than the user's real home
    /// (spec §4.F "Extension management", §6 on-disk layout).
    #[serde(default = "default_runtime_home")]
    pub runtime_home: PathBuf,
    /// The user's default LLM-tool home, source of the OAuth credential
    /// files copied into `runtime_home` before each job.
    pub default_llm_home: Option<PathBuf>,
    /// Extension directory names required by the job's tool policy; copied
    /// from a bundled extensions directory into `runtime_home` if absent.
    #[serde(default)]
    pub required_extensions: Vec<String>,
    /// Source directory containing the bundled extensions named in
    /// `required_extensions`.
    pub extension_bundle_dir: Option<PathBuf>,
}

fn default_max_stdout_bytes() -> usize {
    5 * 1024 * 1024
}
fn default_max_chunk_bytes() -> usize {
    100 * 1024
}
fn default_repeat_line_threshold() -> u32 {
    10
}
fn default_identical_chunk_window() -> usize {
    10
}
fn default_subprocess_timeout() -> Duration {
    Duration::from_secs(15 * 60)
}
fn default_stdin_threshold() -> usize {
    100 * 1024
}
fn default_telemetry_wait() -> Duration {
    Duration::from_secs(10)
}
fn default_telemetry_max_bytes() -> usize {
    50 * 1024 * 1024
}
fn default_model_name() -> String {
    "gemini-2.5-pro".to_string()
}
fn default_binary_path() -> PathBuf {
    PathBuf::from("gemini")
}
fn default_workspace_root() -> PathBuf {
    std::env::temp_dir().join("jinn-worker-workspaces")
}
fn default_runtime_home() -> PathBuf {
    std::env::temp_dir().join(".gemini-worker")
}

impl Default for ExecutorSection {
    fn default() -> Self {
        Self {
            max_stdout_bytes: default_max_stdout_bytes(),
            max_chunk_bytes: default_max_chunk_bytes(),
            repeat_line_threshold: default_repeat_line_threshold(),
            identical_chunk_window: default_identical_chunk_window(),
            subprocess_timeout: default_subprocess_timeout(),
            stdin_prompt_threshold_bytes: default_stdin_threshold(),
            telemetry_wait_timeout: default_telemetry_wait(),
            telemetry_max_file_bytes: default_telemetry_max_bytes(),
            browser_tools_enabled: false,
            model_name: default_model_name(),
            workspace_include_dirs: Vec::new(),
            binary_path: default_binary_path(),
            chrome_binary_path: None,
            browser_mcp_config_path: None,
            workspace_root: default_workspace_root(),
            runtime_home: default_runtime_home(),
            default_llm_home: None,
            required_extensions: Vec::new(),
            extension_bundle_dir: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliverySection {
    #[serde(default = "default_delivery_timeout", with = "humantime_serde")]
    pub confirmation_timeout: Duration,
    #[serde(default, with = "humantime_serde")]
    pub post_delivery_delay: Duration,
    #[serde(default = "default_repost_cooldown", with = "humantime_serde")]
    pub repost_cooldown: Duration,
}

fn default_delivery_timeout() -> Duration {
    Duration::from_secs(10 * 60)
}
fn default_repost_cooldown() -> Duration {
    Duration::from_secs(10 * 60)
}

impl Default for DeliverySection {
    fn default() -> Self {
        Self {
            confirmation_timeout: default_delivery_timeout(),
            post_delivery_delay: Duration::from_secs(0),
            repost_cooldown: default_repost_cooldown(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StakingSection {
    #[serde(default = "default_checkpoint_cycles")]
    pub checkpoint_every_cycles: u32,
    #[serde(default = "default_heartbeat_cycles")]
    pub heartbeat_every_cycles: u32,
    #[serde(default = "default_fund_check_cycles")]
    pub fund_check_every_cycles: u32,
    #[serde(default = "default_maintenance_cycles")]
    pub maintenance_every_cycles: u32,
    #[serde(default = "default_restake_cooldown", with = "humantime_serde")]
    pub restake_cooldown: Duration,
    pub funding_floor: Option<String>,
    /// Minimum requests per epoch that count as meeting the activity target
    /// (spec §4.H). The contract exposes no direct getter for this; operators
    /// set it from their staking program's published liveness ratio.
    #[serde(default = "default_activity_target")]
    pub activity_target_requests: u64,
}

fn default_activity_target() -> u64 {
    1
}

fn default_checkpoint_cycles() -> u32 {
    60
}
fn default_heartbeat_cycles() -> u32 {
    16
}
fn default_fund_check_cycles() -> u32 {
    30
}
fn default_maintenance_cycles() -> u32 {
    50
}
fn default_restake_cooldown() -> Duration {
    Duration::from_secs(3_600)
}

impl Default for StakingSection {
    fn default() -> Self {
        Self {
            checkpoint_every_cycles: default_checkpoint_cycles(),
            heartbeat_every_cycles: default_heartbeat_cycles(),
            fund_check_every_cycles: default_fund_check_cycles(),
            maintenance_every_cycles: default_maintenance_cycles(),
            restake_cooldown: default_restake_cooldown(),
            funding_floor: None,
            activity_target_requests: default_activity_target(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EndpointsSection {
    pub indexer_url: String,
    pub claim_service_url: String,
    pub credential_bridge_url: String,
    pub rpc_url: String,
    pub middleware_url: String,
    #[serde(default = "default_ipfs_gateway_url")]
    pub ipfs_gateway_url: String,
}

fn default_ipfs_gateway_url() -> String {
    "https://gateway.ipfs.io".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_constants() {
        let cfg = WorkerConfig::default();
        assert_eq!(cfg.worker.base_poll_interval, Duration::from_secs(30));
        assert_eq!(cfg.worker.max_poll_interval, Duration::from_secs(300));
        assert_eq!(cfg.worker.poll_factor, 1.5);
        assert_eq!(cfg.discovery.limit, 50);
        assert_eq!(cfg.executor.max_stdout_bytes, 5 * 1024 * 1024);
        assert_eq!(cfg.executor.repeat_line_threshold, 10);
        assert_eq!(cfg.executor.subprocess_timeout, Duration::from_secs(15 * 60));
        assert_eq!(cfg.staking.checkpoint_every_cycles, 60);
        assert_eq!(cfg.staking.heartbeat_every_cycles, 16);
    }

    #[test]
    fn template_pickup_enabled_by_registry_url_or_allow_list() {
        let mut discovery = DiscoverySection::default();
        assert!(!discovery.template_pickup_enabled());
        discovery.service_registry_url = Some("https://registry.example".to_string());
        assert!(discovery.template_pickup_enabled());

        let mut discovery = DiscoverySection::default();
        discovery.template_allow_list = Some(vec!["x402".to_string()]);
        assert!(discovery.template_pickup_enabled());
    }
}
