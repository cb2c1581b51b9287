//! Layered config loading: env > file > defaults (spec §6 "Environment
//! variables recognized by the core"), grounded on `knhk-config`'s loading
//! hierarchy.

use crate::schema::WorkerConfig;
use crate::ConfigError;
use std::path::Path;

pub fn load_from_file(path: &Path) -> Result<WorkerConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
    toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))
}

/// Load configuration from an optional file, then apply recognized
/// environment variable overrides on top.
pub fn load(path: Option<&Path>) -> Result<WorkerConfig, ConfigError> {
    let mut config = match path {
        Some(p) if p.exists() => load_from_file(p)?,
        _ => WorkerConfig::default(),
    };
    apply_env_overrides(&mut config);
    Ok(config)
}

/// Apply the environment variables named in spec §6. Unknown/malformed
/// values are logged as warnings and skipped — overrides never panic the
/// daemon at startup (cf. `fail open` in the Cycle Controller's schedule
/// parsing, spec §4.A).
pub fn apply_env_overrides(config: &mut WorkerConfig) {
    if let Ok(v) = std::env::var("JINN_STOP_FILE") {
        config.worker.stop_file = v.into();
    }
    if let Ok(v) = std::env::var("JINN_MAX_RUNS") {
        match v.parse() {
            Ok(n) => config.worker.max_runs = Some(n),
            Err(_) => tracing::warn!(value = %v, "ignoring invalid JINN_MAX_RUNS"),
        }
    }
    if let Ok(v) = std::env::var("JINN_MAX_CYCLES") {
        match v.parse() {
            Ok(n) => config.worker.max_cycles = Some(n),
            Err(_) => tracing::warn!(value = %v, "ignoring invalid JINN_MAX_CYCLES"),
        }
    }
    if let Ok(v) = std::env::var("JINN_MAX_STUCK_CYCLES") {
        match v.parse() {
            Ok(n) => config.worker.max_stuck_cycles = n,
            Err(_) => tracing::warn!(value = %v, "ignoring invalid JINN_MAX_STUCK_CYCLES"),
        }
    }
    if let Ok(v) = std::env::var("JINN_EARNING_WINDOW") {
        config.worker.earning_window = Some(v);
    }
    if let Ok(v) = std::env::var("JINN_EARNING_WINDOW_MAX_JOBS") {
        match v.parse() {
            Ok(n) => config.worker.earning_window_max_jobs = Some(n),
            Err(_) => tracing::warn!(value = %v, "ignoring invalid JINN_EARNING_WINDOW_MAX_JOBS"),
        }
    }
    if let Ok(v) = std::env::var("JINN_MULTI_SERVICE") {
        config.worker.multi_service = v == "1" || v.eq_ignore_ascii_case("true");
    }
    if let Ok(v) = std::env::var("JINN_INDEXER_URL") {
        config.endpoints.indexer_url = v;
    }
    if let Ok(v) = std::env::var("JINN_CLAIM_SERVICE_URL") {
        config.endpoints.claim_service_url = v;
    }
    if let Ok(v) = std::env::var("JINN_CREDENTIAL_BRIDGE_URL") {
        config.endpoints.credential_bridge_url = v;
    }
    if let Ok(v) = std::env::var("JINN_RPC_URL") {
        config.endpoints.rpc_url = v;
    }
    if let Ok(v) = std::env::var("JINN_MIDDLEWARE_URL") {
        config.endpoints.middleware_url = v;
    }
    if let Ok(v) = std::env::var("JINN_IPFS_GATEWAY_URL") {
        config.endpoints.ipfs_gateway_url = v;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_missing_falls_back_to_defaults() {
        let config = load(Some(Path::new("/nonexistent/path.toml"))).unwrap();
        assert_eq!(config.worker.worker_id, "worker-0");
    }

    #[test]
    fn loading_from_real_file_parses_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("worker.toml");
        std::fs::write(
            &path,
            r#"
            [worker]
            worker_id = "svc-2"
            stop_file = "/tmp/stop"
            "#,
        )
        .unwrap();

        let config = load(Some(&path)).unwrap();
        assert_eq!(config.worker.worker_id, "svc-2");
    }

    #[test]
    fn malformed_env_values_are_ignored_not_fatal() {
        std::env::set_var("JINN_MAX_RUNS", "not-a-number");
        let mut config = WorkerConfig::default();
        apply_env_overrides(&mut config);
        assert_eq!(config.worker.max_runs, None);
        std::env::remove_var("JINN_MAX_RUNS");
    }
}
