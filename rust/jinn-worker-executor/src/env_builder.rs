//! Subprocess environment construction (spec §4.F).
//!
//! Rebuilds the LLM subprocess's environment from scratch through
//! [`EnvAllowlist`], then layers in job-context and signing-proxy variables
//! that the allowlist alone could never admit from the worker's own
//! process environment (they don't exist there — they're minted per job).

use jinn_worker_config::env_allowlist::EnvAllowlist;
use jinn_worker_types::Request;
use std::path::Path;

/// Parameters needed to inject the per-job variables that are not simply
/// carried over from the worker process's own environment.
pub struct JobContext<'a> {
    pub request: &'a Request,
    pub telemetry_file: &'a Path,
    pub signing_proxy_base_url: &'a str,
    pub signing_proxy_bearer_token: &'a str,
    /// Runtime LLM-tool home staged by `runtime_home::ensure_extensions_installed`
    /// / `copy_oauth_credentials`; exported so the subprocess picks up its
    /// extensions and credentials from there instead of the real user home.
    pub runtime_home: &'a Path,
}

/// Build the full subprocess environment: allowlisted inherited variables
/// plus job-context injections. Injected variables always win over an
/// inherited variable of the same name.
pub fn build_subprocess_env(
    allowlist: &EnvAllowlist,
    inherited: impl IntoIterator<Item = (String, String)>,
    ctx: &JobContext<'_>,
) -> Vec<(String, String)> {
    let mut env = allowlist.filter(inherited);

    let mut injected = vec![
        ("JOB_ID".to_string(), ctx.request.id.clone()),
        (
            "JINN_TELEMETRY_FILE".to_string(),
            ctx.telemetry_file.display().to_string(),
        ),
        (
            "JINN_RUNTIME_SIGNING_PROXY_URL".to_string(),
            ctx.signing_proxy_base_url.to_string(),
        ),
        (
            "JINN_RUNTIME_SIGNING_PROXY_TOKEN".to_string(),
            ctx.signing_proxy_bearer_token.to_string(),
        ),
        ("GEMINI_HOME".to_string(), ctx.runtime_home.display().to_string()),
    ];

    if let Some(workstream_id) = &ctx.request.workstream_id {
        injected.push(("WORKSTREAM_ID".to_string(), workstream_id.clone()));
    }

    for (key, value) in injected {
        env.retain(|(k, _)| k != &key);
        env.push((key, value));
    }

    env
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn request() -> Request {
        Request {
            id: "0xabc".to_string(),
            mech: "0xMECH".to_string(),
            sender: "0xSENDER".to_string(),
            workstream_id: Some("ws-1".to_string()),
            block_timestamp: 1_000,
            ipfs_hash: "QmHash".to_string(),
            delivered: false,
            dependencies: None,
            response_timeout: None,
            required_tools: None,
            job_name: None,
        }
    }

    #[test]
    fn injects_job_context_and_signing_proxy_vars() {
        let allowlist = EnvAllowlist::new();
        let request = request();
        let telemetry_path = PathBuf::from("/tmp/job-telemetry.json");
        let ctx = JobContext {
            request: &request,
            telemetry_file: &telemetry_path,
            signing_proxy_base_url: "http://127.0.0.1:45231",
            signing_proxy_bearer_token: "deadbeef",
            runtime_home: Path::new("/tmp/.gemini-worker-test"),
        };

        let env = build_subprocess_env(&allowlist, vec![("PATH".to_string(), "/usr/bin".to_string())], &ctx);
        let lookup = |key: &str| env.iter().find(|(k, _)| k == key).map(|(_, v)| v.clone());

        assert_eq!(lookup("PATH"), Some("/usr/bin".to_string()));
        assert_eq!(lookup("JOB_ID"), Some("0xabc".to_string()));
        assert_eq!(lookup("WORKSTREAM_ID"), Some("ws-1".to_string()));
        assert_eq!(
            lookup("JINN_RUNTIME_SIGNING_PROXY_URL"),
            Some("http://127.0.0.1:45231".to_string())
        );
        assert_eq!(lookup("JINN_RUNTIME_SIGNING_PROXY_TOKEN"), Some("deadbeef".to_string()));
    }

    #[test]
    fn rejects_unlisted_inherited_vars_even_when_injected_names_collide() {
        let allowlist = EnvAllowlist::new();
        let request = request();
        let telemetry_path = PathBuf::from("/tmp/job-telemetry.json");
        let ctx = JobContext {
            request: &request,
            telemetry_file: &telemetry_path,
            signing_proxy_base_url: "http://127.0.0.1:1",
            signing_proxy_bearer_token: "tok",
            runtime_home: Path::new("/tmp/.gemini-worker-test"),
        };

        let inherited = vec![
            ("SECRET_KEY".to_string(), "leak-me".to_string()),
            ("JOB_ID".to_string(), "stale-inherited-value".to_string()),
        ];
        let env = build_subprocess_env(&allowlist, inherited, &ctx);
        let lookup = |key: &str| env.iter().find(|(k, _)| k == key).map(|(_, v)| v.clone());

        assert_eq!(lookup("SECRET_KEY"), None);
        assert_eq!(lookup("JOB_ID"), Some("0xabc".to_string()));
        assert_eq!(env.iter().filter(|(k, _)| k == "JOB_ID").count(), 1);
    }

    #[test]
    fn no_workstream_id_means_no_workstream_var_injected() {
        let allowlist = EnvAllowlist::new();
        let mut request = request();
        request.workstream_id = None;
        let telemetry_path = PathBuf::from("/tmp/job-telemetry.json");
        let ctx = JobContext {
            request: &request,
            telemetry_file: &telemetry_path,
            signing_proxy_base_url: "http://127.0.0.1:1",
            signing_proxy_bearer_token: "tok",
            runtime_home: Path::new("/tmp/.gemini-worker-test"),
        };

        let env = build_subprocess_env(&allowlist, Vec::new(), &ctx);
        assert!(!env.iter().any(|(k, _)| k == "WORKSTREAM_ID"));
    }
}
