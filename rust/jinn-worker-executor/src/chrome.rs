//! Headless Chrome pre-launch (spec §4.F "Chrome pre-launch"), gated on
//! `ExecutorSection::browser_tools_enabled`. Launched before the subprocess
//! enters any OS-level sandbox, because the sandbox denies the launch.

use rand::Rng;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::time::{timeout, Duration};
use tracing::{instrument, warn};

const DEVTOOLS_READY_MARKER: &str = "DevTools listening";
const DEVTOOLS_WAIT_TIMEOUT: Duration = Duration::from_secs(15);

pub struct ChromeHandle {
    child: Child,
    user_data_dir: PathBuf,
    pub remote_debugging_port: u16,
}

impl ChromeHandle {
    /// Patch the browser-MCP extension config to point at this instance's
    /// loopback debugging port (spec §4.F).
    pub fn devtools_url(&self) -> String {
        format!("127.0.0.1:{}", self.remote_debugging_port)
    }

    /// Kill the process and remove its user-data directory. Safe to call
    /// more than once; errors are logged, never propagated, since cleanup
    /// runs unconditionally on every exit path.
    pub async fn shutdown(mut self) {
        if let Err(e) = self.child.kill().await {
            warn!(error = %e, "failed to kill chrome process during cleanup");
        }
        if let Err(e) = tokio::fs::remove_dir_all(&self.user_data_dir).await {
            warn!(error = %e, path = %self.user_data_dir.display(), "failed to remove chrome user-data dir");
        }
    }
}

fn random_debugging_port() -> u16 {
    rand::thread_rng().gen_range(9222..19222)
}

/// Patches the browser-MCP extension config file at `config_path` so its
/// `devtoolsUrl` field points at `url`. The config is a small JSON object;
/// missing fields are created rather than treated as an error, since a
/// fresh runtime home has no config file yet.
pub async fn patch_extension_config(config_path: &Path, url: &str) -> std::io::Result<()> {
    let mut value: serde_json::Value = match tokio::fs::read(config_path).await {
        Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|_| serde_json::json!({})),
        Err(_) => serde_json::json!({}),
    };
    value["devtoolsUrl"] = serde_json::Value::String(url.to_string());
    if let Some(parent) = config_path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(config_path, serde_json::to_vec_pretty(&value)?).await
}

/// Launches headless Chrome with a random remote-debugging port and a fresh
/// temporary user-data directory, blocking until the "DevTools listening"
/// marker appears on stderr (or the wait times out).
#[instrument(skip(chrome_binary))]
pub async fn launch_headless_chrome(chrome_binary: &str) -> std::io::Result<ChromeHandle> {
    let port = random_debugging_port();
    let user_data_dir = std::env::temp_dir().join(format!("jinn-chrome-{port}"));
    tokio::fs::create_dir_all(&user_data_dir).await?;

    let mut command = Command::new(chrome_binary);
    command
        .arg("--headless=new")
        .arg(format!("--remote-debugging-port={port}"))
        .arg(format!("--user-data-dir={}", user_data_dir.display()))
        .arg("--no-sandbox")
        .arg("--disable-gpu")
        .stdout(Stdio::null())
        .stderr(Stdio::piped());

    let mut child = command.spawn()?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::Other, "chrome stderr not piped"))?;
    let mut lines = BufReader::new(stderr).lines();

    let wait_for_marker = async {
        while let Ok(Some(line)) = lines.next_line().await {
            if line.contains(DEVTOOLS_READY_MARKER) {
                return Ok(());
            }
        }
        Err(std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "chrome exited before DevTools was ready"))
    };

    match timeout(DEVTOOLS_WAIT_TIMEOUT, wait_for_marker).await {
        Ok(Ok(())) => Ok(ChromeHandle {
            child,
            user_data_dir,
            remote_debugging_port: port,
        }),
        Ok(Err(e)) => {
            let _ = child.kill().await;
            let _ = tokio::fs::remove_dir_all(&user_data_dir).await;
            Err(e)
        }
        Err(_) => {
            let _ = child.kill().await;
            let _ = tokio::fs::remove_dir_all(&user_data_dir).await;
            Err(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "timed out waiting for chrome DevTools listening marker",
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_port_is_in_expected_range() {
        for _ in 0..50 {
            let port = random_debugging_port();
            assert!((9222..19222).contains(&port));
        }
    }

    #[tokio::test]
    async fn patch_extension_config_creates_missing_file_and_sets_url() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("nested").join("browser-mcp.json");
        patch_extension_config(&config_path, "127.0.0.1:9222").await.unwrap();

        let written = tokio::fs::read_to_string(&config_path).await.unwrap();
        let value: serde_json::Value = serde_json::from_str(&written).unwrap();
        assert_eq!(value["devtoolsUrl"], "127.0.0.1:9222");
    }

    #[tokio::test]
    async fn patch_extension_config_preserves_existing_fields() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("browser-mcp.json");
        tokio::fs::write(&config_path, r#"{"otherField":"keep-me"}"#).await.unwrap();
        patch_extension_config(&config_path, "127.0.0.1:9333").await.unwrap();

        let written = tokio::fs::read_to_string(&config_path).await.unwrap();
        let value: serde_json::Value = serde_json::from_str(&written).unwrap();
        assert_eq!(value["otherField"], "keep-me");
        assert_eq!(value["devtoolsUrl"], "127.0.0.1:9333");
    }
}
