//! IPFS content fetch (spec §3 "ipfs_hash", §4.F prompt construction): the
//! Executor needs the request's payload text before it can build a prompt,
//! grounded on the same `reqwest`-GET-plus-mock shape as
//! `credential_bridge::HttpCredentialBridgeClient`.

use crate::error::ClientError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

#[async_trait]
pub trait IpfsClient: Send + Sync {
    /// Fetches the raw payload behind a content hash and returns it as
    /// text. The payload shape (plain prompt text vs. a JSON envelope) is
    /// a convention between the requester and the worker's job templates,
    /// not something this client parses.
    async fn fetch_content(&self, ipfs_hash: &str) -> Result<String, ClientError>;
}

/// Production implementation: a GET against a configured gateway,
/// `{gateway}/ipfs/{hash}`.
pub struct HttpIpfsClient {
    http: reqwest::Client,
    gateway_url: String,
}

impl HttpIpfsClient {
    pub fn new(gateway_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            gateway_url: gateway_url.into(),
        }
    }
}

#[async_trait]
impl IpfsClient for HttpIpfsClient {
    async fn fetch_content(&self, ipfs_hash: &str) -> Result<String, ClientError> {
        let url = format!("{}/ipfs/{}", self.gateway_url.trim_end_matches('/'), ipfs_hash);
        let response = self.http.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(ClientError::Transport(format!(
                "ipfs gateway returned status {}",
                response.status()
            )));
        }
        response.text().await.map_err(|e| ClientError::Deserialize(e.to_string()))
    }
}

/// In-memory mock, scripted per hash.
#[derive(Default)]
pub struct MockIpfsClient {
    pub content: Mutex<HashMap<String, String>>,
}

impl MockIpfsClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, ipfs_hash: impl Into<String>, content: impl Into<String>) {
        self.content.lock().unwrap().insert(ipfs_hash.into(), content.into());
    }
}

#[async_trait]
impl IpfsClient for MockIpfsClient {
    async fn fetch_content(&self, ipfs_hash: &str) -> Result<String, ClientError> {
        self.content
            .lock()
            .unwrap()
            .get(ipfs_hash)
            .cloned()
            .ok_or_else(|| ClientError::UnexpectedResponse(format!("no mock content for {ipfs_hash}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_returns_scripted_content() {
        let mock = MockIpfsClient::new();
        mock.set("QmHash", "do the thing");
        let content = mock.fetch_content("QmHash").await.unwrap();
        assert_eq!(content, "do the thing");
    }

    #[tokio::test]
    async fn mock_errors_on_unscripted_hash() {
        let mock = MockIpfsClient::new();
        assert!(mock.fetch_content("QmMissing").await.is_err());
    }
}
