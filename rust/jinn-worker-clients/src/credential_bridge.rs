//! Credential bridge client (spec §4.D credential filter, §6): answers
//! whether an operator is registered and which venture-scoped credentials
//! it currently holds.

use crate::error::ClientError;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct OperatorCredentials {
    pub operator_id: String,
    pub registered: bool,
    /// Names of tools/capabilities this operator currently has credentials
    /// for within the venture, e.g. `"github"`, `"aws"`.
    pub venture_scoped_tools: Vec<String>,
    /// True when the request's credential set came from a trusted operator
    /// and other queued requests from it should be prioritized (spec §4.D
    /// credential filter, trusted-operator reordering).
    pub trusted: bool,
}

#[async_trait]
pub trait CredentialBridgeClient: Send + Sync {
    async fn operator_credentials(
        &self,
        operator_id: &str,
        venture_id: &str,
    ) -> Result<Option<OperatorCredentials>, ClientError>;

    /// Narrower probe scoped to a single request, used when the bridge can
    /// answer faster for one id than enumerating the full credential set.
    async fn credentials_for_request(
        &self,
        operator_id: &str,
        venture_id: &str,
        request_id: &str,
    ) -> Result<Option<OperatorCredentials>, ClientError>;
}

pub struct HttpCredentialBridgeClient {
    http: reqwest::Client,
    base_url: String,
}

impl HttpCredentialBridgeClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl CredentialBridgeClient for HttpCredentialBridgeClient {
    async fn operator_credentials(
        &self,
        operator_id: &str,
        venture_id: &str,
    ) -> Result<Option<OperatorCredentials>, ClientError> {
        let url = format!(
            "{}/operators/{}/credentials?venture={}",
            self.base_url.trim_end_matches('/'),
            operator_id,
            venture_id
        );
        let response = self.http.get(&url).send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(ClientError::Transport(format!(
                "credential bridge returned status {}",
                response.status()
            )));
        }
        response
            .json::<OperatorCredentials>()
            .await
            .map(Some)
            .map_err(|e| ClientError::Deserialize(e.to_string()))
    }

    async fn credentials_for_request(
        &self,
        operator_id: &str,
        venture_id: &str,
        request_id: &str,
    ) -> Result<Option<OperatorCredentials>, ClientError> {
        let url = format!(
            "{}/operators/{}/credentials?venture={}&request={}",
            self.base_url.trim_end_matches('/'),
            operator_id,
            venture_id,
            request_id
        );
        let response = self.http.get(&url).send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(ClientError::Transport(format!(
                "credential bridge returned status {}",
                response.status()
            )));
        }
        response
            .json::<OperatorCredentials>()
            .await
            .map(Some)
            .map_err(|e| ClientError::Deserialize(e.to_string()))
    }
}

#[derive(Default)]
pub struct MockCredentialBridgeClient {
    pub by_operator: Mutex<HashMap<String, OperatorCredentials>>,
}

impl MockCredentialBridgeClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, operator_id: impl Into<String>, creds: OperatorCredentials) {
        self.by_operator.lock().unwrap().insert(operator_id.into(), creds);
    }
}

#[async_trait]
impl CredentialBridgeClient for MockCredentialBridgeClient {
    async fn operator_credentials(
        &self,
        operator_id: &str,
        _venture_id: &str,
    ) -> Result<Option<OperatorCredentials>, ClientError> {
        Ok(self.by_operator.lock().unwrap().get(operator_id).cloned())
    }

    async fn credentials_for_request(
        &self,
        operator_id: &str,
        _venture_id: &str,
        _request_id: &str,
    ) -> Result<Option<OperatorCredentials>, ClientError> {
        Ok(self.by_operator.lock().unwrap().get(operator_id).cloned())
    }
}
