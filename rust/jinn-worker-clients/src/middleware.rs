//! Operate-middleware client (spec §4.H funding/restake plumbing, §6):
//! service lifecycle and funding operations delegated to the local
//! operate-middleware sidecar rather than performed directly.

use crate::error::ClientError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, Clone, Deserialize)]
pub struct DeploymentStatus {
    pub service_id: u64,
    pub status: String,
    pub healthy: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FundingRequirements {
    pub service_id: u64,
    pub native_token_shortfall: u128,
    pub olas_shortfall: u128,
}

#[derive(Debug, Serialize)]
struct FundRequest {
    service_id: u64,
    amount: u128,
}

#[async_trait]
pub trait MiddlewareClient: Send + Sync {
    async fn login(&self) -> Result<(), ClientError>;
    async fn create_service(&self, config_id: &str) -> Result<u64, ClientError>;
    async fn start_service(&self, service_id: u64) -> Result<(), ClientError>;
    async fn stop_deployment(&self, service_id: u64) -> Result<(), ClientError>;
    async fn deployment_status(&self, service_id: u64) -> Result<DeploymentStatus, ClientError>;
    async fn funding_requirements(&self, service_id: u64) -> Result<FundingRequirements, ClientError>;
    async fn fund(&self, service_id: u64, amount: u128) -> Result<(), ClientError>;
    async fn terminate_and_withdraw(&self, service_id: u64) -> Result<(), ClientError>;
    async fn wallet_withdraw(&self, service_id: u64, to: &str) -> Result<(), ClientError>;
    async fn restake(&self, service_id: u64) -> Result<(), ClientError>;
}

pub struct HttpMiddlewareClient {
    http: reqwest::Client,
    base_url: String,
}

impl HttpMiddlewareClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    async fn check(&self, response: reqwest::Response) -> Result<reqwest::Response, ClientError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            Err(ClientError::Transport(format!("middleware returned status {}", response.status())))
        }
    }
}

#[async_trait]
impl MiddlewareClient for HttpMiddlewareClient {
    async fn login(&self) -> Result<(), ClientError> {
        let response = self.http.post(self.url("/auth/login")).send().await?;
        self.check(response).await?;
        Ok(())
    }

    async fn create_service(&self, config_id: &str) -> Result<u64, ClientError> {
        let response = self
            .http
            .post(self.url("/services"))
            .json(&serde_json::json!({ "configId": config_id }))
            .send()
            .await?;
        let response = self.check(response).await?;
        let body: serde_json::Value = response.json().await.map_err(|e| ClientError::Deserialize(e.to_string()))?;
        body.get("serviceId")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| ClientError::UnexpectedResponse("missing serviceId".to_string()))
    }

    async fn start_service(&self, service_id: u64) -> Result<(), ClientError> {
        let response = self.http.post(self.url(&format!("/services/{service_id}/start"))).send().await?;
        self.check(response).await?;
        Ok(())
    }

    async fn stop_deployment(&self, service_id: u64) -> Result<(), ClientError> {
        let response = self.http.post(self.url(&format!("/services/{service_id}/stop"))).send().await?;
        self.check(response).await?;
        Ok(())
    }

    async fn deployment_status(&self, service_id: u64) -> Result<DeploymentStatus, ClientError> {
        let response = self.http.get(self.url(&format!("/services/{service_id}/status"))).send().await?;
        let response = self.check(response).await?;
        response.json().await.map_err(|e| ClientError::Deserialize(e.to_string()))
    }

    async fn funding_requirements(&self, service_id: u64) -> Result<FundingRequirements, ClientError> {
        let response = self.http.get(self.url(&format!("/services/{service_id}/funding"))).send().await?;
        let response = self.check(response).await?;
        response.json().await.map_err(|e| ClientError::Deserialize(e.to_string()))
    }

    async fn fund(&self, service_id: u64, amount: u128) -> Result<(), ClientError> {
        let response = self
            .http
            .post(self.url(&format!("/services/{service_id}/fund")))
            .json(&FundRequest { service_id, amount })
            .send()
            .await?;
        self.check(response).await?;
        Ok(())
    }

    async fn terminate_and_withdraw(&self, service_id: u64) -> Result<(), ClientError> {
        let response = self.http.post(self.url(&format!("/services/{service_id}/terminate"))).send().await?;
        self.check(response).await?;
        Ok(())
    }

    async fn wallet_withdraw(&self, service_id: u64, to: &str) -> Result<(), ClientError> {
        let response = self
            .http
            .post(self.url(&format!("/services/{service_id}/withdraw")))
            .json(&serde_json::json!({ "to": to }))
            .send()
            .await?;
        self.check(response).await?;
        Ok(())
    }

    async fn restake(&self, service_id: u64) -> Result<(), ClientError> {
        let response = self.http.post(self.url(&format!("/services/{service_id}/restake"))).send().await?;
        self.check(response).await?;
        Ok(())
    }
}

/// In-memory mock recording every call made against it, for assertions in
/// staking-coordinator tests.
#[derive(Default)]
pub struct MockMiddlewareClient {
    pub funding: Mutex<HashMap<u64, FundingRequirements>>,
    pub statuses: Mutex<HashMap<u64, DeploymentStatus>>,
    pub fund_calls: Mutex<Vec<(u64, u128)>>,
    pub restake_calls: Mutex<Vec<u64>>,
    pub terminate_calls: Mutex<Vec<u64>>,
}

impl MockMiddlewareClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_funding(&self, service_id: u64, requirements: FundingRequirements) {
        self.funding.lock().unwrap().insert(service_id, requirements);
    }

    pub fn set_status(&self, service_id: u64, status: DeploymentStatus) {
        self.statuses.lock().unwrap().insert(service_id, status);
    }
}

#[async_trait]
impl MiddlewareClient for MockMiddlewareClient {
    async fn login(&self) -> Result<(), ClientError> {
        Ok(())
    }

    async fn create_service(&self, _config_id: &str) -> Result<u64, ClientError> {
        Ok(1)
    }

    async fn start_service(&self, _service_id: u64) -> Result<(), ClientError> {
        Ok(())
    }

    async fn stop_deployment(&self, _service_id: u64) -> Result<(), ClientError> {
        Ok(())
    }

    async fn deployment_status(&self, service_id: u64) -> Result<DeploymentStatus, ClientError> {
        Ok(self.statuses.lock().unwrap().get(&service_id).cloned().unwrap_or(DeploymentStatus {
            service_id,
            status: "unknown".to_string(),
            healthy: false,
        }))
    }

    async fn funding_requirements(&self, service_id: u64) -> Result<FundingRequirements, ClientError> {
        Ok(self.funding.lock().unwrap().get(&service_id).cloned().unwrap_or(FundingRequirements {
            service_id,
            native_token_shortfall: 0,
            olas_shortfall: 0,
        }))
    }

    async fn fund(&self, service_id: u64, amount: u128) -> Result<(), ClientError> {
        self.fund_calls.lock().unwrap().push((service_id, amount));
        Ok(())
    }

    async fn terminate_and_withdraw(&self, service_id: u64) -> Result<(), ClientError> {
        self.terminate_calls.lock().unwrap().push(service_id);
        Ok(())
    }

    async fn wallet_withdraw(&self, _service_id: u64, _to: &str) -> Result<(), ClientError> {
        Ok(())
    }

    async fn restake(&self, service_id: u64) -> Result<(), ClientError> {
        self.restake_calls.lock().unwrap().push(service_id);
        Ok(())
    }
}
