//! Multisig delivery client (spec §4.G): submits a delivery transaction
//! through the service Safe and waits (bounded) for confirmation.

use crate::error::ClientError;
use async_trait::async_trait;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Confirmed { tx_hash: String },
    TimedOut { tx_hash: String },
}

#[async_trait]
pub trait MultisigDeliverer: Send + Sync {
    /// Submit the pre-encoded deliver calldata through the Safe and block
    /// (up to `confirmation_timeout`) for on-chain confirmation.
    async fn deliver(
        &self,
        safe_address: &str,
        calldata_hex: &str,
        confirmation_timeout: Duration,
    ) -> Result<DeliveryOutcome, ClientError>;
}

pub struct HttpMultisigDeliverer {
    http: reqwest::Client,
    relay_url: String,
}

impl HttpMultisigDeliverer {
    pub fn new(relay_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            relay_url: relay_url.into(),
        }
    }
}

#[async_trait]
impl MultisigDeliverer for HttpMultisigDeliverer {
    async fn deliver(
        &self,
        safe_address: &str,
        calldata_hex: &str,
        confirmation_timeout: Duration,
    ) -> Result<DeliveryOutcome, ClientError> {
        let submit_url = format!("{}/safes/{}/transactions", self.relay_url.trim_end_matches('/'), safe_address);
        let response = self
            .http
            .post(&submit_url)
            .json(&serde_json::json!({ "data": calldata_hex }))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(ClientError::Transport(format!(
                "multisig relay returned status {}",
                response.status()
            )));
        }
        let submitted: serde_json::Value = response.json().await.map_err(|e| ClientError::Deserialize(e.to_string()))?;
        let tx_hash = submitted
            .get("txHash")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ClientError::UnexpectedResponse("missing txHash".to_string()))?
            .to_string();

        let status_url = format!("{}/transactions/{}", self.relay_url.trim_end_matches('/'), tx_hash);
        let deadline = tokio::time::Instant::now() + confirmation_timeout;
        loop {
            let status: serde_json::Value = self
                .http
                .get(&status_url)
                .send()
                .await?
                .json()
                .await
                .map_err(|e| ClientError::Deserialize(e.to_string()))?;
            if status.get("confirmed").and_then(|v| v.as_bool()).unwrap_or(false) {
                return Ok(DeliveryOutcome::Confirmed { tx_hash });
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(DeliveryOutcome::TimedOut { tx_hash });
            }
            tokio::time::sleep(Duration::from_secs(5)).await;
        }
    }
}

pub struct MockMultisigDeliverer {
    pub outcome: DeliveryOutcome,
    pub calls: std::sync::Mutex<Vec<(String, String)>>,
}

impl MockMultisigDeliverer {
    pub fn new(outcome: DeliveryOutcome) -> Self {
        Self {
            outcome,
            calls: std::sync::Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl MultisigDeliverer for MockMultisigDeliverer {
    async fn deliver(
        &self,
        safe_address: &str,
        calldata_hex: &str,
        _confirmation_timeout: Duration,
    ) -> Result<DeliveryOutcome, ClientError> {
        self.calls.lock().unwrap().push((safe_address.to_string(), calldata_hex.to_string()));
        Ok(self.outcome.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_records_calldata_and_returns_scripted_outcome() {
        let mock = MockMultisigDeliverer::new(DeliveryOutcome::Confirmed {
            tx_hash: "0xabc".to_string(),
        });
        let outcome = mock.deliver("0xsafe", "0xdead", Duration::from_secs(1)).await.unwrap();
        assert_eq!(outcome, DeliveryOutcome::Confirmed { tx_hash: "0xabc".to_string() });
        assert_eq!(mock.calls.lock().unwrap().len(), 1);
    }
}
