//! Localhost signing proxy (spec §4.I, §4.J): the only component that ever
//! touches the agent's private key. Bound to `127.0.0.1` on an ephemeral
//! port, authenticated with a random bearer token minted at startup, and
//! restarted by the Rotator whenever the active service changes.

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};
use ed25519_dalek::{Signer, SigningKey};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

#[derive(Clone)]
struct ProxyState {
    signing_key: Arc<SigningKey>,
    bearer_token: Arc<String>,
}

#[derive(Deserialize)]
struct SignMessageRequest {
    message_hex: String,
}

#[derive(Deserialize)]
struct SignTransactionRequest {
    tx_hex: String,
}

#[derive(Deserialize)]
struct SignTypedDataRequest {
    domain_separator_hex: String,
    struct_hash_hex: String,
}

#[derive(Serialize)]
struct SignatureResponse {
    signature_hex: String,
}

/// Compares the supplied bearer token against `expected` in constant time
/// (spec §4.J) so a timing side-channel can't be used to guess the token
/// byte-by-byte.
fn authorize(headers: &HeaderMap, expected: &str) -> bool {
    let expected = format!("Bearer {expected}");
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.as_bytes().ct_eq(expected.as_bytes()).into())
        .unwrap_or(false)
}

fn decode_hex(input: &str) -> Result<Vec<u8>, hex::FromHexError> {
    hex::decode(input.trim_start_matches("0x"))
}

async fn sign_message(
    State(state): State<ProxyState>,
    headers: HeaderMap,
    Json(request): Json<SignMessageRequest>,
) -> impl IntoResponse {
    if !authorize(&headers, &state.bearer_token) {
        return (StatusCode::UNAUTHORIZED, "missing or invalid bearer token").into_response();
    }
    let bytes = match decode_hex(&request.message_hex) {
        Ok(b) => b,
        Err(_) => return (StatusCode::BAD_REQUEST, "invalid hex").into_response(),
    };
    let signature = state.signing_key.sign(&bytes);
    Json(SignatureResponse {
        signature_hex: hex::encode(signature.to_bytes()),
    })
    .into_response()
}

async fn sign_transaction(
    State(state): State<ProxyState>,
    headers: HeaderMap,
    Json(request): Json<SignTransactionRequest>,
) -> impl IntoResponse {
    if !authorize(&headers, &state.bearer_token) {
        return (StatusCode::UNAUTHORIZED, "missing or invalid bearer token").into_response();
    }
    let bytes = match decode_hex(&request.tx_hex) {
        Ok(b) => b,
        Err(_) => return (StatusCode::BAD_REQUEST, "invalid hex").into_response(),
    };
    let signature = state.signing_key.sign(&bytes);
    Json(SignatureResponse {
        signature_hex: hex::encode(signature.to_bytes()),
    })
    .into_response()
}

async fn sign_typed_data(
    State(state): State<ProxyState>,
    headers: HeaderMap,
    Json(request): Json<SignTypedDataRequest>,
) -> impl IntoResponse {
    if !authorize(&headers, &state.bearer_token) {
        return (StatusCode::UNAUTHORIZED, "missing or invalid bearer token").into_response();
    }
    let domain = match decode_hex(&request.domain_separator_hex) {
        Ok(b) => b,
        Err(_) => return (StatusCode::BAD_REQUEST, "invalid hex").into_response(),
    };
    let struct_hash = match decode_hex(&request.struct_hash_hex) {
        Ok(b) => b,
        Err(_) => return (StatusCode::BAD_REQUEST, "invalid hex").into_response(),
    };
    let mut payload = Vec::with_capacity(domain.len() + struct_hash.len() + 2);
    payload.extend_from_slice(&[0x19, 0x01]);
    payload.extend_from_slice(&domain);
    payload.extend_from_slice(&struct_hash);
    let signature = state.signing_key.sign(&payload);
    Json(SignatureResponse {
        signature_hex: hex::encode(signature.to_bytes()),
    })
    .into_response()
}

/// Handle returned to callers (Rotator, Claim Arbitrator, Deliverer). Holds
/// only the loopback URL and bearer token — never the key itself.
pub struct SigningProxyHandle {
    pub base_url: String,
    pub bearer_token: String,
    shutdown: Option<oneshot::Sender<()>>,
    join_handle: Option<JoinHandle<()>>,
}

impl SigningProxyHandle {
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.join_handle.take() {
            let _ = handle.await;
        }
    }
}

/// Starts the proxy bound to an OS-assigned loopback port. `signing_key` is
/// moved in and zeroized (via `SigningKey`'s own `Drop`) when the server
/// task exits after shutdown.
pub async fn start_signing_proxy(signing_key: SigningKey) -> std::io::Result<SigningProxyHandle> {
    let mut token_bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut token_bytes);
    let bearer_token = hex::encode(token_bytes);

    let state = ProxyState {
        signing_key: Arc::new(signing_key),
        bearer_token: Arc::new(bearer_token.clone()),
    };

    let app = Router::new()
        .route("/sign/message", post(sign_message))
        .route("/sign/transaction", post(sign_transaction))
        .route("/sign/typed-data", post(sign_typed_data))
        .with_state(state);

    let addr: SocketAddr = "127.0.0.1:0".parse().expect("static loopback address");
    let listener = TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let join_handle = tokio::spawn(async move {
        let _ = axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await;
    });

    Ok(SigningProxyHandle {
        base_url: format!("http://{bound_addr}"),
        bearer_token,
        shutdown: Some(shutdown_tx),
        join_handle: Some(join_handle),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::SigningKey;

    fn test_key() -> SigningKey {
        let mut seed = [7u8; 32];
        seed[0] = 1;
        SigningKey::from_bytes(&seed)
    }

    #[tokio::test]
    async fn rejects_requests_without_bearer_token() {
        let handle = start_signing_proxy(test_key()).await.unwrap();
        let client = reqwest::Client::new();
        let response = client
            .post(format!("{}/sign/message", handle.base_url))
            .json(&serde_json::json!({ "message_hex": "deadbeef" }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::UNAUTHORIZED);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn rejects_requests_with_wrong_token() {
        let handle = start_signing_proxy(test_key()).await.unwrap();
        let client = reqwest::Client::new();
        let response = client
            .post(format!("{}/sign/message", handle.base_url))
            .bearer_auth("0".repeat(handle.bearer_token.len()))
            .json(&serde_json::json!({ "message_hex": "deadbeef" }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::UNAUTHORIZED);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn signs_message_with_valid_token() {
        let handle = start_signing_proxy(test_key()).await.unwrap();
        let client = reqwest::Client::new();
        let response = client
            .post(format!("{}/sign/message", handle.base_url))
            .bearer_auth(&handle.bearer_token)
            .json(&serde_json::json!({ "message_hex": "deadbeef" }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::OK);
        let body: serde_json::Value = response.json().await.unwrap();
        assert!(body.get("signature_hex").and_then(|v| v.as_str()).unwrap().len() > 0);
        handle.shutdown().await;
    }
}
