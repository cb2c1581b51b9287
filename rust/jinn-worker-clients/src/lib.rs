//! Trait-backed clients for every external collaborator the worker talks
//! to: the indexer, the claim arbitration service, the credential bridge,
//! the chain RPC, the delivery multisig, the operate-middleware sidecar,
//! and the in-process signing proxy.
//!
//! Grounded on `knhk-autonomous-loop::dependencies::LoopDependencies`: each
//! collaborator is an `async_trait` object behind an `Arc<dyn Trait>`, with
//! a production `reqwest`-backed implementation and an in-memory mock
//! implementation living side by side so downstream crates can be tested
//! without a network.

pub mod chain;
pub mod claim;
pub mod credential_bridge;
pub mod error;
pub mod indexer;
pub mod ipfs;
pub mod middleware;
pub mod multisig;
pub mod signing_proxy;

pub use chain::{ChainReader, ChainWriter, JsonRpcChainClient, MockChainClient, ServiceStakingState, StakingState};
pub use claim::{ClaimClient, ClaimRequest, ClaimVerdict, HttpClaimClient, MockClaimClient};
pub use credential_bridge::{CredentialBridgeClient, HttpCredentialBridgeClient, MockCredentialBridgeClient, OperatorCredentials};
pub use error::ClientError;
pub use indexer::{GraphqlIndexerClient, IndexerClient, IndexerFilter, MockIndexerClient};
pub use ipfs::{HttpIpfsClient, IpfsClient, MockIpfsClient};
pub use middleware::{DeploymentStatus, FundingRequirements, HttpMiddlewareClient, MiddlewareClient, MockMiddlewareClient};
pub use multisig::{DeliveryOutcome, HttpMultisigDeliverer, MockMultisigDeliverer, MultisigDeliverer};
pub use signing_proxy::{start_signing_proxy, SigningProxyHandle};

use std::sync::Arc;

/// Bundle of every collaborator the cycle controller threads through the
/// phases. Assembled once at startup from either real or mock
/// implementations, then cloned cheaply (all fields are `Arc`) per cycle.
#[derive(Clone)]
pub struct ClientBundle {
    pub indexer: Arc<dyn IndexerClient>,
    pub claim: Arc<dyn ClaimClient>,
    pub credential_bridge: Arc<dyn CredentialBridgeClient>,
    pub chain_reader: Arc<dyn ChainReader>,
    pub chain_writer: Arc<dyn ChainWriter>,
    pub multisig: Arc<dyn MultisigDeliverer>,
    pub middleware: Arc<dyn MiddlewareClient>,
    pub ipfs: Arc<dyn IpfsClient>,
}
