//! Entry point for the Jinn worker daemon (spec §1, §2): loads
//! configuration, wires the real client implementations, decrypts the
//! active service's signing key, and runs the main loop.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;

use jinn_worker_clients::{
    ClientBundle, GraphqlIndexerClient, HttpClaimClient, HttpCredentialBridgeClient, HttpIpfsClient, HttpMiddlewareClient,
    HttpMultisigDeliverer, JsonRpcChainClient,
};
use jinn_worker_config::env::load as load_config;
use jinn_worker_core::cycle_control::{CycleController, StopReason};
use jinn_worker_core::keystore::Keystore;
use jinn_worker_core::runner::{run, RunMode};
use jinn_worker_core::service_store::load_all_service_records;
use jinn_worker_core::state::WorkerState;
use jinn_worker_staking::coordinator::RestakeCooldownTracker;
use jinn_worker_telemetry::init_tracing;
use jinn_worker_types::{ActiveServiceContext, ActiveServiceHandle, EpochGateState, SessionState, WorkerId};

#[derive(Parser, Debug)]
#[command(name = "jinn-worker", about = "Distributed agent-worker daemon for the Jinn on-chain job marketplace")]
struct Cli {
    /// Path to the worker's TOML configuration file.
    #[arg(long, env = "JINN_CONFIG_PATH")]
    config: Option<PathBuf>,

    /// Run exactly one cycle and exit, skipping stop/cap checks. Intended
    /// for manual testing and CI smoke checks.
    #[arg(long)]
    once: bool,

    /// Emit structured logs as JSON instead of human-readable text.
    #[arg(long, env = "JINN_LOG_JSON")]
    log_json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let config = load_config(cli.config.as_deref()).context("failed to load worker configuration")?;
    let worker_id = WorkerId::new(config.worker.worker_id.clone());

    let service_records = load_all_service_records(&config.worker.work_dir).context("failed to load service records from work_dir")?;
    let active_record = service_records
        .first()
        .cloned()
        .context("no service records found under worker.work_dir/services; provision at least one before starting")?;

    let passphrase = std::env::var("JINN_KEYSTORE_PASSPHRASE").context("JINN_KEYSTORE_PASSPHRASE must be set to decrypt the agent signing key")?;
    let key_provider: Arc<dyn jinn_worker_staking::rotator::KeyMaterialProvider> = Arc::new(Keystore::new(passphrase));

    let signing_key = key_provider
        .signing_key_for(&active_record)
        .context("failed to decrypt active service's signing key")?;
    let signing_proxy = jinn_worker_clients::start_signing_proxy(signing_key)
        .await
        .context("failed to start in-process signing proxy")?;

    let active = ActiveServiceHandle::new(ActiveServiceContext {
        mech_address: active_record.mech_address.clone(),
        service_id: active_record.service_id,
        config_id: active_record.config_id.clone(),
    });

    let records_by_config_id = service_records.into_iter().map(|r| (r.config_id.clone(), r)).collect();

    let chain_client = Arc::new(JsonRpcChainClient::new(config.endpoints.rpc_url.clone()));
    let clients = ClientBundle {
        indexer: Arc::new(GraphqlIndexerClient::new(config.endpoints.indexer_url.clone())),
        claim: Arc::new(HttpClaimClient::new(config.endpoints.claim_service_url.clone())),
        credential_bridge: Arc::new(HttpCredentialBridgeClient::new(config.endpoints.credential_bridge_url.clone())),
        chain_reader: chain_client.clone(),
        chain_writer: chain_client,
        multisig: Arc::new(HttpMultisigDeliverer::new(config.endpoints.middleware_url.clone())),
        middleware: Arc::new(HttpMiddlewareClient::new(config.endpoints.middleware_url.clone())),
        ipfs: Arc::new(HttpIpfsClient::new(config.endpoints.ipfs_gateway_url.clone())),
    };

    let cycle = CycleController::new(&config.worker);

    let mut state = WorkerState {
        worker_id,
        cycle,
        session: SessionState::new(),
        restake_cooldown: RestakeCooldownTracker::new(),
        epoch_gate: EpochGateState::default(),
        pending_redeliveries: std::collections::HashMap::new(),
        signing_proxy,
        http: reqwest::Client::new(),
        records_by_config_id,
        key_provider,
        active,
        clients,
        config,
    };

    let mode = if cli.once { RunMode::Once } else { RunMode::Continuous };
    let stop_reason = run(&mut state, mode).await;

    state.signing_proxy.shutdown().await;

    // Spec §6: a stuck-cycle exit must be distinguishable from a clean stop
    // so an external supervisor restarts the process with a fresh session
    // map instead of treating exit 0 as "nothing to do, leave it be".
    if stop_reason == StopReason::StuckCycle {
        std::process::exit(2);
    }
    Ok(())
}
