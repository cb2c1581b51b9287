//! On-disk `ServiceRecord` persistence (spec §6 on-disk layout):
//! `<work_dir>/services/<config_id>/config.json` holds everything except
//! the encrypted key, which lives alongside it in
//! `<work_dir>/services/<config_id>/keys/agent.enc` so the encrypted
//! blob never has to round-trip through JSON string escaping.

use std::path::{Path, PathBuf};

use jinn_worker_types::ServiceRecord;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServiceStoreError {
    #[error("io error: {0}")]
    Io(String),
    #[error("malformed service record: {0}")]
    Malformed(String),
}

/// Mirrors `ServiceRecord` minus the encrypted key bytes, which are
/// stored as a raw sibling file instead of a JSON byte array.
#[derive(Debug, Serialize, Deserialize)]
struct StoredConfig {
    config_id: String,
    service_id: u64,
    mech_address: String,
    service_safe_address: String,
    agent_address: String,
    staking_contract_address: String,
    chain_id: u64,
}

fn service_dir(work_dir: &Path, config_id: &str) -> PathBuf {
    work_dir.join("services").join(config_id)
}

fn config_path(work_dir: &Path, config_id: &str) -> PathBuf {
    service_dir(work_dir, config_id).join("config.json")
}

fn key_path(work_dir: &Path, config_id: &str) -> PathBuf {
    service_dir(work_dir, config_id).join("keys").join("agent.enc")
}

pub fn save_service_record(work_dir: &Path, record: &ServiceRecord) -> Result<(), ServiceStoreError> {
    let dir = service_dir(work_dir, &record.config_id);
    std::fs::create_dir_all(dir.join("keys")).map_err(|e| ServiceStoreError::Io(e.to_string()))?;

    let stored = StoredConfig {
        config_id: record.config_id.clone(),
        service_id: record.service_id,
        mech_address: record.mech_address.clone(),
        service_safe_address: record.service_safe_address.clone(),
        agent_address: record.agent_address.clone(),
        staking_contract_address: record.staking_contract_address.clone(),
        chain_id: record.chain_id,
    };
    let json = serde_json::to_vec_pretty(&stored).map_err(|e| ServiceStoreError::Malformed(e.to_string()))?;
    std::fs::write(config_path(work_dir, &record.config_id), json).map_err(|e| ServiceStoreError::Io(e.to_string()))?;
    std::fs::write(key_path(work_dir, &record.config_id), &record.agent_private_key_encrypted)
        .map_err(|e| ServiceStoreError::Io(e.to_string()))?;
    Ok(())
}

pub fn load_service_record(work_dir: &Path, config_id: &str) -> Result<ServiceRecord, ServiceStoreError> {
    let config_bytes =
        std::fs::read(config_path(work_dir, config_id)).map_err(|e| ServiceStoreError::Io(e.to_string()))?;
    let stored: StoredConfig =
        serde_json::from_slice(&config_bytes).map_err(|e| ServiceStoreError::Malformed(e.to_string()))?;
    let agent_private_key_encrypted =
        std::fs::read(key_path(work_dir, config_id)).map_err(|e| ServiceStoreError::Io(e.to_string()))?;

    Ok(ServiceRecord {
        config_id: stored.config_id,
        service_id: stored.service_id,
        mech_address: stored.mech_address,
        service_safe_address: stored.service_safe_address,
        agent_address: stored.agent_address,
        agent_private_key_encrypted,
        staking_contract_address: stored.staking_contract_address,
        chain_id: stored.chain_id,
    })
}

pub fn list_config_ids(work_dir: &Path) -> Result<Vec<String>, ServiceStoreError> {
    let services_dir = work_dir.join("services");
    if !services_dir.exists() {
        return Ok(Vec::new());
    }
    let mut ids = Vec::new();
    for entry in std::fs::read_dir(&services_dir).map_err(|e| ServiceStoreError::Io(e.to_string()))? {
        let entry = entry.map_err(|e| ServiceStoreError::Io(e.to_string()))?;
        if entry.path().is_dir() {
            if let Some(name) = entry.file_name().to_str() {
                ids.push(name.to_string());
            }
        }
    }
    ids.sort();
    Ok(ids)
}

pub fn load_all_service_records(work_dir: &Path) -> Result<Vec<ServiceRecord>, ServiceStoreError> {
    list_config_ids(work_dir)?
        .into_iter()
        .map(|id| load_service_record(work_dir, &id))
        .collect()
}
