//! Discovery (spec §4.C): builds candidate mech filters, queries the
//! indexer for undelivered requests, merges in template pickup, and
//! verifies delivery-mech assignment on chain before a request is handed
//! to Eligibility.

use jinn_worker_clients::{ChainReader, IndexerClient, IndexerFilter};
use jinn_worker_config::schema::{DiscoverySection, MechFilterMode};
use jinn_worker_types::Request;
use std::sync::Arc;
use tracing::instrument;

/// Resolves a configured `MechFilterMode` into the concrete list of mech
/// addresses the indexer query should restrict to, or `None` for
/// `MechFilterMode::Any` (no restriction).
pub async fn resolve_mech_filter(
    mode: &MechFilterMode,
    chain: &Arc<dyn ChainReader>,
) -> Result<Option<Vec<String>>, jinn_worker_clients::ClientError> {
    match mode {
        MechFilterMode::Any => Ok(None),
        MechFilterMode::Single { address } => Ok(Some(vec![address.clone()])),
        MechFilterMode::List { addresses } => Ok(Some(addresses.clone())),
        MechFilterMode::Staking { staking_contract } => {
            // Spec §4.C step 1: query the staking contract's
            // `getServiceIds()` (here, services registered under the
            // contract), then resolve each service id to its mech address
            // via `getServiceInfo`.
            let ids = chain.service_ids_for_operator(staking_contract).await?;
            let mut addresses = Vec::with_capacity(ids.len());
            for id in ids {
                addresses.push(chain.mech_for_service(staking_contract, id).await?);
            }
            Ok(Some(addresses))
        }
    }
}

/// One discovery pass: primary undelivered-requests query plus, when
/// enabled, a second template-pickup query, merged and deduplicated by
/// request id with the primary query's ordering preserved.
#[instrument(skip(indexer, chain, config))]
pub async fn discover_candidates(
    indexer: &Arc<dyn IndexerClient>,
    chain: &Arc<dyn ChainReader>,
    config: &DiscoverySection,
) -> Result<Vec<Request>, jinn_worker_clients::ClientError> {
    let mech_in = resolve_mech_filter(&config.mech_filter, chain).await?;

    let primary_filter = IndexerFilter {
        mech_in: mech_in.clone(),
        workstream_in: config.workstream_filter.clone(),
        venture_in: config.venture_filter.clone(),
        job_name_contains: None,
        limit: config.limit,
    };
    let mut candidates = indexer.undelivered_requests(&primary_filter).await?;

    if config.template_pickup_enabled() {
        let markers = config.template_allow_list.clone().unwrap_or_default();
        let mut seen: std::collections::HashSet<String> = candidates.iter().map(|r| r.id.clone()).collect();
        for marker in &markers {
            let template_filter = IndexerFilter {
                mech_in: mech_in.clone(),
                workstream_in: config.workstream_filter.clone(),
                venture_in: config.venture_filter.clone(),
                job_name_contains: Some(marker.clone()),
                limit: config.limit,
            };
            let picked = indexer.template_requests(&template_filter).await?;
            for request in picked {
                if seen.insert(request.id.clone()) {
                    candidates.push(request);
                }
            }
        }
        if markers.is_empty() {
            let template_filter = IndexerFilter {
                mech_in: mech_in.clone(),
                workstream_in: config.workstream_filter.clone(),
                venture_in: config.venture_filter.clone(),
                job_name_contains: Some(String::new()),
                limit: config.limit,
            };
            let picked = indexer.template_requests(&template_filter).await?;
            for request in picked {
                if seen.insert(request.id.clone()) {
                    candidates.push(request);
                }
            }
        }
    }

    Ok(candidates)
}

/// Spec §4.C step 4: a candidate is still eligible for this mech only if
/// the on-chain delivery-mech slot is unset, or set to our own mech, or the
/// response timeout has elapsed opening it to any mech.
#[instrument(skip(chain))]
pub async fn verify_delivery_mech(
    chain: &Arc<dyn ChainReader>,
    request: &Request,
    our_mech: &str,
    now_unix: i64,
) -> Result<bool, jinn_worker_clients::ClientError> {
    match chain.delivery_mech(&request.id).await? {
        None => Ok(true),
        Some(assigned) => {
            if assigned.eq_ignore_ascii_case(our_mech) {
                Ok(true)
            } else {
                Ok(!request.is_reserved_for_other_mech(our_mech, now_unix))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jinn_worker_clients::{MockChainClient, MockIndexerClient};

    fn req(id: &str, ts: i64) -> Request {
        Request {
            id: id.to_string(),
            mech: "0xMECH".to_string(),
            sender: "0xSENDER".to_string(),
            workstream_id: None,
            block_timestamp: ts,
            ipfs_hash: "Qm".to_string(),
            delivered: false,
            dependencies: None,
            response_timeout: None,
            required_tools: None,
            job_name: None,
        }
    }

    #[tokio::test]
    async fn any_mode_leaves_filter_unrestricted() {
        let chain: Arc<dyn ChainReader> = Arc::new(MockChainClient::new());
        let resolved = resolve_mech_filter(&MechFilterMode::Any, &chain).await.unwrap();
        assert!(resolved.is_none());
    }

    #[tokio::test]
    async fn single_mode_restricts_to_one_address() {
        let chain: Arc<dyn ChainReader> = Arc::new(MockChainClient::new());
        let resolved = resolve_mech_filter(
            &MechFilterMode::Single {
                address: "0xMECH".to_string(),
            },
            &chain,
        )
        .await
        .unwrap();
        assert_eq!(resolved, Some(vec!["0xMECH".to_string()]));
    }

    #[tokio::test]
    async fn discover_merges_template_pickup_without_duplicates() {
        let mock_indexer = Arc::new(MockIndexerClient::new());
        mock_indexer.push_request(req("1", 100));
        let mut templated = req("2", 50);
        templated.job_name = Some("x402-template".to_string());
        mock_indexer.template_requests_data.lock().unwrap().push(templated);

        let indexer: Arc<dyn IndexerClient> = mock_indexer;
        let chain: Arc<dyn ChainReader> = Arc::new(MockChainClient::new());
        let mut config = DiscoverySection::default();
        config.template_allow_list = Some(vec!["x402".to_string()]);

        let candidates = discover_candidates(&indexer, &chain, &config).await.unwrap();
        assert_eq!(candidates.len(), 2);
    }

    #[tokio::test]
    async fn verify_delivery_mech_allows_unset_and_own_mech() {
        let chain = Arc::new(MockChainClient::new());
        let request = req("1", 100);
        let chain_reader: Arc<dyn ChainReader> = chain.clone();
        assert!(verify_delivery_mech(&chain_reader, &request, "0xMECH", 1_000).await.unwrap());

        chain.delivery_mechs.insert("1".to_string(), Some("0xMECH".to_string()));
        assert!(verify_delivery_mech(&chain_reader, &request, "0xMECH", 1_000).await.unwrap());

        chain.delivery_mechs.insert("1".to_string(), Some("0xOTHER".to_string()));
        assert!(!verify_delivery_mech(&chain_reader, &request, "0xMECH", 1_000).await.unwrap());
    }
}
