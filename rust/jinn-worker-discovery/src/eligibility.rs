//! Eligibility filtering (spec §4.D): dependency resolution, declared
//! capability matching, credential availability, and session-level
//! deduplication, applied to each Discovery candidate in turn.

use jinn_worker_clients::{CredentialBridgeClient, IndexerClient};
use jinn_worker_config::schema::EligibilitySection;
use jinn_worker_types::{JobDefinitionStatus, Request, SessionState};
use std::sync::Arc;
use tracing::instrument;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EligibilityDecision {
    Eligible,
    AlreadyExecuted,
    MissingCapability(String),
    MissingCredential(String),
    WaitingOnDependency { dependency: String },
    RedispatchDependency { workstream: String, dependency: String },
    CancelMissingDependency { dependency: String },
}

impl EligibilityDecision {
    pub fn is_eligible(&self) -> bool {
        matches!(self, EligibilityDecision::Eligible)
    }
}

/// Spec §4.D dependency filter: for each declared dependency, resolve its
/// definition (by UUID or by name within the request's workstream). A
/// non-terminal, stale dependency triggers a cooldown-gated redispatch; a
/// dependency that cannot be resolved at all, once old enough, triggers a
/// cooldown-gated auto-cancel. Only the first actionable dependency is
/// returned — callers re-evaluate on the next cycle once it clears.
#[instrument(skip(indexer, session, config))]
pub async fn dependency_filter(
    request: &Request,
    indexer: &Arc<dyn IndexerClient>,
    session: &SessionState,
    config: &EligibilitySection,
    now_unix: i64,
) -> Result<EligibilityDecision, jinn_worker_clients::ClientError> {
    let Some(dependencies) = request.dependencies.as_ref() else {
        return Ok(EligibilityDecision::Eligible);
    };
    let workstream = request.workstream_id.clone().unwrap_or_default();

    for dependency in dependencies {
        let definition = if let Ok(id) = uuid::Uuid::parse_str(dependency) {
            indexer.job_definition_status(&id).await?
        } else {
            indexer.resolve_dependency_definition(&workstream, dependency).await?
        };

        match definition {
            Some(def) if def.last_status.is_terminal() => continue,
            Some(def) => {
                if config.dependency_redispatch_enabled
                    && def.is_stale(now_unix, config.stale_dependency_threshold.as_secs() as i64)
                    && !session.redispatch_on_cooldown(
                        &workstream,
                        dependency,
                        now_unix,
                        config.redispatch_cooldown.as_secs() as i64,
                    )
                {
                    return Ok(EligibilityDecision::RedispatchDependency {
                        workstream,
                        dependency: dependency.clone(),
                    });
                }
                return Ok(EligibilityDecision::WaitingOnDependency {
                    dependency: dependency.clone(),
                });
            }
            None => {
                let age = now_unix - request.block_timestamp;
                if config.dependency_autofail_enabled
                    && age > config.missing_dependency_age_threshold.as_secs() as i64
                    && !session.cancel_on_cooldown(
                        &request.id,
                        dependency,
                        now_unix,
                        config.cancel_cooldown.as_secs() as i64,
                    )
                {
                    return Ok(EligibilityDecision::CancelMissingDependency {
                        dependency: dependency.clone(),
                    });
                }
                return Ok(EligibilityDecision::WaitingOnDependency {
                    dependency: dependency.clone(),
                });
            }
        }
    }

    Ok(EligibilityDecision::Eligible)
}

/// Spec §4.D capability filter: every tool the request declares it needs
/// must appear in the operator's configured capability list.
pub fn capability_filter(request: &Request, config: &EligibilitySection) -> EligibilityDecision {
    let Some(tools) = request.required_tools.as_ref() else {
        return EligibilityDecision::Eligible;
    };
    for tool in tools {
        if !config.operator_capabilities.iter().any(|c| c == tool) {
            return EligibilityDecision::MissingCapability(tool.clone());
        }
    }
    EligibilityDecision::Eligible
}

/// Spec §4.D credential filter: the request's declared tools must also be
/// covered by the credential bridge's venture-scoped credential set for the
/// operator, unless the operator is itself unconditionally trusted.
#[instrument(skip(bridge, config))]
pub async fn credential_filter(
    request: &Request,
    bridge: &Arc<dyn CredentialBridgeClient>,
    operator_id: &str,
    venture_id: &str,
    config: &EligibilitySection,
) -> Result<EligibilityDecision, jinn_worker_clients::ClientError> {
    if config.trusted_operator {
        return Ok(EligibilityDecision::Eligible);
    }
    let Some(tools) = request.required_tools.as_ref() else {
        return Ok(EligibilityDecision::Eligible);
    };
    if tools.is_empty() {
        return Ok(EligibilityDecision::Eligible);
    }

    let credentials = bridge.operator_credentials(operator_id, venture_id).await?;
    match credentials {
        None => Ok(EligibilityDecision::MissingCredential(
            tools.iter().next().cloned().unwrap_or_default(),
        )),
        Some(creds) => {
            if !creds.registered {
                return Ok(EligibilityDecision::MissingCredential(
                    tools.iter().next().cloned().unwrap_or_default(),
                ));
            }
            for tool in tools {
                if !creds.venture_scoped_tools.iter().any(|t| t == tool) {
                    return Ok(EligibilityDecision::MissingCredential(tool.clone()));
                }
            }
            Ok(EligibilityDecision::Eligible)
        }
    }
}

/// Spec §4.D session-dedup filter: a request already recorded as executed
/// in this process's session map is skipped outright.
pub fn session_dedup_filter(request: &Request, session: &SessionState) -> EligibilityDecision {
    if session.was_executed(&request.id) {
        EligibilityDecision::AlreadyExecuted
    } else {
        EligibilityDecision::Eligible
    }
}

/// Whether the cycle controller should exit its claim-seeking loop early
/// because too many consecutive cycles produced no eligible candidate
/// (spec §4.D, §4.A).
pub fn should_exit_for_stuck_cycles(session: &SessionState, max_stuck_cycles: u32) -> bool {
    session.consecutive_stuck_cycles() >= max_stuck_cycles
}

/// Runs the full filter pipeline in order (session dedup, dependencies,
/// capabilities, credentials) and returns the first non-eligible verdict,
/// or `Eligible` if every stage passes.
#[instrument(skip(indexer, bridge, session, config))]
pub async fn evaluate_eligibility(
    request: &Request,
    indexer: &Arc<dyn IndexerClient>,
    bridge: &Arc<dyn CredentialBridgeClient>,
    session: &SessionState,
    config: &EligibilitySection,
    operator_id: &str,
    venture_id: &str,
    now_unix: i64,
) -> Result<EligibilityDecision, jinn_worker_clients::ClientError> {
    let dedup = session_dedup_filter(request, session);
    if !dedup.is_eligible() {
        return Ok(dedup);
    }

    let dependency = dependency_filter(request, indexer, session, config, now_unix).await?;
    if !dependency.is_eligible() {
        return Ok(dependency);
    }

    let capability = capability_filter(request, config);
    if !capability.is_eligible() {
        return Ok(capability);
    }

    credential_filter(request, bridge, operator_id, venture_id, config).await
}

/// Spec §4.D credential filter, trusted-operator reordering: "For trusted
/// operators (ones the bridge grants broad capability), reorder candidates
/// so credential-requiring jobs come first (leaves non-credential jobs for
/// lower-trust workers)." A stable partition: all requests whose
/// `required_tools` is non-empty, in their original relative order,
/// followed by all requests with none. Untrusted operators and operators
/// the bridge has no record of leave discovery's order untouched.
pub async fn reorder_trusted_operator_first(
    candidates: Vec<Request>,
    bridge: &Arc<dyn CredentialBridgeClient>,
    operator_id: &str,
    venture_id: &str,
) -> Result<Vec<Request>, jinn_worker_clients::ClientError> {
    let trusted = bridge
        .operator_credentials(operator_id, venture_id)
        .await?
        .map(|c| c.trusted)
        .unwrap_or(false);

    if !trusted {
        return Ok(candidates);
    }

    let (credential_requiring, plain): (Vec<Request>, Vec<Request>) = candidates
        .into_iter()
        .partition(|r| r.required_tools.as_ref().is_some_and(|tools| !tools.is_empty()));

    Ok(credential_requiring.into_iter().chain(plain).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use jinn_worker_clients::{MockCredentialBridgeClient, MockIndexerClient, OperatorCredentials};
    use jinn_worker_types::{CodeMetadata, JobDefinition};
    use std::collections::HashSet;

    fn req_with_deps(deps: Vec<String>) -> Request {
        Request {
            id: "0x1".to_string(),
            mech: "0xMECH".to_string(),
            sender: "0xSENDER".to_string(),
            workstream_id: Some("ws-1".to_string()),
            block_timestamp: 0,
            ipfs_hash: "Qm".to_string(),
            delivered: false,
            dependencies: Some(deps),
            response_timeout: None,
            required_tools: None,
            job_name: None,
        }
        .into()
    }

    #[tokio::test]
    async fn dependency_filter_passes_through_when_terminal() {
        let mock = Arc::new(MockIndexerClient::new());
        mock.push_definition(JobDefinition {
            id: uuid::Uuid::nil(),
            name: "build".to_string(),
            last_status: JobDefinitionStatus::Completed,
            last_interaction: 0,
            code_metadata: None::<CodeMetadata>,
        });
        let indexer: Arc<dyn IndexerClient> = mock;
        let session = SessionState::new();
        let config = EligibilitySection::default();
        let request = req_with_deps(vec!["build".to_string()]);

        let decision = dependency_filter(&request, &indexer, &session, &config, 100).await.unwrap();
        assert_eq!(decision, EligibilityDecision::Eligible);
    }

    #[tokio::test]
    async fn dependency_filter_redispatches_stale_dependency() {
        let mock = Arc::new(MockIndexerClient::new());
        mock.push_definition(JobDefinition {
            id: uuid::Uuid::nil(),
            name: "build".to_string(),
            last_status: JobDefinitionStatus::Waiting,
            last_interaction: 0,
            code_metadata: None,
        });
        let indexer: Arc<dyn IndexerClient> = mock;
        let session = SessionState::new();
        let config = EligibilitySection::default();
        let request = req_with_deps(vec!["build".to_string()]);

        let now = config.stale_dependency_threshold.as_secs() as i64 + 10;
        let decision = dependency_filter(&request, &indexer, &session, &config, now).await.unwrap();
        assert_eq!(
            decision,
            EligibilityDecision::RedispatchDependency {
                workstream: "ws-1".to_string(),
                dependency: "build".to_string(),
            }
        );
    }

    #[test]
    fn capability_filter_rejects_uncovered_tool() {
        let mut request = req_with_deps(vec![]);
        request.required_tools = Some(HashSet::from(["github".to_string()]));
        let config = EligibilitySection::default();
        assert_eq!(
            capability_filter(&request, &config),
            EligibilityDecision::MissingCapability("github".to_string())
        );
    }

    #[tokio::test]
    async fn credential_filter_passes_trusted_operator_unconditionally() {
        let bridge: Arc<dyn CredentialBridgeClient> = Arc::new(MockCredentialBridgeClient::new());
        let mut request = req_with_deps(vec![]);
        request.required_tools = Some(HashSet::from(["aws".to_string()]));
        let mut config = EligibilitySection::default();
        config.trusted_operator = true;

        let decision = credential_filter(&request, &bridge, "op-1", "venture-1", &config).await.unwrap();
        assert_eq!(decision, EligibilityDecision::Eligible);
    }

    #[tokio::test]
    async fn credential_filter_flags_missing_tool() {
        let mock = Arc::new(MockCredentialBridgeClient::new());
        mock.set(
            "op-1",
            OperatorCredentials {
                operator_id: "op-1".to_string(),
                registered: true,
                venture_scoped_tools: vec!["github".to_string()],
                trusted: false,
            },
        );
        let bridge: Arc<dyn CredentialBridgeClient> = mock;
        let mut request = req_with_deps(vec![]);
        request.required_tools = Some(HashSet::from(["aws".to_string()]));
        let config = EligibilitySection::default();

        let decision = credential_filter(&request, &bridge, "op-1", "venture-1", &config).await.unwrap();
        assert_eq!(decision, EligibilityDecision::MissingCredential("aws".to_string()));
    }

    #[test]
    fn session_dedup_skips_already_executed() {
        let mut session = SessionState::new();
        session.mark_executed("0x1", 0);
        let request = req_with_deps(vec![]);
        assert_eq!(session_dedup_filter(&request, &session), EligibilityDecision::AlreadyExecuted);
    }

    #[tokio::test]
    async fn trusted_operator_moves_credential_requiring_candidates_first() {
        let mock = Arc::new(MockCredentialBridgeClient::new());
        mock.set(
            "op-1",
            OperatorCredentials {
                operator_id: "op-1".to_string(),
                registered: true,
                venture_scoped_tools: vec!["github".to_string()],
                trusted: true,
            },
        );
        let bridge: Arc<dyn CredentialBridgeClient> = mock;

        let mut plain = req_with_deps(vec![]);
        plain.id = "plain".to_string();
        let mut with_creds = req_with_deps(vec![]);
        with_creds.id = "with-creds".to_string();
        with_creds.required_tools = Some(HashSet::from(["github".to_string()]));

        let candidates = vec![plain.clone(), with_creds.clone()];
        let reordered = reorder_trusted_operator_first(candidates, &bridge, "op-1", "venture-1").await.unwrap();
        assert_eq!(reordered[0].id, "with-creds");
        assert_eq!(reordered[1].id, "plain");
    }

    #[tokio::test]
    async fn untrusted_operator_keeps_discovery_order() {
        let mock = Arc::new(MockCredentialBridgeClient::new());
        mock.set(
            "op-1",
            OperatorCredentials {
                operator_id: "op-1".to_string(),
                registered: true,
                venture_scoped_tools: vec![],
                trusted: false,
            },
        );
        let bridge: Arc<dyn CredentialBridgeClient> = mock;

        let mut plain = req_with_deps(vec![]);
        plain.id = "plain".to_string();
        let mut with_creds = req_with_deps(vec![]);
        with_creds.id = "with-creds".to_string();
        with_creds.required_tools = Some(HashSet::from(["github".to_string()]));

        let candidates = vec![plain.clone(), with_creds.clone()];
        let reordered = reorder_trusted_operator_first(candidates, &bridge, "op-1", "venture-1").await.unwrap();
        assert_eq!(reordered[0].id, "plain");
        assert_eq!(reordered[1].id, "with-creds");
    }

    #[test]
    fn stuck_cycle_exit_threshold() {
        let mut session = SessionState::new();
        for _ in 0..4 {
            session.record_stuck_cycle();
        }
        assert!(!should_exit_for_stuck_cycles(&session, 5));
        session.record_stuck_cycle();
        assert!(should_exit_for_stuck_cycles(&session, 5));
    }
}
