//! Indexer client (spec §4.C, §6): a GraphQL endpoint over undelivered
//! requests and job-definition status.

use crate::error::ClientError;
use async_trait::async_trait;
use jinn_worker_types::{JobDefinition, Request};
use std::sync::Mutex;

#[derive(Debug, Clone, Default)]
pub struct IndexerFilter {
    pub mech_in: Option<Vec<String>>,
    pub workstream_in: Option<Vec<String>>,
    pub venture_in: Option<Vec<String>>,
    pub job_name_contains: Option<String>,
    pub limit: usize,
}

#[async_trait]
pub trait IndexerClient: Send + Sync {
    /// `requests(where: { delivered: false, ... } orderBy: "blockTimestamp"
    /// orderDirection: "desc" limit: N)` (spec §4.C step 2, §6).
    async fn undelivered_requests(&self, filter: &IndexerFilter) -> Result<Vec<Request>, ClientError>;

    /// Second query selecting undelivered requests whose `jobName` contains
    /// a known template marker (spec §4.C step 3, §6).
    async fn template_requests(&self, filter: &IndexerFilter) -> Result<Vec<Request>, ClientError>;

    /// Request count posted against `safe_address` since the current
    /// epoch's checkpoint, used by the Staking Coordinator's activity gate.
    async fn request_count_for_safe(&self, safe_address: &str) -> Result<u64, ClientError>;

    /// Resolve a UUID-form dependency identifier directly, or look up the
    /// most recent request in `workstream_id` whose job name is
    /// `dependency_name` and return its definition id.
    async fn resolve_dependency_definition(
        &self,
        workstream_id: &str,
        dependency_name: &str,
    ) -> Result<Option<JobDefinition>, ClientError>;

    async fn job_definition_status(&self, definition_id: &uuid::Uuid) -> Result<Option<JobDefinition>, ClientError>;

    async fn single_request(&self, request_id: &str) -> Result<Option<Request>, ClientError>;
}

/// Production implementation issuing GraphQL POSTs over `reqwest`.
pub struct GraphqlIndexerClient {
    http: reqwest::Client,
    endpoint: String,
}

impl GraphqlIndexerClient {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }

    async fn query(&self, query: &str, variables: serde_json::Value) -> Result<serde_json::Value, ClientError> {
        let body = serde_json::json!({ "query": query, "variables": variables });
        let response = self.http.post(&self.endpoint).json(&body).send().await?;
        if !response.status().is_success() {
            return Err(ClientError::Transport(format!(
                "indexer returned status {}",
                response.status()
            )));
        }
        response
            .json::<serde_json::Value>()
            .await
            .map_err(|e| ClientError::Deserialize(e.to_string()))
    }

    fn requests_from_response(value: serde_json::Value) -> Result<Vec<Request>, ClientError> {
        let items = value
            .get("data")
            .and_then(|d| d.get("requests"))
            .cloned()
            .unwrap_or(serde_json::Value::Array(Vec::new()));
        serde_json::from_value(items).map_err(|e| ClientError::Deserialize(e.to_string()))
    }
}

const UNDELIVERED_REQUESTS_QUERY: &str = r#"
query UndeliveredRequests($mechIn: [String!], $workstreamIn: [String!], $ventureIn: [String!], $limit: Int!) {
  requests(
    where: { delivered: false, mech_in: $mechIn, workstreamId_in: $workstreamIn, ventureId_in: $ventureIn }
    orderBy: "blockTimestamp"
    orderDirection: "desc"
    limit: $limit
  ) {
    id mech sender workstreamId ipfsHash blockTimestamp delivered dependencies enabledTools jobName
  }
}
"#;

const TEMPLATE_REQUESTS_QUERY: &str = r#"
query TemplateRequests($jobNameContains: String!, $limit: Int!) {
  requests(
    where: { delivered: false, jobName_contains: $jobNameContains }
    orderBy: "blockTimestamp"
    orderDirection: "desc"
    limit: $limit
  ) {
    id mech sender workstreamId ipfsHash blockTimestamp delivered dependencies enabledTools jobName
  }
}
"#;

#[async_trait]
impl IndexerClient for GraphqlIndexerClient {
    async fn undelivered_requests(&self, filter: &IndexerFilter) -> Result<Vec<Request>, ClientError> {
        let variables = serde_json::json!({
            "mechIn": filter.mech_in,
            "workstreamIn": filter.workstream_in,
            "ventureIn": filter.venture_in,
            "limit": filter.limit as i64,
        });
        let value = self.query(UNDELIVERED_REQUESTS_QUERY, variables).await?;
        Self::requests_from_response(value)
    }

    async fn template_requests(&self, filter: &IndexerFilter) -> Result<Vec<Request>, ClientError> {
        let marker = filter.job_name_contains.clone().unwrap_or_default();
        let variables = serde_json::json!({
            "jobNameContains": marker,
            "limit": filter.limit as i64,
        });
        let value = self.query(TEMPLATE_REQUESTS_QUERY, variables).await?;
        Self::requests_from_response(value)
    }

    async fn request_count_for_safe(&self, safe_address: &str) -> Result<u64, ClientError> {
        let query = r#"query Count($safe: String!) { requestCount(safe: $safe) }"#;
        let value = self.query(query, serde_json::json!({ "safe": safe_address })).await?;
        value
            .get("data")
            .and_then(|d| d.get("requestCount"))
            .and_then(|c| c.as_u64())
            .ok_or_else(|| ClientError::UnexpectedResponse("missing requestCount".to_string()))
    }

    async fn resolve_dependency_definition(
        &self,
        workstream_id: &str,
        dependency_name: &str,
    ) -> Result<Option<JobDefinition>, ClientError> {
        let query = r#"
        query Def($workstreamId: String!, $name: String!) {
          jobDefinition(workstreamId: $workstreamId, name: $name) {
            id name lastStatus lastInteraction codeMetadata { branch baseBranch }
          }
        }"#;
        let value = self
            .query(
                query,
                serde_json::json!({ "workstreamId": workstream_id, "name": dependency_name }),
            )
            .await?;
        let def = value.get("data").and_then(|d| d.get("jobDefinition")).cloned();
        match def {
            None | Some(serde_json::Value::Null) => Ok(None),
            Some(v) => serde_json::from_value(v).map(Some).map_err(|e| ClientError::Deserialize(e.to_string())),
        }
    }

    async fn job_definition_status(&self, definition_id: &uuid::Uuid) -> Result<Option<JobDefinition>, ClientError> {
        let query = r#"
        query Status($id: ID!) {
          jobDefinition(id: $id) {
            id name lastStatus lastInteraction codeMetadata { branch baseBranch }
          }
        }"#;
        let value = self
            .query(query, serde_json::json!({ "id": definition_id.to_string() }))
            .await?;
        let def = value.get("data").and_then(|d| d.get("jobDefinition")).cloned();
        match def {
            None | Some(serde_json::Value::Null) => Ok(None),
            Some(v) => serde_json::from_value(v).map(Some).map_err(|e| ClientError::Deserialize(e.to_string())),
        }
    }

    async fn single_request(&self, request_id: &str) -> Result<Option<Request>, ClientError> {
        let query = r#"
        query Single($id: ID!) {
          request(id: $id) {
            id mech sender workstreamId ipfsHash blockTimestamp delivered dependencies enabledTools jobName
          }
        }"#;
        let value = self.query(query, serde_json::json!({ "id": request_id })).await?;
        let req = value.get("data").and_then(|d| d.get("request")).cloned();
        match req {
            None | Some(serde_json::Value::Null) => Ok(None),
            Some(v) => serde_json::from_value(v).map(Some).map_err(|e| ClientError::Deserialize(e.to_string())),
        }
    }
}

/// In-memory mock used by downstream crates' test suites.
#[derive(Default)]
pub struct MockIndexerClient {
    pub requests: Mutex<Vec<Request>>,
    pub template_requests_data: Mutex<Vec<Request>>,
    pub definitions: Mutex<Vec<JobDefinition>>,
    pub request_counts: Mutex<std::collections::HashMap<String, u64>>,
}

impl MockIndexerClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_request(&self, request: Request) {
        self.requests.lock().unwrap().push(request);
    }

    pub fn push_definition(&self, definition: JobDefinition) {
        self.definitions.lock().unwrap().push(definition);
    }

    pub fn set_request_count(&self, safe: &str, count: u64) {
        self.request_counts.lock().unwrap().insert(safe.to_string(), count);
    }
}

#[async_trait]
impl IndexerClient for MockIndexerClient {
    async fn undelivered_requests(&self, filter: &IndexerFilter) -> Result<Vec<Request>, ClientError> {
        let mut out: Vec<Request> = self
            .requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| !r.delivered)
            .filter(|r| match &filter.mech_in {
                Some(list) if !list.is_empty() => list.iter().any(|m| m.eq_ignore_ascii_case(&r.mech)),
                _ => true,
            })
            .cloned()
            .collect();
        out.sort_by(|a, b| b.block_timestamp.cmp(&a.block_timestamp));
        out.truncate(filter.limit.max(1));
        Ok(out)
    }

    async fn template_requests(&self, filter: &IndexerFilter) -> Result<Vec<Request>, ClientError> {
        let marker = filter.job_name_contains.clone().unwrap_or_default();
        let mut out: Vec<Request> = self
            .template_requests_data
            .lock()
            .unwrap()
            .iter()
            .filter(|r| !r.delivered)
            .filter(|r| r.job_name.as_deref().map(|n| n.contains(&marker)).unwrap_or(false))
            .cloned()
            .collect();
        out.sort_by(|a, b| b.block_timestamp.cmp(&a.block_timestamp));
        Ok(out)
    }

    async fn request_count_for_safe(&self, safe_address: &str) -> Result<u64, ClientError> {
        Ok(self.request_counts.lock().unwrap().get(safe_address).copied().unwrap_or(0))
    }

    async fn resolve_dependency_definition(
        &self,
        _workstream_id: &str,
        dependency_name: &str,
    ) -> Result<Option<JobDefinition>, ClientError> {
        Ok(self
            .definitions
            .lock()
            .unwrap()
            .iter()
            .find(|d| d.name == dependency_name)
            .cloned())
    }

    async fn job_definition_status(&self, definition_id: &uuid::Uuid) -> Result<Option<JobDefinition>, ClientError> {
        Ok(self
            .definitions
            .lock()
            .unwrap()
            .iter()
            .find(|d| &d.id == definition_id)
            .cloned())
    }

    async fn single_request(&self, request_id: &str) -> Result<Option<Request>, ClientError> {
        Ok(self.requests.lock().unwrap().iter().find(|r| r.id == request_id).cloned())
    }
}
