//! `JobDefinition` (spec §3) — a persistent template a request's
//! dependency list resolves into.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobDefinitionStatus {
    Pending,
    Delegating,
    Waiting,
    Completed,
    Failed,
}

impl JobDefinitionStatus {
    /// A dependency is "met" iff its definition's status is terminal.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobDefinitionStatus::Completed | JobDefinitionStatus::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeMetadata {
    pub branch: String,
    pub base_branch: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobDefinition {
    pub id: uuid::Uuid,
    pub name: String,
    pub last_status: JobDefinitionStatus,
    /// Unix seconds of the last recorded interaction with this definition.
    pub last_interaction: i64,
    pub code_metadata: Option<CodeMetadata>,
}

impl JobDefinition {
    /// A dependency is stale (candidate for redispatch) when it is not yet
    /// terminal and its last interaction predates `now - threshold_secs`.
    pub fn is_stale(&self, now_unix: i64, threshold_secs: i64) -> bool {
        !self.last_status.is_terminal() && now_unix - self.last_interaction > threshold_secs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn def(status: JobDefinitionStatus, last_interaction: i64) -> JobDefinition {
        JobDefinition {
            id: uuid::Uuid::nil(),
            name: "build".to_string(),
            last_status: status,
            last_interaction,
            code_metadata: None,
        }
    }

    #[test]
    fn terminal_statuses() {
        assert!(JobDefinitionStatus::Completed.is_terminal());
        assert!(JobDefinitionStatus::Failed.is_terminal());
        assert!(!JobDefinitionStatus::Pending.is_terminal());
        assert!(!JobDefinitionStatus::Delegating.is_terminal());
        assert!(!JobDefinitionStatus::Waiting.is_terminal());
    }

    #[test]
    fn staleness_requires_non_terminal_and_age() {
        let stale = def(JobDefinitionStatus::Waiting, 0);
        assert!(stale.is_stale(10_000, 7_200));

        let fresh = def(JobDefinitionStatus::Waiting, 9_000);
        assert!(!fresh.is_stale(10_000, 7_200));

        let done = def(JobDefinitionStatus::Completed, 0);
        assert!(!done.is_stale(10_000, 7_200));
    }
}
