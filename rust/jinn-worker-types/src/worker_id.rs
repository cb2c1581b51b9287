//! `WorkerId` and static leader election (spec §3, §4.H, §5).

/// Stable identifier for one worker process, derived from its service
/// config id plus an optional numeric suffix (`my-service-0`,
/// `my-service-1`, ...). Leader election is static: the suffix `0`, or no
/// suffix at all, is always the leader. This avoids dynamic coordination
/// (and the multisig-nonce collisions it would risk) at the cost of
/// requiring operators to configure suffixes correctly.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkerId(String);

impl WorkerId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Extracts the trailing `-<n>` suffix, if any.
    fn suffix(&self) -> Option<u32> {
        let (_, tail) = self.0.rsplit_once('-')?;
        tail.parse().ok()
    }

    /// Only the worker whose suffix is `0` or absent submits heartbeats
    /// (spec §4.H, invariant in §3 and §8).
    pub fn is_leader(&self) -> bool {
        matches!(self.suffix(), None | Some(0))
    }
}

impl std::fmt::Display for WorkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_suffix_is_leader() {
        assert!(WorkerId::new("my-service").is_leader());
    }

    #[test]
    fn suffix_zero_is_leader() {
        assert!(WorkerId::new("my-service-0").is_leader());
    }

    #[test]
    fn nonzero_suffix_is_not_leader() {
        assert!(!WorkerId::new("my-service-1").is_leader());
        assert!(!WorkerId::new("my-service-7").is_leader());
    }

    #[test]
    fn non_numeric_trailing_segment_is_not_a_suffix() {
        // "service-prod" has no numeric suffix, so it is treated as a
        // leaderless-suffix (and therefore leader) name, not a non-leader.
        assert!(WorkerId::new("service-prod").is_leader());
    }

    #[test]
    fn heartbeat_exclusivity_across_a_worker_pool() {
        let ids: Vec<WorkerId> = (0..5).map(|i| WorkerId::new(format!("svc-{i}"))).collect();
        let leaders: Vec<&WorkerId> = ids.iter().filter(|id| id.is_leader()).collect();
        assert_eq!(leaders.len(), 1);
        assert_eq!(leaders[0].as_str(), "svc-0");
    }
}
