//! Execution session state (spec §3) and the staking epoch cache.

use std::collections::HashMap;

/// Default TTLs, in seconds, for the session maps (spec §5).
pub const EXECUTED_TTL_SECS: i64 = 24 * 3_600;
pub const REPOST_TTL_SECS: i64 = 3_600;
pub const COOLDOWN_TTL_SECS: i64 = 4 * 3_600;

/// Per-worker-process-lifetime execution bookkeeping. Mutated only by the
/// main loop; evicted by the periodic cleanup subcycle (spec §4.B, §5).
#[derive(Debug, Default, Clone)]
pub struct SessionState {
    /// request id -> unix seconds it was executed (or attempted/claimed and
    /// released), preventing re-execution within this process.
    executed: HashMap<String, i64>,
    /// request id -> unix seconds of the last auto-repost attempt.
    recent_reposts: HashMap<String, i64>,
    /// (workstream, dependency) -> unix seconds of last redispatch.
    dependency_redispatch_cooldown: HashMap<(String, String), i64>,
    /// (request, dependency) -> unix seconds of last auto-cancel.
    cancel_cooldown: HashMap<(String, String), i64>,
    consecutive_stuck_cycles: u32,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_executed(&mut self, request_id: &str, now_unix: i64) {
        self.executed.insert(request_id.to_string(), now_unix);
    }

    pub fn was_executed(&self, request_id: &str) -> bool {
        self.executed.contains_key(request_id)
    }

    pub fn executed_at(&self, request_id: &str) -> Option<i64> {
        self.executed.get(request_id).copied()
    }

    pub fn executed_ids(&self) -> impl Iterator<Item = &String> {
        self.executed.keys()
    }

    pub fn mark_reposted(&mut self, request_id: &str, now_unix: i64) {
        self.recent_reposts.insert(request_id.to_string(), now_unix);
    }

    /// True if a repost attempt for `request_id` happened within
    /// `cooldown_secs` of `now_unix`.
    pub fn repost_on_cooldown(&self, request_id: &str, now_unix: i64, cooldown_secs: i64) -> bool {
        self.recent_reposts
            .get(request_id)
            .map(|ts| now_unix - ts < cooldown_secs)
            .unwrap_or(false)
    }

    pub fn mark_redispatched(&mut self, workstream: &str, dependency: &str, now_unix: i64) {
        self.dependency_redispatch_cooldown
            .insert((workstream.to_string(), dependency.to_string()), now_unix);
    }

    pub fn redispatch_on_cooldown(
        &self,
        workstream: &str,
        dependency: &str,
        now_unix: i64,
        cooldown_secs: i64,
    ) -> bool {
        self.dependency_redispatch_cooldown
            .get(&(workstream.to_string(), dependency.to_string()))
            .map(|ts| now_unix - ts < cooldown_secs)
            .unwrap_or(false)
    }

    pub fn mark_cancelled(&mut self, request_id: &str, dependency: &str, now_unix: i64) {
        self.cancel_cooldown
            .insert((request_id.to_string(), dependency.to_string()), now_unix);
    }

    pub fn cancel_on_cooldown(
        &self,
        request_id: &str,
        dependency: &str,
        now_unix: i64,
        cooldown_secs: i64,
    ) -> bool {
        self.cancel_cooldown
            .get(&(request_id.to_string(), dependency.to_string()))
            .map(|ts| now_unix - ts < cooldown_secs)
            .unwrap_or(false)
    }

    pub fn consecutive_stuck_cycles(&self) -> u32 {
        self.consecutive_stuck_cycles
    }

    pub fn record_stuck_cycle(&mut self) -> u32 {
        self.consecutive_stuck_cycles += 1;
        self.consecutive_stuck_cycles
    }

    pub fn reset_stuck_cycles(&mut self) {
        self.consecutive_stuck_cycles = 0;
    }

    /// Evict entries older than their map's TTL. Called every 50 cycles
    /// (spec §4.B, §5).
    pub fn evict_expired(&mut self, now_unix: i64) {
        self.executed.retain(|_, ts| now_unix - *ts < EXECUTED_TTL_SECS);
        self.recent_reposts.retain(|_, ts| now_unix - *ts < REPOST_TTL_SECS);
        self.dependency_redispatch_cooldown
            .retain(|_, ts| now_unix - *ts < COOLDOWN_TTL_SECS);
        self.cancel_cooldown.retain(|_, ts| now_unix - *ts < COOLDOWN_TTL_SECS);
    }

    pub fn executed_len(&self) -> usize {
        self.executed.len()
    }
}

/// Cached view of the current staking epoch (spec §3).
#[derive(Debug, Clone, Copy, Default)]
pub struct EpochGateState {
    pub ts_checkpoint: i64,
    pub next_checkpoint: i64,
    pub request_count: u64,
    pub target_count: u64,
    pub cached_at: i64,
}

impl EpochGateState {
    pub fn target_met(&self) -> bool {
        self.request_count >= self.target_count
    }

    pub fn is_fresh(&self, now_unix: i64, ttl_secs: i64) -> bool {
        now_unix - self.cached_at < ttl_secs
    }

    pub fn inactivity_epochs(&self) -> u64 {
        if self.target_met() {
            0
        } else {
            1
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedup_executed_is_sticky_until_eviction() {
        let mut session = SessionState::new();
        assert!(!session.was_executed("0xabc"));
        session.mark_executed("0xabc", 1_000);
        assert!(session.was_executed("0xabc"));

        session.evict_expired(1_000 + EXECUTED_TTL_SECS - 1);
        assert!(session.was_executed("0xabc"));

        session.evict_expired(1_000 + EXECUTED_TTL_SECS + 1);
        assert!(!session.was_executed("0xabc"));
    }

    #[test]
    fn repost_cooldown() {
        let mut session = SessionState::new();
        session.mark_reposted("0xabc", 1_000);
        assert!(session.repost_on_cooldown("0xabc", 1_500, 600));
        assert!(!session.repost_on_cooldown("0xabc", 1_700, 600));
    }

    #[test]
    fn stuck_cycle_counter_resets() {
        let mut session = SessionState::new();
        assert_eq!(session.record_stuck_cycle(), 1);
        assert_eq!(session.record_stuck_cycle(), 2);
        session.reset_stuck_cycles();
        assert_eq!(session.consecutive_stuck_cycles(), 0);
    }

    #[test]
    fn epoch_gate_target_met() {
        let mut epoch = EpochGateState {
            ts_checkpoint: 0,
            next_checkpoint: 86_400,
            request_count: 12,
            target_count: 60,
            cached_at: 0,
        };
        assert!(!epoch.target_met());
        epoch.request_count = 60;
        assert!(epoch.target_met());
    }
}
