//! The `Request` record (spec §3) — a unit of externally posted work.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// A request posted to the marketplace contract and observed through the
/// indexer. The worker never mutates it directly; delivery is the only
/// state change, and it is observed back through the marketplace contract,
/// never written locally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    /// Opaque identifier, unique across the marketplace. Hex or decimal
    /// string — never parsed as a number by this crate.
    pub id: String,

    /// Address of the mech this request was assigned priority delivery to.
    pub mech: String,

    /// Address of the requester.
    pub sender: String,

    /// Operator-defined grouping of related requests, if any.
    pub workstream_id: Option<String>,

    /// Block timestamp of creation, seconds since epoch.
    pub block_timestamp: i64,

    /// IPFS content hash pointing at the request payload.
    pub ipfs_hash: String,

    /// Whether the marketplace has recorded a delivery for this request.
    pub delivered: bool,

    /// Ordered list of dependency identifiers: either definition UUIDs or
    /// job names to be resolved against a workstream.
    pub dependencies: Option<Vec<String>>,

    /// Timestamp after which any mech, not just the priority one, may
    /// delivery this request. Populated from the marketplace's
    /// `mapRequestIdInfos` call during Discovery step 4.
    pub response_timeout: Option<i64>,

    /// Tool names this request's job declares it needs.
    pub required_tools: Option<HashSet<String>>,

    /// Free-form job name, may match `HEARTBEAT_JOB_NAME` or contain a
    /// template marker recognized by Discovery's template pickup query.
    pub job_name: Option<String>,
}

impl Request {
    /// True once the marketplace reports a non-zero delivery mech for this
    /// request, checked during Discovery step 4. This field itself is not
    /// stored on `Request` — callers compare the returned address directly
    /// — but this helper documents the zero-address convention.
    pub fn is_delivery_mech_set(address: &str) -> bool {
        !Self::is_zero_address(address)
    }

    pub fn is_zero_address(address: &str) -> bool {
        let stripped = address.trim_start_matches("0x");
        !stripped.is_empty() && stripped.chars().all(|c| c == '0')
    }

    /// Whether this request's priority mech differs from `our_mech` and the
    /// response timeout window (if any) has not yet elapsed — used by the
    /// Claim Arbitrator's pre-execution refinement (spec §4.E).
    pub fn is_reserved_for_other_mech(&self, our_mech: &str, now_unix: i64) -> bool {
        if self.mech.eq_ignore_ascii_case(our_mech) {
            return false;
        }
        match self.response_timeout {
            Some(timeout) => now_unix < timeout,
            None => true,
        }
    }

    pub fn is_heartbeat(&self) -> bool {
        self.job_name.as_deref() == Some(crate::HEARTBEAT_JOB_NAME)
    }

    pub fn requires_tools(&self) -> bool {
        self.required_tools
            .as_ref()
            .map(|set| !set.is_empty())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Request {
        Request {
            id: "0xabc".to_string(),
            mech: "0xMECH".to_string(),
            sender: "0xSENDER".to_string(),
            workstream_id: None,
            block_timestamp: 1_000,
            ipfs_hash: "QmHash".to_string(),
            delivered: false,
            dependencies: None,
            response_timeout: None,
            required_tools: None,
            job_name: None,
        }
    }

    #[test]
    fn zero_address_detection() {
        assert!(Request::is_zero_address("0x0000000000000000000000000000000000000000"));
        assert!(Request::is_zero_address("0"));
        assert!(!Request::is_zero_address("0x1"));
        assert!(!Request::is_zero_address(""));
    }

    #[test]
    fn reserved_for_other_mech_without_timeout_never_expires() {
        let req = sample();
        assert!(req.is_reserved_for_other_mech("0xOTHER", 10_000_000));
    }

    #[test]
    fn reserved_for_other_mech_respects_timeout() {
        let mut req = sample();
        req.response_timeout = Some(5_000);
        assert!(req.is_reserved_for_other_mech("0xOTHER", 4_000));
        assert!(!req.is_reserved_for_other_mech("0xOTHER", 6_000));
    }

    #[test]
    fn own_mech_is_never_reserved_for_other() {
        let req = sample();
        assert!(!req.is_reserved_for_other_mech("0xMECH", 1));
    }

    #[test]
    fn heartbeat_detection() {
        let mut req = sample();
        req.job_name = Some(crate::HEARTBEAT_JOB_NAME.to_string());
        assert!(req.is_heartbeat());
    }
}
