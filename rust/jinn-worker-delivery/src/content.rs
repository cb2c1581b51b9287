//! Result content blob construction (spec §4.G step 1): ANSI-stripped
//! output with OpenTelemetry log lines removed, a structured summary, and
//! artifact extraction.

use jinn_worker_executor::strip_ansi;
use jinn_worker_types::Artifact;
use regex::Regex;
use std::sync::OnceLock;

const SUMMARY_HEADING: &str = "Execution Summary:";
const SUMMARY_FALLBACK_TAIL_CHARS: usize = 1_200;

fn otel_log_line_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\{?\"name\":\"gemini_cli\.").expect("static regex must compile"))
}

fn ipfs_hash_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\bQm[1-9A-HJ-NP-Za-km-z]{44}\b").expect("static regex must compile"))
}

/// Strips ANSI escapes and drops any line that looks like a raw
/// OpenTelemetry JSON event the subprocess printed to stdout alongside its
/// human-readable output.
pub fn clean_output(raw_output: &str) -> String {
    strip_ansi(raw_output)
        .lines()
        .filter(|line| !otel_log_line_regex().is_match(line.trim_start()))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Scans for an "Execution Summary:" heading and returns everything after
/// it; falls back to the last 1200 characters of `output` when no heading
/// is present (spec §4.G).
pub fn extract_summary(output: &str) -> Option<String> {
    if let Some(idx) = output.find(SUMMARY_HEADING) {
        let after = &output[idx + SUMMARY_HEADING.len()..];
        let trimmed = after.trim();
        if !trimmed.is_empty() {
            return Some(trimmed.to_string());
        }
    }
    if output.is_empty() {
        return None;
    }
    let tail_start = output.char_indices().rev().nth(SUMMARY_FALLBACK_TAIL_CHARS - 1).map(|(i, _)| i).unwrap_or(0);
    Some(output[tail_start..].trim().to_string())
}

/// Parses IPFS content descriptors out of combined telemetry-and-output
/// text (spec §4.G: "artifacts ... parsed from telemetry and output").
pub fn extract_artifacts(text: &str) -> Vec<Artifact> {
    let mut seen = std::collections::HashSet::new();
    ipfs_hash_regex()
        .find_iter(text)
        .filter_map(|m| {
            let hash = m.as_str().to_string();
            if seen.insert(hash.clone()) {
                Some(Artifact {
                    ipfs_hash: hash,
                    name: None,
                    mime_type: None,
                })
            } else {
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_output_drops_otel_lines_and_ansi() {
        let raw = "\x1b[32mbuild ok\x1b[0m\n{\"name\":\"gemini_cli.tool_call\"}\nfinished\n";
        let cleaned = clean_output(raw);
        assert_eq!(cleaned, "build ok\nfinished");
    }

    #[test]
    fn extract_summary_prefers_heading() {
        let output = "stuff before\nExecution Summary:\n  did the thing\n";
        assert_eq!(extract_summary(output), Some("did the thing".to_string()));
    }

    #[test]
    fn extract_summary_falls_back_to_tail() {
        let output = "x".repeat(2000);
        let summary = extract_summary(&output).unwrap();
        assert_eq!(summary.len(), 1_200);
    }

    #[test]
    fn extract_summary_empty_output_is_none() {
        assert_eq!(extract_summary(""), None);
    }

    #[test]
    fn extract_artifacts_deduplicates_hashes() {
        let text = "see QmYwAPJzv5CZsnAzt8auVZRn9f6ijVuNAGV1ZwDtxbRkgV and again QmYwAPJzv5CZsnAzt8auVZRn9f6ijVuNAGV1ZwDtxbRkgV";
        let artifacts = extract_artifacts(text);
        assert_eq!(artifacts.len(), 1);
        assert_eq!(artifacts[0].ipfs_hash, "QmYwAPJzv5CZsnAzt8auVZRn9f6ijVuNAGV1ZwDtxbRkgV");
    }
}
