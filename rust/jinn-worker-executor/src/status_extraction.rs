//! Status-update extraction from the subprocess stream (spec §4.F): three
//! patterns tried in order against each ANSI-stripped line. The fenced
//! block is stateful across lines; the other two are single-line regex
//! matches.

use regex::Regex;
use std::sync::OnceLock;

const MAX_STATUS_LEN: usize = 144;

fn ansi_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\x1b\[[0-9;]*[A-Za-z]").expect("static regex must compile"))
}

fn fence_open_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^```status\s*$").expect("static regex must compile"))
}

fn fence_close_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^```\s*$").expect("static regex must compile"))
}

fn key_value_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#""?TaskStatus"?\s*[:=]\s*"([^"]+)""#).expect("static regex must compile"))
}

fn legacy_marker_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(\*\*|#+ )?Status Update:?(\*\*)?\s*(.+)$").expect("static regex must compile")
    })
}

pub fn strip_ansi(input: &str) -> String {
    ansi_regex().replace_all(input, "").into_owned()
}

fn truncate_status(status: String) -> String {
    if status.chars().count() <= MAX_STATUS_LEN {
        status
    } else {
        status.chars().take(MAX_STATUS_LEN).collect()
    }
}

/// Stateful scanner across the fenced `status` code block pattern.
#[derive(Debug, Default)]
struct FenceState {
    open: bool,
    lines: Vec<String>,
}

/// Feeds ANSI-stripped lines one at a time and reports the most recently
/// discovered status string, trying the three patterns in order per line.
#[derive(Default)]
pub struct StatusExtractor {
    fence: FenceState,
    pub last_status: Option<String>,
}

impl StatusExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one already ANSI-stripped line. Returns `Some(status)` when a
    /// new status was discovered on this line.
    pub fn feed_line(&mut self, line: &str) -> Option<String> {
        if self.fence.open {
            if fence_close_regex().is_match(line) {
                self.fence.open = false;
                let joined = truncate_status(self.fence.lines.join(" ").trim().to_string());
                self.fence.lines.clear();
                if !joined.is_empty() {
                    self.last_status = Some(joined.clone());
                    return Some(joined);
                }
                return None;
            }
            self.fence.lines.push(line.to_string());
            return None;
        }

        if fence_open_regex().is_match(line) {
            self.fence.open = true;
            self.fence.lines.clear();
            return None;
        }

        if let Some(caps) = key_value_regex().captures(line) {
            let status = truncate_status(caps[1].to_string());
            self.last_status = Some(status.clone());
            return Some(status);
        }

        if let Some(caps) = legacy_marker_regex().captures(line) {
            let status = truncate_status(caps[3].trim().to_string());
            self.last_status = Some(status.clone());
            return Some(status);
        }

        None
    }
}

/// One-shot scan of a complete multi-line string (used by the Deliverer's
/// "second scan of the full output" fallback, spec §4.G).
pub fn extract_last_status(full_output: &str) -> Option<String> {
    let mut extractor = StatusExtractor::new();
    for raw_line in full_output.lines() {
        extractor.feed_line(&strip_ansi(raw_line));
    }
    extractor.last_status
}
