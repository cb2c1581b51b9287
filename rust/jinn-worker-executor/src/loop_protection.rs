//! Loop protection (spec §4.F, tested in §8 "Loop protection"): a small
//! finite-state machine driven by the subprocess's stdout stream that
//! trips on excessive output, repetitive output, or oversized chunks.
//! Wall-clock timeout is enforced separately by the caller via
//! `tokio::time::timeout`, not by this guard.

use jinn_worker_config::schema::ExecutorSection;
use regex::Regex;
use std::collections::VecDeque;

/// Lines matching this prefix reset the repeat-line counter instead of
/// incrementing it (spec §4.F: `call:` lines are expected to repeat
/// benignly while a tool streams progress).
const DEFAULT_BENIGN_PREFIX: &str = r"^call:";

pub struct LoopGuard {
    max_total_bytes: usize,
    max_chunk_bytes: usize,
    repeat_threshold: u32,
    identical_chunk_window: usize,
    benign_prefix: Regex,
    total_bytes: usize,
    last_line: Option<String>,
    repeat_count: u32,
    recent_chunks: VecDeque<Vec<u8>>,
}

impl LoopGuard {
    pub fn new(config: &ExecutorSection) -> Self {
        Self {
            max_total_bytes: config.max_stdout_bytes,
            max_chunk_bytes: config.max_chunk_bytes,
            repeat_threshold: config.repeat_line_threshold,
            identical_chunk_window: config.identical_chunk_window,
            benign_prefix: Regex::new(DEFAULT_BENIGN_PREFIX).expect("static regex must compile"),
            total_bytes: 0,
            last_line: None,
            repeat_count: 0,
            recent_chunks: VecDeque::new(),
        }
    }

    /// Feed one chunk of raw stdout bytes. Returns `Some(reason)` the
    /// instant a byte-budget, chunk-size, or identical-chunk-window
    /// detector trips.
    pub fn observe_chunk(&mut self, chunk: &[u8]) -> Option<String> {
        if chunk.len() > self.max_chunk_bytes {
            return Some(format!(
                "stdout chunk of {} bytes exceeded max chunk size {}",
                chunk.len(),
                self.max_chunk_bytes
            ));
        }

        self.total_bytes += chunk.len();
        if self.total_bytes > self.max_total_bytes {
            return Some(format!(
                "stdout byte budget of {} exceeded",
                self.max_total_bytes
            ));
        }

        self.recent_chunks.push_back(chunk.to_vec());
        while self.recent_chunks.len() > self.identical_chunk_window {
            self.recent_chunks.pop_front();
        }
        if self.identical_chunk_window > 0 && self.recent_chunks.len() >= self.identical_chunk_window {
            let first = &self.recent_chunks[0];
            if self.recent_chunks.iter().all(|c| c == first) {
                return Some(format!(
                    "identical chunk repeated across a window of {}",
                    self.identical_chunk_window
                ));
            }
        }

        None
    }

    /// Feed one decoded line (ANSI already stripped by the caller). Returns
    /// `Some(reason)` once the same non-benign line repeats
    /// `repeat_threshold` times in a row.
    pub fn observe_line(&mut self, line: &str) -> Option<String> {
        if self.benign_prefix.is_match(line) {
            self.repeat_count = 0;
            self.last_line = Some(line.to_string());
            return None;
        }

        if self.last_line.as_deref() == Some(line) {
            self.repeat_count += 1;
        } else {
            self.last_line = Some(line.to_string());
            self.repeat_count = 1;
        }

        if self.repeat_count >= self.repeat_threshold {
            return Some(format!(
                "Consecutive repetitive line detected {} times",
                self.repeat_count
            ));
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ExecutorSection {
        ExecutorSection::default()
    }

    #[test]
    fn trips_on_max_total_bytes() {
        let mut cfg = config();
        cfg.max_stdout_bytes = 10;
        let mut guard = LoopGuard::new(&cfg);
        assert!(guard.observe_chunk(b"0123456789").is_none());
        assert!(guard.observe_chunk(b"x").is_some());
    }

    #[test]
    fn trips_on_oversized_single_chunk() {
        let mut cfg = config();
        cfg.max_chunk_bytes = 4;
        let mut guard = LoopGuard::new(&cfg);
        assert!(guard.observe_chunk(b"12345").is_some());
    }

    #[test]
    fn trips_after_ten_consecutive_repeats_with_default_threshold() {
        let mut guard = LoopGuard::new(&config());
        let mut reason = None;
        for _ in 0..15 {
            if let Some(r) = guard.observe_line("repeating") {
                reason = Some(r);
                break;
            }
        }
        assert_eq!(
            reason.as_deref(),
            Some("Consecutive repetitive line detected 10 times")
        );
    }

    #[test]
    fn benign_prefix_resets_counter_instead_of_tripping() {
        let mut guard = LoopGuard::new(&config());
        for _ in 0..20 {
            assert!(guard.observe_line("call: listing files").is_none());
        }
    }

    #[test]
    fn different_lines_never_trip() {
        let mut guard = LoopGuard::new(&config());
        for i in 0..20 {
            assert!(guard.observe_line(&format!("line {i}")).is_none());
        }
    }

    #[test]
    fn identical_chunk_window_trips() {
        let mut cfg = config();
        cfg.identical_chunk_window = 3;
        let mut guard = LoopGuard::new(&cfg);
        assert!(guard.observe_chunk(b"same").is_none());
        assert!(guard.observe_chunk(b"same").is_none());
        assert!(guard.observe_chunk(b"same").is_some());
    }
}
