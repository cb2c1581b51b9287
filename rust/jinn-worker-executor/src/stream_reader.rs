//! Streaming stdout reader (spec §9 design note: "streaming `ReadOutcome`
//! reader with an FSM loop detector driven by `Line` outcomes"), wired
//! together with [`crate::loop_protection::LoopGuard`] and
//! [`crate::status_extraction::StatusExtractor`] by [`crate::executor`].

use crate::status_extraction::strip_ansi;
use tokio::io::{AsyncRead, AsyncReadExt};

/// One outcome of reading the subprocess's stdout stream. `Chunk` carries
/// the raw bytes as read (for loop protection's byte-budget and
/// identical-chunk detectors); `Line` carries one ANSI-stripped, newline-
/// delimited line (for the repeat-line detector and status extraction).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    Chunk(Vec<u8>),
    Line(String),
    /// The stream ended (EOF) with whatever partial line was still buffered.
    Terminated(String),
}

const CHUNK_SIZE: usize = 8 * 1024;

/// Reads `reader` to completion, yielding a `ReadOutcome::Chunk` for every
/// raw read and a `ReadOutcome::Line` each time a `\n` completes a line in
/// the accumulated buffer. Callers drive loop protection off both: chunks
/// for byte/size-based detectors, lines for the repeat-line detector.
pub async fn read_outcomes<R: AsyncRead + Unpin>(mut reader: R) -> Vec<ReadOutcome> {
    let mut outcomes = Vec::new();
    let mut line_buffer = String::new();
    let mut raw = [0u8; CHUNK_SIZE];

    loop {
        let n = match reader.read(&mut raw).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(_) => break,
        };
        let chunk = raw[..n].to_vec();
        outcomes.push(ReadOutcome::Chunk(chunk.clone()));

        let decoded = String::from_utf8_lossy(&chunk);
        for ch in decoded.chars() {
            if ch == '\n' {
                outcomes.push(ReadOutcome::Line(strip_ansi(&line_buffer)));
                line_buffer.clear();
            } else {
                line_buffer.push(ch);
            }
        }
    }

    if !line_buffer.is_empty() {
        outcomes.push(ReadOutcome::Terminated(strip_ansi(&line_buffer)));
    }

    outcomes
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn splits_complete_lines_and_reports_chunks() {
        let input = Cursor::new(b"line one\nline two\n".to_vec());
        let outcomes = read_outcomes(input).await;

        let lines: Vec<&String> = outcomes
            .iter()
            .filter_map(|o| match o {
                ReadOutcome::Line(l) => Some(l),
                _ => None,
            })
            .collect();
        assert_eq!(lines, vec!["line one", "line two"]);
        assert!(outcomes.iter().any(|o| matches!(o, ReadOutcome::Chunk(_))));
    }

    #[tokio::test]
    async fn trailing_partial_line_reported_as_terminated() {
        let input = Cursor::new(b"complete\nincomplete".to_vec());
        let outcomes = read_outcomes(input).await;
        assert!(outcomes.contains(&ReadOutcome::Terminated("incomplete".to_string())));
    }

    #[tokio::test]
    async fn ansi_escapes_stripped_from_lines() {
        let input = Cursor::new(b"\x1b[32mgreen\x1b[0m\n".to_vec());
        let outcomes = read_outcomes(input).await;
        assert!(outcomes.contains(&ReadOutcome::Line("green".to_string())));
    }

    #[tokio::test]
    async fn empty_stream_yields_no_outcomes() {
        let input = Cursor::new(Vec::new());
        let outcomes = read_outcomes(input).await;
        assert!(outcomes.is_empty());
    }
}
