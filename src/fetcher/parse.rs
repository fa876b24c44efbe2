//! Line parsing and the growable-buffer scanner (spec §4.4).
//!
//! Each log line is `"<RFC3339Nano> <message>"`, split on the first space.
//! Malformed lines are silently dropped — they cannot have come from a
//! supported source. The scanner buffer starts at 64 KB and doubles up to
//! 1 MB; a line that still doesn't fit is reported as a terminal sentinel,
//! mirroring Go's `bufio.Scanner` growable-token-buffer behavior.

use chrono::{DateTime, Utc};

use crate::error::StreamReadError;

pub const INITIAL_BUFFER_SIZE: usize = 64 * 1024;
pub const MAX_BUFFER_SIZE: usize = 1024 * 1024;

/// Parses one log line into `(timestamp, message)`. Returns `None` for any
/// line that isn't `"<RFC3339Nano> <message>"`.
pub fn parse_line(line: &str) -> Option<(DateTime<Utc>, String)> {
    let (ts, message) = line.split_once(' ')?;
    let timestamp = DateTime::parse_from_rfc3339(ts).ok()?.with_timezone(&Utc);
    Some((timestamp, message.to_string()))
}

/// Accumulates byte chunks into complete lines, growing its internal
/// buffer from [`INITIAL_BUFFER_SIZE`] up to [`MAX_BUFFER_SIZE`] when a
/// line doesn't fit, and reporting [`StreamReadError::LineTooLong`] if it
/// still doesn't fit at the cap.
pub struct LineScanner {
    buf: Vec<u8>,
    limit: usize,
}

impl LineScanner {
    pub fn new() -> Self {
        Self::with_capacity_hint(INITIAL_BUFFER_SIZE)
    }

    /// Like [`Self::new`], but preallocates `capacity_hint` bytes up
    /// front (e.g. from `ForwardOptions::max_chunk_size`) to avoid
    /// reallocating on the first few chunks of a stream known to read in
    /// larger pieces. Never lowers the buffer below `INITIAL_BUFFER_SIZE`.
    pub fn with_capacity_hint(capacity_hint: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity_hint.max(INITIAL_BUFFER_SIZE)),
            limit: INITIAL_BUFFER_SIZE,
        }
    }

    /// Feeds a chunk of bytes, returning any complete lines it produced (in
    /// order, without the trailing newline).
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<String>, StreamReadError> {
        self.buf.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.buf.drain(..=pos).collect();
            line.pop(); // trailing '\n'
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            lines.push(String::from_utf8_lossy(&line).into_owned());
        }

        while self.buf.len() > self.limit && self.limit < MAX_BUFFER_SIZE {
            self.limit = (self.limit * 2).min(MAX_BUFFER_SIZE);
        }
        if self.buf.len() > self.limit {
            return Err(StreamReadError::LineTooLong);
        }

        Ok(lines)
    }
}

impl Default for LineScanner {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_line() {
        let (ts, msg) = parse_line("2024-01-02T03:04:05.123456789Z hello world").unwrap();
        assert_eq!(msg, "hello world");
        assert_eq!(ts.timestamp_subsec_nanos(), 123_456_789);
    }

    #[test]
    fn drops_malformed_line() {
        assert!(parse_line("not a timestamp at all").is_none());
        assert!(parse_line("justoneword").is_none());
    }

    #[test]
    fn scanner_assembles_multi_chunk_lines() {
        let mut scanner = LineScanner::new();
        assert!(scanner.feed(b"2024-01-02T03:04:05Z hel").unwrap().is_empty());
        let lines = scanner.feed(b"lo\n2024-01-02T03:04:06Z world\n").unwrap();
        assert_eq!(lines, vec!["2024-01-02T03:04:05Z hello", "2024-01-02T03:04:06Z world"]);
    }

    #[test]
    fn scanner_strips_trailing_cr() {
        let mut scanner = LineScanner::new();
        let lines = scanner.feed(b"2024-01-02T03:04:05Z hello\r\n").unwrap();
        assert_eq!(lines, vec!["2024-01-02T03:04:05Z hello"]);
    }

    #[test]
    fn scanner_grows_then_fails_past_cap() {
        let mut scanner = LineScanner::new();
        let chunk = vec![b'a'; MAX_BUFFER_SIZE + 1];
        let err = scanner.feed(&chunk).unwrap_err();
        assert!(matches!(err, StreamReadError::LineTooLong));
    }
}
