//! ANSI-tolerant grep compilation (spec §4.4, §9).
//!
//! A literal whitespace character in the user's pattern is rewritten to
//! also tolerate an interleaved ANSI SGR/erase escape sequence on either
//! side, then the whole expression is compiled case-insensitively. This
//! lets a pattern like `"connection reset"` still match a message where
//! the terminal color codes land between words.

use regex::{Regex, RegexBuilder};

/// Matches a single ANSI CSI sequence, e.g. `\x1b[0m` or `\x1b[31;1m`.
const ANSI_ESCAPE: &str = r"(?:\x1b\[[0-9;]*[A-Za-z])*";

/// Compiles `pattern` into an ANSI-tolerant, case-insensitive [`Regex`].
pub fn compile(pattern: &str) -> Result<Regex, regex::Error> {
    let mut rewritten = String::with_capacity(pattern.len() * 2);
    for ch in pattern.chars() {
        if ch.is_whitespace() {
            rewritten.push_str(ANSI_ESCAPE);
            rewritten.push_str(r"\s");
            rewritten.push_str(ANSI_ESCAPE);
        } else {
            rewritten.push(ch);
        }
    }
    RegexBuilder::new(&rewritten).case_insensitive(true).build()
}
