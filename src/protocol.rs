//! Wire protocol: line parsing and response formatting.
//!
//! Framing is entirely line-based with LF terminators; this module only
//! deals with the bytes of individual lines. The multi-line `P` command
//! and reading message bodies back off disk both need more I/O than a
//! single line, so those live in [`crate::connection`] — this module is
//! the pure, easily-tested parsing/formatting core it calls into.

use crate::error::ProtocolError;

/// Split a command line into its opcode and optional argument. The
/// argument, if any, starts right after a single space following the
/// opcode: `"L"` → `('L', None)`, `"L 5"` → `('L', Some("5"))`,
/// `"T hello world"` → `('T', Some("hello world"))`.
pub fn parse_opcode_line(line: &str) -> (char, Option<&str>) {
    if line.is_empty() {
        return ('\0', None);
    }
    let mut chars = line.chars();
    let opcode = chars.next().unwrap_or('\0');
    let rest = &line[opcode.len_utf8()..];
    let arg = rest.strip_prefix(' ').filter(|s| !s.is_empty());
    (opcode, arg)
}

/// Parse a non-negative integer count (a message count, a line count, or
/// the `N` of `L <N>`). Anything containing a sign, whitespace, or a
/// non-digit is rejected — this is stricter than `str::parse` alone, which
/// would otherwise accept a leading `+`.
pub fn parse_count(s: &str) -> Result<u64, ProtocolError> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ProtocolError::NotANumber(s.to_owned()));
    }
    s.parse::<u64>()
        .map_err(|_| ProtocolError::NotANumber(s.to_owned()))
}

/// `"E <reason>\n"`.
pub fn format_error(reason: &str) -> String {
    format!("E {reason}\n")
}

/// `"<count>\n"`, the header shared by `L`, `T`, and `W` responses.
pub fn format_count_line(count: usize) -> String {
    format!("{count}\n")
}

/// `"<latest_epoch> <topic>\n"`, used by `L` responses and by the `N`
/// notification suffix.
pub fn format_topic_line(latest: u64, name: &str) -> String {
    format!("{latest} {name}\n")
}

/// `"N <count>\n"` followed by the caller's topic lines.
pub fn format_notification_header(count: usize) -> String {
    format!("N {count}\n")
}

/// One message as `K` followed by `K` lines.
pub fn format_message_block(lines: &[String]) -> String {
    let mut out = format!("{}\n", lines.len());
    for line in lines {
        out.push_str(line);
        out.push('\n');
    }
    out
}
