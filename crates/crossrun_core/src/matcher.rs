//! Output comparison: literal equality and line templates for nondeterministic output.
//!
//! Most units are compared byte-for-byte after [`normalize`]. A small allow-list of
//! "special" units print output that varies between runs (addresses, heap sizes, timings),
//! so their expected-output file is read as a [`Template`] instead:
//!
//! - a line consisting of exactly `########` absorbs zero or more actual lines;
//! - every other line is a regex anchored at the start of the actual line, in which
//!   `()[]{}.*+^$` are literal unless backslash-escaped, and whose trailing newline also accepts
//!   carriage returns before it.
//!
//! The template is applied by rewriting the actual output: every actual line that matches its
//! template line is replaced by the template text, absorbed runs collapse to a single
//! `########` line. Every actual line is newline-terminated first, the last one included. A successful match therefore leaves the rewritten output byte-identical to
//! the template, and a failing one leaves an inspectable diff.

use regex::bytes::Regex;

/// Template line that absorbs any number of actual lines.
pub const WILDCARD_LINE: &[u8] = b"########\n";

/// Marker written into the actual output when absorption never finds its resume line.
pub const WILDCARD_FAIL_LINE: &[u8] = b"######## FAIL\n";

/// Characters that are regex syntax but literal in a template unless escaped.
const TEMPLATE_LITERALS: &[char] = &['(', ')', '[', ']', '{', '}', '.', '*', '+', '^', '$'];

/// How expected and actual output are compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchMode {
    /// Byte equality after normalization.
    Exact,
    /// Expected output is a line template (special units only).
    Template,
}

/// Result of comparing one unit's output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Comparison {
    pub matched: bool,
    /// The actual output as it should be recorded: rewritten by the template in
    /// [`MatchMode::Template`], unchanged otherwise.
    pub actual: Vec<u8>,
}

/// Collapse platform line endings to `\n`.
///
/// ## Examples
/// ```rust
/// use crossrun_core::matcher::normalize;
/// assert_eq!(normalize(b"a\r\nb\n"), b"a\nb\n".to_vec());
/// ```
pub fn normalize(output: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(output.len());
    let mut i = 0;
    while i < output.len() {
        if output[i] == b'\r' && output.get(i + 1) == Some(&b'\n') {
            out.push(b'\n');
            i += 2;
        } else {
            out.push(output[i]);
            i += 1;
        }
    }
    out
}

/// Compare normalized expected output against normalized actual output.
pub fn compare(expected: &[u8], actual: &[u8], mode: MatchMode) -> Comparison {
    match mode {
        MatchMode::Exact => Comparison {
            matched: expected == actual,
            actual: actual.to_vec(),
        },
        MatchMode::Template => {
            let rewrite = Template::parse(expected).rewrite(actual);
            Comparison {
                matched: !rewrite.failed && rewrite.output == expected,
                actual: rewrite.output,
            }
        }
    }
}

/// Split bytes into lines that keep their terminating `\n`.
///
/// A final unterminated line is kept as is, so `b"a\nb"` yields `["a\n", "b"]`.
pub fn split_lines(bytes: &[u8]) -> Vec<Vec<u8>> {
    let mut lines = Vec::new();
    let mut start = 0;
    for (i, &b) in bytes.iter().enumerate() {
        if b == b'\n' {
            lines.push(bytes[start..=i].to_vec());
            start = i + 1;
        }
    }
    if start < bytes.len() {
        lines.push(bytes[start..].to_vec());
    }
    lines
}

// ============================================================================
// Templates
// ============================================================================

#[derive(Debug, Clone)]
enum TemplateLine {
    Wildcard,
    /// `regex` is `None` when the line does not form a valid pattern; such a line only
    /// matches its own text.
    Pattern { text: Vec<u8>, regex: Option<Regex> },
}

impl TemplateLine {
    fn is_match(&self, line: &[u8]) -> bool {
        match self {
            TemplateLine::Wildcard => false,
            TemplateLine::Pattern { text, regex } => match regex {
                Some(regex) => regex.is_match(line),
                None => line == text.as_slice(),
            },
        }
    }
}

/// A compiled expected-output template.
#[derive(Debug, Clone)]
pub struct Template {
    lines: Vec<TemplateLine>,
}

/// Rewritten actual output produced by [`Template::rewrite`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rewrite {
    pub output: Vec<u8>,
    /// An absorbing line never found the line it was supposed to resume at.
    pub failed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Literal,
    Absorbing,
}

impl Template {
    /// Compile a template from the raw bytes of an expected-output file.
    pub fn parse(source: &[u8]) -> Self {
        let lines = split_lines(source)
            .into_iter()
            .map(|line| {
                if line == WILDCARD_LINE {
                    TemplateLine::Wildcard
                } else {
                    let regex = compile_line(&line);
                    TemplateLine::Pattern { text: line, regex }
                }
            })
            .collect();
        Template { lines }
    }

    /// Rewrite `actual` against this template.
    ///
    /// ## Notes
    /// - Scanning stops as soon as the actual output is exhausted; leftover template lines
    ///   simply make the rewritten output shorter than the template.
    /// - A wildcard on the last template line absorbs the rest of the output.
    /// - Two consecutive wildcards absorb nothing at the first one.
    /// - An unterminated last line gains a `\n`, and empty output reads as one empty line.
    pub fn rewrite(&self, actual: &[u8]) -> Rewrite {
        let mut lines = split_lines(actual);
        match lines.last_mut() {
            Some(last) if !last.ends_with(b"\n") => last.push(b'\n'),
            Some(_) => {}
            None => lines.push(b"\n".to_vec()),
        }
        let mut cursor = 0;
        let mut idx = 0;
        let mut state = State::Literal;
        let mut failed = false;

        while idx < self.lines.len() && cursor < lines.len() {
            match state {
                State::Literal => {
                    match &self.lines[idx] {
                        TemplateLine::Wildcard => {
                            state = State::Absorbing;
                            continue;
                        }
                        line @ TemplateLine::Pattern { text, .. } => {
                            if line.is_match(&lines[cursor]) {
                                lines[cursor] = text.clone();
                            }
                            cursor += 1;
                        }
                    }
                    idx += 1;
                }
                State::Absorbing => {
                    let resume_at = match self.lines.get(idx + 1) {
                        None => Some(lines.len()),
                        Some(TemplateLine::Wildcard) => Some(cursor),
                        Some(next) => (cursor..lines.len()).find(|&j| next.is_match(&lines[j])),
                    };
                    match resume_at {
                        Some(end) => {
                            lines.splice(cursor..end, [WILDCARD_LINE.to_vec()]);
                            cursor += 1;
                            idx += 1;
                            state = State::Literal;
                        }
                        None => {
                            lines[cursor] = WILDCARD_FAIL_LINE.to_vec();
                            failed = true;
                            break;
                        }
                    }
                }
            }
        }

        Rewrite {
            output: lines.concat(),
            failed,
        }
    }
}

/// Translate one template line into a regex anchored at the start of the line.
fn compile_line(line: &[u8]) -> Option<Regex> {
    let pattern = template_to_regex(&String::from_utf8_lossy(line));
    Regex::new(&format!("^(?:{pattern})")).ok()
}

/// Convert template escapes to regex syntax.
///
/// ## Examples
/// ```rust
/// use crossrun_core::matcher::template_to_regex;
/// assert_eq!(template_to_regex("a.b\n"), r"a\.b\r*\n");
/// assert_eq!(template_to_regex(r"0x\.\*"), "0x.*");
/// ```
pub fn template_to_regex(line: &str) -> String {
    let mut out = String::with_capacity(line.len() + 8);
    let mut escape = false;
    for c in line.chars() {
        if escape {
            escape = false;
            out.push(c);
        } else if c == '\\' {
            escape = true;
        } else if TEMPLATE_LITERALS.contains(&c) {
            out.push('\\');
            out.push(c);
        } else {
            out.push(c);
        }
    }
    if out.ends_with('\n') {
        out.pop();
        out.push_str(r"\r*\n");
    }
    out
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn matches(template: &[u8], actual: &[u8]) -> bool {
        compare(template, actual, MatchMode::Template).matched
    }

    #[test]
    fn normalize_only_touches_crlf() {
        assert_eq!(normalize(b"a\r\n\rb\r"), b"a\n\rb\r".to_vec());
    }

    #[test]
    fn split_keeps_unterminated_tail() {
        assert_eq!(split_lines(b"a\nb"), vec![b"a\n".to_vec(), b"b".to_vec()]);
        assert!(split_lines(b"").is_empty());
    }

    #[test]
    fn escaped_metachars_become_regex() {
        assert!(matches(b"mem: \\d\\+\n", b"mem: ddd\n"));
        assert!(matches(b"0x\\.\\*\n", b"0x7f001234\n"));
        assert!(!matches(b"a.c\n", b"abc\n"));
        assert!(matches(b"a.c\n", b"a.c\n"));
    }

    #[test]
    fn double_backslash_reaches_regex_escape() {
        assert_eq!(template_to_regex(r"\\d"), r"\d");
        assert!(matches(b"n=\\\\d\\+\n", b"n=1234\n"));
    }

    #[test]
    fn trailing_carriage_returns_are_accepted() {
        let rewrite = Template::parse(b"ok\n").rewrite(b"ok\r\r\n");
        assert_eq!(rewrite.output, b"ok\n".to_vec());
        assert!(!rewrite.failed);
    }

    #[test]
    fn wildcard_absorbs_lines() {
        let template = b"A\n########\nB\n";
        assert!(matches(template, b"A\nx\ny\nB\n"));
        assert!(matches(template, b"A\nB\n"));
        assert!(!matches(template, b"A\nC\n"));
    }

    #[test]
    fn failed_absorption_is_marked() {
        let rewrite = Template::parse(b"A\n########\nB\n").rewrite(b"A\nC\nD\n");
        assert!(rewrite.failed);
        assert_eq!(rewrite.output, b"A\n######## FAIL\nD\n".to_vec());
    }

    #[test]
    fn trailing_wildcard_absorbs_rest() {
        assert!(matches(b"head\n########\n", b"head\n1\n2\n3\n"));
    }

    #[test]
    fn mismatched_line_is_left_in_place() {
        let rewrite = Template::parse(b"a\nb\nc\n").rewrite(b"a\nX\nc\n");
        assert_eq!(rewrite.output, b"a\nX\nc\n".to_vec());
    }

    #[test]
    fn short_output_is_a_mismatch() {
        assert!(!matches(b"a\nb\n", b"a\n"));
        assert!(!matches(b"a\n", b""));
    }

    #[test]
    fn empty_output_is_one_blank_line() {
        assert!(matches(b"\n", b""));
        assert_eq!(compare(b"x\n", b"", MatchMode::Template).actual, b"\n".to_vec());
    }

    #[test]
    fn lines_are_matched_from_their_start() {
        assert!(matches(b"ab", b"abc"));
        assert!(!matches(b"bc", b"abc"));
        assert!(!matches(b"abc\n", b"abcd\n"));
    }

    #[test]
    fn unterminated_last_line_is_terminated() {
        let rewrite = Template::parse(b"A\nabc\n").rewrite(b"A\nabc");
        assert_eq!(rewrite.output, b"A\nabc\n".to_vec());
        assert!(!rewrite.failed);
    }

    #[test]
    fn invalid_pattern_falls_back_to_literal() {
        assert!(matches(b"?x\n", b"?x\n"));
        assert!(!matches(b"?x\n", b"x\n"));
    }

    #[test]
    fn exact_mode_is_byte_equality() {
        assert!(compare(b"1\n", b"1\n", MatchMode::Exact).matched);
        assert!(!compare(b"1\n", b"1 \n", MatchMode::Exact).matched);
    }
}
