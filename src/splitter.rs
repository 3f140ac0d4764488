//! SQL batch splitting
//!
//! Scripts are divided into separately executed statements at separator tokens
//! found in plain code. Separators that appear inside line comments, block
//! comments, or quoted literals are inert. The scan never fails: an
//! unterminated comment or literal simply runs to the end of the script.

/// Default statement separator
pub const DEFAULT_STATEMENT_SEPARATOR: &str = ";";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Region {
    Code,
    LineComment,
    BlockComment,
    SingleQuote,
    DoubleQuote,
}

/// Splits scripts into statements according to the configured separator
///
/// When batch splitting is disabled the whole script is returned as a single
/// statement.
#[derive(Debug, Clone)]
pub struct StatementSplitter {
    separator: String,
    enabled: bool,
}

impl Default for StatementSplitter {
    fn default() -> Self {
        Self::new(DEFAULT_STATEMENT_SEPARATOR, true)
    }
}

impl StatementSplitter {
    /// Create a splitter for the given separator token
    ///
    /// An empty separator falls back to [`DEFAULT_STATEMENT_SEPARATOR`].
    pub fn new(separator: &str, enabled: bool) -> Self {
        let separator = separator.trim();
        let separator = if separator.is_empty() {
            DEFAULT_STATEMENT_SEPARATOR
        } else {
            separator
        };

        Self {
            separator: separator.to_string(),
            enabled,
        }
    }

    pub fn separator(&self) -> &str {
        &self.separator
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Split a script into executable statements
    pub fn split(&self, script: &str) -> Vec<String> {
        if !self.enabled {
            if script.trim().is_empty() {
                return Vec::new();
            }
            return vec![script.to_string()];
        }
        split(script, &self.separator)
    }
}

/// Split `script` at every `separator` found in plain code
///
/// Returns the trimmed statements in order. Fragments that contain nothing but
/// whitespace or comments are discarded. Word separators (e.g. `GO`) match
/// case-insensitively and only as a whole word; symbol separators (e.g. `;`)
/// match anywhere in code.
pub fn split(script: &str, separator: &str) -> Vec<String> {
    let separator = separator.trim();
    if separator.is_empty() {
        return collect_fragment(script, true).into_iter().collect();
    }

    let word_separator = separator.chars().all(is_identifier_char);
    let bytes = script.as_bytes();
    let mut statements = Vec::new();
    let mut region = Region::Code;
    let mut start = 0;
    let mut has_code = false;
    let mut i = 0;

    while i < bytes.len() {
        let rest = &script[i..];
        match region {
            Region::Code => {
                if rest.starts_with("--") {
                    region = Region::LineComment;
                    i += 2;
                    continue;
                }
                if rest.starts_with("/*") {
                    region = Region::BlockComment;
                    i += 2;
                    continue;
                }
                if separator_at(script, i, separator, word_separator) {
                    if let Some(statement) = collect_fragment(&script[start..i], has_code) {
                        statements.push(statement);
                    }
                    i += separator.len();
                    start = i;
                    has_code = false;
                    continue;
                }

                match bytes[i] {
                    b'\'' => region = Region::SingleQuote,
                    b'"' => region = Region::DoubleQuote,
                    _ => {}
                }
                if !bytes[i].is_ascii_whitespace() {
                    has_code = true;
                }
            }
            Region::LineComment => {
                if bytes[i] == b'\n' {
                    region = Region::Code;
                }
            }
            Region::BlockComment => {
                if rest.starts_with("*/") {
                    region = Region::Code;
                    i += 2;
                    continue;
                }
            }
            Region::SingleQuote => {
                // a doubled quote closes and immediately reopens the literal
                if bytes[i] == b'\'' {
                    region = Region::Code;
                }
            }
            Region::DoubleQuote => {
                if bytes[i] == b'"' {
                    region = Region::Code;
                }
            }
        }
        i += next_char_len(script, i);
    }

    if let Some(statement) = collect_fragment(&script[start..], has_code) {
        statements.push(statement);
    }

    statements
}

fn collect_fragment(fragment: &str, has_code: bool) -> Option<String> {
    let trimmed = fragment.trim();
    if trimmed.is_empty() || !has_code {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn separator_at(script: &str, at: usize, separator: &str, word_separator: bool) -> bool {
    if !word_separator {
        return script[at..].starts_with(separator);
    }

    let end = at + separator.len();
    let candidate = match script.get(at..end) {
        Some(c) => c,
        None => return false,
    };
    if !candidate.eq_ignore_ascii_case(separator) {
        return false;
    }

    let before_ok = script[..at]
        .chars()
        .next_back()
        .map(|c| !is_identifier_char(c))
        .unwrap_or(true);
    let after_ok = script[end..]
        .chars()
        .next()
        .map(|c| !is_identifier_char(c))
        .unwrap_or(true);

    before_ok && after_ok
}

fn is_identifier_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

fn next_char_len(script: &str, at: usize) -> usize {
    script[at..].chars().next().map(char::len_utf8).unwrap_or(1)
}
