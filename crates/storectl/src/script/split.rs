use serde::Serialize;

/// Character which terminates a statement.
pub const TERMINATOR: char = ';';
/// Statements beginning with this keyword are expected to return rows.
pub const QUERY_KEYWORD: &str = "select";

/// SplitMode selects how a script is broken into statements.
#[derive(clap::ValueEnum, Debug, Default, Copy, Clone, PartialEq, Eq)]
pub enum SplitMode {
    /// Split on every `;`, including one within a quoted literal or comment.
    #[default]
    Naive,
    /// Don't split on a `;` within a quoted string or identifier,
    /// a comment, or a dollar-quoted body.
    LiteralAware,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StatementKind {
    /// Statement which returns rows.
    Query,
    /// Statement which returns only success or failure.
    Mutation,
}

impl StatementKind {
    /// Classify statement `text` by a case-insensitive test of its prefix.
    /// This is not a parse: leading comments make a query look like a mutation.
    pub fn classify(text: &str) -> Self {
        match text.trim_start().get(..QUERY_KEYWORD.len()) {
            Some(prefix) if prefix.eq_ignore_ascii_case(QUERY_KEYWORD) => StatementKind::Query,
            _ => StatementKind::Mutation,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StatementKind::Query => "query",
            StatementKind::Mutation => "mutation",
        }
    }
}

/// Statement is a single executable unit of a script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Statement {
    /// 1-based position of the statement within its script.
    pub ordinal: usize,
    pub kind: StatementKind,
    pub text: String,
}

impl Statement {
    /// Parse `script` into its ordered statements.
    pub fn parse(script: &str, mode: SplitMode) -> Vec<Statement> {
        split(script, mode)
            .into_iter()
            .enumerate()
            .map(|(index, text)| Statement {
                ordinal: index + 1,
                kind: StatementKind::classify(text),
                text: text.to_string(),
            })
            .collect()
    }
}

/// Split `script` into the trimmed, non-empty text of its statements.
pub fn split(script: &str, mode: SplitMode) -> Vec<&str> {
    let fragments = match mode {
        SplitMode::Naive => script.split(TERMINATOR).collect(),
        SplitMode::LiteralAware => split_literal_aware(script),
    };

    fragments
        .into_iter()
        .map(str::trim)
        .filter(|fragment| !fragment.is_empty())
        .collect()
}

#[derive(Clone, Copy)]
enum Scan<'s> {
    Code,
    Quoted(u8),
    LineComment,
    BlockComment(usize),
    Dollar(&'s [u8]),
}

// All delimiters are ASCII, and ASCII bytes never occur within a multi-byte
// UTF-8 sequence, so it's safe to scan bytes and cut at terminator offsets.
fn split_literal_aware(script: &str) -> Vec<&str> {
    let bytes = script.as_bytes();
    let mut fragments = Vec::new();
    let mut state = Scan::Code;
    let mut begin = 0;
    let mut i = 0;

    while i != bytes.len() {
        let rest = &bytes[i..];

        match state {
            Scan::Code => {
                if rest[0] == TERMINATOR as u8 {
                    fragments.push(&script[begin..i]);
                    begin = i + 1;
                } else if rest[0] == b'\'' || rest[0] == b'"' {
                    state = Scan::Quoted(rest[0]);
                } else if rest.starts_with(b"--") {
                    state = Scan::LineComment;
                    i += 1;
                } else if rest.starts_with(b"/*") {
                    state = Scan::BlockComment(1);
                    i += 1;
                } else if let Some(tag) = dollar_tag(rest) {
                    state = Scan::Dollar(tag);
                    i += tag.len() - 1;
                }
            }
            Scan::Quoted(quote) if rest[0] == quote => {
                // A doubled quote is an escaped quote, and doesn't close.
                if rest.get(1) == Some(&quote) {
                    i += 1;
                } else {
                    state = Scan::Code;
                }
            }
            Scan::Quoted(_) => (),
            Scan::LineComment => {
                if rest[0] == b'\n' {
                    state = Scan::Code;
                }
            }
            Scan::BlockComment(depth) => {
                if rest.starts_with(b"*/") {
                    state = if depth == 1 {
                        Scan::Code
                    } else {
                        Scan::BlockComment(depth - 1)
                    };
                    i += 1;
                } else if rest.starts_with(b"/*") {
                    state = Scan::BlockComment(depth + 1);
                    i += 1;
                }
            }
            Scan::Dollar(tag) => {
                if rest.starts_with(tag) {
                    state = Scan::Code;
                    i += tag.len() - 1;
                }
            }
        }
        i += 1;
    }

    // Whatever remains is the final fragment, even if a literal or comment
    // was left open.
    fragments.push(&script[begin..]);
    fragments
}

// Match a dollar-quote opening tag (`$$` or `$tag$`) at the start of `rest`.
fn dollar_tag(rest: &[u8]) -> Option<&[u8]> {
    if rest.first() != Some(&b'$') {
        return None;
    }
    let name = rest[1..]
        .iter()
        .take_while(|b| b.is_ascii_alphanumeric() || **b == b'_')
        .count();

    if rest.get(1).map_or(false, u8::is_ascii_digit) {
        return None; // Positional parameter, like `$1`.
    }
    if rest.get(1 + name) == Some(&b'$') {
        Some(&rest[..name + 2])
    } else {
        None
    }
}
