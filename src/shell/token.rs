//! Command line tokenizer.
//!
//! Splits one raw input line into text, blank and operator tokens. Each
//! token keeps the exact source slice in [`CliToken::raw`], so joining the
//! raw forms reproduces the input line byte for byte.

/// Shell operators recognised outside quotes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    /// `|`
    Pipe,
    /// `>`
    Redirect,
    /// `>>`
    Append,
    /// `&`
    Background,
}

impl Operator {
    /// Source text of the operator.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pipe => "|",
            Self::Redirect => ">",
            Self::Append => ">>",
            Self::Background => "&",
        }
    }
}

/// Kind of a lexical unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /// A word, possibly assembled from quoted pieces.
    Text,
    /// A run of whitespace.
    Blank,
    /// An unquoted operator.
    Op(Operator),
}

/// One lexical unit of an input line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CliToken {
    kind: TokenKind,
    raw: String,
    value: String,
}

impl CliToken {
    /// Build a text token whose raw and value forms are identical.
    #[must_use]
    pub fn text(value: impl Into<String>) -> Self {
        let value = value.into();
        Self {
            kind: TokenKind::Text,
            raw: value.clone(),
            value,
        }
    }

    /// Token kind.
    #[must_use]
    pub fn kind(&self) -> TokenKind {
        self.kind
    }

    /// Literal source text, quotes included.
    #[must_use]
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Unquoted value.
    #[must_use]
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Whether this is a text token.
    #[must_use]
    pub fn is_text(&self) -> bool {
        self.kind == TokenKind::Text
    }

    /// Whether this is whitespace.
    #[must_use]
    pub fn is_blank(&self) -> bool {
        self.kind == TokenKind::Blank
    }

    /// The operator, if this token is one.
    #[must_use]
    pub fn operator(&self) -> Option<Operator> {
        match self.kind {
            TokenKind::Op(op) => Some(op),
            _ => None,
        }
    }
}

/// Split `line` into tokens.
///
/// Unterminated quotes run to the end of the line.
#[must_use]
pub fn tokenize(line: &str) -> Vec<CliToken> {
    let mut tokens = Vec::new();
    let mut chars = line.char_indices().peekable();

    while let Some(&(start, ch)) = chars.peek() {
        if ch.is_whitespace() {
            let mut end = start;
            while let Some(&(idx, c)) = chars.peek() {
                if !c.is_whitespace() {
                    break;
                }
                end = idx + c.len_utf8();
                chars.next();
            }
            tokens.push(CliToken {
                kind: TokenKind::Blank,
                raw: line[start..end].to_owned(),
                value: line[start..end].to_owned(),
            });
            continue;
        }

        if let Some(op) = operator_at(&line[start..]) {
            for _ in 0..op.as_str().len() {
                chars.next();
            }
            tokens.push(CliToken {
                kind: TokenKind::Op(op),
                raw: op.as_str().to_owned(),
                value: op.as_str().to_owned(),
            });
            continue;
        }

        let mut value = String::new();
        let mut end = start;
        let mut quote: Option<char> = None;
        while let Some(&(idx, c)) = chars.peek() {
            if quote.is_none() && (c.is_whitespace() || operator_at(&line[idx..]).is_some()) {
                break;
            }
            chars.next();
            end = idx + c.len_utf8();
            match (quote, c) {
                (None, '\'' | '"') => quote = Some(c),
                (Some(q), c) if c == q => quote = None,
                (None | Some('"'), '\\') => {
                    if let Some((next_idx, next)) = chars.next() {
                        end = next_idx + next.len_utf8();
                        value.push(next);
                    }
                }
                (_, c) => value.push(c),
            }
        }
        tokens.push(CliToken {
            kind: TokenKind::Text,
            raw: line[start..end].to_owned(),
            value,
        });
    }

    tokens
}

fn operator_at(rest: &str) -> Option<Operator> {
    if rest.starts_with(">>") {
        Some(Operator::Append)
    } else if rest.starts_with('>') {
        Some(Operator::Redirect)
    } else if rest.starts_with('|') {
        Some(Operator::Pipe)
    } else if rest.starts_with('&') {
        Some(Operator::Background)
    } else {
        None
    }
}

/// First text token of a line.
#[must_use]
pub fn first_text(tokens: &[CliToken]) -> Option<&CliToken> {
    tokens.iter().find(|t| t.is_text())
}

/// Value of the second text token, the argument of a control verb.
#[must_use]
pub fn second_text(tokens: &[CliToken]) -> Option<&str> {
    tokens.iter().filter(|t| t.is_text()).nth(1).map(CliToken::value)
}

/// Concatenate the raw forms of `tokens`.
#[must_use]
pub fn join_raw(tokens: &[CliToken]) -> String {
    tokens.iter().map(CliToken::raw).collect()
}
