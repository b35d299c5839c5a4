//! Lossless SQL lexer.
//!
//! Splits text into tokens whose concatenation is exactly the input. Quotes
//! and comments are recognized so that checks and case rewriting never look
//! inside string literals.

/// Token categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Word,
    Number,
    /// `'...'`; `terminated` is false when the input ends inside it.
    SingleQuoted { terminated: bool },
    /// `"..."`
    DoubleQuoted { terminated: bool },
    /// `` `...` ``
    Backtick { terminated: bool },
    LineComment,
    BlockComment { terminated: bool },
    Whitespace,
    Punct,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token<'a> {
    pub kind: TokenKind,
    pub text: &'a str,
    /// Byte offset in the source.
    pub start: usize,
}

impl<'a> Token<'a> {
    /// Whether the token carries meaning (not whitespace or a comment).
    pub fn is_significant(&self) -> bool {
        !matches!(
            self.kind,
            TokenKind::Whitespace | TokenKind::LineComment | TokenKind::BlockComment { .. }
        )
    }

    pub fn is_word(&self, upper: &str) -> bool {
        self.kind == TokenKind::Word && self.text.eq_ignore_ascii_case(upper)
    }

    pub fn is_punct(&self, p: &str) -> bool {
        self.kind == TokenKind::Punct && self.text == p
    }

    pub fn is_literal(&self) -> bool {
        matches!(
            self.kind,
            TokenKind::Number | TokenKind::SingleQuoted { .. }
        )
    }
}

/// Tokenize SQL text.
pub fn tokenize(text: &str) -> Vec<Token<'_>> {
    let bytes: Vec<(usize, char)> = text.char_indices().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    let end_of = |idx: usize| -> usize {
        bytes.get(idx).map(|(pos, _)| *pos).unwrap_or(text.len())
    };

    while i < bytes.len() {
        let (start, c) = bytes[i];
        let next = bytes.get(i + 1).map(|(_, c)| *c);

        let (kind, consumed) = if c.is_whitespace() {
            let n = bytes[i..].iter().take_while(|(_, c)| c.is_whitespace()).count();
            (TokenKind::Whitespace, n)
        } else if c == '-' && next == Some('-') {
            let n = bytes[i..].iter().take_while(|(_, c)| *c != '\n').count();
            (TokenKind::LineComment, n)
        } else if c == '/' && next == Some('*') {
            let mut j = i + 2;
            let mut terminated = false;
            while j < bytes.len() {
                if bytes[j].1 == '*' && bytes.get(j + 1).map(|(_, c)| *c) == Some('/') {
                    j += 2;
                    terminated = true;
                    break;
                }
                j += 1;
            }
            (TokenKind::BlockComment { terminated }, j - i)
        } else if c == '\'' || c == '"' || c == '`' {
            let (n, terminated) = scan_quoted(&bytes[i..], c);
            let kind = match c {
                '\'' => TokenKind::SingleQuoted { terminated },
                '"' => TokenKind::DoubleQuoted { terminated },
                _ => TokenKind::Backtick { terminated },
            };
            (kind, n)
        } else if c.is_alphabetic() || c == '_' {
            let n = bytes[i..]
                .iter()
                .take_while(|(_, c)| c.is_alphanumeric() || *c == '_' || *c == '$')
                .count();
            (TokenKind::Word, n)
        } else if c.is_ascii_digit() {
            let n = bytes[i..]
                .iter()
                .take_while(|(_, c)| c.is_alphanumeric() || *c == '.' || *c == '_')
                .count();
            (TokenKind::Number, n)
        } else {
            (TokenKind::Punct, 1)
        };

        tokens.push(Token {
            kind,
            text: &text[start..end_of(i + consumed)],
            start,
        });
        i += consumed;
    }

    tokens
}

/// Scan a quoted run starting at `chars[0]`; returns (chars consumed, terminated).
///
/// A backslash escapes the next character and a doubled quote is a literal
/// quote. Backticks only honor doubling.
fn scan_quoted(chars: &[(usize, char)], quote: char) -> (usize, bool) {
    let mut j = 1;
    while j < chars.len() {
        let c = chars[j].1;
        if c == '\\' && quote != '`' {
            j += 2;
            continue;
        }
        if c == quote {
            if chars.get(j + 1).map(|(_, c)| *c) == Some(quote) {
                j += 2;
                continue;
            }
            return (j + 1, true);
        }
        j += 1;
    }
    (chars.len(), false)
}

/// Copy of `text` with string literals and comments blanked out.
///
/// Quote characters are kept so token boundaries survive; everything
/// between them becomes spaces.
pub fn mask_literals(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for token in tokenize(text) {
        match token.kind {
            TokenKind::SingleQuoted { .. } | TokenKind::DoubleQuoted { .. } => {
                let mut chars = token.text.chars();
                if let Some(q) = chars.next() {
                    out.push(q);
                }
                out.extend(chars.map(|_| ' '));
            }
            TokenKind::LineComment | TokenKind::BlockComment { .. } => {
                out.extend(token.text.chars().map(|c| if c == '\n' { '\n' } else { ' ' }));
            }
            _ => out.push_str(token.text),
        }
    }
    out
}
