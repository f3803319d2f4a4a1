//! Preprocessing tokens.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /// End of all input.
    Eof,
    /// An input buffer just popped off the stack.
    Pop,
    /// Newline.
    Vspace,
    /// Horizontal whitespace run.
    Hspace,
    /// A comment (replaced by one space on output).
    Comment,
    Name,
    Number,
    CharLit,
    StringLit,
    /// `<...>` filename, produced only while parsing an include directive.
    HeaderName,
    LParen,
    RParen,
    Comma,
    /// `...`
    Ellipsis,
    /// Any other punctuator, including `#` and `##`.
    Punct,
}

/// One preprocessing token. `ws_before` records whether whitespace
/// separated it from the previous token, which matters for function-like
/// macro detection and for faithful output. `no_expand` is the
/// rescan-safety mark: the name came out of its own expansion and must not
/// be expanded again.
#[derive(Debug, Clone)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    pub line: u32,
    pub col: u32,
    pub ws_before: bool,
    pub no_expand: bool,
}

impl Token {
    pub fn new(kind: TokenKind, text: impl Into<String>, line: u32, col: u32) -> Token {
        Token {
            kind,
            text: text.into(),
            line,
            col,
            ws_before: false,
            no_expand: false,
        }
    }

    pub fn is(&self, text: &str) -> bool {
        self.text == text
    }

    pub fn is_whitespace(&self) -> bool {
        matches!(
            self.kind,
            TokenKind::Hspace | TokenKind::Vspace | TokenKind::Comment
        )
    }

    /// End of the current directive line.
    pub fn ends_directive(&self) -> bool {
        matches!(self.kind, TokenKind::Vspace | TokenKind::Eof)
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            TokenKind::Vspace => writeln!(f),
            TokenKind::Hspace | TokenKind::Comment => write!(f, " "),
            _ => write!(f, "{}", self.text),
        }
    }
}

/// Token identity for list comparisons (assertion answers, redefinition
/// checks): kind plus spelling, ignoring position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenSummary {
    pub kind: TokenKind,
    pub text: String,
}

impl From<&Token> for TokenSummary {
    fn from(t: &Token) -> TokenSummary {
        TokenSummary {
            kind: t.kind,
            text: t.text.clone(),
        }
    }
}

/// Compare two token lists for equivalence, ignoring whitespace tokens.
pub fn equiv_token_lists(a: &[TokenSummary], b: &[TokenSummary]) -> bool {
    let mut ai = a.iter().filter(|t| {
        !matches!(t.kind, TokenKind::Hspace | TokenKind::Vspace | TokenKind::Comment)
    });
    let mut bi = b.iter().filter(|t| {
        !matches!(t.kind, TokenKind::Hspace | TokenKind::Vspace | TokenKind::Comment)
    });
    loop {
        match (ai.next(), bi.next()) {
            (None, None) => return true,
            (Some(x), Some(y)) if x == y => {}
            _ => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equiv_ignores_whitespace() {
        let a = vec![
            TokenSummary { kind: TokenKind::Name, text: "x".into() },
            TokenSummary { kind: TokenKind::Hspace, text: " ".into() },
            TokenSummary { kind: TokenKind::Punct, text: "+".into() },
        ];
        let b = vec![
            TokenSummary { kind: TokenKind::Name, text: "x".into() },
            TokenSummary { kind: TokenKind::Punct, text: "+".into() },
        ];
        assert!(equiv_token_lists(&a, &b));
    }

    #[test]
    fn test_equiv_distinguishes_spelling() {
        let a = vec![TokenSummary { kind: TokenKind::Number, text: "1".into() }];
        let b = vec![TokenSummary { kind: TokenKind::Number, text: "2".into() }];
        assert!(!equiv_token_lists(&a, &b));
    }
}
