//! The tokenizer.
//!
//! `lex_token` pulls one preprocessing token from the top of the buffer
//! stack. Backslash-newline splices are transparent. In buffers flagged
//! `has_escapes` (macro expansions and pre-expanded text) the two-byte
//! sequences `\r-` and `\r ` are interpreted as the no-reexpand mark and
//! the token separator respectively; they never appear in file buffers.

use crate::Reader;
use crate::token::{Token, TokenKind};

pub(crate) fn is_idstart(c: u8, dollars: bool) -> bool {
    c.is_ascii_alphabetic() || c == b'_' || (dollars && c == b'$')
}

pub(crate) fn is_idchar(c: u8, dollars: bool) -> bool {
    c.is_ascii_alphanumeric() || c == b'_' || (dollars && c == b'$')
}

pub(crate) fn is_hspace(c: u8) -> bool {
    c == b' ' || c == b'\t' || c == 0x0b || c == 0x0c
}

/// Multi-byte punctuators, longest first for maximal munch.
const PUNCTUATORS: &[&str] = &[
    "<<=", ">>=", "...", "##", "<<", ">>", "<=", ">=", "==", "!=", "&&", "||", "+=", "-=",
    "*=", "/=", "%=", "&=", "|=", "^=", "->", "++", "--",
];

impl Reader {
    fn bpeek(&self, off: usize) -> Option<u8> {
        self.buffers.last().and_then(|b| b.peek_at(off))
    }

    /// Consume one byte, maintaining the line counters.
    fn bump(&mut self) -> Option<u8> {
        let b = self.buffers.last_mut()?;
        let c = b.peek()?;
        b.pos += 1;
        if c == b'\n' {
            b.line += 1;
            b.line_start = b.pos;
        }
        Some(c)
    }

    /// Fold away backslash-newline before the cursor position.
    fn skip_splices(&mut self) {
        loop {
            let escapes = self.buffers.last().map(|b| b.has_escapes).unwrap_or(false);
            if escapes {
                return;
            }
            if self.bpeek(0) == Some(b'\\') && self.bpeek(1) == Some(b'\n') {
                self.bump();
                self.bump();
            } else if self.bpeek(0) == Some(b'\\')
                && self.bpeek(1) == Some(b'\r')
                && self.bpeek(2) == Some(b'\n')
            {
                self.bump();
                self.bump();
                self.bump();
            } else {
                return;
            }
        }
    }

    /// One token from the buffer stack; Pop when a buffer ends, Eof when
    /// the stack is empty.
    pub(crate) fn lex_token(&mut self) -> Token {
        loop {
            if self.buffers.is_empty() {
                return Token::new(TokenKind::Eof, "", 0, 0);
            }
            self.skip_splices();
            let (line, col, has_escapes) = {
                let b = self.buffers.last().unwrap();
                (b.line, b.col(), b.has_escapes)
            };
            let Some(c) = self.bpeek(0) else {
                self.pop_buffer();
                return Token::new(TokenKind::Pop, "", line, col);
            };

            match c {
                b'\n' => {
                    self.bump();
                    return Token::new(TokenKind::Vspace, "\n", line, col);
                }

                b'\r' if has_escapes => {
                    self.bump();
                    match self.bpeek(0) {
                        Some(b'-') => {
                            self.bump();
                            self.next_name_no_expand = true;
                            continue;
                        }
                        Some(b' ') => {
                            self.bump();
                            return Token::new(TokenKind::Hspace, " ", line, col);
                        }
                        _ => {
                            // Stray escape byte; treat as whitespace.
                            return Token::new(TokenKind::Hspace, " ", line, col);
                        }
                    }
                }

                b'\r' => {
                    self.bump();
                    if self.bpeek(0) == Some(b'\n') {
                        self.bump();
                    } else if let Some(b) = self.buffers.last_mut() {
                        b.line += 1;
                        b.line_start = b.pos;
                    }
                    return Token::new(TokenKind::Vspace, "\n", line, col);
                }

                c if is_hspace(c) => {
                    while let Some(c) = self.bpeek(0) {
                        if is_hspace(c) {
                            self.bump();
                            self.skip_splices();
                        } else {
                            break;
                        }
                    }
                    return Token::new(TokenKind::Hspace, " ", line, col);
                }

                b'/' if self.bpeek(1) == Some(b'*') => {
                    self.bump();
                    self.bump();
                    let mut saw_newline = false;
                    loop {
                        match self.bpeek(0) {
                            None => {
                                self.cpp_error("unterminated comment");
                                break;
                            }
                            Some(b'*') if self.bpeek(1) == Some(b'/') => {
                                self.bump();
                                self.bump();
                                break;
                            }
                            Some(b'\n') => {
                                saw_newline = true;
                                self.bump();
                            }
                            _ => {
                                self.bump();
                            }
                        }
                    }
                    if saw_newline && self.only_seen_white == 0 {
                        self.only_seen_white = 1;
                    }
                    return Token::new(TokenKind::Comment, " ", line, col);
                }

                b'/' if self.bpeek(1) == Some(b'/') => {
                    if self.options.traditional {
                        // K&R has no line comments; lex `/` alone.
                        self.bump();
                        return Token::new(TokenKind::Punct, "/", line, col);
                    }
                    if self.options.pedantic && !self.options.c99 {
                        self.cpp_pedwarn("C89 forbids `//' comments");
                    }
                    while let Some(c) = self.bpeek(0) {
                        if c == b'\n' {
                            break;
                        }
                        self.bump();
                        self.skip_splices();
                    }
                    return Token::new(TokenKind::Comment, " ", line, col);
                }

                b'"' => return self.lex_string(b'"', line, col, String::new()),
                b'\'' => return self.lex_string(b'\'', line, col, String::new()),

                b'L' if matches!(self.bpeek(1), Some(b'"') | Some(b'\'')) => {
                    self.bump();
                    let quote = self.bpeek(0).unwrap();
                    return self.lex_string(quote, line, col, "L".to_string());
                }

                b'<' if self.parsing_include => {
                    self.bump();
                    let mut text = String::from("<");
                    loop {
                        match self.bpeek(0) {
                            None | Some(b'\n') => {
                                self.cpp_error("missing terminating `>' in include filename");
                                break;
                            }
                            Some(b'>') => {
                                self.bump();
                                text.push('>');
                                break;
                            }
                            Some(c) => {
                                self.bump();
                                text.push(c as char);
                            }
                        }
                    }
                    return Token::new(TokenKind::HeaderName, text, line, col);
                }

                c if is_idstart(c, self.options.dollars_in_ident) => {
                    let mut text = String::new();
                    while let Some(c) = self.bpeek(0) {
                        if is_idchar(c, self.options.dollars_in_ident) {
                            self.bump();
                            text.push(c as char);
                            self.skip_splices();
                        } else {
                            break;
                        }
                    }
                    let mut t = Token::new(TokenKind::Name, text, line, col);
                    if self.next_name_no_expand {
                        t.no_expand = true;
                        self.next_name_no_expand = false;
                    }
                    return t;
                }

                c if c.is_ascii_digit()
                    || (c == b'.' && self.bpeek(1).is_some_and(|d| d.is_ascii_digit())) =>
                {
                    // A pp-number: digits, idchars, dots, and exponent
                    // signs after e/E/p/P.
                    let mut text = String::new();
                    loop {
                        match self.bpeek(0) {
                            Some(c)
                                if c.is_ascii_alphanumeric() || c == b'_' || c == b'.' =>
                            {
                                self.bump();
                                text.push(c as char);
                                if matches!(c, b'e' | b'E' | b'p' | b'P')
                                    && matches!(self.bpeek(0), Some(b'+') | Some(b'-'))
                                {
                                    let s = self.bump().unwrap();
                                    text.push(s as char);
                                }
                                self.skip_splices();
                            }
                            _ => break,
                        }
                    }
                    return Token::new(TokenKind::Number, text, line, col);
                }

                b'(' => {
                    self.bump();
                    return Token::new(TokenKind::LParen, "(", line, col);
                }
                b')' => {
                    self.bump();
                    return Token::new(TokenKind::RParen, ")", line, col);
                }
                b',' => {
                    self.bump();
                    return Token::new(TokenKind::Comma, ",", line, col);
                }

                _ => {
                    for p in PUNCTUATORS {
                        let bytes = p.as_bytes();
                        if (0..bytes.len()).all(|i| self.bpeek(i) == Some(bytes[i])) {
                            for _ in 0..bytes.len() {
                                self.bump();
                            }
                            let kind = if *p == "..." {
                                TokenKind::Ellipsis
                            } else {
                                TokenKind::Punct
                            };
                            return Token::new(kind, *p, line, col);
                        }
                    }
                    let c = self.bump().unwrap();
                    return Token::new(TokenKind::Punct, (c as char).to_string(), line, col);
                }
            }
        }
    }

    fn lex_string(&mut self, quote: u8, line: u32, col: u32, prefix: String) -> Token {
        let mut text = prefix;
        self.bump();
        text.push(quote as char);
        loop {
            self.skip_splices();
            match self.bpeek(0) {
                None => {
                    self.cpp_error(if quote == b'"' {
                        "unterminated string literal"
                    } else {
                        "unterminated character constant"
                    });
                    break;
                }
                Some(b'\n') => {
                    if !self.options.lang_asm {
                        self.cpp_warning("missing terminating quote on this line");
                    }
                    break;
                }
                Some(b'\\') => {
                    self.bump();
                    text.push('\\');
                    if let Some(c) = self.bump() {
                        text.push(c as char);
                    }
                }
                Some(c) if c == quote => {
                    self.bump();
                    text.push(c as char);
                    break;
                }
                Some(c) => {
                    self.bump();
                    text.push(c as char);
                }
            }
        }
        let kind = if quote == b'"' {
            TokenKind::StringLit
        } else {
            TokenKind::CharLit
        };
        Token::new(kind, text, line, col)
    }

    /// Discard the rest of the directive line after an error.
    pub(crate) fn skip_rest_of_line(&mut self) {
        loop {
            let t = self.base_token();
            match t.kind {
                TokenKind::Vspace | TokenKind::Eof => return,
                TokenKind::Pop if self.popped_file => return,
                _ => {}
            }
        }
    }

    /// Next significant token inside a directive line. Horizontal space
    /// and comments are skipped; the end of the line (or of the file) is
    /// reported as Vspace. With EXPAND set, macros are expanded.
    pub(crate) fn directive_token(&mut self, expand: bool) -> Token {
        loop {
            let t = if expand { self.get_token() } else { self.base_token() };
            match t.kind {
                TokenKind::Hspace | TokenKind::Comment => continue,
                TokenKind::Pop => {
                    if self.popped_file {
                        return Token::new(TokenKind::Vspace, "\n", t.line, t.col);
                    }
                    continue;
                }
                TokenKind::Eof => return Token::new(TokenKind::Vspace, "\n", t.line, t.col),
                _ => return t,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CppOptions;

    fn lex_all(src: &str) -> Vec<(TokenKind, String)> {
        let mut r = Reader::new(CppOptions::default());
        r.push_source("t.c", src);
        let mut out = Vec::new();
        loop {
            let t = r.lex_token();
            match t.kind {
                TokenKind::Eof => break,
                TokenKind::Pop => continue,
                _ => out.push((t.kind, t.text)),
            }
        }
        out
    }

    #[test]
    fn test_identifiers_and_numbers() {
        let toks = lex_all("abc 12 0x1f 1.5e-3\n");
        let names: Vec<_> = toks
            .iter()
            .filter(|(k, _)| !matches!(k, TokenKind::Hspace | TokenKind::Vspace))
            .map(|(_, t)| t.as_str())
            .collect();
        assert_eq!(names, vec!["abc", "12", "0x1f", "1.5e-3"]);
    }

    #[test]
    fn test_line_splice_joins_identifier() {
        let toks = lex_all("ab\\\ncd\n");
        assert_eq!(toks[0], (TokenKind::Name, "abcd".to_string()));
    }

    #[test]
    fn test_block_comment_is_whitespace() {
        let toks = lex_all("a/*x*/b\n");
        assert_eq!(toks[0].1, "a");
        assert_eq!(toks[1].0, TokenKind::Comment);
        assert_eq!(toks[2].1, "b");
    }

    #[test]
    fn test_string_with_escape() {
        let toks = lex_all(r#""a\"b""#);
        assert_eq!(toks[0], (TokenKind::StringLit, r#""a\"b""#.to_string()));
    }

    #[test]
    fn test_multichar_punctuators() {
        let toks = lex_all("<<= ## ... ->\n");
        let puncts: Vec<_> = toks
            .iter()
            .filter(|(k, _)| matches!(k, TokenKind::Punct | TokenKind::Ellipsis))
            .map(|(_, t)| t.as_str())
            .collect();
        assert_eq!(puncts, vec!["<<=", "##", "...", "->"]);
    }

    #[test]
    fn test_pp_number_glues_exponent() {
        let toks = lex_all("1e+5\n");
        assert_eq!(toks[0], (TokenKind::Number, "1e+5".to_string()));
    }

    #[test]
    fn test_wide_string() {
        let toks = lex_all("L\"wide\"\n");
        assert_eq!(toks[0], (TokenKind::StringLit, "L\"wide\"".to_string()));
    }
}
