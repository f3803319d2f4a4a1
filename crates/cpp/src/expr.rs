//! The `#if` constant-expression evaluator.
//!
//! The controlling expression is collected into a token list first:
//! macros are expanded during collection, `defined NAME` and assertion
//! queries (`#pred(answer)`) are resolved to `1`/`0` on the spot, and the
//! list ends at the newline. A recursive-descent parser then computes the
//! value with C integer semantics on `i64`. Any identifier left after
//! expansion evaluates to zero.

use crate::Reader;
use crate::hashnode::HashNode;
use crate::token::{Token, TokenKind, TokenSummary};

impl Reader {
    /// Evaluate the controlling expression of `#if`/`#elif`, consuming
    /// the rest of the directive line. Errors diagnose and yield zero.
    pub(crate) fn eval_if_expression(&mut self) -> i64 {
        let tokens = self.collect_if_tokens();
        if tokens.is_empty() {
            self.cpp_error("#if with no expression");
            return 0;
        }
        let mut parser = ExprParser {
            tokens,
            pos: 0,
            skip_evaluation: 0,
        };
        let value = parser.parse_conditional(self);
        if parser.pos < parser.tokens.len() {
            self.cpp_error(format!(
                "junk `{}' after expression in #if",
                parser.tokens[parser.pos].text
            ));
        }
        value
    }

    /// Collect the expression tokens, expanding macros and resolving
    /// `defined` and assertion queries as we go.
    fn collect_if_tokens(&mut self) -> Vec<Token> {
        let mut out: Vec<Token> = Vec::new();
        loop {
            let t = self.directive_token(true);
            match t.kind {
                TokenKind::Vspace => break,
                TokenKind::Name if t.text == "defined" => {
                    let value = self.parse_defined();
                    out.push(Token::new(
                        TokenKind::Number,
                        if value { "1" } else { "0" },
                        t.line,
                        t.col,
                    ));
                }
                TokenKind::Punct if t.text == "#" => {
                    let value = self.parse_assertion_query();
                    out.push(Token::new(
                        TokenKind::Number,
                        if value { "1" } else { "0" },
                        t.line,
                        t.col,
                    ));
                }
                _ => out.push(t),
            }
        }
        out
    }

    /// `defined NAME` or `defined (NAME)`; the operand is not expanded.
    fn parse_defined(&mut self) -> bool {
        self.no_macro_expand += 1;
        let t = self.directive_token(false);
        let result = match t.kind {
            TokenKind::Name => self.defined_with_poison_check(&t.text),
            TokenKind::LParen => {
                let n = self.directive_token(false);
                let value = if n.kind == TokenKind::Name {
                    self.defined_with_poison_check(&n.text)
                } else {
                    self.cpp_error("`defined' without an identifier");
                    false
                };
                let rp = self.directive_token(false);
                if rp.kind != TokenKind::RParen {
                    self.cpp_error("missing `)' after `defined'");
                    self.push_back(rp);
                }
                value
            }
            _ => {
                self.cpp_error("`defined' without an identifier");
                self.push_back(t);
                false
            }
        };
        self.no_macro_expand -= 1;
        result
    }

    fn defined_with_poison_check(&mut self, name: &str) -> bool {
        if matches!(self.macros.lookup(name), HashNode::Poisoned) {
            self.cpp_error(format!("attempt to use poisoned `{}'", name));
            return false;
        }
        self.macros.is_defined(name)
    }

    /// `#pred` or `#pred(answer)` inside a conditional expression.
    fn parse_assertion_query(&mut self) -> bool {
        self.no_macro_expand += 1;
        let t = self.directive_token(false);
        let result = if t.kind == TokenKind::Name {
            let pred = t.text;
            let next = self.directive_token(false);
            if next.kind == TokenKind::LParen {
                let mut answer: Vec<TokenSummary> = Vec::new();
                let ok = loop {
                    let a = self.directive_token(false);
                    match a.kind {
                        TokenKind::RParen => break true,
                        TokenKind::Vspace => {
                            self.cpp_error("missing close paren in assertion query");
                            self.push_back(a);
                            break false;
                        }
                        _ => answer.push(TokenSummary::from(&a)),
                    }
                };
                ok && self.assertion_holds(&pred, Some(&answer))
            } else {
                self.push_back(next);
                self.assertion_holds(&pred, None)
            }
        } else {
            self.cpp_error("assertion predicate is not an identifier");
            self.push_back(t);
            false
        };
        self.no_macro_expand -= 1;
        result
    }
}

struct ExprParser {
    tokens: Vec<Token>,
    pos: usize,
    /// Nonzero inside the dead side of `&&`, `||` and `?:`; value
    /// diagnostics are suppressed there.
    skip_evaluation: u32,
}

impl ExprParser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn eat(&mut self, text: &str) -> bool {
        if self.peek().is_some_and(|t| t.text == text) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn parse_conditional(&mut self, r: &mut Reader) -> i64 {
        let cond = self.parse_binary(r, 0);
        if self.eat("?") {
            if cond == 0 {
                self.skip_evaluation += 1;
            }
            let then = self.parse_conditional(r);
            if cond == 0 {
                self.skip_evaluation -= 1;
            }
            if !self.eat(":") {
                r.cpp_error("missing `:' in `?:' expression");
                return 0;
            }
            if cond != 0 {
                self.skip_evaluation += 1;
            }
            let other = self.parse_conditional(r);
            if cond != 0 {
                self.skip_evaluation -= 1;
            }
            if cond != 0 { then } else { other }
        } else {
            cond
        }
    }

    /// Precedence-climbing over the binary operators of C, loosest first.
    fn parse_binary(&mut self, r: &mut Reader, min_prec: u8) -> i64 {
        let mut lhs = self.parse_unary(r);
        loop {
            let Some(op) = self.peek().map(|t| t.text.clone()) else {
                return lhs;
            };
            let Some(prec) = binary_precedence(&op) else {
                return lhs;
            };
            if prec < min_prec {
                return lhs;
            }
            self.pos += 1;

            // The dead side of a short-circuit operator is parsed but not
            // diagnosed.
            let dead = (op == "&&" && lhs == 0) || (op == "||" && lhs != 0);
            if dead {
                self.skip_evaluation += 1;
            }
            let rhs = self.parse_binary(r, prec + 1);
            if dead {
                self.skip_evaluation -= 1;
            }
            let live = self.skip_evaluation == 0;
            lhs = apply_binary(r, &op, lhs, rhs, live);
        }
    }

    fn parse_unary(&mut self, r: &mut Reader) -> i64 {
        let Some(t) = self.next() else {
            r.cpp_error("expression expected in #if");
            return 0;
        };
        match t.kind {
            TokenKind::Punct if t.text == "-" => -self.parse_unary(r),
            TokenKind::Punct if t.text == "+" => self.parse_unary(r),
            TokenKind::Punct if t.text == "!" => (self.parse_unary(r) == 0) as i64,
            TokenKind::Punct if t.text == "~" => !self.parse_unary(r),
            TokenKind::LParen => {
                let v = self.parse_conditional(r);
                if !self.eat(")") && self.peek().is_none() {
                    r.cpp_error("missing `)' in #if expression");
                }
                v
            }
            TokenKind::Number => parse_integer(r, &t.text),
            TokenKind::CharLit => parse_char_constant(r, &t.text),
            TokenKind::Name => {
                if r.options.warn_undef && self.skip_evaluation == 0 {
                    r.cpp_warning(format!("`{}' is not defined", t.text));
                }
                0
            }
            TokenKind::StringLit => {
                r.cpp_error("string constants are not allowed in #if expressions");
                0
            }
            _ => {
                r.cpp_error(format!("`{}' is not valid in #if expressions", t.text));
                0
            }
        }
    }
}

fn binary_precedence(op: &str) -> Option<u8> {
    Some(match op {
        "||" => 1,
        "&&" => 2,
        "|" => 3,
        "^" => 4,
        "&" => 5,
        "==" | "!=" => 6,
        "<" | ">" | "<=" | ">=" => 7,
        "<<" | ">>" => 8,
        "+" | "-" => 9,
        "*" | "/" | "%" => 10,
        _ => return None,
    })
}

fn apply_binary(r: &mut Reader, op: &str, a: i64, b: i64, live: bool) -> i64 {
    match op {
        "||" => ((a != 0) || (b != 0)) as i64,
        "&&" => ((a != 0) && (b != 0)) as i64,
        "|" => a | b,
        "^" => a ^ b,
        "&" => a & b,
        "==" => (a == b) as i64,
        "!=" => (a != b) as i64,
        "<" => (a < b) as i64,
        ">" => (a > b) as i64,
        "<=" => (a <= b) as i64,
        ">=" => (a >= b) as i64,
        "<<" => {
            if (0..64).contains(&b) {
                a.wrapping_shl(b as u32)
            } else {
                0
            }
        }
        ">>" => {
            if (0..64).contains(&b) {
                a.wrapping_shr(b as u32)
            } else if a < 0 {
                -1
            } else {
                0
            }
        }
        "+" => a.wrapping_add(b),
        "-" => a.wrapping_sub(b),
        "*" => a.wrapping_mul(b),
        "/" => {
            if b == 0 {
                if live {
                    r.cpp_error("division by zero in #if");
                }
                0
            } else {
                a.wrapping_div(b)
            }
        }
        "%" => {
            if b == 0 {
                if live {
                    r.cpp_error("division by zero in #if");
                }
                0
            } else {
                a.wrapping_rem(b)
            }
        }
        _ => 0,
    }
}

/// C integer constant: decimal, octal (leading 0) or hex (0x), with
/// any u/U/l/L suffixes ignored.
fn parse_integer(r: &mut Reader, text: &str) -> i64 {
    let trimmed = text.trim_end_matches(|c| matches!(c, 'u' | 'U' | 'l' | 'L'));
    let (digits, radix) = if let Some(hex) = trimmed.strip_prefix("0x").or_else(|| {
        trimmed.strip_prefix("0X")
    }) {
        (hex, 16)
    } else if trimmed.len() > 1 && trimmed.starts_with('0') {
        (&trimmed[1..], 8)
    } else {
        (trimmed, 10)
    };
    match i64::from_str_radix(digits, radix) {
        Ok(v) => v,
        Err(_) => {
            r.cpp_error(format!("invalid integer constant `{}' in #if", text));
            0
        }
    }
}

/// The value of a character constant, with the usual escapes.
fn parse_char_constant(r: &mut Reader, text: &str) -> i64 {
    let inner = text
        .trim_start_matches('L')
        .trim_start_matches('\'')
        .trim_end_matches('\'');
    let bytes = inner.as_bytes();
    if bytes.is_empty() {
        r.cpp_error("empty character constant");
        return 0;
    }
    if bytes[0] != b'\\' {
        return bytes[0] as i64;
    }
    match bytes.get(1) {
        Some(b'n') => b'\n' as i64,
        Some(b't') => b'\t' as i64,
        Some(b'r') => b'\r' as i64,
        Some(b'0'..=b'7') => {
            let mut v: i64 = 0;
            for &c in &bytes[1..] {
                if c.is_ascii_digit() && c < b'8' {
                    v = v * 8 + (c - b'0') as i64;
                } else {
                    break;
                }
            }
            v
        }
        Some(b'x') => {
            let mut v: i64 = 0;
            for &c in &bytes[2..] {
                if let Some(d) = (c as char).to_digit(16) {
                    v = v * 16 + d as i64;
                } else {
                    break;
                }
            }
            v
        }
        Some(b'\\') => b'\\' as i64,
        Some(b'\'') => b'\'' as i64,
        Some(b'"') => b'"' as i64,
        Some(b'a') => 7,
        Some(b'b') => 8,
        Some(b'f') => 12,
        Some(b'v') => 11,
        _ => {
            r.cpp_error(format!("unknown escape in character constant {}", text));
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::{CppOptions, Reader};

    fn if_result(source: &str) -> Vec<String> {
        let mut r = Reader::new(CppOptions::default());
        r.push_source("t.c", source);
        r.token_spellings()
    }

    #[test]
    fn test_arithmetic() {
        assert_eq!(if_result("#if 1 + 2 * 3 == 7\nyes\n#endif\n"), vec!["yes"]);
    }

    #[test]
    fn test_precedence_and_parens() {
        assert_eq!(if_result("#if (1 + 2) * 3 == 9\nyes\n#endif\n"), vec!["yes"]);
    }

    #[test]
    fn test_defined_operator() {
        let src = "#define X 0\n#if defined(X) && defined X\nyes\n#endif\n";
        assert_eq!(if_result(src), vec!["yes"]);
    }

    #[test]
    fn test_defined_sees_value_zero_macro() {
        // X expands to 0 but is defined.
        let src = "#define X 0\n#if X\nno\n#else\nyes\n#endif\n";
        assert_eq!(if_result(src), vec!["yes"]);
    }

    #[test]
    fn test_undefined_name_is_zero() {
        assert_eq!(if_result("#if NOPE\nno\n#else\nyes\n#endif\n"), vec!["yes"]);
    }

    #[test]
    fn test_ternary() {
        assert_eq!(if_result("#if 0 ? 1 : 2\nyes\n#endif\n"), vec!["yes"]);
    }

    #[test]
    fn test_hex_and_octal() {
        assert_eq!(if_result("#if 0x10 == 16 && 010 == 8\nyes\n#endif\n"), vec!["yes"]);
    }

    #[test]
    fn test_char_constant() {
        assert_eq!(if_result("#if 'A' == 65\nyes\n#endif\n"), vec!["yes"]);
    }

    #[test]
    fn test_macro_expansion_in_condition() {
        let src = "#define N 4\n#if N * N == 16\nyes\n#endif\n";
        assert_eq!(if_result(src), vec!["yes"]);
    }

    #[test]
    fn test_division_by_zero_diagnosed() {
        let mut r = Reader::new(CppOptions::default());
        r.push_source("t.c", "#if 1 / 0\nx\n#endif\n");
        r.token_spellings();
        assert!(r.sink.error_count() > 0);
    }

    #[test]
    fn test_dead_side_not_diagnosed() {
        // The right side of a short-circuit never evaluates, so its
        // division by zero must not be reported.
        let mut r = Reader::new(CppOptions::default());
        r.push_source("t.c", "#if defined(X) && 1 / X\nx\n#endif\nok\n");
        assert_eq!(r.token_spellings(), vec!["ok"]);
        assert_eq!(r.sink.error_count(), 0);
    }

    #[test]
    fn test_assertion_query() {
        let mut r = Reader::new(CppOptions::default());
        r.push_source("t.c", "#assert machine(ia32)\n#if #machine(ia32)\nyes\n#endif\n");
        assert_eq!(r.token_spellings(), vec!["yes"]);
        assert_eq!(r.sink.error_count(), 0);
    }

    #[test]
    fn test_assertion_any_answer() {
        let mut r = Reader::new(CppOptions::default());
        r.push_source(
            "t.c",
            "#assert machine(ia32)\n#if #machine\nyes\n#endif\n#unassert machine\n#if #machine\nno\n#endif\n",
        );
        assert_eq!(r.token_spellings(), vec!["yes"]);
    }

    #[test]
    fn test_shift_operators() {
        assert_eq!(if_result("#if (1 << 4) == 16\nyes\n#endif\n"), vec!["yes"]);
    }
}
