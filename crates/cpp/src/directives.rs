//! Directive dispatch and handlers.
//!
//! The dispatch table records each directive's origin: K&R directives,
//! conditional (K&R) directives that must still be examined while a failed
//! `#if` group is being skipped, C89 directives, and extensions (which
//! draw a pedantic warning). Handlers consume their whole line, including
//! the terminating newline; on a syntax error they diagnose, skip the rest
//! of the line, and let processing continue.

use crate::IfFrame;
use crate::Reader;
use crate::hashnode::HashNode;
use crate::macroexp::{compare_defs, tokens_to_text};
use crate::token::{Token, TokenKind, TokenSummary, equiv_token_lists};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Origin {
    KandR,
    /// Conditional directives, tracked even while skipping.
    Cond,
    Stdc89,
    Extension,
}

pub(crate) struct DirectiveEntry {
    pub name: &'static str,
    pub origin: Origin,
    /// `<...>` is a single filename token in this directive.
    pub include_syntax: bool,
}

// Ordered roughly by frequency of occurrence in real source.
pub(crate) const T_DEFINE: usize = 0;
pub(crate) const T_INCLUDE: usize = 1;
pub(crate) const T_ENDIF: usize = 2;
pub(crate) const T_IFDEF: usize = 3;
pub(crate) const T_IF: usize = 4;
pub(crate) const T_ELSE: usize = 5;
pub(crate) const T_IFNDEF: usize = 6;
pub(crate) const T_UNDEF: usize = 7;
pub(crate) const T_LINE: usize = 8;
pub(crate) const T_ELIF: usize = 9;
pub(crate) const T_ERROR: usize = 10;
pub(crate) const T_PRAGMA: usize = 11;
pub(crate) const T_WARNING: usize = 12;
pub(crate) const T_INCLUDE_NEXT: usize = 13;
pub(crate) const T_IDENT: usize = 14;
pub(crate) const T_ASSERT: usize = 15;
pub(crate) const T_UNASSERT: usize = 16;

pub(crate) static DIRECTIVES: &[DirectiveEntry] = &[
    DirectiveEntry { name: "define", origin: Origin::KandR, include_syntax: false },
    DirectiveEntry { name: "include", origin: Origin::KandR, include_syntax: true },
    DirectiveEntry { name: "endif", origin: Origin::Cond, include_syntax: false },
    DirectiveEntry { name: "ifdef", origin: Origin::Cond, include_syntax: false },
    DirectiveEntry { name: "if", origin: Origin::Cond, include_syntax: false },
    DirectiveEntry { name: "else", origin: Origin::Cond, include_syntax: false },
    DirectiveEntry { name: "ifndef", origin: Origin::Cond, include_syntax: false },
    DirectiveEntry { name: "undef", origin: Origin::KandR, include_syntax: false },
    DirectiveEntry { name: "line", origin: Origin::KandR, include_syntax: false },
    DirectiveEntry { name: "elif", origin: Origin::Cond, include_syntax: false },
    DirectiveEntry { name: "error", origin: Origin::Stdc89, include_syntax: false },
    DirectiveEntry { name: "pragma", origin: Origin::Stdc89, include_syntax: false },
    DirectiveEntry { name: "warning", origin: Origin::Extension, include_syntax: false },
    DirectiveEntry { name: "include_next", origin: Origin::Extension, include_syntax: true },
    DirectiveEntry { name: "ident", origin: Origin::Extension, include_syntax: false },
    DirectiveEntry { name: "assert", origin: Origin::Extension, include_syntax: false },
    DirectiveEntry { name: "unassert", origin: Origin::Extension, include_syntax: false },
];

pub(crate) fn directive_index(name: &str) -> Option<usize> {
    DIRECTIVES.iter().position(|d| d.name == name)
}

/// Assertion predicates share the identifier namespace with macros; the
/// `#` prefix keeps them apart.
fn assertion_key(pred: &str) -> String {
    format!("#{}", pred)
}

impl Reader {
    /// A `#` was seen at the start of a line. Returns true when a
    /// directive was recognized and executed; false means the `#` was
    /// ordinary content and should be emitted.
    pub(crate) fn handle_directive(&mut self) -> bool {
        self.in_directive = true;
        self.directive_start_white = self.only_seen_white;
        let handled = self.handle_directive_1();
        self.in_directive = false;
        handled
    }

    fn handle_directive_1(&mut self) -> bool {
        self.no_macro_expand += 1;
        let t = self.directive_token(false);
        self.no_macro_expand -= 1;

        match t.kind {
            // `# 123` is equivalent to `#line 123`, except in assembler
            // input where it is probably a comment and passes through.
            TokenKind::Number => {
                if self.options.lang_asm {
                    self.push_back(t);
                    return false;
                }
                self.cpp_pedwarn("# followed by integer");
                self.do_line(Some(t));
                true
            }
            // A line of just `#` becomes blank.
            TokenKind::Vspace => true,
            TokenKind::Name => match directive_index(&t.text) {
                Some(i) => {
                    if DIRECTIVES[i].origin == Origin::Extension {
                        self.cpp_pedwarn(format!("ISO C does not allow #{}", t.text));
                    }
                    self.run_directive(i);
                    true
                }
                None => {
                    if self.options.lang_asm {
                        // Could be an assembler pseudo-op; pass through.
                        self.push_back(t);
                        return false;
                    }
                    self.cpp_error(format!("invalid preprocessing directive #{}", t.text));
                    self.skip_rest_of_line();
                    true
                }
            },
            _ => {
                self.push_back(t);
                false
            }
        }
    }

    /// Execute directive I; some handlers (the conditionals) return the
    /// index of a directive that must run immediately after.
    fn run_directive(&mut self, mut i: usize) {
        loop {
            tracing::trace!(target: "mill::cpp", directive = DIRECTIVES[i].name);
            let next = match i {
                T_DEFINE => self.do_define(),
                T_INCLUDE => self.do_include(false),
                T_ENDIF => self.do_endif(),
                T_IFDEF => self.do_ifdef(),
                T_IF => self.do_if(),
                T_ELSE => self.do_else(),
                T_IFNDEF => self.do_ifndef(),
                T_UNDEF => self.do_undef(),
                T_LINE => self.do_line(None),
                T_ELIF => self.do_elif(),
                T_ERROR => self.do_error(),
                T_PRAGMA => self.do_pragma(),
                T_WARNING => self.do_warning(),
                T_INCLUDE_NEXT => self.do_include(true),
                T_IDENT => self.do_ident(),
                T_ASSERT => self.do_assert(),
                T_UNASSERT => self.do_unassert(),
                _ => None,
            };
            match next {
                Some(j) => i = j,
                None => break,
            }
        }
    }

    /// Collect the significant tokens of the rest of the directive line,
    /// with whitespace recorded on the following token.
    pub(crate) fn collect_directive_line(&mut self) -> Vec<Token> {
        let mut out: Vec<Token> = Vec::new();
        let mut pending_ws = false;
        loop {
            let t = self.base_token();
            match t.kind {
                TokenKind::Vspace | TokenKind::Eof => break,
                TokenKind::Pop => {
                    if self.popped_file || self.popped_synthetic {
                        break;
                    }
                }
                TokenKind::Hspace | TokenKind::Comment => pending_ws = true,
                _ => {
                    let mut t = t;
                    t.ws_before = pending_ws && !out.is_empty();
                    pending_ws = false;
                    out.push(t);
                }
            }
        }
        out
    }

    // ----- #define / #undef ----------------------------------------------

    fn do_define(&mut self) -> Option<usize> {
        let loc = self.current_location();
        self.no_macro_expand += 1;
        let list = self.collect_directive_line();
        self.no_macro_expand -= 1;

        let Some(first) = list.first() else {
            self.cpp_error("#define must be followed by an identifier");
            return None;
        };
        if first.kind != TokenKind::Name {
            self.cpp_error("#define must be followed by an identifier");
            return None;
        }
        let name = first.text.clone();
        if name == "defined" {
            self.cpp_error("\"defined\" is not a legal macro name");
            return None;
        }
        if matches!(self.macros.lookup(&name), HashNode::Poisoned) {
            self.cpp_error(format!("redefining poisoned `{}'", name));
            return None;
        }

        // Function-like iff the paren hugs the name.
        let funlike = list
            .get(1)
            .is_some_and(|t| t.kind == TokenKind::LParen && !t.ws_before);

        let defn = if funlike {
            let (argv, start) = self.collect_params(&list, 1)?;
            self.collect_expansion(&list, Some(&argv), start, loc)
        } else {
            self.collect_expansion(&list, None, 1, loc)
        };

        match self.macros.lookup(&name).clone() {
            HashNode::Macro(old) | HashNode::Disabled(old) => {
                if !compare_defs(self.options.pedantic, &old, &defn) {
                    let message = format!("\"{}\" redefined", name);
                    let loc = self.current_location();
                    match &old.loc {
                        Some(prev) => self.sink.error_with_note(
                            loc,
                            message,
                            "this is the location of the previous definition",
                            prev.clone(),
                        ),
                        None => self.cpp_error(message),
                    }
                }
            }
            HashNode::Builtin(_) | HashNode::Const(_) => {
                self.cpp_warning(format!("redefining builtin macro \"{}\"", name));
            }
            _ => {}
        }

        self.macros.insert(&name, HashNode::Macro(defn));
        None
    }

    fn do_undef(&mut self) -> Option<usize> {
        self.no_macro_expand += 1;
        let t = self.directive_token(false);
        self.no_macro_expand -= 1;

        if t.kind != TokenKind::Name {
            self.cpp_error("token after #undef is not an identifier");
            self.skip_rest_of_line();
            return None;
        }

        let junk = self.directive_token(false);
        if junk.kind != TokenKind::Vspace {
            self.cpp_pedwarn("junk on line after #undef");
            self.skip_rest_of_line();
        }

        match self.macros.lookup(&t.text) {
            HashNode::Void | HashNode::Assertion(_) => {}
            HashNode::Poisoned => {
                self.cpp_error(format!("cannot undefine poisoned \"{}\"", t.text));
                return None;
            }
            HashNode::Builtin(_) | HashNode::Const(_) => {
                self.cpp_warning(format!("undefining `{}'", t.text));
                self.macros.remove(&t.text);
            }
            HashNode::Macro(_) | HashNode::Disabled(_) => self.macros.remove(&t.text),
        }
        None
    }

    // ----- #error / #warning / #ident -------------------------------------

    fn do_error(&mut self) -> Option<usize> {
        let list = self.collect_directive_line();
        let text = String::from_utf8_lossy(&tokens_to_text(&list)).into_owned();
        self.cpp_error(format!("#error {}", text));
        None
    }

    fn do_warning(&mut self) -> Option<usize> {
        let list = self.collect_directive_line();
        let text = String::from_utf8_lossy(&tokens_to_text(&list)).into_owned();
        self.cpp_warning(format!("#warning {}", text));
        None
    }

    fn do_ident(&mut self) -> Option<usize> {
        let list = self.collect_directive_line();
        if list.len() == 1 && list[0].kind == TokenKind::StringLit {
            self.emit_passthrough("ident", list);
        } else {
            self.cpp_error("invalid #ident");
        }
        None
    }

    /// Re-emit `#NAME tokens...` into the output stream, marked so the
    /// tokens are neither reinterpreted as a directive nor expanded.
    fn emit_passthrough(&mut self, name: &str, tokens: Vec<Token>) {
        self.push_back(Token::new(TokenKind::Vspace, "\n", 0, 0));
        for t in tokens.into_iter().rev() {
            let mut t = t;
            t.no_expand = true;
            let ws = t.ws_before;
            self.push_back(t);
            if ws {
                self.push_back(Token::new(TokenKind::Hspace, " ", 0, 0));
            }
        }
        self.push_back(Token::new(TokenKind::Hspace, " ", 0, 0));
        let mut n = Token::new(TokenKind::Name, name, 0, 0);
        n.no_expand = true;
        self.push_back(n);
        let mut hash = Token::new(TokenKind::Punct, "#", 0, 0);
        hash.no_expand = true;
        self.push_back(hash);
    }

    // ----- #line -----------------------------------------------------------

    /// `#line N ["file" [flag...]]`. FIRST carries the already-read number
    /// for the `# N` shorthand.
    fn do_line(&mut self, first: Option<Token>) -> Option<usize> {
        let t = match first {
            Some(t) => t,
            None => self.directive_token(true),
        };
        if t.kind != TokenKind::Number {
            self.cpp_error("token after `#line' is not an integer");
            self.skip_rest_of_line();
            return None;
        }
        let Ok(new_lineno) = t.text.parse::<u32>() else {
            self.cpp_error("token after `#line' is not an integer");
            self.skip_rest_of_line();
            return None;
        };
        if self.options.pedantic && (new_lineno == 0 || new_lineno > 32767) {
            self.cpp_pedwarn("line number out of range in `#line' command");
        }

        let t = self.directive_token(true);
        let mut new_name: Option<String> = None;
        match t.kind {
            TokenKind::StringLit => {
                new_name = Some(t.text.trim_matches('"').to_string());
                // Optional flags 1-4: advisory include-stack hints plus
                // the system-header mark.
                loop {
                    let f = self.directive_token(false);
                    match f.kind {
                        TokenKind::Vspace => break,
                        TokenKind::Number if matches!(f.text.as_str(), "1" | "2" | "3" | "4") => {
                            if self.options.pedantic {
                                self.cpp_pedwarn("garbage at end of `#line' command");
                            }
                            if matches!(f.text.as_str(), "3" | "4")
                                && let Some(b) = self.file_buffer_mut()
                                && let crate::buffer::BufferKind::File { system_header, .. } =
                                    &mut b.kind
                            {
                                *system_header = true;
                            }
                        }
                        _ => {
                            self.cpp_error("invalid format `#line' command");
                            self.skip_rest_of_line();
                            break;
                        }
                    }
                }
            }
            TokenKind::Vspace => {}
            _ => {
                self.cpp_error(format!(
                    "token after `#line {}' is not a string",
                    new_lineno
                ));
                self.skip_rest_of_line();
                return None;
            }
        }

        if let Some(b) = self.file_buffer_mut() {
            b.line = new_lineno;
            if let Some(name) = new_name
                && let crate::buffer::BufferKind::File { nominal_name, .. } = &mut b.kind
            {
                *nominal_name = name;
            }
        }
        None
    }

    pub(crate) fn file_buffer_mut(&mut self) -> Option<&mut crate::buffer::Buffer> {
        self.buffers.iter_mut().rev().find(|b| b.is_file())
    }

    // ----- #include --------------------------------------------------------

    fn do_include(&mut self, next: bool) -> Option<usize> {
        let index = if next { T_INCLUDE_NEXT } else { T_INCLUDE };
        self.parsing_include = DIRECTIVES[index].include_syntax;
        let t = self.directive_token(true);
        self.parsing_include = false;

        let directive = if next { "include_next" } else { "include" };
        let (name, system) = match t.kind {
            TokenKind::StringLit => (t.text.trim_matches('"').to_string(), false),
            TokenKind::HeaderName => (
                t.text
                    .trim_start_matches('<')
                    .trim_end_matches('>')
                    .to_string(),
                true,
            ),
            _ => {
                self.cpp_error(format!(
                    "`#{}' expects \"FILENAME\" or <FILENAME>",
                    directive
                ));
                self.skip_rest_of_line();
                return None;
            }
        };

        let junk = self.directive_token(false);
        if junk.kind != TokenKind::Vspace {
            self.cpp_error(format!("junk at end of `#{}'", directive));
            self.skip_rest_of_line();
        }

        if name.is_empty() {
            self.cpp_error(format!("empty file name in `#{}'", directive));
            return None;
        }

        // For include_next, search past the directory where the current
        // file was found; warn (and fall back) in the primary source.
        let mut skip = None;
        if next {
            match self.file_buffer().map(|b| &b.kind) {
                Some(crate::buffer::BufferKind::File { search_index, .. })
                    if self.buffers.iter().filter(|b| b.is_file()).count() > 1 =>
                {
                    skip = search_index.map(|i| i + 1);
                }
                _ => self.cpp_warning("#include_next in primary source file"),
            }
        }

        let containing_dir = match self.file_buffer().map(|b| &b.kind) {
            Some(crate::buffer::BufferKind::File { dir, .. }) => dir.clone(),
            _ => None,
        };

        let Some(resolver) = self.resolver.as_ref() else {
            self.cpp_error(format!("{}: No such file or directory", name));
            return None;
        };
        let Some(resolved) = resolver.resolve(&name, system, containing_dir.as_deref(), skip)
        else {
            self.cpp_error(format!("{}: No such file or directory", name));
            return None;
        };

        // Re-include suppression: a recorded controlling macro that is
        // now defined, or #pragma once.
        if let Some(info) = self.include_info.get(&resolved.path) {
            if info.pragma_once {
                return None;
            }
            if let Some(cm) = &info.control_macro
                && self.macros.is_defined(cm)
            {
                return None;
            }
        }
        self.include_info.entry(resolved.path.clone()).or_default();

        self.push_file_buffer(
            &resolved.path,
            &resolved.path,
            &resolved.text,
            system,
            resolved.dir,
            resolved.search_index,
        );
        self.only_seen_white = 2;
        None
    }

    // ----- conditionals ----------------------------------------------------

    fn do_if(&mut self) -> Option<usize> {
        let control = self.detect_if_not_defined();
        let value = self.eval_if_expression();
        self.conditional_skip(value == 0, T_IF, control)
    }

    fn do_ifdef(&mut self) -> Option<usize> {
        let (defined, _) = self.parse_ifdef("ifdef");
        self.conditional_skip(!defined, T_IFDEF, None)
    }

    fn do_ifndef(&mut self) -> Option<usize> {
        let start_of_file = self.directive_start_white == 2;
        let (defined, name) = self.parse_ifdef("ifndef");
        let control = if start_of_file && !defined { name } else { None };
        self.conditional_skip(defined, T_IFNDEF, control)
    }

    fn parse_ifdef(&mut self, name: &str) -> (bool, Option<String>) {
        self.no_macro_expand += 1;
        let t = self.directive_token(false);
        self.no_macro_expand -= 1;

        match t.kind {
            TokenKind::Vspace => {
                if !self.options.traditional {
                    self.cpp_pedwarn(format!("`#{}' with no argument", name));
                }
                (false, None)
            }
            TokenKind::Name => {
                let defined = if matches!(self.macros.lookup(&t.text), HashNode::Poisoned) {
                    self.cpp_error(format!("attempt to use poisoned `{}'", t.text));
                    false
                } else {
                    self.macros.is_defined(&t.text)
                };
                let junk = self.directive_token(false);
                if junk.kind != TokenKind::Vspace {
                    self.cpp_pedwarn(format!("garbage at end of `#{}' argument", name));
                    self.skip_rest_of_line();
                }
                (defined, Some(t.text))
            }
            _ => {
                if !self.options.traditional {
                    self.cpp_error(format!("`#{}' with invalid argument", name));
                }
                self.skip_rest_of_line();
                (false, None)
            }
        }
    }

    /// Recognize the `#if !defined(SYMBOL)` reinclude-preventer shape at
    /// the top of a file, leaving the expression tokens for evaluation.
    fn detect_if_not_defined(&mut self) -> Option<String> {
        let mut toks: Vec<Token> = Vec::new();
        self.no_macro_expand += 1;
        loop {
            let t = self.directive_token(false);
            let end = t.kind == TokenKind::Vspace;
            toks.push(t);
            if end {
                break;
            }
        }
        self.no_macro_expand -= 1;

        let mut control = None;
        if self.directive_start_white == 2 {
            let shape_short = toks.len() == 4
                && toks[0].is("!")
                && toks[1].is("defined")
                && toks[2].kind == TokenKind::Name;
            let shape_parens = toks.len() == 6
                && toks[0].is("!")
                && toks[1].is("defined")
                && toks[2].kind == TokenKind::LParen
                && toks[3].kind == TokenKind::Name
                && toks[4].kind == TokenKind::RParen;
            if shape_short {
                control = Some(toks[2].text.clone());
            } else if shape_parens {
                control = Some(toks[3].text.clone());
            }
        }

        for t in toks.into_iter().rev() {
            self.push_back(t);
        }
        control
    }

    fn conditional_skip(
        &mut self,
        skip: bool,
        kind: usize,
        control_macro: Option<String>,
    ) -> Option<usize> {
        let line = self.file_buffer().map(|b| b.line).unwrap_or(0);
        self.if_stack.push(IfFrame {
            line,
            kind,
            if_succeeded: false,
            control_macro,
        });
        if skip {
            return self.skip_if_group();
        }
        self.if_stack.last_mut().unwrap().if_succeeded = true;
        None
    }

    /// Skip to the `#else`, `#elif` or `#endif` that ends the failing
    /// group. Only conditional directives are examined on the way; the
    /// terminating directive's index is returned for execution.
    fn skip_if_group(&mut self) -> Option<usize> {
        let save_depth = self.if_stack.len();
        self.only_seen_white = 0;
        self.no_macro_expand += 1;
        let mut at_line_start = true;
        let mut ret = None;

        loop {
            let t = self.base_token();
            match t.kind {
                TokenKind::Eof => break,
                TokenKind::Pop => {
                    if self.popped_file {
                        break;
                    }
                }
                TokenKind::Vspace => at_line_start = true,
                TokenKind::Hspace | TokenKind::Comment => {}
                TokenKind::Punct if t.text == "#" && at_line_start => {
                    match self.directive_name_while_skipping() {
                        Some(i) if DIRECTIVES[i].origin == Origin::Cond => match i {
                            T_IF | T_IFDEF | T_IFNDEF => {
                                let line = self.file_buffer().map(|b| b.line).unwrap_or(0);
                                self.if_stack.push(IfFrame {
                                    line,
                                    kind: i,
                                    if_succeeded: false,
                                    control_macro: None,
                                });
                                self.skip_rest_of_line();
                                at_line_start = true;
                            }
                            T_ELSE | T_ELIF => {
                                if self.if_stack.len() == save_depth {
                                    ret = Some(i);
                                    break;
                                }
                                if let Some(f) = self.if_stack.last_mut() {
                                    f.kind = i;
                                }
                                self.skip_rest_of_line();
                                at_line_start = true;
                            }
                            T_ENDIF => {
                                if self.if_stack.len() == save_depth {
                                    ret = Some(i);
                                    break;
                                }
                                self.if_stack.pop();
                                self.skip_rest_of_line();
                                at_line_start = true;
                            }
                            _ => unreachable!("non-conditional directive while skipping"),
                        },
                        _ => {
                            self.skip_rest_of_line();
                            at_line_start = true;
                        }
                    }
                }
                _ => {
                    at_line_start = false;
                }
            }
        }

        self.no_macro_expand -= 1;
        ret
    }

    /// The directive name after a `#` inside a skipped group, or None for
    /// anything that is not a known directive name.
    fn directive_name_while_skipping(&mut self) -> Option<usize> {
        loop {
            let t = self.base_token();
            match t.kind {
                TokenKind::Hspace | TokenKind::Comment => continue,
                TokenKind::Name => return directive_index(&t.text),
                _ => {
                    self.push_back(t);
                    return None;
                }
            }
        }
    }

    fn do_else(&mut self) -> Option<usize> {
        self.validate_else("else");

        if self.conditional_stack_empty_here() {
            self.cpp_error("`#else' not within a conditional");
            return None;
        }

        let (prev_kind, line) = {
            let f = self.if_stack.last_mut().unwrap();
            // An #else clause disqualifies the group from being a
            // whole-file guard.
            f.control_macro = None;
            let prev = (f.kind, f.line);
            f.kind = T_ELSE;
            prev
        };
        if prev_kind == T_ELSE {
            let loc = self.current_location();
            self.sink.error_with_note(
                loc.clone(),
                "`#else' after `#else'",
                "the conditional began here",
                mill_ir::SourceLocation::line_of(
                    loc.map(|l| l.file.to_string()).unwrap_or_default(),
                    line,
                ),
            );
        }

        if self.if_stack.last().unwrap().if_succeeded {
            return self.skip_if_group();
        }
        self.if_stack.last_mut().unwrap().if_succeeded = true;
        None
    }

    fn do_elif(&mut self) -> Option<usize> {
        if self.conditional_stack_empty_here() {
            self.cpp_error("`#elif' not within a conditional");
            self.skip_rest_of_line();
            return None;
        }

        let prev_kind = self.if_stack.last().unwrap().kind;
        if prev_kind == T_ELSE {
            self.cpp_error("`#elif' after `#else'");
        }
        self.if_stack.last_mut().unwrap().kind = T_ELIF;

        if self.if_stack.last().unwrap().if_succeeded {
            self.skip_rest_of_line();
            return self.skip_if_group();
        }
        let value = self.eval_if_expression();
        if value == 0 {
            return self.skip_if_group();
        }
        self.if_stack.last_mut().unwrap().if_succeeded = true;
        None
    }

    fn do_endif(&mut self) -> Option<usize> {
        self.validate_else("endif");

        if self.conditional_stack_empty_here() {
            self.cpp_error("`#endif' not within a conditional");
            return None;
        }

        let frame = self.if_stack.pop().unwrap();
        if frame.control_macro.is_some() {
            self.potential_control_macro = frame.control_macro;
        }
        None
    }

    /// True when there is no open conditional belonging to the current
    /// input file.
    fn conditional_stack_empty_here(&self) -> bool {
        let base = self.file_buffer().map(|b| b.if_depth).unwrap_or(0);
        self.if_stack.len() <= base
    }

    /// Consume the rest of the line after `#else`/`#endif`, with the
    /// pedantic trailing-text diagnostic.
    fn validate_else(&mut self, directive: &str) {
        let mut complained = false;
        loop {
            self.no_macro_expand += 1;
            let t = self.directive_token(false);
            self.no_macro_expand -= 1;
            if t.kind == TokenKind::Vspace {
                break;
            }
            if !complained && !self.in_system_header() {
                self.cpp_pedwarn(format!(
                    "text following `#{}' violates ANSI standard",
                    directive
                ));
                complained = true;
            }
        }
    }

    // ----- #pragma ---------------------------------------------------------

    fn do_pragma(&mut self) -> Option<usize> {
        self.no_macro_expand += 1;
        let t = self.directive_token(false);
        self.no_macro_expand -= 1;

        match t.kind {
            TokenKind::Vspace => None,
            TokenKind::Name if t.text == "once" => self.do_pragma_once(),
            TokenKind::Name if t.text == "poison" => self.do_pragma_poison(),
            TokenKind::Name if t.text == "system_header" => self.do_pragma_system_header(),
            _ => {
                // Unknown pragmas pass through for the compiler proper;
                // no macro expansion is performed on them.
                let mut rest = self.collect_directive_line();
                let mut lead = vec![t];
                lead.append(&mut rest);
                self.emit_passthrough("pragma", lead);
                None
            }
        }
    }

    fn do_pragma_once(&mut self) -> Option<usize> {
        if !self.in_system_header() {
            self.cpp_warning("`#pragma once' is obsolete");
        }
        let file_count = self.buffers.iter().filter(|b| b.is_file()).count();
        if file_count <= 1 {
            self.cpp_warning("`#pragma once' outside include file");
        } else if let Some(crate::buffer::BufferKind::File { path, .. }) =
            self.file_buffer().map(|b| b.kind.clone())
        {
            self.include_info
                .entry(path.to_string())
                .or_default()
                .pragma_once = true;
        }
        let junk = self.directive_token(false);
        if junk.kind != TokenKind::Vspace {
            self.cpp_error("malformed #pragma directive");
            self.skip_rest_of_line();
        }
        None
    }

    fn do_pragma_poison(&mut self) -> Option<usize> {
        loop {
            self.no_macro_expand += 1;
            let t = self.directive_token(false);
            self.no_macro_expand -= 1;
            match t.kind {
                TokenKind::Vspace => break,
                TokenKind::Name => {
                    match self.macros.lookup(&t.text) {
                        HashNode::Poisoned => {
                            // Poisoning twice is allowed.
                        }
                        HashNode::Void => {
                            self.macros.insert(&t.text, HashNode::Poisoned);
                        }
                        _ => {
                            self.cpp_warning(format!("poisoning existing macro `{}'", t.text));
                            self.macros.insert(&t.text, HashNode::Poisoned);
                        }
                    }
                }
                _ => {
                    self.cpp_error("invalid #pragma poison directive");
                    self.skip_rest_of_line();
                    break;
                }
            }
        }
        None
    }

    fn do_pragma_system_header(&mut self) -> Option<usize> {
        let file_count = self.buffers.iter().filter(|b| b.is_file()).count();
        if file_count <= 1 {
            self.cpp_warning("#pragma system_header outside include file");
        } else if let Some(b) = self.file_buffer_mut()
            && let crate::buffer::BufferKind::File { system_header, .. } = &mut b.kind
        {
            *system_header = true;
        }
        let junk = self.directive_token(false);
        if junk.kind != TokenKind::Vspace {
            self.cpp_error("malformed #pragma directive");
            self.skip_rest_of_line();
        }
        None
    }

    // ----- #assert / #unassert --------------------------------------------

    fn do_assert(&mut self) -> Option<usize> {
        self.no_macro_expand += 1;
        let result = self.do_assert_1();
        self.no_macro_expand -= 1;
        if result.is_none() {
            self.skip_rest_of_line();
        }
        None
    }

    fn do_assert_1(&mut self) -> Option<()> {
        let t = self.directive_token(false);
        match t.kind {
            TokenKind::Vspace => {
                self.cpp_error("#assert without predicate");
                return None;
            }
            TokenKind::Name => {}
            _ => {
                self.cpp_error("assertion predicate is not an identifier");
                return None;
            }
        }
        let pred = t.text;

        let open = self.directive_token(false);
        if open.kind != TokenKind::LParen {
            self.cpp_error("missing token-sequence in #assert");
            return None;
        }

        let answer = self.collect_assert_answer()?;

        let junk = self.directive_token(false);
        if junk.kind != TokenKind::Vspace {
            self.cpp_error("junk at end of #assert");
            return None;
        }

        let key = assertion_key(&pred);
        match self.macros.lookup_mut(&key) {
            HashNode::Assertion(answers) => {
                // Re-asserting the same answer is silently ignored.
                if !answers.iter().any(|a| equiv_token_lists(a, &answer)) {
                    answers.push(answer);
                }
            }
            node => {
                *node = HashNode::Assertion(vec![answer]);
            }
        }
        Some(())
    }

    fn collect_assert_answer(&mut self) -> Option<Vec<TokenSummary>> {
        let mut answer: Vec<TokenSummary> = Vec::new();
        loop {
            let t = self.directive_token(false);
            match t.kind {
                TokenKind::RParen => return Some(answer),
                TokenKind::Vspace => {
                    self.cpp_error("missing close paren in assertion");
                    return None;
                }
                _ => answer.push(TokenSummary::from(&t)),
            }
        }
    }

    fn do_unassert(&mut self) -> Option<usize> {
        self.no_macro_expand += 1;
        let result = self.do_unassert_1();
        self.no_macro_expand -= 1;
        if result.is_none() {
            self.skip_rest_of_line();
        }
        None
    }

    fn do_unassert_1(&mut self) -> Option<()> {
        let t = self.directive_token(false);
        if t.kind != TokenKind::Name {
            self.cpp_error("#unassert must be followed by an identifier");
            return None;
        }
        let pred = t.text;

        let next = self.directive_token(false);
        let answer = match next.kind {
            TokenKind::LParen => {
                let a = self.collect_assert_answer()?;
                let junk = self.directive_token(false);
                if junk.kind != TokenKind::Vspace {
                    self.cpp_error("junk at end of #unassert");
                    return None;
                }
                Some(a)
            }
            TokenKind::Vspace => None,
            _ => {
                self.cpp_error("junk at end of #unassert");
                return None;
            }
        };

        let key = assertion_key(&pred);
        if let HashNode::Assertion(answers) = self.macros.lookup_mut(&key) {
            match answer {
                Some(a) => answers.retain(|x| !equiv_token_lists(x, &a)),
                None => answers.clear(),
            }
            if let HashNode::Assertion(answers) = self.macros.lookup(&key)
                && answers.is_empty()
            {
                self.macros.remove(&key);
            }
        }
        // Not an error to unassert something never asserted.
        Some(())
    }

    /// Query an assertion: `#pred` is true when any answer is asserted,
    /// `#pred(answer)` when that specific answer is.
    pub(crate) fn assertion_holds(&self, pred: &str, answer: Option<&[TokenSummary]>) -> bool {
        match self.macros.lookup(&assertion_key(pred)) {
            HashNode::Assertion(answers) => match answer {
                None => !answers.is_empty(),
                Some(a) => answers.iter().any(|x| equiv_token_lists(x, a)),
            },
            _ => false,
        }
    }

    // ----- command-line forms (-D, -U, -A) ---------------------------------

    /// Process `name[=body]` as if it were `#define name body`.
    pub fn define_from_cmdline(&mut self, spec: &str) {
        let text = match spec.split_once('=') {
            Some((name, body)) => format!("{} {}\n", name, body),
            None => format!("{} 1\n", spec),
        };
        let depth = self.buffers.len();
        self.push_synthetic_buffer(text.into_bytes(), false);
        self.do_define();
        while self.buffers.len() > depth {
            self.pop_buffer();
        }
    }

    /// Process NAME as if it were `#undef name`.
    pub fn undef_from_cmdline(&mut self, name: &str) {
        let depth = self.buffers.len();
        self.push_synthetic_buffer(format!("{}\n", name).into_bytes(), false);
        self.do_undef();
        while self.buffers.len() > depth {
            self.pop_buffer();
        }
    }

    /// Process `pred(answer)` as if it were `#assert pred(answer)`.
    pub fn assert_from_cmdline(&mut self, spec: &str) {
        let depth = self.buffers.len();
        self.push_synthetic_buffer(format!("{}\n", spec).into_bytes(), false);
        self.do_assert();
        while self.buffers.len() > depth {
            self.pop_buffer();
        }
    }

    /// Expose a definition check for drivers and tests.
    pub fn is_defined(&self, name: &str) -> bool {
        self.macros.is_defined(name)
    }
}
