//! mill C preprocessor
//!
//! A complete C preprocessor: tokenization, directive dispatch, the
//! conditional-compilation stack, macro definition and expansion with
//! function-like macros, stringification, token pasting, varargs, and
//! rescan-safety marking. Macro expansion text uses two escapes internal
//! to the engine: `\r-` marks the following identifier as not to be
//! re-expanded, and `\r ` is a token separator that keeps adjacent tokens
//! from pasting on rescans; neither survives into the output stream.
//!
//! The engine never opens files itself: `#include` goes through the
//! [`IncludeResolver`] callback supplied by the driver.
//!
//! ```no_run
//! use mill_cpp::{Reader, CppOptions};
//!
//! let mut reader = Reader::new(CppOptions::default());
//! reader.push_source("prog.c", "#define ANSWER 42\nANSWER\n");
//! let output = reader.preprocess_to_string();
//! assert_eq!(output.trim(), "42");
//! ```

pub mod buffer;
pub mod config;
pub mod directives;
pub mod expr;
pub mod files;
pub mod hashnode;
pub mod lexer;
pub mod macroexp;
pub mod token;

pub use config::{CppOptions, DiagnosticsConfig};
pub use files::{FsResolver, IncludeResolver, ResolvedInclude};
pub use token::{Token, TokenKind};

use buffer::{Buffer, BufferKind};
use hashnode::{HashNode, MacroTable};
use mill_ir::{DiagnosticSink, SourceLocation};
use std::collections::HashMap;
use std::sync::Arc;

/// Maximum nesting of input buffers; a static limit against runaway
/// recursion through includes or expansions.
pub const STACK_MAX: usize = 200;

/// One frame of the conditional-compilation stack.
#[derive(Debug, Clone)]
pub struct IfFrame {
    /// Line where the condition started.
    pub line: u32,
    /// Directive index of the last directive seen for this group.
    pub kind: usize,
    /// Whether some branch of this group has been taken.
    pub if_succeeded: bool,
    /// Macro name when this group is an `#ifndef` wrapping a whole file.
    pub control_macro: Option<String>,
}

/// Re-include bookkeeping for a resolved header path.
#[derive(Debug, Clone, Default)]
pub struct IncludeInfo {
    /// Macro guarding the whole file (`#ifndef X ... #endif`).
    pub control_macro: Option<String>,
    /// `#pragma once` seen in this file.
    pub pragma_once: bool,
}

/// The state of one preprocessor run. Applying [`Reader::get_token`]
/// repeatedly yields the output token stream.
pub struct Reader {
    pub options: CppOptions,
    pub sink: DiagnosticSink,
    pub(crate) macros: MacroTable,
    pub(crate) buffers: Vec<Buffer>,
    pub(crate) if_stack: Vec<IfFrame>,
    /// Pushed-back tokens, served before the lexer in LIFO order.
    pub(crate) lookahead: Vec<Token>,
    pub(crate) no_macro_expand: u32,
    /// Directives are hard errors while collecting macro arguments.
    pub(crate) no_directives: u32,
    pub(crate) in_directive: bool,
    /// `<...>` is one token while parsing an include directive.
    pub(crate) parsing_include: bool,
    /// 0: content seen on this line; 1: line start; 2: file start.
    pub(crate) only_seen_white: u8,
    /// Kind of the buffer most recently popped (consulted after Pop).
    pub(crate) popped_file: bool,
    pub(crate) popped_synthetic: bool,
    pub(crate) include_info: HashMap<String, IncludeInfo>,
    /// Controlling macro candidate from an `#endif` that may end the file.
    pub(crate) potential_control_macro: Option<String>,
    pub(crate) resolver: Option<Box<dyn IncludeResolver>>,
    pub(crate) base_file: String,
    /// Set by a `\r-` escape: the next identifier lexed must not expand.
    pub(crate) next_name_no_expand: bool,
    /// The `only_seen_white` state captured at the `#` of the directive
    /// currently being handled (2 means nothing but whitespace so far in
    /// the file, which gates controlling-macro detection).
    pub(crate) directive_start_white: u8,
}

impl Reader {
    pub fn new(options: CppOptions) -> Reader {
        let mut sink = DiagnosticSink::new();
        sink.warnings_are_errors = options.warnings_are_errors;
        sink.pedantic = options.pedantic || options.pedantic_errors;
        sink.pedantic_errors = options.pedantic_errors;
        sink.inhibit_warnings = options.inhibit_warnings;

        let mut macros = MacroTable::new();
        macros.install_builtins(if options.traditional { "0" } else { "1" });

        Reader {
            options,
            sink,
            macros,
            buffers: Vec::new(),
            if_stack: Vec::new(),
            lookahead: Vec::new(),
            no_macro_expand: 0,
            no_directives: 0,
            in_directive: false,
            parsing_include: false,
            only_seen_white: 2,
            popped_file: false,
            popped_synthetic: false,
            include_info: HashMap::new(),
            potential_control_macro: None,
            resolver: None,
            base_file: String::new(),
            next_name_no_expand: false,
            directive_start_white: 2,
        }
    }

    pub fn set_resolver(&mut self, resolver: Box<dyn IncludeResolver>) {
        self.resolver = Some(resolver);
    }

    /// Push the primary source file.
    pub fn push_source(&mut self, name: &str, text: &str) {
        self.base_file = name.to_string();
        self.push_file_buffer(name, name, text, false, None, None);
        self.only_seen_white = 2;
    }

    pub(crate) fn push_file_buffer(
        &mut self,
        path: &str,
        nominal: &str,
        text: &str,
        system_header: bool,
        dir: Option<std::path::PathBuf>,
        search_index: Option<usize>,
    ) {
        if self.buffers.len() >= STACK_MAX {
            self.cpp_error(format!("#include nested too deeply ({} levels)", STACK_MAX));
            return;
        }
        let kind = BufferKind::File {
            path: Arc::from(path),
            nominal_name: nominal.to_string(),
            system_header,
            dir,
            search_index,
        };
        let b = Buffer::new(text.as_bytes().to_vec(), kind, false, self.if_stack.len());
        self.buffers.push(b);
    }

    pub(crate) fn push_synthetic_buffer(&mut self, text: Vec<u8>, has_escapes: bool) {
        if self.buffers.len() >= STACK_MAX {
            self.cpp_error("macro or argument nesting too deep");
            return;
        }
        let b = Buffer::new(text, BufferKind::Synthetic, has_escapes, self.if_stack.len());
        self.buffers.push(b);
    }

    pub(crate) fn push_expansion_buffer(&mut self, name: &str, text: Vec<u8>) {
        if self.buffers.len() >= STACK_MAX {
            self.cpp_error("macro expansion nested too deeply");
            return;
        }
        let kind = BufferKind::Macro {
            name: name.to_string(),
        };
        let b = Buffer::new(text, kind, true, self.if_stack.len());
        self.buffers.push(b);
    }

    /// Pop the top buffer: run its cleanup, check conditional balance for
    /// file buffers, and commit a pending controlling macro.
    pub(crate) fn pop_buffer(&mut self) {
        let Some(b) = self.buffers.pop() else {
            return;
        };
        self.popped_file = b.is_file();
        self.popped_synthetic = matches!(b.kind, BufferKind::Synthetic);

        if let Some(name) = &b.disabled_macro {
            let node = self.macros.lookup_mut(name);
            if let HashNode::Disabled(defn) = node {
                *node = HashNode::Macro(defn.clone());
            }
        }

        if b.is_file() {
            // Unwind conditionals opened in this file.
            while self.if_stack.len() > b.if_depth {
                let frame = self.if_stack.pop().unwrap();
                let name = directives::DIRECTIVES[frame.kind].name;
                let loc = self.location_in(&b, frame.line);
                self.sink
                    .error(Some(loc), format!("unterminated `#{}' conditional", name));
            }

            if let Some(control) = self.potential_control_macro.take()
                && let BufferKind::File { path, .. } = &b.kind
            {
                self.include_info
                    .entry(path.to_string())
                    .or_default()
                    .control_macro = Some(control);
            }
            self.only_seen_white = 1;
        }
    }

    fn location_in(&self, b: &Buffer, line: u32) -> SourceLocation {
        let name = b.nominal_name().unwrap_or("<command line>");
        SourceLocation::line_of(name.to_string(), line)
    }

    /// Innermost file buffer, skipping macro expansions.
    pub(crate) fn file_buffer(&self) -> Option<&Buffer> {
        self.buffers.iter().rev().find(|b| b.is_file())
    }

    pub(crate) fn current_location(&self) -> Option<SourceLocation> {
        self.file_buffer()
            .map(|b| SourceLocation::line_of(b.nominal_name().unwrap_or("?").to_string(), b.line))
    }

    pub(crate) fn cpp_error(&mut self, message: impl Into<String>) {
        let loc = self.current_location();
        self.sink.error(loc, message);
    }

    pub(crate) fn cpp_warning(&mut self, message: impl Into<String>) {
        let loc = self.current_location();
        self.sink.warning(loc, message);
    }

    pub(crate) fn cpp_pedwarn(&mut self, message: impl Into<String>) {
        let loc = self.current_location();
        self.sink.pedwarn(loc, message);
    }

    pub(crate) fn cpp_ice(&mut self, message: impl Into<String>) {
        let loc = self.current_location();
        self.sink.ice(loc, message);
    }

    /// Next token with no rescanning: the pushback stack, then the lexer.
    pub(crate) fn base_token(&mut self) -> Token {
        if let Some(t) = self.lookahead.pop() {
            return t;
        }
        self.lex_token()
    }

    pub(crate) fn push_back(&mut self, t: Token) {
        self.lookahead.push(t);
    }

    /// The main entry point: the next token of the output stream, with
    /// directives executed and macros expanded.
    pub fn get_token(&mut self) -> Token {
        loop {
            let t = self.base_token();
            match t.kind {
                TokenKind::Eof => return t,
                TokenKind::Pop => return t,
                TokenKind::Hspace | TokenKind::Comment => return t,
                TokenKind::Vspace => {
                    if self.only_seen_white == 0 {
                        self.only_seen_white = 1;
                    }
                    return t;
                }
                TokenKind::Punct if t.text == "#" && !t.no_expand => {
                    let at_line_start = self.only_seen_white >= 1;
                    let in_file = self.buffers.last().map(|b| b.is_file()).unwrap_or(false);
                    if at_line_start && in_file && !self.in_directive {
                        if self.no_directives > 0 {
                            // C99 6.10.3.11: undefined; make it a hard error.
                            self.handle_directive_in_argument();
                            continue;
                        }
                        if self.handle_directive() {
                            self.only_seen_white = 1;
                            continue;
                        }
                    }
                    self.mark_content();
                    return t;
                }
                TokenKind::Name => {
                    if t.no_expand || self.no_macro_expand > 0 {
                        self.mark_content();
                        return t;
                    }
                    match self.macros.lookup(&t.text).clone() {
                        HashNode::Void | HashNode::Assertion(_) => {
                            self.mark_content();
                            return t;
                        }
                        HashNode::Poisoned => {
                            self.cpp_error(format!("attempt to use poisoned `{}'", t.text));
                            self.mark_content();
                            return Token::new(TokenKind::Number, "0", t.line, t.col);
                        }
                        HashNode::Disabled(_) => {
                            // Per C89, a macro cannot expand recursively;
                            // mark the spelling so rescans skip it too.
                            let mut t = t;
                            t.no_expand = true;
                            self.mark_content();
                            return t;
                        }
                        HashNode::Const(text) => {
                            self.mark_content();
                            let framed = macroexp::frame_expansion(text.as_bytes());
                            self.push_expansion_buffer(&t.text, framed);
                            continue;
                        }
                        HashNode::Builtin(kind) => {
                            self.mark_content();
                            let text = self.special_symbol(kind);
                            let framed = macroexp::frame_expansion(text.as_bytes());
                            self.push_expansion_buffer(&t.text, framed);
                            continue;
                        }
                        HashNode::Macro(defn) => {
                            self.mark_content();
                            if defn.is_function_like() {
                                if !self.function_macro_invoked(&t, &defn) {
                                    return t;
                                }
                            } else {
                                self.macroexpand_object(&t.text, &defn);
                            }
                            continue;
                        }
                    }
                }
                _ => {
                    self.mark_content();
                    return t;
                }
            }
        }
    }

    fn mark_content(&mut self) {
        self.only_seen_white = 0;
        self.potential_control_macro = None;
    }

    /// Look for the `(` that makes this a macro invocation; whitespace
    /// (including newlines) and buffer boundaries may intervene. When no
    /// paren follows, the peeked tokens are pushed back and the name is
    /// ordinary.
    fn function_macro_invoked(&mut self, name: &Token, defn: &hashnode::Definition) -> bool {
        let mut skipped: Vec<Token> = Vec::new();
        loop {
            let nt = self.base_token();
            if nt.kind == TokenKind::Pop && self.popped_synthetic {
                // Never look for the paren past the end of an argument or
                // command-line buffer.
                self.push_back(nt);
                for t in skipped.into_iter().rev() {
                    self.push_back(t);
                }
                return false;
            }
            if nt.is_whitespace() || nt.kind == TokenKind::Pop {
                skipped.push(nt);
                continue;
            }
            if nt.kind == TokenKind::Eof {
                self.push_back(nt);
                for t in skipped.into_iter().rev() {
                    self.push_back(t);
                }
                return false;
            }
            if nt.kind == TokenKind::LParen {
                self.macroexpand_function(&name.text, defn, name.line, name.col);
                return true;
            }
            self.push_back(nt);
            for t in skipped.into_iter().rev() {
                self.push_back(t);
            }
            return false;
        }
    }

    fn handle_directive_in_argument(&mut self) {
        // Peek the directive name for the message, then discard the line.
        let saved = self.no_macro_expand;
        self.no_macro_expand += 1;
        let name = self.directive_name_token();
        self.no_macro_expand = saved;
        let shown = name.as_deref().unwrap_or("");
        self.cpp_error(format!(
            "#{} may not be used inside a macro argument",
            shown
        ));
        self.skip_rest_of_line();
    }

    fn directive_name_token(&mut self) -> Option<String> {
        loop {
            let t = self.base_token();
            match t.kind {
                TokenKind::Hspace | TokenKind::Comment => continue,
                TokenKind::Name => return Some(t.text),
                _ => {
                    self.push_back(t);
                    return None;
                }
            }
        }
    }

    /// Drive the whole stream to completion, reconstructing program text.
    pub fn preprocess_to_string(&mut self) -> String {
        let mut out = String::new();
        let mut pending_space = false;
        let mut last_byte: u8 = b'\n';
        loop {
            let t = self.get_token();
            match t.kind {
                TokenKind::Eof => break,
                TokenKind::Pop => continue,
                TokenKind::Vspace => {
                    out.push('\n');
                    last_byte = b'\n';
                    pending_space = false;
                }
                TokenKind::Hspace => pending_space = true,
                TokenKind::Comment => {
                    if !self.options.discard_comments {
                        pending_space = true;
                    }
                }
                _ => {
                    let first = t.text.as_bytes().first().copied().unwrap_or(b' ');
                    if pending_space
                        || t.ws_before
                        || (last_byte != b'\n' && macroexp::unsafe_chars(&self.options, last_byte, first))
                    {
                        if last_byte != b'\n' && !out.is_empty() {
                            out.push(' ');
                        }
                    }
                    out.push_str(&t.text);
                    last_byte = *t.text.as_bytes().last().unwrap_or(&b' ');
                    pending_space = false;
                }
            }
        }
        out
    }

    /// Collect the remaining stream as non-whitespace token spellings,
    /// a convenient form for tests and for token-stream consumers.
    pub fn token_spellings(&mut self) -> Vec<String> {
        let mut out = Vec::new();
        loop {
            let t = self.get_token();
            match t.kind {
                TokenKind::Eof => break,
                TokenKind::Pop
                | TokenKind::Vspace
                | TokenKind::Hspace
                | TokenKind::Comment => continue,
                _ => out.push(t.text),
            }
        }
        out
    }

    /// Exit status per the contract: 0 when no errors were emitted.
    pub fn exit_status(&self) -> i32 {
        self.sink.exit_status()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(source: &str) -> Vec<String> {
        let mut r = Reader::new(CppOptions::default());
        r.push_source("test.c", source);
        let toks = r.token_spellings();
        assert_eq!(r.sink.error_count(), 0, "diagnostics: {:?}", r.sink.diagnostics());
        toks
    }

    fn run_expect_errors(source: &str) -> (Vec<String>, usize) {
        let mut r = Reader::new(CppOptions::default());
        r.push_source("test.c", source);
        let toks = r.token_spellings();
        (toks, r.sink.error_count())
    }

    #[test]
    fn test_plain_tokens_pass_through() {
        assert_eq!(run("a b 12 +\n"), vec!["a", "b", "12", "+"]);
    }

    #[test]
    fn test_object_macro_expansion() {
        assert_eq!(run("#define N 42\nN\n"), vec!["42"]);
    }

    #[test]
    fn test_function_macro_simple() {
        // #define F(x) x+1 ; F(2) => 2 + 1
        assert_eq!(run("#define F(x) x+1\nF(2)\n"), vec!["2", "+", "1"]);
    }

    #[test]
    fn test_token_paste() {
        assert_eq!(run("#define G(x,y) x ## y\nG(foo,bar)\n"), vec!["foobar"]);
    }

    #[test]
    fn test_stringify() {
        assert_eq!(
            run("#define S(x) #x\nS(a  b)\n"),
            vec![r#""a b""#]
        );
    }

    #[test]
    fn test_define_undef_roundtrip() {
        // A file of only defines and undefs leaves an empty stream.
        assert_eq!(run("#define A 1\n#define B A\n#undef A\n#undef B\n"), Vec::<String>::new());
    }

    #[test]
    fn test_recursive_macro_stops() {
        // x expands to itself once; the inner x is marked and survives.
        assert_eq!(run("#define x x\nx\n"), vec!["x"]);
    }

    #[test]
    fn test_mutual_recursion_stops() {
        assert_eq!(run("#define a b\n#define b a\na\n"), vec!["a"]);
    }

    #[test]
    fn test_conditional_skips_body() {
        assert_eq!(run("#define X\n#ifndef X\nbody\n#endif\nafter\n"), vec!["after"]);
    }

    #[test]
    fn test_elif_not_entered_after_taken_if() {
        assert_eq!(run("#if 1\na\n#elif 1\nb\n#endif\n"), vec!["a"]);
    }

    #[test]
    fn test_else_taken() {
        assert_eq!(run("#if 0\na\n#else\nb\n#endif\n"), vec!["b"]);
    }

    #[test]
    fn test_nested_conditionals_in_skipped_group() {
        let src = "#if 0\n#if 1\nx\n#endif\n#else\nok\n#endif\n";
        assert_eq!(run(src), vec!["ok"]);
    }

    #[test]
    fn test_unterminated_conditional_diagnosed() {
        let (_, errs) = run_expect_errors("#if 1\nbody\n");
        assert_eq!(errs, 1);
    }

    #[test]
    fn test_poisoned_identifier() {
        let (toks, errs) = run_expect_errors("#pragma poison evil\nevil\n");
        assert_eq!(errs, 1);
        assert_eq!(toks, vec!["0"]);
    }

    #[test]
    fn test_varargs_absorbs_rest() {
        assert_eq!(
            run("#define V(a, ...) a __VA_ARGS__\nV(1, 2, 3)\n"),
            vec!["1", "2", ",", "3"]
        );
    }

    #[test]
    fn test_paste_with_empty_rest_arg_deletes_comma() {
        // The GNU comma-deletion idiom: with no variadic arguments, the
        // `##` eats the comma before it.
        assert_eq!(
            run("#define V(x, ...) f(x, ## __VA_ARGS__)\nV(1)\n"),
            vec!["f", "(", "1", ")"]
        );
        assert_eq!(
            run("#define W(x, ...) f(x, ## __VA_ARGS__)\nW(1, 2)\n"),
            vec!["f", "(", "1", ",", "2", ")"]
        );
    }

    #[test]
    fn test_line_builtin() {
        assert_eq!(run("\n\n__LINE__\n"), vec!["3"]);
    }

    #[test]
    fn test_file_builtin() {
        assert_eq!(run("__FILE__\n"), vec![r#""test.c""#]);
    }

    #[test]
    fn test_command_line_define() {
        let mut r = Reader::new(CppOptions::default());
        r.define_from_cmdline("FOO=41");
        r.push_source("t.c", "FOO\n");
        assert_eq!(r.token_spellings(), vec!["41"]);
    }

    #[test]
    fn test_command_line_define_default_one() {
        let mut r = Reader::new(CppOptions::default());
        r.define_from_cmdline("FOO");
        r.push_source("t.c", "FOO\n");
        assert_eq!(r.token_spellings(), vec!["1"]);
    }

    #[test]
    fn test_expansion_does_not_paste_neighbors() {
        // The rescan-safety markers keep `1` and the expansion apart.
        let out = {
            let mut r = Reader::new(CppOptions::default());
            r.push_source("t.c", "#define E 2\n1E\n");
            r.preprocess_to_string()
        };
        // `1E` is a single pp-number, so E must not expand inside it.
        assert_eq!(out.trim(), "1E");
    }

    #[test]
    fn test_adjacent_expansion_kept_separate() {
        let mut r = Reader::new(CppOptions::default());
        r.push_source("t.c", "#define P +\nP P\n");
        let out = r.preprocess_to_string();
        assert_eq!(out.trim(), "+ +");
    }
}
