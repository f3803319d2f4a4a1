//! Macro definition collection and expansion.
//!
//! A definition's replacement text is stored as bytes framed by `\r `
//! rescan-safety markers, with a reflist describing where arguments are
//! substituted. Expansion captures each argument twice: raw (for
//! stringification and pasting) and pre-expanded (for ordinary
//! substitution, produced by pushing the raw text back through the
//! tokenizer). The assembled expansion is pushed as an input buffer and
//! the macro is disabled until that buffer pops.

use crate::buffer::BufferKind;
use crate::config::CppOptions;
use crate::hashnode::{BuiltinKind, Definition, HashNode, RefListEntry};
use crate::token::{Token, TokenKind};
use crate::Reader;
use mill_ir::SourceLocation;

/// Frame TEXT with the leading and trailing rescan-safety markers.
pub(crate) fn frame_expansion(text: &[u8]) -> Vec<u8> {
    let mut v = Vec::with_capacity(text.len() + 4);
    v.extend_from_slice(b"\r ");
    v.extend_from_slice(text);
    v.extend_from_slice(b"\r ");
    v
}

/// Would a token ending in C1 directly followed by one starting with C2
/// tokenize differently than intended?
pub(crate) fn unsafe_chars(options: &CppOptions, c1: u8, c2: u8) -> bool {
    match c1 {
        b'+' | b'-' => c2 == c1 || c2 == b'=' || unsafe_letter(c2),
        b'e' | b'E' | b'p' | b'P' => c2 == b'-' || c2 == b'+' || unsafe_letter(c2),
        b'$' => options.dollars_in_ident && unsafe_letter(c2),
        b'L' => c2 == b'\'' || c2 == b'"' || unsafe_letter(c2),
        b'.' | b'_' => unsafe_letter(c2),
        c if c.is_ascii_alphanumeric() => unsafe_letter(c2),
        b'<' | b'>' | b'!' | b'%' | b'#' | b':' | b'^' | b'&' | b'|' | b'*' | b'/' | b'=' => {
            c2 == c1 || c2 == b'='
        }
        _ => false,
    }
}

fn unsafe_letter(c2: u8) -> bool {
    // Middle of a name or pp-number.
    c2.is_ascii_alphanumeric() || c2 == b'_' || c2 == b'.'
}

/// The conservative variant when the preceding character is unknown. It
/// cannot have been an idchar (that would have pasted with the macro name
/// itself), and bracketing characters are always safe.
pub(crate) fn unsafe_after_unknown(c2: u8) -> bool {
    !(c2.is_ascii_alphanumeric()
        || c2 == b'_'
        || c2 == b'\''
        || c2 == b'"'
        || c2 == b'('
        || c2 == b'['
        || c2 == b'{'
        || c2 == b')'
        || c2 == b']'
        || c2 == b'}')
}

/// Reconstruct raw argument text from collected tokens, preserving
/// whitespace boundaries and no-reexpand marks.
pub(crate) fn tokens_to_text(tokens: &[Token]) -> Vec<u8> {
    let mut out: Vec<u8> = Vec::new();
    for t in tokens {
        if t.ws_before && !out.is_empty() {
            out.push(b' ');
        }
        if t.no_expand && t.kind == TokenKind::Name {
            out.extend_from_slice(b"\r-");
        }
        out.extend_from_slice(t.text.as_bytes());
    }
    out
}

/// One parsed formal parameter.
#[derive(Debug, Clone)]
pub(crate) struct ArgSpec {
    pub name: String,
    pub rest_arg: bool,
}

/// Per-call argument data: the raw text, plus lazily computed stringified
/// and pre-expanded forms.
struct ArgData {
    raw: Vec<u8>,
    expanded: Option<Vec<u8>>,
    stringified: Option<Vec<u8>>,
}

/// Surround SRC with quotes, escaping quote and backslash, collapsing
/// whitespace runs to one space, deleting the internal `\r` escapes, and
/// rendering unprintable bytes as octal escapes.
pub(crate) fn quote_string_for_stringify(src: &[u8]) -> Vec<u8> {
    let mut out = vec![b'"'];
    let mut escaped = false;
    let mut in_string = 0u8;
    // -1 initially; 1 = suppressed a space run; 0 = last was non-space.
    let mut need_space: i8 = -1;
    let mut i = 0;
    while i < src.len() {
        let c = src[i];
        if in_string == 0 {
            if c == b'\r' {
                i += 2;
                continue;
            }
            if c == b' ' || c == b'\t' || c == b'\n' {
                if need_space == 0 {
                    need_space = 1;
                }
                i += 1;
                continue;
            }
            if need_space > 0 {
                out.push(b' ');
            }
            need_space = 0;
        }

        if escaped {
            escaped = false;
        } else {
            if c == b'\\' {
                escaped = true;
            }
            if in_string != 0 {
                if c == in_string {
                    in_string = 0;
                }
            } else if c == b'"' || c == b'\'' {
                in_string = c;
            }
        }

        if c == b'"' || (in_string != 0 && c == b'\\') {
            out.push(b'\\');
        }
        if c.is_ascii_graphic() || c == b' ' {
            out.push(c);
        } else {
            out.extend_from_slice(format!("\\{:03o}", c).as_bytes());
        }
        i += 1;
    }
    out.push(b'"');
    out
}

/// Quote a filename for `__FILE__` and friends.
pub(crate) fn quote_string(src: &str) -> String {
    let mut out = String::from("\"");
    for c in src.bytes() {
        match c {
            b'"' | b'\\' => {
                out.push('\\');
                out.push(c as char);
            }
            c if c.is_ascii_graphic() || c == b' ' => out.push(c as char),
            c => out.push_str(&format!("\\{:03o}", c)),
        }
    }
    out.push('"');
    out
}

/// Are two definitions isomorphic? Used for the redefinition check.
pub(crate) fn compare_defs(pedantic: bool, d1: &Definition, d2: &Definition) -> bool {
    if d1.nargs != d2.nargs {
        return false;
    }
    if d1.expansion != d2.expansion {
        return false;
    }
    if pedantic && d1.argnames != d2.argnames {
        return false;
    }
    d1.pattern == d2.pattern
}

impl Reader {
    /// Parse the formal parameter list of a function-like macro. LIST is
    /// the whole directive line; the opening paren is at POS. Returns the
    /// parameters and the index of the first replacement-list token.
    pub(crate) fn collect_params(
        &mut self,
        list: &[Token],
        pos: usize,
    ) -> Option<(Vec<ArgSpec>, usize)> {
        debug_assert_eq!(list[pos].kind, TokenKind::LParen);
        let mut argv: Vec<ArgSpec> = Vec::new();
        let mut i = pos + 1;
        loop {
            let Some(t) = list.get(i) else {
                self.cpp_error("missing right paren in macro parameter list");
                return None;
            };
            match t.kind {
                TokenKind::Name => {
                    if argv.iter().any(|a| a.name == t.text) {
                        self.cpp_error(format!("duplicate macro argument name \"{}\"", t.text));
                    }
                    if self.options.pedantic && self.options.c99 && t.text == "__VA_ARGS__" {
                        self.cpp_pedwarn(
                            "C99 does not permit use of __VA_ARGS__ as a macro argument name",
                        );
                    }
                    argv.push(ArgSpec {
                        name: t.text.clone(),
                        rest_arg: false,
                    });
                }
                TokenKind::Comma => {}
                TokenKind::RParen => return Some((argv, i + 1)),
                TokenKind::Ellipsis => {
                    match argv.last_mut() {
                        Some(last) if list[i - 1].kind == TokenKind::Name => {
                            if self.options.pedantic {
                                self.cpp_pedwarn("ISO C does not permit named varargs macros");
                            }
                            last.rest_arg = true;
                        }
                        _ => {
                            if self.options.pedantic && !self.options.c99 {
                                self.cpp_pedwarn("C89 does not permit varargs macros");
                            }
                            argv.push(ArgSpec {
                                name: "__VA_ARGS__".to_string(),
                                rest_arg: true,
                            });
                        }
                    }
                    i += 1;
                    match list.get(i) {
                        Some(t) if t.kind == TokenKind::RParen => return Some((argv, i + 1)),
                        _ => {
                            self.cpp_error("another parameter follows \"...\"");
                            return None;
                        }
                    }
                }
                _ => {
                    self.cpp_error("syntax error in #define");
                    return None;
                }
            }
            i += 1;
        }
    }

    /// Scan a replacement list into a compact expansion plus the reflist
    /// of argument-use sites. ARGV is None for an object-like macro.
    pub(crate) fn collect_expansion(
        &mut self,
        list: &[Token],
        argv: Option<&[ArgSpec]>,
        start: usize,
        loc: Option<SourceLocation>,
    ) -> Definition {
        #[derive(PartialEq, Clone, Copy)]
        enum Last {
            Start,
            Norm,
            Arg,
            Strize,
            Paste,
        }

        let mut exp: Vec<u8> = Vec::new();
        let mut last_mark = 0usize;
        exp.extend_from_slice(b"\r ");
        let mut pattern: Vec<RefListEntry> = Vec::new();
        let mut last_token = Last::Start;

        for tok in &list[start..] {
            if tok.ends_directive() {
                break;
            }
            if tok.is_whitespace() {
                continue;
            }

            // `#` is the stringify operator only in function-like macros
            // and never directly after `##`.
            if tok.kind == TokenKind::Punct && tok.text == "#" {
                if argv.is_none() || last_token == Last::Paste {
                    // ordinary '#'
                } else {
                    last_token = Last::Strize;
                    continue;
                }
            } else if tok.kind == TokenKind::Punct && tok.text == "##" {
                if last_token == Last::Paste {
                    // `## ##`: the second is ordinary text.
                } else {
                    if last_token == Last::Start {
                        self.cpp_error("`##' at start of macro definition");
                    } else if last_token == Last::Arg {
                        pattern.last_mut().unwrap().raw_after = true;
                    } else if last_token == Last::Strize {
                        // That `#` wasn't a stringify operator after all.
                        exp.push(b'#');
                    }
                    last_token = Last::Paste;
                    continue;
                }
            } else if tok.kind == TokenKind::Name
                && let Some(argv) = argv
                && let Some(j) = argv.iter().position(|a| a.name == tok.text)
            {
                if last_token != Last::Paste && tok.ws_before {
                    exp.push(b' ');
                }
                pattern.push(RefListEntry {
                    nchars: exp.len() - last_mark,
                    argno: j,
                    stringify: last_token == Last::Strize,
                    raw_before: last_token == Last::Paste,
                    raw_after: false,
                    rest_args: argv[j].rest_arg,
                });
                last_mark = exp.len();
                last_token = Last::Arg;
                continue;
            }

            // Ordinary replacement text.
            if last_token == Last::Strize {
                self.cpp_error("`#' is not followed by a macro argument name");
            }
            if last_token != Last::Paste && last_token != Last::Start && tok.ws_before {
                exp.push(b' ');
            }
            exp.extend_from_slice(tok.text.as_bytes());
            last_token = Last::Norm;
        }

        if last_token == Last::Strize {
            self.cpp_error("`#' is not followed by a macro argument name");
        } else if last_token == Last::Paste {
            self.cpp_error("`##' at end of macro definition");
        }

        exp.extend_from_slice(b"\r ");

        let rest_args = argv.is_some_and(|a| a.last().is_some_and(|x| x.rest_arg));
        Definition {
            expansion: exp,
            pattern,
            nargs: argv.map(|a| a.len()),
            argnames: argv
                .map(|a| a.iter().map(|x| x.name.clone()).collect())
                .unwrap_or_default(),
            rest_args,
            loc,
        }
    }

    /// Collect one macro argument, tracking paren nesting. Returns the
    /// collected tokens and the terminator kind (Comma, RParen, or
    /// Eof/Pop on a premature end).
    fn macarg(&mut self, rest_args: bool) -> (Vec<Token>, TokenKind) {
        let mut toks: Vec<Token> = Vec::new();
        let mut paren = 0i32;
        let mut pending_ws = false;
        loop {
            let t = self.get_token();
            match t.kind {
                TokenKind::Eof => return (toks, TokenKind::Eof),
                TokenKind::Pop => {
                    // End of a macro buffer inside the call is fine; end
                    // of a file or argument buffer is not.
                    if self.popped_file || self.popped_synthetic {
                        return (toks, TokenKind::Pop);
                    }
                }
                TokenKind::Hspace | TokenKind::Vspace | TokenKind::Comment => {
                    pending_ws = true;
                }
                TokenKind::LParen => {
                    paren += 1;
                    push_arg_token(&mut toks, t, &mut pending_ws);
                }
                TokenKind::RParen => {
                    paren -= 1;
                    if paren < 0 {
                        return (toks, TokenKind::RParen);
                    }
                    push_arg_token(&mut toks, t, &mut pending_ws);
                }
                TokenKind::Comma => {
                    if paren == 0 && !rest_args {
                        return (toks, TokenKind::Comma);
                    }
                    push_arg_token(&mut toks, t, &mut pending_ws);
                }
                _ => push_arg_token(&mut toks, t, &mut pending_ws),
            }
        }
    }

    /// Object-like macro: the stored expansion goes straight onto the
    /// buffer stack.
    pub(crate) fn macroexpand_object(&mut self, name: &str, defn: &Definition) {
        let xbuf = defn.expansion.clone();
        self.push_macro_expansion(name, xbuf, true);
    }

    /// Function-like macro call; the name and the opening paren have been
    /// consumed.
    pub(crate) fn macroexpand_function(
        &mut self,
        name: &str,
        defn: &Definition,
        line: u32,
        col: u32,
    ) {
        let nargs = defn.nargs.unwrap_or(0);

        // Collect arguments raw; expansion is done per-argument later.
        self.no_macro_expand += 1;
        self.no_directives += 1;

        let mut args: Vec<ArgData> = Vec::new();
        let mut i = 0usize;
        let mut rest_args = false;
        let mut term;
        loop {
            if i < nargs || (nargs == 0 && i == 0) {
                if i + 1 == nargs && defn.rest_args {
                    rest_args = true;
                }
                let (toks, t) = self.macarg(rest_args);
                args.push(ArgData {
                    raw: tokens_to_text(&toks),
                    expanded: None,
                    stringified: None,
                });
                term = t;
            } else {
                let (_, t) = self.macarg(false);
                term = t;
            }
            if term == TokenKind::Eof || term == TokenKind::Pop {
                let loc = self
                    .file_buffer()
                    .map(|b| SourceLocation::new(b.nominal_name().unwrap_or("?").to_string(), line, col));
                self.sink.error(loc, "unterminated macro call");
            }
            i += 1;
            if term != TokenKind::Comma {
                break;
            }
        }

        self.no_macro_expand -= 1;
        self.no_directives -= 1;

        if term != TokenKind::RParen {
            return;
        }

        // `foo ( )` is an empty argument list unless foo takes exactly
        // one argument, in which case it is one empty argument.
        if i == 1 && nargs != 1 && args.first().is_some_and(|a| a.raw.iter().all(|&c| c == b' ')) {
            i = 0;
        }

        let mut rest_zero = false;
        if nargs == 0 && i > 0 {
            self.cpp_error(format!("arguments given to macro `{}'", name));
        } else if i < nargs {
            if i + 1 == nargs && defn.rest_args {
                // The rest arg may absorb zero arguments.
                rest_zero = true;
            } else if i == 0 {
                self.cpp_error(format!("macro `{}' used without args", name));
            } else if i == 1 {
                self.cpp_error(format!("macro `{}' used with just one arg", name));
            } else {
                self.cpp_error(format!("macro `{}' used with only {} args", name, i));
            }
        } else if i > nargs {
            self.cpp_error(format!(
                "macro `{}' used with too many ({}) args",
                name, i
            ));
        }

        while args.len() < nargs {
            args.push(ArgData {
                raw: Vec::new(),
                expanded: None,
                stringified: None,
            });
        }

        let xbuf = if nargs == 0 {
            defn.expansion.clone()
        } else {
            self.substitute_args(defn, &mut args, rest_zero)
        };

        self.push_macro_expansion(name, xbuf, true);
    }

    /// Walk the reflist, interleaving expansion text with stringified, raw
    /// or pre-expanded argument copies.
    fn substitute_args(
        &mut self,
        defn: &Definition,
        args: &mut [ArgData],
        rest_zero: bool,
    ) -> Vec<u8> {
        let exp = &defn.expansion;
        let mut xbuf: Vec<u8> = Vec::with_capacity(exp.len());
        let mut offset = 0usize;

        for (pi, ap) in defn.pattern.iter().enumerate() {
            let count_before = xbuf.len();
            xbuf.extend_from_slice(&exp[offset..offset + ap.nchars]);
            offset += ap.nchars;

            // An empty rest arg adjacent to `##` deletes the preceding
            // token run.
            let prev = pi.checked_sub(1).map(|k| &defn.pattern[k]);
            if rest_zero
                && xbuf.len() > count_before
                && ((ap.rest_args && ap.raw_before)
                    || prev.is_some_and(|p| p.rest_args && p.raw_after))
            {
                while xbuf.len() > count_before && xbuf.last().is_some_and(|&c| c == b' ') {
                    xbuf.pop();
                }
                while xbuf.len() > count_before && xbuf.last().is_some_and(|&c| c != b' ') {
                    xbuf.pop();
                }
            }

            if ap.stringify {
                if args[ap.argno].stringified.is_none() {
                    args[ap.argno].stringified =
                        Some(quote_string_for_stringify(&args[ap.argno].raw));
                }
                xbuf.extend_from_slice(args[ap.argno].stringified.as_ref().unwrap());
            } else if ap.raw_before || ap.raw_after {
                let raw = args[ap.argno].raw.clone();
                let mut p = 0usize;
                let mut l = raw.len();
                if ap.raw_before {
                    // Concatenated before: strip leading whitespace and
                    // escape markers.
                    while p < l {
                        if raw[p] == b' ' {
                            p += 1;
                        } else if raw[p] == b'\r' {
                            p += 2;
                        } else {
                            break;
                        }
                    }
                }
                if ap.raw_after {
                    // Concatenated after: strip trailing whitespace and
                    // escape markers.
                    while l > p {
                        if raw[l - 1] == b' ' {
                            l -= 1;
                        } else if raw[l - 1] == b'\r' {
                            l -= 1;
                        } else if raw[l - 1] == b'-' {
                            if l >= p + 2 && raw[l - 2] == b'\r' {
                                l -= 2;
                            } else {
                                break;
                            }
                        } else {
                            break;
                        }
                    }
                }
                // A no-reexpand marker at the very start is dropped: the
                // pasted result is a fresh token.
                if l >= p + 2 && raw[p] == b'\r' && raw[p + 1] == b'-' {
                    p += 2;
                }
                xbuf.extend_from_slice(&raw[p..l]);
            } else {
                if args[ap.argno].expanded.is_none() {
                    let raw = args[ap.argno].raw.clone();
                    args[ap.argno].expanded = Some(self.expand_arg_text(&raw));
                }
                let expanded = args[ap.argno].expanded.as_ref().unwrap();
                if !ap.raw_before
                    && !xbuf.is_empty()
                    && !expanded.is_empty()
                    && unsafe_chars(&self.options, *xbuf.last().unwrap(), expanded[0])
                {
                    xbuf.extend_from_slice(b"\r ");
                }
                xbuf.extend_from_slice(expanded);
                if !ap.raw_after
                    && !xbuf.is_empty()
                    && offset < exp.len()
                    && unsafe_chars(&self.options, *xbuf.last().unwrap(), exp[offset])
                {
                    xbuf.extend_from_slice(b"\r ");
                }
            }
        }

        // Trailing expansion text after the last argument use.
        let last = defn.pattern.last();
        let mut skip_tail = rest_zero && last.is_some_and(|p| p.rest_args && p.raw_after);
        for &c in &exp[offset..] {
            if c == b')' {
                skip_tail = false;
            }
            if !skip_tail {
                xbuf.push(c);
            }
        }

        xbuf
    }

    /// Pre-expand raw argument text by pushing it through the tokenizer
    /// and collecting what comes out, with rescan-safety escapes.
    pub(crate) fn expand_arg_text(&mut self, raw: &[u8]) -> Vec<u8> {
        self.push_synthetic_buffer(raw.to_vec(), true);
        let base = self.buffers.len();
        let mut out: Vec<u8> = Vec::new();
        let mut pending_ws = false;
        loop {
            let t = self.get_token();
            match t.kind {
                TokenKind::Eof => break,
                TokenKind::Pop => {
                    if self.buffers.len() < base {
                        break;
                    }
                }
                TokenKind::Hspace | TokenKind::Vspace | TokenKind::Comment => {
                    pending_ws = true;
                }
                _ => {
                    let bytes = t.text.as_bytes();
                    if pending_ws && !out.is_empty() {
                        out.push(b' ');
                    } else if let Some(&lastb) = out.last()
                        && !bytes.is_empty()
                        && unsafe_chars(&self.options, lastb, bytes[0])
                    {
                        out.extend_from_slice(b"\r ");
                    }
                    if t.no_expand && t.kind == TokenKind::Name {
                        out.extend_from_slice(b"\r-");
                    }
                    out.extend_from_slice(bytes);
                    pending_ws = false;
                }
            }
        }
        out
    }

    /// Push an assembled expansion onto the input stack, trimming the
    /// rescan-safety markers at either end when adjacency is provably
    /// safe, and disabling the macro until the buffer pops.
    pub(crate) fn push_macro_expansion(&mut self, name: &str, mut xbuf: Vec<u8>, disable: bool) {
        let mut advance_cur = false;
        if xbuf.len() >= 3
            && xbuf[0] == b'\r'
            && xbuf[1] == b' '
            && !unsafe_after_unknown(xbuf[2])
        {
            advance_cur = true;
        }

        let next_input = self.buffers.last().and_then(|b| b.peek());
        let n = xbuf.len();
        if n >= 3 && xbuf[n - 2] == b'\r' && xbuf[n - 1] == b' ' {
            let safe = match next_input {
                Some(c2) => !unsafe_chars(&self.options, xbuf[n - 3], c2),
                None => true,
            };
            if safe {
                xbuf.truncate(n - 2);
            }
        }

        // If the whole expansion is the two markers, keep one.
        if xbuf.len() == 2 && advance_cur {
            advance_cur = false;
        }

        self.push_expansion_buffer(name, xbuf);
        if let Some(b) = self.buffers.last_mut() {
            if advance_cur {
                b.pos += 2;
            }
            if disable {
                b.disabled_macro = Some(name.to_string());
            }
        }

        if disable {
            let node = self.macros.lookup_mut(name);
            if let HashNode::Macro(defn) = node {
                *node = HashNode::Disabled(defn.clone());
            }
        }
    }

    /// Expand the builtin macros implemented by the special-symbol
    /// handler. `__DATE__` and `__TIME__` are computed on first use and
    /// cached as constants.
    pub(crate) fn special_symbol(&mut self, kind: BuiltinKind) -> String {
        match kind {
            BuiltinKind::File => {
                let name = self
                    .file_buffer()
                    .and_then(|b| b.nominal_name())
                    .unwrap_or("");
                quote_string(name)
            }
            BuiltinKind::BaseFile => quote_string(&self.base_file.clone()),
            BuiltinKind::Line => self
                .file_buffer()
                .map(|b| b.line.to_string())
                .unwrap_or_else(|| "0".to_string()),
            BuiltinKind::IncludeLevel => {
                let depth = self.buffers.iter().filter(|b| b.is_file()).count();
                depth.saturating_sub(1).to_string()
            }
            BuiltinKind::Date | BuiltinKind::Time => {
                let (date, time) = current_date_time();
                self.macros
                    .insert("__DATE__", HashNode::Const(date.clone()));
                self.macros
                    .insert("__TIME__", HashNode::Const(time.clone()));
                if kind == BuiltinKind::Date { date } else { time }
            }
            BuiltinKind::Stdc => "1".to_string(),
        }
    }

    /// System-header flag of the current file, consulted by pedantic
    /// diagnostics.
    pub(crate) fn in_system_header(&self) -> bool {
        matches!(
            self.file_buffer().map(|b| &b.kind),
            Some(BufferKind::File { system_header: true, .. })
        )
    }
}

fn push_arg_token(toks: &mut Vec<Token>, mut t: Token, pending_ws: &mut bool) {
    t.ws_before = *pending_ws && !toks.is_empty();
    *pending_ws = false;
    toks.push(t);
}

const MONTH_NAMES: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

/// `("Oct 11 1347" style date, "12:34:56" style time)` for the current
/// moment, UTC. Computed once per run and cached in the macro table.
fn current_date_time() -> (String, String) {
    let secs = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let days = (secs / 86400) as i64;
    let rem = secs % 86400;
    let (y, m, d) = civil_from_days(days);
    let date = format!("\"{} {:2} {:4}\"", MONTH_NAMES[(m - 1) as usize], d, y);
    let time = format!(
        "\"{:02}:{:02}:{:02}\"",
        rem / 3600,
        (rem % 3600) / 60,
        rem % 60
    );
    (date, time)
}

/// Days since 1970-01-01 to a civil (year, month, day).
fn civil_from_days(z: i64) -> (i64, u32, u32) {
    let z = z + 719468;
    let era = if z >= 0 { z } else { z - 146096 } / 146097;
    let doe = (z - era * 146097) as u64;
    let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146096) / 365;
    let y = yoe as i64 + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let m = if mp < 10 { mp + 3 } else { mp - 9 } as u32;
    (if m <= 2 { y + 1 } else { y }, m, d)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsafe_chars_pp_number() {
        let o = CppOptions::default();
        assert!(unsafe_chars(&o, b'1', b'2'));
        assert!(unsafe_chars(&o, b'e', b'+'));
        assert!(unsafe_chars(&o, b'a', b'b'));
        assert!(!unsafe_chars(&o, b')', b'('));
        assert!(!unsafe_chars(&o, b'+', b'('));
    }

    #[test]
    fn test_unsafe_chars_operators() {
        let o = CppOptions::default();
        assert!(unsafe_chars(&o, b'+', b'+'));
        assert!(unsafe_chars(&o, b'<', b'='));
        assert!(unsafe_chars(&o, b'&', b'&'));
        assert!(!unsafe_chars(&o, b'<', b'>'));
    }

    #[test]
    fn test_quote_string_for_stringify_collapses_space() {
        let out = quote_string_for_stringify(b"a   b");
        assert_eq!(out, b"\"a b\"".to_vec());
    }

    #[test]
    fn test_quote_string_escapes() {
        let out = quote_string_for_stringify(b"\"hi\"");
        assert_eq!(out, b"\"\\\"hi\\\"\"".to_vec());
    }

    #[test]
    fn test_quote_string_strips_escape_markers() {
        let out = quote_string_for_stringify(b"\r-foo");
        assert_eq!(out, b"\"foo\"".to_vec());
    }

    #[test]
    fn test_civil_from_days_epoch() {
        assert_eq!(civil_from_days(0), (1970, 1, 1));
        assert_eq!(civil_from_days(11016), (2000, 2, 29));
    }

    #[test]
    fn test_frame_expansion() {
        assert_eq!(frame_expansion(b"x"), b"\r x\r ".to_vec());
    }
}
