//! The input buffer stack.
//!
//! Input comes from a strict LIFO of buffers: source files, macro
//! expansions, and synthetic text (command-line `-D`/`-U`/`-A`, argument
//! pre-expansion). Each buffer tracks its own line/column counters, the
//! conditional-stack depth at the time it was pushed (so an unbalanced
//! `#if` can be pinned on the right file), and an optional cleanup that
//! re-enables a disabled macro when the expansion buffer pops.

use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub enum BufferKind {
    File {
        /// Resolved path, used as the re-include key.
        path: Arc<str>,
        /// Name reported in diagnostics and `__FILE__`; `#line` changes it.
        nominal_name: String,
        system_header: bool,
        /// Directory of the file, for quoted includes.
        dir: Option<PathBuf>,
        /// Position in the search path where the file was found, for
        /// `#include_next`.
        search_index: Option<usize>,
    },
    Macro {
        name: String,
    },
    /// Command-line text or argument pre-expansion.
    Synthetic,
}

#[derive(Debug)]
pub struct Buffer {
    pub text: Vec<u8>,
    pub pos: usize,
    pub line: u32,
    /// Byte position where the current line starts, for column numbers.
    pub line_start: usize,
    pub kind: BufferKind,
    /// `\r`-escape processing mode: set for macro and pre-expanded text.
    pub has_escapes: bool,
    /// Conditional-stack depth when this buffer was pushed.
    pub if_depth: usize,
    /// Macro to restore to its enabled state when this buffer pops.
    pub disabled_macro: Option<String>,
}

impl Buffer {
    pub fn new(text: Vec<u8>, kind: BufferKind, has_escapes: bool, if_depth: usize) -> Buffer {
        Buffer {
            text,
            pos: 0,
            line: 1,
            line_start: 0,
            kind,
            has_escapes,
            if_depth,
            disabled_macro: None,
        }
    }

    pub fn is_file(&self) -> bool {
        matches!(self.kind, BufferKind::File { .. })
    }

    pub fn col(&self) -> u32 {
        (self.pos - self.line_start) as u32 + 1
    }

    pub fn at_end(&self) -> bool {
        self.pos >= self.text.len()
    }

    pub fn peek(&self) -> Option<u8> {
        self.text.get(self.pos).copied()
    }

    pub fn peek_at(&self, off: usize) -> Option<u8> {
        self.text.get(self.pos + off).copied()
    }

    pub fn nominal_name(&self) -> Option<&str> {
        match &self.kind {
            BufferKind::File { nominal_name, .. } => Some(nominal_name),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_tracking() {
        let mut b = Buffer::new(b"abc".to_vec(), BufferKind::Synthetic, false, 0);
        assert_eq!(b.col(), 1);
        b.pos = 2;
        assert_eq!(b.col(), 3);
    }
}
