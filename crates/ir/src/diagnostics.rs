//! Diagnostic collection shared by all engines.
//!
//! There are three severities: `Ice` for internal inconsistencies, `Error`
//! for faults in the user's source, and `Warning`. Errors and ICEs bump the
//! error count that decides the process exit status; warnings may be
//! upgraded to errors with `warnings_are_errors`. Pedantic diagnostics are
//! emitted through [`DiagnosticSink::pedwarn`], which picks the severity
//! from the `pedantic_errors` setting.

use crate::location::SourceLocation;
use std::fmt;

/// Severity of a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Internal compiler error: a broken invariant, not a user mistake.
    Ice,
    Error,
    Warning,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Ice => write!(f, "internal error"),
            Severity::Error => write!(f, "error"),
            Severity::Warning => write!(f, "warning"),
        }
    }
}

/// A single diagnostic message with an optional primary location and an
/// optional "this was declared here" style secondary note.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
    pub loc: Option<SourceLocation>,
    pub note: Option<(String, SourceLocation)>,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.loc {
            Some(loc) => write!(f, "{}: {}: {}", loc, self.severity, self.message)?,
            None => write!(f, "{}: {}", self.severity, self.message)?,
        }
        if let Some((text, loc)) = &self.note {
            write!(f, "\n{}: note: {}", loc, text)?;
        }
        Ok(())
    }
}

/// Collects diagnostics for one compilation. Owned by the compilation
/// context; engines take `&mut DiagnosticSink`.
#[derive(Debug, Default)]
pub struct DiagnosticSink {
    diagnostics: Vec<Diagnostic>,
    error_count: usize,
    warning_count: usize,
    /// Treat warnings as errors.
    pub warnings_are_errors: bool,
    /// Give all the diagnostics the standard requires.
    pub pedantic: bool,
    /// Turn pedantic warnings into hard errors.
    pub pedantic_errors: bool,
    /// Suppress warning output entirely.
    pub inhibit_warnings: bool,
}

impl DiagnosticSink {
    pub fn new() -> Self {
        DiagnosticSink::default()
    }

    fn push(&mut self, d: Diagnostic) {
        match d.severity {
            Severity::Ice | Severity::Error => self.error_count += 1,
            Severity::Warning => {
                if self.inhibit_warnings {
                    return;
                }
                if self.warnings_are_errors {
                    self.error_count += 1;
                } else {
                    self.warning_count += 1;
                }
            }
        }
        tracing::debug!(target: "mill::diag", "{}", d);
        self.diagnostics.push(d);
    }

    pub fn error(&mut self, loc: Option<SourceLocation>, message: impl Into<String>) {
        self.push(Diagnostic {
            severity: Severity::Error,
            message: message.into(),
            loc,
            note: None,
        });
    }

    pub fn error_with_note(
        &mut self,
        loc: Option<SourceLocation>,
        message: impl Into<String>,
        note: impl Into<String>,
        note_loc: SourceLocation,
    ) {
        self.push(Diagnostic {
            severity: Severity::Error,
            message: message.into(),
            loc,
            note: Some((note.into(), note_loc)),
        });
    }

    pub fn warning(&mut self, loc: Option<SourceLocation>, message: impl Into<String>) {
        self.push(Diagnostic {
            severity: Severity::Warning,
            message: message.into(),
            loc,
            note: None,
        });
    }

    /// Pedantic diagnostic: an error under `pedantic_errors`, a warning
    /// under plain `pedantic`, silent otherwise.
    pub fn pedwarn(&mut self, loc: Option<SourceLocation>, message: impl Into<String>) {
        if self.pedantic_errors {
            self.error(loc, message);
        } else if self.pedantic {
            self.warning(loc, message);
        }
    }

    /// Report an internal inconsistency. The caller decides whether the
    /// situation is recoverable; the count still forces a failing exit.
    pub fn ice(&mut self, loc: Option<SourceLocation>, message: impl Into<String>) {
        self.push(Diagnostic {
            severity: Severity::Ice,
            message: message.into(),
            loc,
            note: None,
        });
    }

    pub fn error_count(&self) -> usize {
        self.error_count
    }

    pub fn warning_count(&self) -> usize {
        self.warning_count
    }

    pub fn has_errors(&self) -> bool {
        self.error_count > 0
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    /// Exit status for a driver: 0 on success, 1 if any error was emitted.
    pub fn exit_status(&self) -> i32 {
        if self.has_errors() { 1 } else { 0 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_counting() {
        let mut sink = DiagnosticSink::new();
        sink.warning(None, "w");
        assert_eq!(sink.error_count(), 0);
        sink.error(None, "e");
        sink.ice(None, "i");
        assert_eq!(sink.error_count(), 2);
        assert_eq!(sink.warning_count(), 1);
        assert_eq!(sink.exit_status(), 1);
    }

    #[test]
    fn test_warnings_as_errors() {
        let mut sink = DiagnosticSink::new();
        sink.warnings_are_errors = true;
        sink.warning(None, "w");
        assert!(sink.has_errors());
    }

    #[test]
    fn test_pedwarn_levels() {
        let mut sink = DiagnosticSink::new();
        sink.pedwarn(None, "quiet");
        assert_eq!(sink.diagnostics().len(), 0);

        sink.pedantic = true;
        sink.pedwarn(None, "warns");
        assert_eq!(sink.warning_count(), 1);

        sink.pedantic_errors = true;
        sink.pedwarn(None, "errors");
        assert_eq!(sink.error_count(), 1);
    }

    #[test]
    fn test_display_with_note() {
        let mut sink = DiagnosticSink::new();
        sink.error_with_note(
            Some(SourceLocation::line_of("a.c", 4)),
            "redefined",
            "previous definition was here",
            SourceLocation::line_of("a.c", 1),
        );
        let text = sink.diagnostics()[0].to_string();
        assert!(text.contains("a.c:4: error: redefined"));
        assert!(text.contains("a.c:1: note: previous definition was here"));
    }
}
