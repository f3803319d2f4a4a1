//! Preprocessor options.
//!
//! `CppOptions` is the in-memory switchboard the engine consults; the
//! driver fills it from the command line. Diagnostic severity overrides
//! can additionally be loaded from a TOML file with [`DiagnosticsConfig`].

use serde::Deserialize;

/// Language and diagnostic options for one preprocessor run.
#[derive(Debug, Clone, Default)]
pub struct CppOptions {
    /// Assembly input: ignore unknown directives and `# 33`-style lines.
    pub lang_asm: bool,
    /// C99 semantics (varargs macros, `__VA_ARGS__`).
    pub c99: bool,
    pub pedantic: bool,
    pub pedantic_errors: bool,
    /// Imitate the old K&R preprocessor where it matters for diagnostics.
    pub traditional: bool,
    pub dollars_in_ident: bool,
    /// Do not emit `# line "file"` markers.
    pub no_line_commands: bool,
    /// Warn when an undefined identifier is evaluated in `#if`.
    pub warn_undef: bool,
    pub warnings_are_errors: bool,
    pub inhibit_warnings: bool,
    /// Drop comments instead of replacing them with a space on output.
    pub discard_comments: bool,
}

/// Diagnostic overrides loadable from a TOML file. Every field is
/// optional; absent fields leave the command-line setting alone.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DiagnosticsConfig {
    pub warnings_are_errors: Option<bool>,
    pub pedantic: Option<bool>,
    pub pedantic_errors: Option<bool>,
    pub inhibit_warnings: Option<bool>,
    pub warn_undef: Option<bool>,
}

impl DiagnosticsConfig {
    pub fn from_toml(text: &str) -> Result<Self, String> {
        toml::from_str(text).map_err(|e| format!("failed to parse diagnostics config: {}", e))
    }

    pub fn apply(&self, options: &mut CppOptions) {
        if let Some(v) = self.warnings_are_errors {
            options.warnings_are_errors = v;
        }
        if let Some(v) = self.pedantic {
            options.pedantic = v;
        }
        if let Some(v) = self.pedantic_errors {
            options.pedantic_errors = v;
        }
        if let Some(v) = self.inhibit_warnings {
            options.inhibit_warnings = v;
        }
        if let Some(v) = self.warn_undef {
            options.warn_undef = v;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_overrides() {
        let cfg = DiagnosticsConfig::from_toml("warnings_are_errors = true\n").unwrap();
        let mut opts = CppOptions {
            pedantic: true,
            ..CppOptions::default()
        };
        cfg.apply(&mut opts);
        assert!(opts.warnings_are_errors);
        assert!(opts.pedantic);
    }

    #[test]
    fn test_bad_config_is_an_error() {
        assert!(DiagnosticsConfig::from_toml("warnings_are_errors = 3").is_err());
    }
}
