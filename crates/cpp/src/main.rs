//! millcpp driver
//!
//! Command-line interface for the mill C preprocessor: expands macros and
//! executes directives in each input file, writing program text to stdout
//! and diagnostics to stderr. Exit status is 0 only when no errors were
//! emitted.

use clap::{CommandFactory, Parser as ClapParser};
use clap_complete::{Shell, generate};
use mill_cpp::{CppOptions, DiagnosticsConfig, FsResolver, Reader};
use std::io;
use std::path::PathBuf;
use std::process;

#[derive(ClapParser)]
#[command(name = "millcpp")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "mill C preprocessor", long_about = None)]
struct Cli {
    /// Input source files
    files: Vec<PathBuf>,

    /// Define a macro, as with `#define NAME BODY` (default body: 1)
    #[arg(short = 'D', value_name = "NAME[=BODY]")]
    defines: Vec<String>,

    /// Undefine a macro, as with `#undef NAME`
    #[arg(short = 'U', value_name = "NAME")]
    undefs: Vec<String>,

    /// Make an assertion, as with `#assert PRED(ANSWER)`
    #[arg(short = 'A', value_name = "PRED(ANSWER)")]
    asserts: Vec<String>,

    /// Add a directory to the include search path
    #[arg(short = 'I', value_name = "DIR")]
    include_dirs: Vec<PathBuf>,

    /// Assembly input: ignore unknown directives and `# 33` lines
    #[arg(long)]
    lang_asm: bool,

    /// Enable C99 semantics (varargs macros)
    #[arg(long)]
    c99: bool,

    /// Issue all the diagnostics ISO C requires
    #[arg(long)]
    pedantic: bool,

    /// Like --pedantic, but the diagnostics are errors
    #[arg(long)]
    pedantic_errors: bool,

    /// Imitate the traditional (K&R) preprocessor where it matters
    #[arg(long)]
    traditional: bool,

    /// Permit `$` in identifiers
    #[arg(long)]
    dollars_in_ident: bool,

    /// Suppress `# line "file"` markers in the output
    #[arg(long)]
    no_line_commands: bool,

    /// Warn when an undefined identifier appears in `#if`
    #[arg(long)]
    warn_undef: bool,

    /// Treat all warnings as errors
    #[arg(long)]
    warnings_are_errors: bool,

    /// Load diagnostic overrides from a TOML file
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Generate shell completion script and exit
    #[arg(long, value_enum, value_name = "SHELL")]
    completions: Option<Shell>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    if let Some(shell) = cli.completions {
        let mut cmd = Cli::command();
        let name = cmd.get_name().to_string();
        generate(shell, &mut cmd, name, &mut io::stdout());
        return;
    }

    if cli.files.is_empty() {
        eprintln!("millcpp: no input files");
        process::exit(1);
    }

    let mut options = CppOptions {
        lang_asm: cli.lang_asm,
        c99: cli.c99,
        pedantic: cli.pedantic,
        pedantic_errors: cli.pedantic_errors,
        traditional: cli.traditional,
        dollars_in_ident: cli.dollars_in_ident,
        no_line_commands: cli.no_line_commands,
        warn_undef: cli.warn_undef,
        warnings_are_errors: cli.warnings_are_errors,
        ..CppOptions::default()
    };

    if let Some(path) = &cli.config {
        match std::fs::read_to_string(path) {
            Ok(text) => match DiagnosticsConfig::from_toml(&text) {
                Ok(cfg) => cfg.apply(&mut options),
                Err(e) => {
                    eprintln!("millcpp: {}", e);
                    process::exit(1);
                }
            },
            Err(e) => {
                eprintln!("millcpp: cannot read {}: {}", path.display(), e);
                process::exit(1);
            }
        }
    }

    let mut status = 0;
    for file in &cli.files {
        status = status.max(run_file(file, &cli, &options));
    }
    process::exit(status);
}

/// Preprocess one input file in its own context.
fn run_file(file: &PathBuf, cli: &Cli, options: &CppOptions) -> i32 {
    let text = match std::fs::read_to_string(file) {
        Ok(t) => t,
        Err(e) => {
            eprintln!("millcpp: {}: {}", file.display(), e);
            return 1;
        }
    };

    let mut reader = Reader::new(options.clone());
    reader.set_resolver(Box::new(FsResolver::new(cli.include_dirs.clone())));

    // Command-line definitions, in the order given.
    for d in &cli.defines {
        reader.define_from_cmdline(d);
    }
    for u in &cli.undefs {
        reader.undef_from_cmdline(u);
    }
    for a in &cli.asserts {
        reader.assert_from_cmdline(a);
    }

    reader.push_source(&file.display().to_string(), &text);

    if !options.no_line_commands {
        println!("# 1 \"{}\"", file.display());
    }
    let output = reader.preprocess_to_string();
    print!("{}", output);

    for d in reader.sink.diagnostics() {
        eprintln!("{}", d);
    }
    reader.exit_status()
}
