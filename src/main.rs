//! `nscheme` CLI: run a single source file (or stdin) to completion.

use clap::error::ErrorKind;
use clap::Parser as ClapParser;
use nscheme::config::Config;
use nscheme::error::NSchemeError;
use std::io::Read;
use std::path::PathBuf;
use std::process;

#[derive(ClapParser)]
#[command(name = "nscheme")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Batch interpreter for a small Scheme-family language", long_about = None)]
struct Cli {
    /// Source file to run. Reads from stdin when omitted.
    input: Option<PathBuf>,

    /// Print each executed instruction, the value stack, and frame depth.
    #[arg(short, long)]
    trace: bool,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            // `--help`/`--version` are not argument errors: let clap print
            // them on its own chosen stream and exit 0, same as always.
            if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) {
                e.exit();
            }
            report_and_exit(NSchemeError::ArgumentError(e.to_string()));
        }
    };

    let (source, name) = match &cli.input {
        Some(path) => match std::fs::read_to_string(path) {
            Ok(s) => (s, path.display().to_string()),
            Err(e) => {
                eprintln!("nscheme: could not read {}: {e}", path.display());
                process::exit(1);
            }
        },
        None => {
            let mut s = String::new();
            if let Err(e) = std::io::stdin().read_to_string(&mut s) {
                eprintln!("nscheme: could not read stdin: {e}");
                process::exit(1);
            }
            (s, "<stdin>".to_string())
        }
    };

    let config = Config::from_env();
    match nscheme::run_source(&source, &name, config, cli.trace) {
        Ok(()) => {}
        Err(e) => report_and_exit(e),
    }
}

/// Prints a run-time error the same way for every stage of the pipeline and
/// exits with its `exit_code()` (spec.md §7); never returns.
fn report_and_exit(e: NSchemeError) -> ! {
    eprintln!("nscheme: {e}");
    process::exit(e.exit_code());
}
