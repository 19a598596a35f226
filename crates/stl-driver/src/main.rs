//! Conformance test driver CLI.
//!
//! Exit codes: 0 on successful conformance, 1 on a static error (lex, parse,
//! link, type), 2 on a stuck or failed execution, 3 on a manifest problem.

use std::path::PathBuf;

use clap::Parser;
use indexmap::IndexMap;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use stl_driver::{manifest, run_test, RunOptions};

#[derive(Parser, Debug)]
#[command(name = "stl-driver")]
#[command(about = "Run an STL conformance test from a manifest")]
struct Cli {
    /// The manifest (*.test) file to run.
    manifest: PathBuf,

    /// Space-separated key=value pairs. Each instance of $key in the
    /// manifest file is replaced by value verbatim; a string value must be
    /// explicitly quoted, e.g.: ip="0.0.0.0"
    #[arg(short = 'a', long = "manifest-args")]
    manifest_args: Option<String>,

    /// Increase logging verbosity to debug level.
    #[arg(short = 'd', long = "debug")]
    debug: bool,

    /// Seed for randomized builtins and selection.
    #[arg(long, default_value = "0")]
    seed: u64,

    /// Select among firable transitions at random instead of declaration
    /// order.
    #[arg(long)]
    randomize: bool,
}

fn main() {
    let cli = Cli::parse();

    let default_filter = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = match &cli.manifest_args {
        Some(spec) => match manifest::parse_args(spec) {
            Ok(args) => args,
            Err(e) => {
                error!("{e}");
                std::process::exit(3);
            }
        },
        None => IndexMap::new(),
    };

    let options = RunOptions {
        seed: cli.seed,
        randomize: cli.randomize,
    };

    match run_test(&cli.manifest, &args, options) {
        Ok(summary) if summary.success() => {
            info!(
                executed = summary.executed.len(),
                "conformance test passed"
            );
        }
        Ok(summary) => {
            error!(
                failed = ?summary.failed,
                remaining = ?summary.remaining,
                "conformance test failed"
            );
            std::process::exit(2);
        }
        Err(e) => {
            error!("{e}");
            std::process::exit(e.exit_code());
        }
    }
}
