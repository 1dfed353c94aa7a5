//! tcpolc entry point.
//!
//! Dispatches the `config`/`check`/`build` modes of the traffic-control
//! policy front end. `build` reads IR from standard input and terminates
//! with a non-zero status on any defect; `config` and `check` succeed
//! without touching the engine.

use std::io;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::error;

use tcpolc::{run_build, run_passthrough, BuildOptions};

/// Traffic-control policy front end
#[derive(Parser, Debug)]
#[command(name = "tcpolc")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand, Debug)]
enum Mode {
    /// Report front-end configuration to the IR producer
    Config,
    /// Validate the front-end environment
    Check,
    /// Read policy IR from standard input and build the graph
    Build {
        /// Print the full policy graph after a successful build
        #[arg(long)]
        dump_graph: bool,
        /// Print the simplified qdisc/class hierarchy
        #[arg(long)]
        dump_hierarchy: bool,
    },
}

fn main() -> ExitCode {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&args.log_level)),
        )
        .init();

    match args.mode {
        Mode::Config => {
            run_passthrough("config");
            ExitCode::SUCCESS
        }
        Mode::Check => {
            run_passthrough("check");
            ExitCode::SUCCESS
        }
        Mode::Build {
            dump_graph,
            dump_hierarchy,
        } => {
            let options = BuildOptions {
                dump_graph,
                dump_hierarchy,
            };
            let stdin = io::stdin();
            match run_build(stdin.lock(), options) {
                Ok(output) => {
                    print!("{}", output);
                    ExitCode::SUCCESS
                }
                Err(err) => {
                    error!("build failed: {}", err);
                    ExitCode::FAILURE
                }
            }
        }
    }
}
