//! Plugin binary entry point.
//!
//! Launched by the host this serves the plugin protocol. Run by hand with
//! `--debuggable` it serves in debug mode and prints reattach instructions.

use std::process::ExitCode;

use clap::{ArgAction, Parser};
use tracing::error;

use terraform_provider_random::{debug, init_logging, random, serve};

/// Command-line flags.
#[derive(Debug, Parser)]
#[command(name = "terraform-provider-random", version, about)]
struct Cli {
    /// Start the provider for use with a debugger and print reattach instructions.
    #[arg(
        long,
        num_args = 0..=1,
        default_missing_value = "true",
        action = ArgAction::Set,
        default_value_t = false
    )]
    debuggable: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    init_logging();
    let cli = Cli::parse();

    let result = if cli.debuggable {
        debug::run_debuggable(random::provider(), random::PROVIDER_ADDRESS).await
    } else {
        serve(random::provider()).await
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Provider exited with error");
            ExitCode::FAILURE
        },
    }
}
