//! Subcommand dispatch and execution.
//!
//! The [`dispatch`] function routes the parsed CLI to the appropriate
//! subcommand handler: [`run`] or [`health`]. Each handler lives in its own
//! submodule.

pub mod health;
pub mod run;

use crate::cli::{Cli, Commands};
use crate::error::GatewayError;

pub async fn dispatch(cli: Cli) -> Result<(), GatewayError> {
    match cli.command {
        Some(Commands::Run(args)) => run::execute(*args).await,
        Some(Commands::Health(args)) => health::execute(args).await,
        None => {
            print_welcome();
            Ok(())
        }
    }
}

fn print_welcome() {
    let version = env!("CARGO_PKG_VERSION");
    println!(
        "\n  gatehouse v{version} \u{2014} resilient API gateway\n\n  \
         No command provided. To get started:\n\n    \
         gatehouse run                     Start against redis://127.0.0.1:6379\n    \
         gatehouse run --without-redis     Start without the shared store (degraded)\n    \
         gatehouse health                  Probe a running instance\n    \
         gatehouse --help                  See all commands and options\n"
    );
}
