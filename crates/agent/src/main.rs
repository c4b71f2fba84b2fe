#![forbid(unsafe_code)]

mod cli;
mod reload;
mod shutdown;
mod startup;

use anyhow::Result;

use cli::Command;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = cli::parse();

    match cli.command {
        Some(Command::Version) => {
            println!("npset-agent {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }

        // No subcommand = run the agent daemon
        None => startup::run(&cli).await,
    }
}
