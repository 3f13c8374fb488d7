mod cli;
mod error;
mod logging;
mod loopback;
mod session;

use anyhow::Context;
use clap::Parser;
use tracing::debug;

use crate::cli::{Cli, Command};
use crate::error::CliError;
use crate::session::Mode;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let log_config = cli.logging.to_config();
    logging::init(&log_config).map_err(|err| CliError::Logging(err.to_string()))?;
    debug!(log_level = ?log_config.level, log_file = ?log_config.file, "logging configured");

    match cli.command {
        Command::Call(args) => session::run(args, Mode::Call)
            .await
            .context("call failed")?,
        Command::Join(args) => session::run(args, Mode::Join)
            .await
            .context("join failed")?,
        Command::Loopback => {
            let report = loopback::run().await.context("loopback failed")?;
            println!("{report}");
        }
    }
    Ok(())
}
