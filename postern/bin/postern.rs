use std::{path::PathBuf, process::ExitCode};

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "postern", version, about = "Mail-gateway decision engine")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Parse a configuration file and report whether it is usable
    Check {
        /// Path to the RON configuration file
        config: PathBuf,
    },
}

fn main() -> ExitCode {
    postern_common::logging::init();

    let cli = Cli::parse();
    match cli.command {
        Command::Check { config } => match postern::config::load(&config) {
            Ok(loaded) => {
                println!(
                    "{}: ok ({} blacklisted, {} softlisted symbols, rcpt window {}s)",
                    config.display(),
                    loaded.spam.blacklist.len(),
                    loaded.spam.softlist.len(),
                    loaded.rate.rcpt_window_secs,
                );
                ExitCode::SUCCESS
            }
            Err(error) => {
                eprintln!("{}: {error}", config.display());
                ExitCode::FAILURE
            }
        },
    }
}
