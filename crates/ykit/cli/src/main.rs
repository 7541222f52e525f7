//! Command-line tool for the OATH and FIDO2 applications of a security key
use clap::{Parser, Subcommand};

mod commands;
mod utils;

use commands::{Fido2Command, OathCommand};
use utils::{reader, session::KeyConnection};

#[derive(Parser, Debug)]
#[command(version, about = "Manage OATH codes and FIDO2 on a hardware security key")]
struct Cli {
    /// Only use readers whose name contains this text (case-insensitive)
    #[arg(short, long, global = true)]
    reader: Option<String>,

    /// Debug level output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List available readers
    Readers,

    /// Manage OATH credentials
    #[command(subcommand)]
    Oath(OathCommand),

    /// Inspect the FIDO2 application
    #[command(subcommand)]
    Fido2(Fido2Command),
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    if let Commands::Readers = cli.command {
        return reader::list_readers(cli.reader.as_deref());
    }

    let key = KeyConnection::open(cli.reader.as_deref())?;
    match cli.command {
        Commands::Readers => Ok(()),
        Commands::Oath(command) => command.run(&key),
        Commands::Fido2(command) => command.run(&key),
    }
}

fn setup_logging(verbose: bool) {
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .init();
}
