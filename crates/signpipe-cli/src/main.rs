//! signpipe - concurrent hash-signing pipeline CLI
//!
//! Signs a list of integers through the single hash → multi hash →
//! combine pipeline and prints the combined signature.

use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};

mod cmd;
mod config;

use config::Config;

#[derive(Parser)]
#[command(name = "signpipe")]
#[command(about = "Concurrent hash-signing pipeline")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    /// Config file path (default: ./signpipe.toml or ~/.config/signpipe/config.toml)
    #[arg(short, long, global = true)]
    config: Option<std::path::PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Sign a list of integers and print the combined signature
    Sign(cmd::sign::SignArgs),
    /// Show current configuration
    Config,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let progress = Arc::new(signpipe_core::ProgressContext::new());

    // Logging:
    //   TTY:     quiet (warn) unless --debug, the spinner shows activity
    //   non-TTY: info unless --debug, logs are the only progress indicator
    let is_tty = progress.is_tty();
    let multi = if is_tty { Some(progress.multi()) } else { None };
    let quiet = is_tty && !cli.debug;
    signpipe_core::init_logging(quiet, cli.debug, multi);

    let config = if let Some(path) = cli.config {
        Config::from_file(&path)?
    } else {
        Config::load()?
    };

    match cli.command {
        Command::Sign(args) => cmd::sign::run(args, &config, &progress),
        Command::Config => {
            use comfy_table::{
                Cell, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL,
            };

            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .apply_modifier(UTF8_ROUND_CORNERS)
                .set_header(vec![
                    Cell::new("Setting").fg(Color::Cyan),
                    Cell::new("Value").fg(Color::Cyan),
                ]);

            table.add_row(vec![
                "Queue capacity",
                &config.pipeline.queue_capacity.to_string(),
            ]);
            table.add_row(vec![
                "Max in flight",
                &config.pipeline.max_in_flight.to_string(),
            ]);
            table.add_row(vec![
                "Fast hash delay",
                &format!("{}ms", config.signer.fast_delay_ms),
            ]);
            table.add_row(vec![
                "Slow hash delay",
                &format!("{}ms", config.signer.slow_delay_ms),
            ]);

            eprintln!("\n{table}");
            Ok(())
        }
    }
}
