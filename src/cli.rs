//! CLI argument parsing for the headway-worker binary.

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "headway-worker", about = "Headway AVL processing worker")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Consume the live AVL feed (default if no subcommand given)
    Serve,
    /// Replay an archived AVL CSV file through the pipeline
    Replay {
        /// Path to the CSV file (as written by the AVL archiver)
        #[arg(long)]
        file: String,
        /// Time scale: 2.0 replays twice as fast, 0 as fast as possible
        #[arg(long, default_value_t = 0.0)]
        speed: f64,
    },
}
