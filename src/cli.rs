use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "bubble")]
#[command(version)]
#[command(about = "Goal-directed desktop UI action resolution")]
#[command(long_about = r#"
Bubble turns a goal into one grounded UI action per trigger: it captures the
screen, asks a reasoning backend for the next atomic action, detects UI
elements with OmniParser, and grounds the action onto one element.

Examples:
  bubble run --goal "save the file" --screenshot /tmp/screen.png
  bubble serve
  bubble check-config
"#)]
pub struct Cli {
    /// Path to config.toml (otherwise searched next to the binary, in the
    /// working directory, then in the user config directory)
    #[arg(long, global = true, env = "BUBBLE_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Resolve one action per line read on stdin (press Enter to trigger)
    Run {
        /// Overall goal for the session
        #[arg(long)]
        goal: String,

        /// Read this screenshot file on every trigger instead of capturing the screen
        #[arg(long)]
        screenshot: Option<PathBuf>,
    },

    /// Serve the line-delimited JSON protocol on stdin/stdout
    Serve,

    /// Load and validate the configuration without contacting any backend
    CheckConfig,
}
