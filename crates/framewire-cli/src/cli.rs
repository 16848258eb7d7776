//! Clap CLI definitions for Framewire.

use clap::{Args, Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;

pub const AFTER_HELP: &str = "\
\x1b[1;36mExamples:\x1b[0m
  framewire smoke                                   Echo both ways between two in-process frames
  framewire smoke --alert                           Same, raising echo alerts on stderr
  framewire serve --listen 127.0.0.1:7700 --child client-app --allow-origin client-app
  framewire join --connect 127.0.0.1:7700 --name client-app --any-origin --data '{\"hi\":1}'";

/// Framewire: a cross-context publish/subscribe message bus.
#[derive(Parser)]
#[command(name = "framewire", version, after_help = AFTER_HELP)]
pub struct Cli {
    /// Path to a TOML bus configuration (serve and join).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(flatten)]
    pub origins: OriginArgs,

    #[command(subcommand)]
    pub command: Commands,
}

/// Origin policy flags, used when no configuration file is given.
#[derive(Args, Debug, Clone, Default)]
pub struct OriginArgs {
    /// Accept messages from any context.
    #[arg(long, global = true, conflicts_with = "allow_origin")]
    pub any_origin: bool,

    /// Accept messages from this context id (repeatable).
    #[arg(long = "allow-origin", value_name = "ID", global = true)]
    pub allow_origin: Vec<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Bind a server and a client bus across in-process frames and echo both ways.
    Smoke {
        /// Raise received echoes as alerts.
        #[arg(long)]
        alert: bool,
    },
    /// Host a socket link and a server bus, logging echoes until Ctrl+C.
    Serve {
        /// Address to listen on.
        #[arg(long, default_value = "127.0.0.1:7700")]
        listen: SocketAddr,
        /// Context id of the child to bind in server mode.
        #[arg(long)]
        child: String,
        /// Shared secret required from connecting contexts.
        #[arg(long)]
        secret: Option<String>,
    },
    /// Connect to a socket link, send one event to the parent and exit.
    Join {
        /// Address of the listening context.
        #[arg(long, default_value = "127.0.0.1:7700")]
        connect: SocketAddr,
        /// This context's id.
        #[arg(long)]
        name: String,
        /// Event to send.
        #[arg(long, default_value = "echo")]
        event: String,
        /// JSON payload of the event.
        #[arg(long, default_value = "null")]
        data: String,
        /// Milliseconds to keep listening after sending.
        #[arg(long, default_value_t = 500)]
        wait_ms: u64,
        /// Shared secret expected by the listener.
        #[arg(long)]
        secret: Option<String>,
    },
}
