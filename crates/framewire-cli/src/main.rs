//! Framewire CLI: connectivity smoke tests for the message bus.
//!
//! `smoke` wires two buses across in-process frames; `serve` and `join` wire
//! them across a TCP socket link between two processes.

mod cli;
mod cmd;
mod ui;

use crate::cli::*;
use clap::Parser;

fn init_tracing_stderr() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_tracing_stderr();

    match cli.command {
        Commands::Smoke { alert } => cmd::smoke::cmd_smoke(alert),
        Commands::Serve {
            listen,
            child,
            secret,
        } => cmd::serve::cmd_serve(cli.config, &cli.origins, listen, &child, secret),
        Commands::Join {
            connect,
            name,
            event,
            data,
            wait_ms,
            secret,
        } => cmd::join::cmd_join(
            cli.config,
            &cli.origins,
            cmd::join::JoinRequest {
                connect,
                name,
                event,
                data,
                wait_ms,
                secret,
            },
        ),
    }
}
