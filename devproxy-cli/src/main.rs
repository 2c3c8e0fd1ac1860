//! CLI for devproxy sessions and wire frames.

#![allow(
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::missing_docs_in_private_items
)]

mod frame;
mod remote;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use devproxy::CodecKind;
use tokio::io::AsyncReadExt;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "devproxy", version, about = "Device proxy client and frame toolkit")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Decode one envelope (framed or bare) and print it as JSON.
    Decode {
        /// Wire format of the input.
        #[arg(long, default_value = "pack")]
        codec: CodecKind,
        /// Input file, or `-` for stdin.
        #[arg(default_value = "-")]
        input: String,
    },

    /// Encode a JSON envelope into a length-prefixed frame.
    Encode {
        /// Wire format of the output.
        #[arg(long, default_value = "pack")]
        codec: CodecKind,
        /// Print the frame as hex instead of raw bytes.
        #[arg(long)]
        hex: bool,
        /// Input file, or `-` for stdin.
        #[arg(default_value = "-")]
        input: String,
    },

    /// Print the routing header of a frame.
    Inspect {
        /// Wire format of the input.
        #[arg(long, default_value = "pack")]
        codec: CodecKind,
        /// Input file, or `-` for stdin.
        #[arg(default_value = "-")]
        input: String,
    },

    /// Probe an address from a proxy's network.
    Ping {
        #[command(flatten)]
        conn: remote::ConnectArgs,
        /// Address to probe (`ip:port` or `host:port`).
        address: String,
    },

    /// Resolve names, discover services, or list directories on a proxy.
    Browse {
        #[command(flatten)]
        conn: remote::ConnectArgs,
        #[command(subcommand)]
        action: remote::BrowseAction,
    },

    /// Generate shell completion scripts.
    #[command(hide = true)]
    Completion {
        /// Target shell.
        shell: Shell,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = Cli::parse().dispatch().await {
        eprintln!("devproxy: {e:#}");
        std::process::exit(1);
    }
}

impl Cli {
    async fn dispatch(self) -> Result<()> {
        match self.command {
            Command::Decode { codec, input } => frame::decode(codec, &read_input(&input).await?),
            Command::Encode { codec, hex, input } => {
                frame::encode(codec, hex, &read_input(&input).await?)
            }
            Command::Inspect { codec, input } => frame::inspect(codec, &read_input(&input).await?),
            Command::Ping { conn, address } => remote::ping(&conn, &address).await,
            Command::Browse { conn, action } => remote::browse(&conn, action).await,
            Command::Completion { shell } => {
                clap_complete::generate(
                    shell,
                    &mut Self::command(),
                    "devproxy",
                    &mut std::io::stdout(),
                );
                Ok(())
            }
        }
    }
}

/// Reads all of `input`, where `-` means stdin.
async fn read_input(input: &str) -> Result<Vec<u8>> {
    if input == "-" {
        let mut buf = Vec::new();
        tokio::io::stdin()
            .read_to_end(&mut buf)
            .await
            .context("failed to read stdin")?;
        return Ok(buf);
    }
    let path = PathBuf::from(input);
    tokio::fs::read(&path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))
}
