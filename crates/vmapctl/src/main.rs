//! Operator CLI for the mapping layer.
//!
//! Drives an in-process dispatcher: one-shot queries, a single raw JSON
//! request, or a batch of newline-delimited JSON requests (the shape the
//! control plane speaks natively). Backing stores are image files handed
//! in as `--store name=path`.

use std::fs;
use std::io::{self, BufRead, Write};
use std::sync::{Arc, Once};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use encryption::RegistryConfig;
use protocol_ctl::Dispatcher;
use serde_json::json;
use storage::{FileStore, StorePool};
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let format = std::env::var("VMAP_LOG_FORMAT").unwrap_or_else(|_| "compact".to_string());

        if format.eq_ignore_ascii_case("json") {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .json()
                .init();
        } else {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .compact()
                .init();
        }
    });
}

#[derive(Parser)]
#[command(name = "vmapctl", about = "Control the logical-volume mapping layer")]
struct Cli {
    /// Backing store registrations, `name=path`, repeatable.
    #[arg(long = "store", global = true)]
    stores: Vec<String>,

    /// Disable hardware-accelerated ciphers for this invocation.
    #[arg(long, global = true)]
    no_hw_crypto: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the dispatcher's protocol version.
    Version,
    /// Enumerate target types and cipher rows.
    Targets,
    /// Send one raw JSON request and print the response.
    Request {
        /// The request object, e.g. '{"command":"names"}'.
        json: String,
    },
    /// Run newline-delimited JSON requests from a file, or stdin with no
    /// file. Blank lines and `#` comments are skipped.
    Batch {
        file: Option<String>,
    },
}

fn build_dispatcher(cli: &Cli) -> Result<Dispatcher> {
    let stores = Arc::new(StorePool::new());
    for spec in &cli.stores {
        let (name, path) = spec
            .split_once('=')
            .with_context(|| format!("--store wants name=path, got {:?}", spec))?;
        let store = FileStore::open(path)
            .with_context(|| format!("opening backing store {:?}", path))?;
        stores.register(name, Arc::new(store));
    }

    let config = RegistryConfig {
        disable_hardware: cli.no_hw_crypto,
    };
    Ok(Dispatcher::with_defaults(config, stores))
}

fn run_batch(dispatcher: &Dispatcher, input: Box<dyn BufRead>) -> Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    for line in input.lines() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let response = dispatcher.handle_str(trimmed);
        writeln!(out, "{}", response)?;
    }
    Ok(())
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let dispatcher = build_dispatcher(&cli)?;

    match &cli.command {
        Command::Version => {
            let out = dispatcher.handle(json!({ "command": "version" }));
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        Command::Targets => {
            let out = dispatcher.handle(json!({ "command": "targets" }));
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        Command::Request { json } => {
            println!("{}", dispatcher.handle_str(json));
        }
        Command::Batch { file } => match file {
            Some(path) => {
                let content =
                    fs::File::open(path).with_context(|| format!("opening batch {:?}", path))?;
                run_batch(&dispatcher, Box::new(io::BufReader::new(content)))?;
            }
            None => {
                let stdin = io::stdin();
                let locked = stdin.lock();
                // a batch from a terminal is almost always a mistake
                if stdin_is_terminal() {
                    bail!("batch mode reads JSON requests from stdin; pipe them in or pass a file");
                }
                run_batch(&dispatcher, Box::new(locked))?;
            }
        },
    }
    Ok(())
}

fn stdin_is_terminal() -> bool {
    use std::io::IsTerminal;
    io::stdin().is_terminal()
}
