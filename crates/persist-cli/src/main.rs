//! Command-line front-end for the persistent data-structure engine (§6.3).
//!
//! Thin over `persist_engine`: parses arguments, opens an [`Engine`], dispatches one operation,
//! flushes, and exits. All engine-level logging goes through `tracing`; this binary is the only
//! place in the workspace that installs a subscriber (`persist_engine` itself never does).

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{ArgEnum, Parser, Subcommand};
use persist_engine::bptree::Mapping;
use persist_engine::{Engine, EngineError};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[clap(name = "persist", about = "CLI front-end for the persistent data-structure engine")]
struct Cli {
    /// Path to the backing file; created if it does not already exist.
    #[clap(long, default_value = "persist.db")]
    file: PathBuf,

    /// Total size, in bytes, of the backing file.
    #[clap(long, default_value_t = persist_engine::METASLAB_SIZE)]
    file_size: u64,

    /// Target data-structure kind.
    #[clap(arg_enum)]
    kind: Kind,

    /// The data structure's id (hashed into a registry key).
    id: String,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, ArgEnum)]
enum Kind {
    List,
    Bptree,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Creates `id`. For `bptree`, `--branching-factor` sets the node fanout (default 4).
    Create {
        #[clap(long, default_value_t = 4)]
        branching_factor: usize,
    },
    /// Deletes `id` and frees everything it owns.
    Delete,
    /// Appends `key` (list) or inserts `key` (bptree, mapped to itself).
    Add { key: u64 },
    /// Removes the current tail (list only).
    Remove,
    /// Dumps `id`'s contents.
    Print,
    /// Creates `id` as a snapshot of `parent_id`'s current state (list only).
    Snapshot { parent_id: String },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {}", err);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<(), EngineError> {
    info!(file = %cli.file.display(), kind = ?cli.kind, id = %cli.id, command = ?cli.command, "Dispatching command.");
    let mut engine = Engine::open(&cli.file, cli.file_size)?;

    match (&cli.kind, &cli.command) {
        (Kind::List, Command::Create { .. }) => {
            engine.bind_list(&cli.id)?;
        }
        (Kind::List, Command::Delete) => {
            engine.bind_list(&cli.id)?.clear()?;
        }
        (Kind::List, Command::Add { key }) => {
            engine.bind_list(&cli.id)?.push(*key)?;
        }
        (Kind::List, Command::Remove) => {
            engine.bind_list(&cli.id)?.pop()?;
        }
        (Kind::List, Command::Print) => {
            let values = engine.bind_list(&cli.id)?.dump();
            println!("{:?}", values);
        }
        (Kind::List, Command::Snapshot { parent_id }) => {
            engine.snapshot(&cli.id, parent_id)?;
        }
        (Kind::Bptree, Command::Create { branching_factor }) => {
            engine.create_bptree(&cli.id, *branching_factor)?;
        }
        (Kind::Bptree, Command::Delete) => {
            engine.delete_bptree(&cli.id)?;
        }
        (Kind::Bptree, Command::Add { key }) => {
            let tree = engine.bptree_mut(&cli.id).ok_or_else(|| not_found(&cli.id))?;
            tree.insert(
                *key,
                Mapping {
                    reference: *key,
                    offset: 0,
                    size: 0,
                },
            )?;
        }
        (Kind::Bptree, Command::Remove) => {
            return Err(EngineError::InvalidArgument {
                reason: "bptree does not support remove; use add/print/delete".to_string(),
            });
        }
        (Kind::Bptree, Command::Print) => {
            let tree = engine.bptree(&cli.id).ok_or_else(|| not_found(&cli.id))?;
            let mut buf = Vec::new();
            tree.dump_structure(&mut buf)?;
            print!("{}", String::from_utf8_lossy(&buf));
        }
        (Kind::Bptree, Command::Snapshot { .. }) => {
            return Err(EngineError::InvalidArgument {
                reason: "bptree does not support snapshot; only the persistent list does".to_string(),
            });
        }
    }

    engine.flush()?;
    Ok(())
}

fn not_found(id: &str) -> EngineError {
    EngineError::NotFound {
        reason: format!("no bptree named {:?} in this session", id),
    }
}
