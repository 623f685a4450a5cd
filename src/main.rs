//! Purpose: `emstore` CLI entry point and command dispatch.
//! Role: Binary crate root; parses args, runs commands, emits JSON on stdout.
//! Invariants: Errors are emitted as JSON on stderr.
//! Invariants: Process exit code is derived from `api::to_exit_code`.
//! Invariants: All store mutations go through the library's Writer/Converter.
use std::path::PathBuf;
use std::sync::Arc;

use clap::{CommandFactory, Parser, Subcommand, error::ErrorKind as ClapErrorKind};
use clap_complete::aot::Shell;
use serde_json::json;

use emstore::api::{Error, ErrorKind, Namespace, StoreConfig, TableStore, to_exit_code};
use emstore::convert::{ConvertOptions, Converter, FileOutcome};
use emstore::{locations, logging};

#[derive(Parser)]
#[command(name = "emstore", version, about = "Two-tier parquet table store for NEMSIS-derived datasets")]
struct Cli {
    /// Enable per-component debug logging (otherwise RUST_LOG applies).
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Convert a delimited extract (or a directory of them) into the
    /// reference namespace.
    Convert {
        /// Source file or directory of `.csv`/`.txt` files.
        path: PathBuf,
        /// Store root containing the `reference/` and `scratch/` tiers.
        #[arg(long)]
        root: PathBuf,
        /// Field delimiter of the source files.
        #[arg(long, default_value = ",")]
        delimiter: char,
        /// Target in-memory bytes per partition frame.
        #[arg(long, default_value_t = 100_000_000)]
        target_memory: usize,
        /// Keep source files after a verified conversion.
        #[arg(long)]
        keep_source: bool,
    },
    /// List the tables stored in a namespace.
    Ls {
        #[arg(long)]
        root: PathBuf,
        /// List the scratch namespace instead of reference.
        #[arg(long)]
        tmp: bool,
    },
    /// Remove a scratch table.
    Rm {
        name: String,
        #[arg(long)]
        root: PathBuf,
    },
    /// Work with location-code groupings in `location-codes-groupings/`.
    Codes {
        #[command(subcommand)]
        action: CodesAction,
    },
    /// Generate shell completions.
    Completions { shell: Shell },
}

#[derive(Subcommand)]
enum CodesAction {
    /// List stored groupings.
    List {
        #[arg(long, default_value = ".")]
        dir: PathBuf,
    },
    /// Create the grouping folder.
    Init {
        #[arg(long, default_value = ".")]
        dir: PathBuf,
    },
    /// Check a grouping against the Y92 code listing.
    Validate {
        name: String,
        #[arg(long, default_value = ".")]
        dir: PathBuf,
    },
    /// Look up the description of a location code.
    Describe { code: String },
}

fn main() {
    let exit_code = match run() {
        Ok(code) => code,
        Err(err) => {
            emit_error(&err);
            to_exit_code(err.kind())
        }
    };
    std::process::exit(exit_code);
}

fn run() -> Result<i32, Error> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => match err.kind() {
            ClapErrorKind::DisplayHelp
            | ClapErrorKind::DisplayVersion
            | ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand => {
                err.print().map_err(|io_err| {
                    Error::new(ErrorKind::Io)
                        .with_message("failed to write help")
                        .with_source(io_err)
                })?;
                return Ok(0);
            }
            _ => {
                return Err(Error::new(ErrorKind::Usage).with_message(err.to_string()));
            }
        },
    };

    let filter = if cli.verbose {
        logging::component_filter(tracing::Level::DEBUG)
    } else {
        logging::env_or("warn")
    };
    logging::init(filter)?;

    match cli.command {
        Command::Convert {
            path,
            root,
            delimiter,
            target_memory,
            keep_source,
        } => {
            let delimiter = u8::try_from(delimiter).map_err(|_| {
                Error::new(ErrorKind::Usage).with_message("delimiter must be a single ASCII character")
            })?;
            let converter = Converter::new(
                Arc::new(StoreConfig::new(root)),
                ConvertOptions {
                    delimiter,
                    target_in_memory_size: target_memory,
                    keep_source,
                },
            );
            if path.is_dir() {
                let outcomes = converter.convert_dir(&path)?;
                let failed = outcomes
                    .iter()
                    .filter(|outcome| outcome.result.is_err())
                    .count();
                print_json(&dir_outcome_json(&outcomes));
                if failed > 0 {
                    return Ok(to_exit_code(ErrorKind::Serialization));
                }
            } else {
                let outcome = converter.convert_file(&path)?;
                print_json(&json!({
                    "table": outcome.table,
                    "partitions": outcome.partitions,
                    "rows": outcome.rows,
                    "source_removed": outcome.source_removed,
                }));
            }
            Ok(0)
        }
        Command::Ls { root, tmp } => {
            let store = TableStore::open(StoreConfig::new(root));
            let namespace = Namespace::from_tmp(tmp);
            let tables = store.list_tables(namespace)?;
            print_json(&json!({
                "namespace": namespace.dir_name(),
                "tables": tables,
            }));
            Ok(0)
        }
        Command::Rm { name, root } => {
            let store = TableStore::open(StoreConfig::new(root));
            store.remove(&name)?;
            print_json(&json!({ "removed": name }));
            Ok(0)
        }
        Command::Codes { action } => run_codes(action),
        Command::Completions { shell } => {
            let mut command = Cli::command();
            let name = command.get_name().to_string();
            clap_complete::generate(shell, &mut command, name, &mut std::io::stdout());
            Ok(0)
        }
    }
}

fn run_codes(action: CodesAction) -> Result<i32, Error> {
    match action {
        CodesAction::List { dir } => {
            let names = locations::list_groupings(&dir)?;
            print_json(&json!({ "groupings": names }));
            Ok(0)
        }
        CodesAction::Init { dir } => {
            let created = locations::init_dir(&dir)?;
            print_json(&json!({ "initialized": created }));
            Ok(0)
        }
        CodesAction::Validate { name, dir } => {
            let grouping = locations::load_grouping(&dir, &name)?;
            locations::validate_grouping(&grouping)?;
            print_json(&json!({
                "grouping": name,
                "categories": grouping.categories.len(),
                "valid": true,
            }));
            Ok(0)
        }
        CodesAction::Describe { code } => {
            let description = locations::describe(&code)?;
            print_json(&json!({ "code": code, "description": description }));
            Ok(0)
        }
    }
}

fn dir_outcome_json(outcomes: &[FileOutcome]) -> serde_json::Value {
    let converted: Vec<_> = outcomes
        .iter()
        .filter_map(|outcome| {
            outcome.result.as_ref().ok().map(|ok| {
                json!({
                    "source": &outcome.source,
                    "table": &ok.table,
                    "partitions": ok.partitions,
                    "rows": ok.rows,
                })
            })
        })
        .collect();
    let failed: Vec<_> = outcomes
        .iter()
        .filter_map(|outcome| {
            outcome.result.as_ref().err().map(|err| {
                json!({
                    "source": &outcome.source,
                    "error": error_json(err),
                })
            })
        })
        .collect();
    json!({ "converted": converted, "failed": failed })
}

fn print_json(value: &serde_json::Value) {
    println!("{value}");
}

fn error_json(err: &Error) -> serde_json::Value {
    let mut body = serde_json::Map::new();
    body.insert("kind".to_string(), json!(format!("{:?}", err.kind())));
    body.insert("message".to_string(), json!(err.to_string()));
    if let Some(hint) = err.hint() {
        body.insert("hint".to_string(), json!(hint));
    }
    json!({ "error": body })
}

fn emit_error(err: &Error) {
    eprintln!("{}", error_json(err));
}
