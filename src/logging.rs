//! Purpose: Caller-owned configuration of emstore's diagnostic output.
//! Exports: `TARGETS`, `component_directives`, `component_filter`, `init`.
//! Role: The library only emits `tracing` events; nothing here runs unless a
//! caller installs a subscriber explicitly.
//! Invariants: `TARGETS` names every component the crate logs under.
//! Invariants: Installation is one-shot and surfaces the conflict to the caller.

use tracing::Level;
use tracing_subscriber::EnvFilter;

use crate::core::error::{Error, ErrorKind};

/// Component targets the crate emits events under. Store events cover table
/// open/miss/save/remove; the collaborators log their own progress.
pub const TARGETS: &[&str] = &[
    "emstore::core::reader",
    "emstore::core::writer",
    "emstore::convert",
    "emstore::locations",
];

/// Filter directives enabling every emstore component at `level`, nothing
/// else. The equivalent of attaching one handler across all of the package's
/// loggers at once.
pub fn component_directives(level: Level) -> String {
    TARGETS
        .iter()
        .map(|target| format!("{target}={level}"))
        .collect::<Vec<_>>()
        .join(",")
}

pub fn component_filter(level: Level) -> EnvFilter {
    EnvFilter::new(component_directives(level))
}

/// Filter from `RUST_LOG` when set, else from `default` directives.
pub fn env_or(default: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
}

/// Installs the global subscriber for a binary. Library consumers that
/// already own a subscriber should not call this; the conflict is reported
/// rather than silently ignored.
pub fn init(filter: EnvFilter) -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|err| {
            Error::new(ErrorKind::Internal)
                .with_message("a global tracing subscriber is already installed")
                .with_source(std::io::Error::other(err.to_string()))
        })
}
