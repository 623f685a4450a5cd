//! Purpose: Shared store-root and table-name path resolution.
//! Exports: `Namespace`, `StoreConfig`, `partition_file_name`.
//! Role: Keep Reader/Writer/converter path semantics aligned from one source.
//! Invariants: A table name resolves to exactly one path per namespace.
//! Invariants: Table names must not contain path separators or lead with `.`.
//! Invariants: Construction performs no filesystem access.

use std::path::{Path, PathBuf};

use crate::core::error::{Error, ErrorKind};

pub const PARTITION_EXT: &str = "parquet";

/// File name of the nth partition within a table directory. Zero-padded so
/// lexicographic listing order equals write order.
pub fn partition_file_name(index: usize) -> String {
    format!("part-{index:05}.{PARTITION_EXT}")
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Namespace {
    Reference,
    Scratch,
}

impl Namespace {
    pub fn dir_name(self) -> &'static str {
        match self {
            Namespace::Reference => "reference",
            Namespace::Scratch => "scratch",
        }
    }

    /// Maps the reader-facing `tmp` flag onto a namespace. `tmp` selects the
    /// session-local scratch tier.
    pub fn from_tmp(tmp: bool) -> Self {
        if tmp {
            Namespace::Scratch
        } else {
            Namespace::Reference
        }
    }
}

impl std::fmt::Display for Namespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// Immutable per-session configuration: one store root, two namespace roots.
/// Safe to share read-only across any number of readers and writers.
#[derive(Clone, Debug)]
pub struct StoreConfig {
    root: PathBuf,
}

impl StoreConfig {
    /// Does not require `root` to exist; existence is checked lazily by the
    /// reader and writer.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn namespace_root(&self, namespace: Namespace) -> PathBuf {
        self.root.join(namespace.dir_name())
    }

    /// Resolves a table name to its directory within a namespace. Pure path
    /// math; never touches the filesystem.
    pub fn resolve(&self, name: &str, namespace: Namespace) -> Result<PathBuf, Error> {
        validate_table_name(name)?;
        Ok(self.namespace_root(namespace).join(name))
    }
}

pub(crate) fn validate_table_name(name: &str) -> Result<(), Error> {
    if name.is_empty() {
        return Err(Error::new(ErrorKind::Usage).with_message("table name must not be empty"));
    }
    if name.contains(['/', '\\']) {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("table name must not contain path separators")
            .with_table(name));
    }
    if name.starts_with('.') {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("table name must not begin with '.'")
            .with_table(name));
    }
    Ok(())
}
