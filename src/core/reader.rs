// Read-only access to stored tables: partition discovery plus lazy scans.
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::compute::concat_batches;
use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;

use crate::core::config::{Namespace, PARTITION_EXT, StoreConfig};
use crate::core::error::{Error, ErrorKind};

pub struct Reader {
    config: Arc<StoreConfig>,
}

impl Reader {
    pub fn new(config: Arc<StoreConfig>) -> Self {
        Self { config }
    }

    /// Returns a lazy, single-pass scan over the named table's partitions.
    /// `tmp = true` reads the scratch namespace, `tmp = false` the reference
    /// namespace. An absent table is NotFound, never an empty scan: "no
    /// data" and "no table" are distinct conditions.
    pub fn get_reader(&self, name: &str, tmp: bool) -> Result<TableScan, Error> {
        let namespace = Namespace::from_tmp(tmp);
        let dir = self.config.resolve(name, namespace)?;
        let partitions = partition_files(&dir)?;
        if partitions.is_empty() {
            tracing::debug!(table = name, %namespace, "table miss");
            return Err(Error::new(ErrorKind::NotFound)
                .with_message(format!("no table {name:?} in the {namespace} namespace"))
                .with_table(name)
                .with_path(dir));
        }
        tracing::debug!(
            table = name,
            %namespace,
            partitions = partitions.len(),
            "table open"
        );
        Ok(TableScan {
            partitions: partitions.into_iter(),
        })
    }

    /// Sorted names of the tables stored in a namespace. A namespace
    /// directory that does not exist yet holds no tables.
    pub fn list_tables(&self, namespace: Namespace) -> Result<Vec<String>, Error> {
        let root = self.config.namespace_root(namespace);
        if !root.is_dir() {
            return Ok(Vec::new());
        }
        let entries = std::fs::read_dir(&root)
            .map_err(|err| Error::new(ErrorKind::Io).with_path(&root).with_source(err))?;
        let mut names = Vec::new();
        for entry in entries {
            let entry = entry
                .map_err(|err| Error::new(ErrorKind::Io).with_path(&root).with_source(err))?;
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
                continue;
            };
            if name.starts_with('.') {
                continue;
            }
            if path.is_dir() && !partition_files(&path)?.is_empty() {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }
}

/// Partition files of a table directory in lexicographic name order. An
/// absent directory yields an empty list; the caller decides whether that
/// means NotFound.
pub(crate) fn partition_files(dir: &Path) -> Result<Vec<PathBuf>, Error> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let entries = std::fs::read_dir(dir)
        .map_err(|err| Error::new(ErrorKind::Io).with_path(dir).with_source(err))?;
    let mut files = Vec::new();
    for entry in entries {
        let entry =
            entry.map_err(|err| Error::new(ErrorKind::Io).with_path(dir).with_source(err))?;
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) == Some(PARTITION_EXT) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// A finite, non-restartable scan: one `RecordBatch` per partition file, in
/// lexicographic file-name order. Each pull performs exactly one partition
/// read; no file handle stays open between pulls. Abandoning the scan early
/// simply leaves later partitions unread.
#[derive(Debug)]
pub struct TableScan {
    partitions: std::vec::IntoIter<PathBuf>,
}

impl TableScan {
    pub fn remaining_partitions(&self) -> usize {
        self.partitions.len()
    }
}

impl Iterator for TableScan {
    type Item = Result<RecordBatch, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        let path = self.partitions.next()?;
        Some(read_partition(&path))
    }
}

fn read_partition(path: &Path) -> Result<RecordBatch, Error> {
    let file =
        File::open(path).map_err(|err| Error::new(ErrorKind::Io).with_path(path).with_source(err))?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file).map_err(|err| {
        Error::new(ErrorKind::Serialization)
            .with_message("failed to decode parquet partition")
            .with_path(path)
            .with_source(err)
    })?;
    let schema = builder.schema().clone();
    let reader = builder.build().map_err(|err| {
        Error::new(ErrorKind::Serialization)
            .with_message("failed to decode parquet partition")
            .with_path(path)
            .with_source(err)
    })?;

    let mut batches = Vec::new();
    for batch in reader {
        let batch = batch.map_err(|err| {
            Error::new(ErrorKind::Serialization)
                .with_message("failed to decode parquet partition")
                .with_path(path)
                .with_source(err)
        })?;
        batches.push(batch);
    }

    if batches.is_empty() {
        return Ok(RecordBatch::new_empty(schema));
    }
    if batches.len() == 1 {
        return Ok(batches.swap_remove(0));
    }
    concat_batches(&schema, &batches).map_err(|err| {
        Error::new(ErrorKind::Serialization)
            .with_message("failed to assemble partition batches")
            .with_path(path)
            .with_source(err)
    })
}
