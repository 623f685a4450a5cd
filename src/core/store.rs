// Composition root: one shared config, one reader, one writer.
use std::sync::Arc;

use arrow::record_batch::RecordBatch;

use crate::core::config::{Namespace, StoreConfig};
use crate::core::error::Error;
use crate::core::reader::{Reader, TableScan};
use crate::core::writer::Writer;

/// Groups a shared `StoreConfig` with a `Reader` and a `Writer` so callers
/// get consistent path resolution across both. Holds no state of its own
/// beyond the filesystem.
pub struct TableStore {
    config: Arc<StoreConfig>,
    reader: Reader,
    writer: Writer,
}

impl TableStore {
    pub fn open(config: StoreConfig) -> Self {
        let config = Arc::new(config);
        Self {
            reader: Reader::new(config.clone()),
            writer: Writer::new(config.clone()),
            config,
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn reader(&self) -> &Reader {
        &self.reader
    }

    pub fn writer(&self) -> &Writer {
        &self.writer
    }

    pub fn get_reader(&self, name: &str, tmp: bool) -> Result<TableScan, Error> {
        self.reader.get_reader(name, tmp)
    }

    pub fn list_tables(&self, namespace: Namespace) -> Result<Vec<String>, Error> {
        self.reader.list_tables(namespace)
    }

    pub fn save(&self, frame: &RecordBatch, name: &str) -> Result<(), Error> {
        self.writer.save(frame, name)
    }

    pub fn remove(&self, name: &str) -> Result<(), Error> {
        self.writer.remove(name)
    }
}
