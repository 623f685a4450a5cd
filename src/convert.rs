//! Purpose: Convert delimited NEMSIS extracts into reference-tier parquet tables.
//! Exports: `ConvertOptions`, `ConvertOutcome`, `FileOutcome`, `Converter`.
//! Role: The external populator of the reference namespace; the store core
//! itself never writes there.
//! Invariants: A staged table becomes visible only via directory rename.
//! Invariants: The source file is deleted only after the written table has
//! been read back and verified against it.
//! Invariants: An existing reference table is never overwritten.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::csv::ReaderBuilder;
use arrow::csv::reader::Format;
use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;

use crate::core::config::{Namespace, StoreConfig, partition_file_name, validate_table_name};
use crate::core::error::{Error, ErrorKind};
use crate::core::reader::Reader;
use crate::core::writer::{swap_into_place, write_partition};

const SCHEMA_SAMPLE_ROWS: usize = 1000;
const CHUNK_PROBE_ROWS: usize = 256;

#[derive(Clone, Copy, Debug)]
pub struct ConvertOptions {
    /// Field delimiter of the source files. NEMSIS public-release extracts
    /// are pipe-delimited; plain CSV exports use a comma.
    pub delimiter: u8,
    /// Target in-memory size of one partition's frame. Drives how many rows
    /// land in each partition file, so later chunked reads are bounded by
    /// roughly this much memory per frame.
    pub target_in_memory_size: usize,
    /// Keep the source file after a verified conversion.
    pub keep_source: bool,
}

impl Default for ConvertOptions {
    fn default() -> Self {
        Self {
            delimiter: b',',
            target_in_memory_size: 100_000_000,
            keep_source: false,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ConvertOutcome {
    pub table: String,
    pub partitions: usize,
    pub rows: u64,
    pub source_removed: bool,
}

#[derive(Debug)]
pub struct FileOutcome {
    pub source: PathBuf,
    pub result: Result<ConvertOutcome, Error>,
}

pub struct Converter {
    config: Arc<StoreConfig>,
    options: ConvertOptions,
}

impl Converter {
    pub fn new(config: Arc<StoreConfig>, options: ConvertOptions) -> Self {
        Self { config, options }
    }

    /// The reference table name a source file converts into: its stem, held
    /// to the same rules as every other table name.
    pub fn table_name_for(source: &Path) -> Result<String, Error> {
        let stem = source
            .file_stem()
            .and_then(|stem| stem.to_str())
            .ok_or_else(|| {
                Error::new(ErrorKind::Usage)
                    .with_message("source file has no usable name")
                    .with_path(source)
            })?;
        validate_table_name(stem)?;
        Ok(stem.to_string())
    }

    /// Converts one delimited file into `<root>/reference/<stem>/`. The
    /// partitions are staged, renamed into place, read back and verified
    /// against the source; only then is the source deleted.
    pub fn convert_file(&self, source: &Path) -> Result<ConvertOutcome, Error> {
        let table = Self::table_name_for(source)?;
        let target = self.config.resolve(&table, Namespace::Reference)?;
        if target.is_dir() {
            return Err(Error::new(ErrorKind::AlreadyExists)
                .with_message(format!("reference table {table:?} already exists"))
                .with_table(&table)
                .with_path(target));
        }

        let schema = self.infer_schema(source)?;
        let chunk_rows = self.estimate_chunk_rows(source, &schema)?;

        let reference_root = self.config.namespace_root(Namespace::Reference);
        std::fs::create_dir_all(&reference_root).map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_path(&reference_root)
                .with_source(err)
        })?;
        let stage = tempfile::Builder::new()
            .prefix(".convert-")
            .tempdir_in(&reference_root)
            .map_err(|err| {
                Error::new(ErrorKind::Io)
                    .with_path(&reference_root)
                    .with_source(err)
            })?;

        let mut partitions = 0usize;
        let mut rows = 0u64;
        for batch in self.source_batches(source, &schema, chunk_rows)? {
            let batch = batch.map_err(|err| {
                Error::new(ErrorKind::Serialization)
                    .with_message("failed to parse source file")
                    .with_path(source)
                    .with_source(err)
            })?;
            rows += batch.num_rows() as u64;
            write_partition(&stage.path().join(partition_file_name(partitions)), &batch)?;
            partitions += 1;
        }
        if partitions == 0 {
            // A headered but rowless extract still becomes a table; its one
            // partition carries the schema and zero rows.
            let empty = RecordBatch::new_empty(schema.clone());
            write_partition(&stage.path().join(partition_file_name(0)), &empty)?;
            partitions = 1;
        }

        let stage = stage.keep();
        if let Err(err) = swap_into_place(&stage, &target) {
            let _ = std::fs::remove_dir_all(&stage);
            return Err(err.with_table(&table));
        }

        self.verify(source, &schema, chunk_rows, &table)?;

        let mut source_removed = false;
        if !self.options.keep_source {
            std::fs::remove_file(source)
                .map_err(|err| Error::new(ErrorKind::Io).with_path(source).with_source(err))?;
            source_removed = true;
        }
        tracing::info!(table = %table, partitions, rows, "converted source file");
        Ok(ConvertOutcome {
            table,
            partitions,
            rows,
            source_removed,
        })
    }

    /// Converts every delimited file directly under `dir`, one worker thread
    /// per file, in sorted order. Per-file failures do not stop the rest.
    pub fn convert_dir(&self, dir: &Path) -> Result<Vec<FileOutcome>, Error> {
        let entries = std::fs::read_dir(dir)
            .map_err(|err| Error::new(ErrorKind::Io).with_path(dir).with_source(err))?;
        let mut sources = Vec::new();
        for entry in entries {
            let entry =
                entry.map_err(|err| Error::new(ErrorKind::Io).with_path(dir).with_source(err))?;
            let path = entry.path();
            let ext = path.extension().and_then(|ext| ext.to_str());
            if path.is_file() && matches!(ext, Some("csv") | Some("txt")) {
                sources.push(path);
            }
        }
        sources.sort();

        let outcomes = std::thread::scope(|scope| {
            let handles: Vec<_> = sources
                .iter()
                .map(|source| {
                    let source = source.clone();
                    scope.spawn(move || {
                        let result = self.convert_file(&source);
                        FileOutcome { source, result }
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|handle| match handle.join() {
                    Ok(outcome) => outcome,
                    Err(_) => FileOutcome {
                        source: dir.to_path_buf(),
                        result: Err(Error::new(ErrorKind::Internal)
                            .with_message("conversion worker panicked")),
                    },
                })
                .collect()
        });
        Ok(outcomes)
    }

    fn format(&self) -> Format {
        Format::default()
            .with_header(true)
            .with_delimiter(self.options.delimiter)
    }

    fn infer_schema(&self, source: &Path) -> Result<SchemaRef, Error> {
        let file = File::open(source)
            .map_err(|err| Error::new(ErrorKind::Io).with_path(source).with_source(err))?;
        let (schema, _) = self
            .format()
            .infer_schema(BufReader::new(file), Some(SCHEMA_SAMPLE_ROWS))
            .map_err(|err| {
                Error::new(ErrorKind::Serialization)
                    .with_message("failed to infer source schema")
                    .with_path(source)
                    .with_source(err)
            })?;
        Ok(Arc::new(schema))
    }

    /// Rows per partition that keep one decoded frame near the target
    /// in-memory size, measured from a probe batch of the real data.
    fn estimate_chunk_rows(&self, source: &Path, schema: &SchemaRef) -> Result<usize, Error> {
        let mut probe = self.source_batches(source, schema, CHUNK_PROBE_ROWS)?;
        let Some(batch) = probe.next() else {
            return Ok(CHUNK_PROBE_ROWS);
        };
        let batch = batch.map_err(|err| {
            Error::new(ErrorKind::Serialization)
                .with_message("failed to parse source file")
                .with_path(source)
                .with_source(err)
        })?;
        if batch.num_rows() == 0 {
            return Ok(CHUNK_PROBE_ROWS);
        }
        let per_row = (batch.get_array_memory_size() / batch.num_rows()).max(1);
        Ok((self.options.target_in_memory_size / per_row).max(1))
    }

    fn source_batches(
        &self,
        source: &Path,
        schema: &SchemaRef,
        batch_rows: usize,
    ) -> Result<arrow::csv::reader::BufReader<BufReader<File>>, Error> {
        let file = File::open(source)
            .map_err(|err| Error::new(ErrorKind::Io).with_path(source).with_source(err))?;
        ReaderBuilder::new(schema.clone())
            .with_format(self.format())
            .with_batch_size(batch_rows)
            .build_buffered(BufReader::new(file))
            .map_err(|err| {
                Error::new(ErrorKind::Serialization)
                    .with_message("failed to open source file for decoding")
                    .with_path(source)
                    .with_source(err)
            })
    }

    /// Reads the converted table back through the store's own reader and
    /// compares it chunk-for-chunk against a fresh parse of the source.
    fn verify(
        &self,
        source: &Path,
        schema: &SchemaRef,
        chunk_rows: usize,
        table: &str,
    ) -> Result<(), Error> {
        let reader = Reader::new(self.config.clone());
        let scan = reader.get_reader(table, false)?;
        let mut fresh = self.source_batches(source, schema, chunk_rows)?;
        let mut stored_rows = 0u64;
        let mut source_rows = 0u64;
        for stored in scan {
            let stored = stored?;
            stored_rows += stored.num_rows() as u64;
            match fresh.next() {
                Some(Ok(expected)) => {
                    source_rows += expected.num_rows() as u64;
                    if stored != expected {
                        return Err(verification_error(table, source));
                    }
                }
                Some(Err(err)) => {
                    return Err(Error::new(ErrorKind::Serialization)
                        .with_message("failed to re-parse source during verification")
                        .with_path(source)
                        .with_source(err));
                }
                // The rowless-source case: one empty stored partition, no
                // source batches.
                None if stored.num_rows() == 0 => {}
                None => return Err(verification_error(table, source)),
            }
        }
        if fresh.next().is_some() || stored_rows != source_rows {
            return Err(verification_error(table, source));
        }
        Ok(())
    }
}

fn verification_error(table: &str, source: &Path) -> Error {
    Error::new(ErrorKind::Serialization)
        .with_message("converted table does not match its source")
        .with_table(table)
        .with_path(source)
        .with_hint("The source file was kept. Remove the reference table and convert again.")
}

#[cfg(test)]
mod tests {
    use super::{ConvertOptions, Converter};
    use crate::core::config::{Namespace, StoreConfig};
    use crate::core::error::ErrorKind;
    use crate::core::reader::Reader;
    use std::path::Path;
    use std::sync::Arc;

    fn write_source(dir: &Path, name: &str, rows: usize) -> std::path::PathBuf {
        let mut text = String::from("pcr_key,cause,age\n");
        for row in 0..rows {
            text.push_str(&format!("{row},cause-{row},{}\n", 20 + row));
        }
        let path = dir.join(name);
        std::fs::write(&path, text).expect("write source");
        path
    }

    fn converter(root: &Path, options: ConvertOptions) -> (Arc<StoreConfig>, Converter) {
        let config = Arc::new(StoreConfig::new(root));
        (config.clone(), Converter::new(config, options))
    }

    #[test]
    fn convert_creates_reference_table_and_removes_source() {
        let temp = tempfile::tempdir().expect("tempdir");
        let source = write_source(temp.path(), "einjury_01.csv", 5);
        let (config, converter) = converter(temp.path(), ConvertOptions::default());

        let outcome = converter.convert_file(&source).expect("convert");
        assert_eq!(outcome.table, "einjury_01");
        assert_eq!(outcome.rows, 5);
        assert!(outcome.source_removed);
        assert!(!source.exists());

        let reader = Reader::new(config);
        let frames: Vec<_> = reader
            .get_reader("einjury_01", false)
            .expect("scan")
            .collect::<Result<_, _>>()
            .expect("frames");
        let total: usize = frames.iter().map(|frame| frame.num_rows()).sum();
        assert_eq!(total, 5);
    }

    #[test]
    fn keep_source_leaves_the_file() {
        let temp = tempfile::tempdir().expect("tempdir");
        let source = write_source(temp.path(), "vitals.csv", 3);
        let (_, converter) = converter(
            temp.path(),
            ConvertOptions {
                keep_source: true,
                ..ConvertOptions::default()
            },
        );

        let outcome = converter.convert_file(&source).expect("convert");
        assert!(!outcome.source_removed);
        assert!(source.exists());
    }

    #[test]
    fn existing_reference_table_is_already_exists() {
        let temp = tempfile::tempdir().expect("tempdir");
        let source = write_source(temp.path(), "vitals.csv", 3);
        let (_, converter) = converter(
            temp.path(),
            ConvertOptions {
                keep_source: true,
                ..ConvertOptions::default()
            },
        );

        converter.convert_file(&source).expect("convert");
        let err = converter.convert_file(&source).expect_err("should refuse");
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
    }

    #[test]
    fn tiny_target_size_forces_one_row_per_partition() {
        let temp = tempfile::tempdir().expect("tempdir");
        let source = write_source(temp.path(), "partitioned.csv", 6);
        let (config, converter) = converter(
            temp.path(),
            ConvertOptions {
                target_in_memory_size: 1,
                ..ConvertOptions::default()
            },
        );

        let outcome = converter.convert_file(&source).expect("convert");
        assert_eq!(outcome.partitions, 6);

        let reader = Reader::new(config);
        let scan = reader.get_reader("partitioned", false).expect("scan");
        assert_eq!(scan.remaining_partitions(), 6);
        for frame in scan {
            assert_eq!(frame.expect("frame").num_rows(), 1);
        }
    }

    #[test]
    fn pipe_delimited_sources_are_supported() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("pub_pcrevents.txt");
        std::fs::write(&path, "pcr_key|cause\n1|Fall on same level\n2|Assault\n")
            .expect("write source");
        let (config, converter) = converter(
            temp.path(),
            ConvertOptions {
                delimiter: b'|',
                ..ConvertOptions::default()
            },
        );

        let outcome = converter.convert_file(&path).expect("convert");
        assert_eq!(outcome.rows, 2);
        let reader = Reader::new(config);
        let frames: Vec<_> = reader
            .get_reader("pub_pcrevents", false)
            .expect("scan")
            .collect::<Result<_, _>>()
            .expect("frames");
        assert_eq!(frames[0].schema().field(1).name(), "cause");
    }

    #[test]
    fn convert_dir_handles_every_source_in_order() {
        let temp = tempfile::tempdir().expect("tempdir");
        let sources = temp.path().join("drop");
        std::fs::create_dir_all(&sources).expect("mkdir");
        write_source(&sources, "b_table.csv", 2);
        write_source(&sources, "a_table.csv", 4);
        std::fs::write(sources.join("README.md"), b"not data").expect("write");
        let (config, converter) = converter(temp.path(), ConvertOptions::default());

        let outcomes = converter.convert_dir(&sources).expect("convert dir");
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes[0].source.ends_with("a_table.csv"));
        assert!(outcomes.iter().all(|outcome| outcome.result.is_ok()));

        let reader = Reader::new(config);
        let names = reader.list_tables(Namespace::Reference).expect("list");
        assert_eq!(names, vec!["a_table", "b_table"]);
    }

    #[test]
    fn source_stem_must_be_a_valid_table_name() {
        let err = Converter::table_name_for(Path::new("/data/.hidden.csv"))
            .expect_err("should reject");
        assert_eq!(err.kind(), ErrorKind::Usage);
    }
}
