// Scratch-namespace persistence: staged writes, atomic swap, removal.
// Reference tables are write-protected by construction: no write path
// through this module ever targets the reference namespace.
use std::fs::{self, File};
use std::path::Path;
use std::sync::Arc;

use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;

use crate::core::config::{Namespace, StoreConfig, partition_file_name};
use crate::core::error::{Error, ErrorKind};

pub struct Writer {
    config: Arc<StoreConfig>,
}

impl Writer {
    pub fn new(config: Arc<StoreConfig>) -> Self {
        Self { config }
    }

    /// Persists a frame as a scratch table, replacing any previous table of
    /// the same name. The frame is serialized into a staging directory and
    /// moved into place by rename, so a crash mid-write leaves either the
    /// old complete table or nothing. The scratch root is created on first
    /// use; it is never cleaned up here.
    pub fn save(&self, frame: &RecordBatch, name: &str) -> Result<(), Error> {
        let target = self.config.resolve(name, Namespace::Scratch)?;
        let scratch_root = self.config.namespace_root(Namespace::Scratch);
        fs::create_dir_all(&scratch_root).map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_path(&scratch_root)
                .with_source(err)
        })?;

        let stage = tempfile::Builder::new()
            .prefix(".stage-")
            .tempdir_in(&scratch_root)
            .map_err(|err| {
                Error::new(ErrorKind::Io)
                    .with_path(&scratch_root)
                    .with_source(err)
            })?;
        write_partition(&stage.path().join(partition_file_name(0)), frame)?;

        let stage = stage.keep();
        if let Err(err) = swap_into_place(&stage, &target) {
            let _ = fs::remove_dir_all(&stage);
            return Err(err.with_table(name));
        }
        tracing::info!(table = name, rows = frame.num_rows(), "saved scratch table");
        Ok(())
    }

    /// Deletes a scratch table and every partition belonging to it. Absence
    /// is an error, not a no-op; callers wanting idempotence match on
    /// `ErrorKind::NotFound`. The scratch namespace directory itself is left
    /// in place even when it becomes empty.
    pub fn remove(&self, name: &str) -> Result<(), Error> {
        let target = self.config.resolve(name, Namespace::Scratch)?;
        if !target.is_dir() {
            tracing::debug!(table = name, "remove miss");
            return Err(Error::new(ErrorKind::NotFound)
                .with_message(format!("no table {name:?} in the scratch namespace"))
                .with_table(name)
                .with_path(target));
        }
        fs::remove_dir_all(&target)
            .map_err(|err| Error::new(ErrorKind::Io).with_path(&target).with_source(err))?;
        tracing::info!(table = name, "removed scratch table");
        Ok(())
    }
}

/// Serializes one frame to a parquet partition file and syncs it to disk
/// before returning. Shared with the converter so both write paths carry the
/// same durability discipline.
pub(crate) fn write_partition(path: &Path, frame: &RecordBatch) -> Result<(), Error> {
    let file = File::create(path)
        .map_err(|err| Error::new(ErrorKind::Io).with_path(path).with_source(err))?;
    let mut writer = ArrowWriter::try_new(file, frame.schema(), None).map_err(|err| {
        Error::new(ErrorKind::Serialization)
            .with_message("frame cannot be represented in parquet")
            .with_path(path)
            .with_source(err)
    })?;
    writer.write(frame).map_err(|err| {
        Error::new(ErrorKind::Serialization)
            .with_message("failed to encode frame")
            .with_path(path)
            .with_source(err)
    })?;
    let file = writer.into_inner().map_err(|err| {
        Error::new(ErrorKind::Serialization)
            .with_message("failed to finalize partition")
            .with_path(path)
            .with_source(err)
    })?;
    file.sync_all()
        .map_err(|err| Error::new(ErrorKind::Io).with_path(path).with_source(err))?;
    Ok(())
}

/// Moves a fully staged table directory to its final path. When a previous
/// table exists it is renamed aside first and deleted after the swap, so the
/// table path never exposes a partially written state.
pub(crate) fn swap_into_place(stage: &Path, target: &Path) -> Result<(), Error> {
    let retired = retire_path(target)?;
    if retired.exists() {
        fs::remove_dir_all(&retired)
            .map_err(|err| Error::new(ErrorKind::Io).with_path(&retired).with_source(err))?;
    }
    let had_previous = target.is_dir();
    if had_previous {
        fs::rename(target, &retired)
            .map_err(|err| Error::new(ErrorKind::Io).with_path(target).with_source(err))?;
    }
    if let Err(err) = fs::rename(stage, target) {
        if had_previous {
            let _ = fs::rename(&retired, target);
        }
        return Err(Error::new(ErrorKind::Io).with_path(target).with_source(err));
    }
    if had_previous {
        fs::remove_dir_all(&retired)
            .map_err(|err| Error::new(ErrorKind::Io).with_path(&retired).with_source(err))?;
    }
    Ok(())
}

fn retire_path(target: &Path) -> Result<std::path::PathBuf, Error> {
    let name = target
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| {
            Error::new(ErrorKind::Internal)
                .with_message("table path has no file name")
                .with_path(target)
        })?;
    let parent = target.parent().ok_or_else(|| {
        Error::new(ErrorKind::Internal)
            .with_message("table path has no parent")
            .with_path(target)
    })?;
    Ok(parent.join(format!(".retire-{name}")))
}

#[cfg(test)]
mod tests {
    use super::Writer;
    use crate::core::config::{Namespace, StoreConfig};
    use crate::core::error::ErrorKind;
    use crate::core::reader::Reader;
    use arrow::array::{Int64Array, StringArray};
    use arrow::datatypes::{DataType, Field, Schema};
    use arrow::record_batch::RecordBatch;
    use std::sync::Arc;

    fn sample_batch(ids: &[i64]) -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![
            Field::new("id", DataType::Int64, false),
            Field::new("descrip", DataType::Utf8, true),
        ]));
        let descrips: Vec<Option<String>> = ids.iter().map(|id| Some(format!("row-{id}"))).collect();
        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(Int64Array::from(ids.to_vec())),
                Arc::new(StringArray::from(descrips)),
            ],
        )
        .expect("batch")
    }

    fn store(temp: &tempfile::TempDir) -> (Arc<StoreConfig>, Writer, Reader) {
        let config = Arc::new(StoreConfig::new(temp.path()));
        (
            config.clone(),
            Writer::new(config.clone()),
            Reader::new(config),
        )
    }

    #[test]
    fn save_creates_scratch_root_lazily() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (config, writer, _) = store(&temp);
        assert!(!config.namespace_root(Namespace::Scratch).exists());

        writer.save(&sample_batch(&[1, 2]), "derived").expect("save");
        assert!(config.namespace_root(Namespace::Scratch).is_dir());
        assert!(
            config
                .resolve("derived", Namespace::Scratch)
                .expect("resolve")
                .is_dir()
        );
    }

    #[test]
    fn save_leaves_no_staging_artifacts() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (config, writer, _) = store(&temp);
        writer.save(&sample_batch(&[1]), "derived").expect("save");
        writer.save(&sample_batch(&[2]), "derived").expect("overwrite");

        let scratch_root = config.namespace_root(Namespace::Scratch);
        let entries: Vec<String> = std::fs::read_dir(&scratch_root)
            .expect("read_dir")
            .map(|entry| entry.expect("entry").file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(entries, vec!["derived"]);
    }

    #[test]
    fn overwrite_replaces_never_merges() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (_, writer, reader) = store(&temp);
        writer.save(&sample_batch(&[1, 2, 3]), "derived").expect("save");
        let second = sample_batch(&[9]);
        writer.save(&second, "derived").expect("overwrite");

        let frames: Vec<_> = reader
            .get_reader("derived", true)
            .expect("scan")
            .collect::<Result<_, _>>()
            .expect("frames");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0], second);
    }

    #[test]
    fn remove_then_read_is_not_found() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (config, writer, reader) = store(&temp);
        writer.save(&sample_batch(&[1]), "derived").expect("save");
        writer.remove("derived").expect("remove");

        let err = reader.get_reader("derived", true).expect_err("should miss");
        assert_eq!(err.kind(), ErrorKind::NotFound);
        // The namespace directory itself survives removal of its last table.
        assert!(config.namespace_root(Namespace::Scratch).is_dir());
    }

    #[test]
    fn remove_absent_is_not_found() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (_, writer, _) = store(&temp);
        let err = writer.remove("never-saved").expect_err("should fail");
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn writes_are_visible_immediately_after_save() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (_, writer, reader) = store(&temp);
        let frame = sample_batch(&[4, 5, 6]);
        writer.save(&frame, "immediate").expect("save");

        let frames: Vec<_> = reader
            .get_reader("immediate", true)
            .expect("scan")
            .collect::<Result<_, _>>()
            .expect("frames");
        assert_eq!(frames, vec![frame]);
    }
}
