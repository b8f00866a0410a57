//! Rotating output sink.
//!
//! The sink owns at most one open Parquet writer at a time. It is the thing
//! that rotates: closing it finalizes the current file and leaves the sink
//! ready to lazily open the next one, bound to the next sequence number.

use std::{
    fmt,
    fs::{self, File},
    path::{Path, PathBuf},
    sync::Arc,
};

use arrow::{datatypes::SchemaRef, record_batch::RecordBatch};
use parquet::{arrow::ArrowWriter, file::properties::WriterProperties};

use crate::{
    error::{MergeError, Result},
    observability::{log_debug, log_info, log_warn},
    option::MergeOptions,
};

/// Handle to an output file that has been finalized and is now immutable.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClosedFile {
    path: PathBuf,
    sequence: u64,
    rows: usize,
    row_groups: usize,
}

impl ClosedFile {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Creation order of this file within its run.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn row_groups(&self) -> usize {
        self.row_groups
    }
}

struct OpenFile {
    path: PathBuf,
    sequence: u64,
    writer: ArrowWriter<File>,
}

/// Accepts whole batches and rotates to a fresh output file once the row
/// ceiling has been reached.
///
/// Fullness is only consulted between batches, so a file may exceed the
/// ceiling by at most one batch.
pub struct RotatingSink {
    option: Arc<MergeOptions>,
    properties: WriterProperties,
    schema: Option<SchemaRef>,
    current: Option<OpenFile>,
    // file whose footer could not be written
    failed: Option<PathBuf>,
    rows_written: usize,
    next_sequence: u64,
}

impl RotatingSink {
    pub fn new(option: Arc<MergeOptions>) -> Self {
        let properties = option.writer.writer_properties();
        Self {
            option,
            properties,
            schema: None,
            current: None,
            failed: None,
            rows_written: 0,
            next_sequence: 0,
        }
    }

    /// Row ceiling of each output file.
    pub fn ceiling(&self) -> usize {
        self.option.max_rows_per_file
    }

    /// Rows appended to the current logical file.
    pub fn rows_written(&self) -> usize {
        self.rows_written
    }

    pub fn is_full(&self) -> bool {
        self.rows_written >= self.ceiling()
    }

    /// Rows the current file can take before it reaches the ceiling.
    pub fn remaining(&self) -> usize {
        self.ceiling().saturating_sub(self.rows_written)
    }

    pub fn is_open(&self) -> bool {
        self.current.is_some()
    }

    /// Schema fixed by the first accepted batch of the run.
    pub fn schema(&self) -> Option<&SchemaRef> {
        self.schema.as_ref()
    }

    /// Path of the file currently accepting writes.
    pub fn open_path(&self) -> Option<&Path> {
        self.current.as_ref().map(|open| open.path.as_path())
    }

    /// Append a whole batch to the current file, opening it first if needed.
    pub fn accept(&mut self, batch: RecordBatch) -> Result<()> {
        if batch.num_rows() == 0 {
            return Ok(());
        }
        let batch = self.conform(batch)?;
        let rows = batch.num_rows();

        let open = match self.current.take() {
            Some(open) => open,
            None => self.create_file(batch.schema())?,
        };
        let open = self.current.insert(open);
        open.writer.write(&batch).map_err(MergeError::write(&open.path))?;
        self.rows_written += rows;
        Ok(())
    }

    /// Finalize the current file, persisting its footer and statistics.
    ///
    /// Returns `None` when no row reached the sink since the last rotation;
    /// such a file is never created.
    pub fn close(&mut self) -> Result<Option<ClosedFile>> {
        let rows = std::mem::take(&mut self.rows_written);
        let Some(open) = self.current.take() else {
            return Ok(None);
        };
        let OpenFile {
            path,
            sequence,
            writer,
        } = open;
        let metadata = match writer.close() {
            Ok(metadata) => metadata,
            Err(source) => {
                let err = MergeError::Write {
                    path: path.clone(),
                    source,
                };
                self.failed = Some(path);
                return Err(err);
            }
        };
        let closed = ClosedFile {
            path,
            sequence,
            rows,
            row_groups: metadata.row_groups.len(),
        };
        log_info!(
            component = "sink",
            event = "sink_file_closed",
            path = %closed.path.display(),
            sequence = closed.sequence,
            rows = closed.rows,
            row_groups = closed.row_groups,
        );
        Ok(Some(closed))
    }

    /// Drop the open writer without finalizing it and hand back the paths of
    /// every incomplete file: the open one and one whose close failed.
    ///
    /// Used on failure paths.
    pub fn abort(&mut self) -> Vec<PathBuf> {
        self.rows_written = 0;
        self.current
            .take()
            .map(|open| open.path)
            .into_iter()
            .chain(self.failed.take())
            .collect()
    }

    fn conform(&mut self, batch: RecordBatch) -> Result<RecordBatch> {
        let expected = match self.schema.clone() {
            Some(expected) => expected,
            None => {
                self.schema = Some(batch.schema());
                return Ok(batch);
            }
        };
        let found = batch.schema();
        if Arc::ptr_eq(&expected, &found) {
            return Ok(batch);
        }
        if expected.fields() != found.fields() {
            return Err(MergeError::SchemaMismatch { expected, found });
        }
        // Same columns, different schema-level metadata: rebind to the run schema.
        Ok(RecordBatch::try_new(expected, batch.columns().to_vec())?)
    }

    fn create_file(&mut self, schema: SchemaRef) -> Result<OpenFile> {
        let dir = &self.option.output_dir;
        fs::create_dir_all(dir).map_err(MergeError::io(dir))?;

        let sequence = self.next_sequence;
        let path = self.option.output_path(sequence);
        // never truncate a file this run did not create
        let file = File::options()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(MergeError::io(&path))?;
        let writer = match ArrowWriter::try_new(file, schema, Some(self.properties.clone())) {
            Ok(writer) => writer,
            Err(source) => {
                if let Err(err) = fs::remove_file(&path) {
                    log_warn!(
                        component = "sink",
                        event = "output_cleanup_failed",
                        path = %path.display(),
                        error = %err,
                    );
                }
                return Err(MergeError::Write { path, source });
            }
        };
        self.next_sequence += 1;

        log_debug!(
            component = "sink",
            event = "sink_file_created",
            path = %path.display(),
            sequence = sequence,
        );
        Ok(OpenFile {
            path,
            sequence,
            writer,
        })
    }
}

impl fmt::Debug for RotatingSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RotatingSink")
            .field("ceiling", &self.ceiling())
            .field("rows_written", &self.rows_written)
            .field("open_path", &self.open_path())
            .field("next_sequence", &self.next_sequence)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use arrow::datatypes::{DataType, Field, Schema};
    use tempfile::tempdir;

    use super::*;
    use crate::test_util::{batch_of, read_sort_column};

    fn sink_in(dir: &Path, ceiling: usize) -> RotatingSink {
        let option = MergeOptions::from(dir).max_rows_per_file(ceiling);
        RotatingSink::new(Arc::new(option))
    }

    #[test]
    fn file_created_lazily_on_first_batch() {
        let dir = tempdir().expect("temp dir");
        let mut sink = sink_in(dir.path(), 10);
        assert!(!sink.is_open());
        assert!(sink.close().expect("close untouched").is_none());
        assert_eq!(fs::read_dir(dir.path()).expect("list").count(), 0);

        sink.accept(batch_of(&[1, 2, 3])).expect("accept");
        assert!(sink.is_open());
        assert_eq!(sink.rows_written(), 3);
        assert_eq!(sink.remaining(), 7);

        let closed = sink.close().expect("close").expect("file written");
        assert_eq!(closed.rows(), 3);
        assert_eq!(closed.sequence(), 0);
        assert_eq!(closed.row_groups(), 1);
        assert_eq!(read_sort_column(closed.path()), vec![1, 2, 3]);
        assert!(!sink.is_open());
        assert_eq!(sink.rows_written(), 0);
    }

    #[test]
    fn whole_batch_may_overshoot_ceiling() {
        let dir = tempdir().expect("temp dir");
        let mut sink = sink_in(dir.path(), 4);
        sink.accept(batch_of(&[0, 1, 2])).expect("first");
        assert!(!sink.is_full());
        sink.accept(batch_of(&[3, 4, 5])).expect("second");
        assert!(sink.is_full());
        assert_eq!(sink.rows_written(), 6);
        assert_eq!(sink.remaining(), 0);
    }

    #[test]
    fn rotation_advances_sequence() {
        let dir = tempdir().expect("temp dir");
        let mut sink = sink_in(dir.path(), 2);
        sink.accept(batch_of(&[0, 1])).expect("accept");
        let first = sink.close().expect("close").expect("first file");
        sink.accept(batch_of(&[2, 3])).expect("accept");
        let second = sink.close().expect("close").expect("second file");

        assert_eq!(first.sequence(), 0);
        assert_eq!(second.sequence(), 1);
        assert!(first.path() < second.path());
        assert!(first
            .path()
            .to_string_lossy()
            .ends_with("merge-file-000000.parquet"));
        assert_eq!(read_sort_column(second.path()), vec![2, 3]);
    }

    #[test]
    fn empty_batch_does_not_open_file() {
        let dir = tempdir().expect("temp dir");
        let mut sink = sink_in(dir.path(), 2);
        sink.accept(batch_of(&[])).expect("accept empty");
        assert!(!sink.is_open());
        assert!(sink.schema().is_none());
    }

    #[test]
    fn schema_change_is_rejected() {
        let dir = tempdir().expect("temp dir");
        let mut sink = sink_in(dir.path(), 10);
        sink.accept(batch_of(&[1])).expect("accept");

        let other = Arc::new(Schema::new(vec![Field::new("A", DataType::Int64, false)]));
        let batch = RecordBatch::try_new(
            other,
            vec![Arc::new(arrow::array::Int64Array::from(vec![2_i64]))],
        )
        .expect("batch");
        let result = sink.accept(batch);
        assert!(matches!(result, Err(MergeError::SchemaMismatch { .. })));
        assert_eq!(sink.rows_written(), 1);
    }

    #[test]
    fn abort_returns_partial_path() {
        let dir = tempdir().expect("temp dir");
        let mut sink = sink_in(dir.path(), 10);
        sink.accept(batch_of(&[1])).expect("accept");
        let paths = sink.abort();
        assert_eq!(paths.len(), 1);
        assert!(paths[0].exists());
        assert!(!sink.is_open());
        assert!(sink.abort().is_empty());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn failed_close_is_reported_by_abort() {
        let dir = tempdir().expect("temp dir");
        let mut sink = sink_in(dir.path(), 10);
        sink.accept(batch_of(&[1, 2])).expect("accept");

        // redirect the open writer to a device that rejects every write
        let full = File::options()
            .write(true)
            .open("/dev/full")
            .expect("open /dev/full");
        let schema = sink.schema().cloned().expect("run schema");
        let properties = sink.properties.clone();
        let open = sink.current.as_mut().expect("open file");
        open.writer = ArrowWriter::try_new(full, schema, Some(properties)).expect("writer");
        sink.accept(batch_of(&[3])).expect("buffered write");

        let result = sink.close();
        assert!(matches!(result, Err(MergeError::Write { .. })));
        assert!(!sink.is_open());

        let paths = sink.abort();
        assert_eq!(paths, vec![dir.path().join("merge-file-000000.parquet")]);
        assert!(paths[0].exists());
        assert!(sink.abort().is_empty());
    }

    #[test]
    fn existing_output_is_not_overwritten() {
        let dir = tempdir().expect("temp dir");
        let existing = dir.path().join("merge-file-000000.parquet");
        fs::write(&existing, b"earlier run").expect("seed file");

        let mut sink = sink_in(dir.path(), 10);
        let result = sink.accept(batch_of(&[1]));
        assert!(matches!(result, Err(MergeError::Io { .. })));
        assert!(!sink.is_open());
        assert!(sink.abort().is_empty());
        assert_eq!(fs::read(&existing).expect("read seed"), b"earlier run");
    }
}
