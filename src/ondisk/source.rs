//! Record stream over one sorted Parquet input.

use std::{
    fmt,
    fs::File,
    path::{Path, PathBuf},
};

use arrow::{datatypes::SchemaRef, error::ArrowError, record_batch::RecordBatch};
use parquet::{arrow::arrow_reader::ParquetRecordBatchReaderBuilder, errors::ParquetError};

use crate::{
    error::{MergeError, Result},
    observability::log_debug,
};

type BatchIter = Box<dyn Iterator<Item = std::result::Result<RecordBatch, ArrowError>>>;

/// Forward-only stream of row batches read from one sorted input file.
///
/// Batches come back in on-disk order with whatever size the reader
/// materializes (bounded by the configured batch size); callers must not
/// assume uniform sizes. Dropping the source releases the file handle.
pub struct SortedFileSource {
    path: PathBuf,
    schema: SchemaRef,
    row_count: usize,
    row_group_count: usize,
    batches: BatchIter,
    exhausted: bool,
}

impl SortedFileSource {
    /// Open `path` and read its footer.
    pub fn open(path: impl AsRef<Path>, batch_size: usize) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(MergeError::io(path))?;
        let builder =
            ParquetRecordBatchReaderBuilder::try_new(file).map_err(MergeError::format(path))?;
        let metadata = builder.metadata();
        let row_count = footer_row_count(path, metadata.file_metadata().num_rows())?;
        let row_group_count = metadata.num_row_groups();
        let schema = builder.schema().clone();
        let reader = builder
            .with_batch_size(batch_size.max(1))
            .build()
            .map_err(MergeError::format(path))?;

        log_debug!(
            component = "source",
            event = "source_opened",
            path = %path.display(),
            rows = row_count,
            row_groups = row_group_count,
        );

        Ok(Self {
            path: path.to_path_buf(),
            schema,
            row_count,
            row_group_count,
            batches: Box::new(reader),
            exhausted: false,
        })
    }

    /// Build a source over pre-materialized batches (useful for tests).
    #[cfg(test)]
    pub(crate) fn with_batches(
        path: impl Into<PathBuf>,
        schema: SchemaRef,
        batches: Vec<RecordBatch>,
    ) -> Self {
        let row_count = batches.iter().map(RecordBatch::num_rows).sum();
        let row_group_count = batches.len();
        Self {
            path: path.into(),
            schema,
            row_count,
            row_group_count,
            batches: Box::new(batches.into_iter().map(Ok)),
            exhausted: false,
        }
    }

    /// Next batch in file order, or `None` once every row was produced.
    pub fn next_batch(&mut self) -> Result<Option<RecordBatch>> {
        if self.exhausted {
            return Ok(None);
        }
        match self.batches.next() {
            Some(Ok(batch)) => Ok(Some(batch)),
            Some(Err(err)) => Err(MergeError::Format {
                path: self.path.clone(),
                source: ParquetError::ArrowError(err.to_string()),
            }),
            None => {
                self.exhausted = true;
                Ok(None)
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Arrow schema decoded from the file footer.
    pub fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    /// Row count recorded in the footer.
    pub fn row_count(&self) -> usize {
        self.row_count
    }

    pub fn row_group_count(&self) -> usize {
        self.row_group_count
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }
}

impl fmt::Debug for SortedFileSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SortedFileSource")
            .field("path", &self.path)
            .field("schema_fields", &self.schema.fields().len())
            .field("rows", &self.row_count)
            .field("row_groups", &self.row_group_count)
            .field("exhausted", &self.exhausted)
            .finish()
    }
}

fn footer_row_count(path: &Path, num_rows: i64) -> Result<usize> {
    usize::try_from(num_rows).map_err(|_| MergeError::Format {
        path: path.to_path_buf(),
        source: ParquetError::General(format!("footer reports {num_rows} rows")),
    })
}
