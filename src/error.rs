use std::path::{Path, PathBuf};

use arrow::{datatypes::SchemaRef, error::ArrowError};
use parquet::errors::ParquetError;
use thiserror::Error;

/// Result alias used throughout the merge pipeline.
pub type Result<T, E = MergeError> = std::result::Result<T, E>;

/// Error type shared by sources, sinks, the coordinator and the driver.
#[derive(Debug, Error)]
pub enum MergeError {
    /// Opening, creating or removing a file on storage failed.
    #[error("io error on {path}: {source}")]
    Io {
        /// File the operation targeted.
        path: PathBuf,
        /// Underlying filesystem error.
        source: std::io::Error,
    },
    /// The file is not a readable Parquet file, or its footer is malformed.
    #[error("malformed parquet file {path}: {source}")]
    Format {
        /// File that failed to decode.
        path: PathBuf,
        /// Underlying parquet error.
        source: ParquetError,
    },
    /// The output writer failed while encoding or flushing.
    #[error("failed writing merge output {path}: {source}")]
    Write {
        /// Output file being written.
        path: PathBuf,
        /// Underlying parquet error.
        source: ParquetError,
    },
    /// Arrow compute failed while assembling merged batches.
    #[error("arrow error: {0}")]
    Arrow(#[from] ArrowError),
    /// A batch or source disagrees with the schema established for the run.
    #[error("schema mismatch: expected {expected:?}, found {found:?}")]
    SchemaMismatch {
        /// Schema fixed at the start of the run.
        expected: SchemaRef,
        /// Schema that was rejected.
        found: SchemaRef,
    },
    /// The configured sort column does not exist in the run schema.
    #[error("sort column `{column}` not present in schema")]
    MissingSortColumn {
        /// Configured sort column name.
        column: String,
    },
    /// Statistics were requested for a file without row groups.
    #[error("parquet file {path} has no row groups")]
    EmptyFile {
        /// Offending file.
        path: PathBuf,
    },
    /// The writer did not record min/max statistics for the column.
    #[error("no min/max statistics for column `{column}` in {path}")]
    MissingStatistics {
        /// Offending file.
        path: PathBuf,
        /// Column whose statistics are absent.
        column: String,
    },
    /// Run parameters rejected before any I/O happened.
    #[error("invalid merge configuration: {0}")]
    InvalidConfig(String),
    /// The run observed an external cancellation request.
    #[error("merge cancelled")]
    Cancelled,
}

impl MergeError {
    pub(crate) fn io(path: impl AsRef<Path>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.as_ref().to_path_buf();
        move |source| MergeError::Io { path, source }
    }

    pub(crate) fn format(path: impl AsRef<Path>) -> impl FnOnce(ParquetError) -> Self {
        let path = path.as_ref().to_path_buf();
        move |source| MergeError::Format { path, source }
    }

    pub(crate) fn write(path: impl AsRef<Path>) -> impl FnOnce(ParquetError) -> Self {
        let path = path.as_ref().to_path_buf();
        move |source| MergeError::Write { path, source }
    }
}
