use std::{collections::BTreeSet, path::PathBuf};

use parquet::{
    basic::{Compression, ZstdLevel},
    file::properties::{EnabledStatistics, WriterProperties},
    schema::types::ColumnPath,
};

use crate::error::{MergeError, Result};

/// Default sort column of generated fixtures.
pub const DEFAULT_SORT_COLUMN: &str = "A";

/// How the coordinator picks the next unit to emit.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MergeMode {
    /// Compare head values across every open cursor and emit the smallest.
    #[default]
    TrueKWay,
    /// Drain inputs one after another, forwarding source batches whole.
    ///
    /// Output is globally ordered only when each input's value range lies
    /// entirely below the next input's range.
    PairwiseConcat,
}

/// Which row groups the statistics extractor consults.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum StatisticsPolicy {
    /// Min from the first row group, max from the last.
    ///
    /// Correct only while row groups are written in sort order.
    #[default]
    BoundaryRowGroups,
    /// Min of mins and max of maxes across every row group.
    FoldRowGroups,
}

/// Compression applied to output pages.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SinkCompression {
    /// Leave pages uncompressed (useful for tests and debugging).
    None,
    /// Snappy, the usual Parquet default.
    #[default]
    Snappy,
    /// Zstd with default tuning.
    Zstd,
}

/// Writer settings applied to every output file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SinkOptions {
    pub(crate) max_rows_per_row_group: usize,
    pub(crate) collect_stats_for: BTreeSet<String>,
    pub(crate) compression: SinkCompression,
}

impl Default for SinkOptions {
    fn default() -> Self {
        SinkOptions {
            max_rows_per_row_group: 100_000,
            collect_stats_for: BTreeSet::new(),
            compression: SinkCompression::default(),
        }
    }
}

impl SinkOptions {
    pub fn max_rows_per_row_group(self, max_rows_per_row_group: usize) -> Self {
        SinkOptions {
            max_rows_per_row_group,
            ..self
        }
    }

    /// Record min/max statistics for `column` in every row group.
    pub fn collect_stats_for(mut self, column: impl Into<String>) -> Self {
        self.collect_stats_for.insert(column.into());
        self
    }

    /// Stop recording statistics for every column.
    pub fn without_stats(self) -> Self {
        SinkOptions {
            collect_stats_for: BTreeSet::new(),
            ..self
        }
    }

    pub fn compression(self, compression: SinkCompression) -> Self {
        SinkOptions {
            compression,
            ..self
        }
    }

    pub fn row_group_size(&self) -> usize {
        self.max_rows_per_row_group
    }

    pub fn stats_columns(&self) -> &BTreeSet<String> {
        &self.collect_stats_for
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.max_rows_per_row_group < 1 {
            return Err(MergeError::InvalidConfig(
                "max rows per row group must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Parquet writer properties: statistics off by default, chunk-level
    /// statistics for the listed columns.
    pub fn writer_properties(&self) -> WriterProperties {
        let compression = match self.compression {
            SinkCompression::None => Compression::UNCOMPRESSED,
            SinkCompression::Snappy => Compression::SNAPPY,
            SinkCompression::Zstd => Compression::ZSTD(ZstdLevel::default()),
        };
        let mut builder = WriterProperties::builder()
            .set_compression(compression)
            .set_max_row_group_size(self.max_rows_per_row_group)
            .set_statistics_enabled(EnabledStatistics::None);
        for column in &self.collect_stats_for {
            builder = builder.set_column_statistics_enabled(
                ColumnPath::from(column.as_str()),
                EnabledStatistics::Chunk,
            );
        }
        builder.build()
    }
}

/// Parameters of one merge run.
#[derive(Debug, Clone)]
pub struct MergeOptions {
    pub(crate) output_dir: PathBuf,
    pub(crate) file_prefix: String,
    pub(crate) sort_column: String,
    pub(crate) max_rows_per_file: usize,
    pub(crate) batch_size: usize,
    pub(crate) mode: MergeMode,
    pub(crate) statistics_policy: StatisticsPolicy,
    pub(crate) writer: SinkOptions,
}

impl<P> From<P> for MergeOptions
where
    P: Into<PathBuf>,
{
    fn from(output_dir: P) -> Self {
        MergeOptions {
            output_dir: output_dir.into(),
            file_prefix: "merge-file".to_string(),
            sort_column: DEFAULT_SORT_COLUMN.to_string(),
            max_rows_per_file: 100_000,
            batch_size: 10 * 1024,
            mode: MergeMode::default(),
            statistics_policy: StatisticsPolicy::default(),
            writer: SinkOptions::default().collect_stats_for(DEFAULT_SORT_COLUMN),
        }
    }
}

impl MergeOptions {
    pub fn output_dir(self, output_dir: impl Into<PathBuf>) -> Self {
        MergeOptions {
            output_dir: output_dir.into(),
            ..self
        }
    }

    pub fn file_prefix(self, file_prefix: impl Into<String>) -> Self {
        MergeOptions {
            file_prefix: file_prefix.into(),
            ..self
        }
    }

    /// Set the sort column; statistics collection is enabled for it.
    pub fn sort_column(self, sort_column: impl Into<String>) -> Self {
        let sort_column = sort_column.into();
        let writer = self.writer.clone().collect_stats_for(sort_column.clone());
        MergeOptions {
            sort_column,
            writer,
            ..self
        }
    }

    /// Row ceiling per output file.
    pub fn max_rows_per_file(self, max_rows_per_file: usize) -> Self {
        MergeOptions {
            max_rows_per_file,
            ..self
        }
    }

    pub fn batch_size(self, batch_size: usize) -> Self {
        MergeOptions { batch_size, ..self }
    }

    pub fn mode(self, mode: MergeMode) -> Self {
        MergeOptions { mode, ..self }
    }

    pub fn statistics_policy(self, statistics_policy: StatisticsPolicy) -> Self {
        MergeOptions {
            statistics_policy,
            ..self
        }
    }

    /// Replace the writer settings, including the statistics column set.
    pub fn writer(self, writer: SinkOptions) -> Self {
        MergeOptions { writer, ..self }
    }
}

impl MergeOptions {
    pub fn get_output_dir(&self) -> &PathBuf {
        &self.output_dir
    }

    pub fn get_sort_column(&self) -> &str {
        &self.sort_column
    }

    pub fn get_max_rows_per_file(&self) -> usize {
        self.max_rows_per_file
    }

    pub fn get_batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn get_mode(&self) -> MergeMode {
        self.mode
    }

    pub fn get_statistics_policy(&self) -> StatisticsPolicy {
        self.statistics_policy
    }

    pub fn get_writer(&self) -> &SinkOptions {
        &self.writer
    }

    /// Reject malformed parameters before any I/O.
    pub fn validate(&self) -> Result<()> {
        if self.max_rows_per_file < 1 {
            return Err(MergeError::InvalidConfig(
                "row ceiling per output file must be at least 1".into(),
            ));
        }
        if self.batch_size < 1 {
            return Err(MergeError::InvalidConfig("batch size must be at least 1".into()));
        }
        if self.sort_column.is_empty() {
            return Err(MergeError::InvalidConfig("sort column name is empty".into()));
        }
        if self.file_prefix.is_empty() {
            return Err(MergeError::InvalidConfig("output file prefix is empty".into()));
        }
        self.writer.validate()
    }

    /// Output path for the file with sequence number `seq`.
    pub(crate) fn output_path(&self, seq: u64) -> PathBuf {
        self.output_dir
            .join(format!("{}-{:06}.parquet", self.file_prefix, seq))
    }
}
