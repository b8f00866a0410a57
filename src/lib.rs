//! Bounded-output merge of sorted Parquet files.
//!
//! Given several Parquet files that are each sorted ascending on one column,
//! [`Compactor`] streams them through a k-way merge into a sequence of output
//! files capped at a row ceiling, then reports the min/max of the sort column
//! for every output, read from the footer statistics the writer recorded.
//!
//! ```no_run
//! use sortmerge::{merge_sorted_files, MergeOptions};
//!
//! # fn main() -> sortmerge::Result<()> {
//! let report = merge_sorted_files(
//!     &["a.parquet", "b.parquet"],
//!     MergeOptions::from("/tmp/merged").max_rows_per_file(50_000),
//! )?;
//! for output in report.outputs() {
//!     println!("{} {}..={}", output.path.display(), output.stats.min, output.stats.max);
//! }
//! # Ok(())
//! # }
//! ```

mod observability;

/// Merge driver and its report types.
pub mod compaction;
/// Error type of the crate.
pub mod error;
/// Sorted input generation for demos, benches and tests.
pub mod fixture;
/// Sources, sink, merge coordinator and statistics extraction.
pub mod ondisk;
/// Run configuration.
pub mod option;

#[cfg(test)]
mod test_util;

pub use tokio_util::sync::CancellationToken;

pub use crate::{
    compaction::{merge_sorted_files, CompactionReport, Compactor, OutputFile},
    error::{MergeError, Result},
    ondisk::{
        merge::{MergeSummary, SortedMerger},
        sink::{ClosedFile, RotatingSink},
        source::SortedFileSource,
        stats::{ColumnStatistics, StatValue, StatisticsExtractor},
    },
    option::{MergeMode, MergeOptions, SinkCompression, SinkOptions, StatisticsPolicy},
};
