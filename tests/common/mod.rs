//! Common test utilities for integration tests.

use std::{
    fs::File,
    path::{Path, PathBuf},
};

use arrow::array::Int32Array;
use parquet::arrow::ArrowWriter;
use sortmerge::{
    fixture::{fixture_schema, sorted_batch_from},
    SinkOptions, SortedFileSource,
};

/// Writer options that record statistics for the sort column.
pub fn stats_options() -> SinkOptions {
    SinkOptions::default().collect_stats_for("A")
}

/// Write one sorted input, flushing after each slice of `row_groups` so each
/// becomes its own row group.
pub fn write_input(dir: &Path, name: &str, row_groups: &[&[i32]]) -> PathBuf {
    let path = dir.join(name);
    let file = File::create(&path).expect("create input");
    let mut writer = ArrowWriter::try_new(
        file,
        fixture_schema(),
        Some(stats_options().writer_properties()),
    )
    .expect("input writer");
    for values in row_groups {
        let batch = sorted_batch_from(values).expect("fixture batch");
        writer.write(&batch).expect("write input");
        writer.flush().expect("flush row group");
    }
    writer.close().expect("close input");
    path
}

/// Every `A` value of a Parquet file, in file order.
pub fn sort_values(path: &Path) -> Vec<i32> {
    let mut source = SortedFileSource::open(path, 1024).expect("open file");
    let mut values = Vec::new();
    while let Some(batch) = source.next_batch().expect("read batch") {
        let column = batch
            .column(0)
            .as_any()
            .downcast_ref::<Int32Array>()
            .expect("int32 sort column");
        values.extend_from_slice(column.values());
    }
    values
}

/// Number of entries directly under `dir`.
pub fn entries(dir: &Path) -> usize {
    std::fs::read_dir(dir).map(|it| it.count()).unwrap_or(0)
}
