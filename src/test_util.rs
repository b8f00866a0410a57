//! Test-only helpers for building fixture batches and reading outputs back.

use std::{
    fs::File,
    path::{Path, PathBuf},
    sync::Arc,
};

use arrow::{
    array::{ArrayRef, Float64Array, Int32Array},
    record_batch::RecordBatch,
};
use parquet::arrow::{arrow_reader::ParquetRecordBatchReaderBuilder, ArrowWriter};

use crate::{fixture::fixture_schema, option::SinkOptions};

/// Fixture-shaped batch with `B = A * 0.5`.
pub(crate) fn batch_of(values: &[i32]) -> RecordBatch {
    let payload: Vec<f64> = values.iter().map(|v| f64::from(*v) * 0.5).collect();
    build(values, payload)
}

/// Fixture-shaped batch whose `B` column is `tag` in every row, so the input a
/// row came from stays visible after a merge.
pub(crate) fn tagged_batch(values: &[i32], tag: f64) -> RecordBatch {
    build(values, vec![tag; values.len()])
}

fn build(values: &[i32], payload: Vec<f64>) -> RecordBatch {
    let columns: Vec<ArrayRef> = vec![
        Arc::new(Int32Array::from(values.to_vec())),
        Arc::new(Float64Array::from(payload)),
    ];
    RecordBatch::try_new(fixture_schema(), columns).expect("fixture batch")
}

/// Write `dir/name`, flushing after each slice so every slice becomes its own
/// row group.
pub(crate) fn write_values(
    dir: &Path,
    name: &str,
    row_groups: &[&[i32]],
    options: &SinkOptions,
) -> PathBuf {
    let path = dir.join(name);
    let file = File::create(&path).expect("create fixture");
    let mut writer = ArrowWriter::try_new(file, fixture_schema(), Some(options.writer_properties()))
        .expect("fixture writer");
    for values in row_groups {
        writer.write(&batch_of(values)).expect("write fixture");
        writer.flush().expect("flush row group");
    }
    writer.close().expect("close fixture");
    path
}

fn read_all(path: &Path) -> Vec<RecordBatch> {
    let file = File::open(path).expect("open output");
    ParquetRecordBatchReaderBuilder::try_new(file)
        .expect("reader builder")
        .build()
        .expect("reader")
        .collect::<Result<Vec<_>, _>>()
        .expect("read batches")
}

/// All `A` values of the file in order.
pub(crate) fn read_sort_column(path: &Path) -> Vec<i32> {
    read_all(path)
        .iter()
        .flat_map(|batch| {
            batch
                .column(0)
                .as_any()
                .downcast_ref::<Int32Array>()
                .expect("int32 sort column")
                .values()
                .to_vec()
        })
        .collect()
}

/// All `B` values of the file in order.
pub(crate) fn read_tag_column(path: &Path) -> Vec<f64> {
    read_all(path)
        .iter()
        .flat_map(|batch| {
            batch
                .column(1)
                .as_any()
                .downcast_ref::<Float64Array>()
                .expect("float64 payload column")
                .values()
                .to_vec()
        })
        .collect()
}
