//! Sorted input generation.
//!
//! Produces the two-column files the merge is exercised against: `A` is an
//! `Int32` ascending across the whole file and `B` a `Float64` payload drawn
//! uniformly from `[0, 10)`. File `i` of a set holds the values
//! `i * rows .. (i + 1) * rows`, so a set of files is concatenation-compatible
//! in index order.

use std::{
    collections::HashMap,
    fs::{self, File},
    path::{Path, PathBuf},
    sync::Arc,
};

use arrow::{
    array::{ArrayRef, Float64Array, Int32Array},
    datatypes::{DataType, Field, Schema, SchemaRef},
    record_batch::RecordBatch,
};
use parquet::arrow::{ArrowWriter, PARQUET_FIELD_ID_META_KEY};

use crate::{
    error::{MergeError, Result},
    observability::log_debug,
    option::SinkOptions,
};

/// Schema of generated inputs.
pub fn fixture_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        with_field_id(Field::new("A", DataType::Int32, false), 1),
        with_field_id(Field::new("B", DataType::Float64, false), 2),
    ]))
}

fn with_field_id(field: Field, id: i32) -> Field {
    field.with_metadata(HashMap::from([(
        PARQUET_FIELD_ID_META_KEY.to_string(),
        id.to_string(),
    )]))
}

/// Sort column values of fixture file `file_index`.
///
/// Fails when the range does not fit the `Int32` sort column.
pub fn sorted_values(file_index: usize, rows: usize) -> Result<Vec<i32>> {
    let out_of_range = || {
        MergeError::InvalidConfig(format!(
            "fixture file {file_index} with {rows} rows exceeds the Int32 sort column"
        ))
    };
    let start = file_index.checked_mul(rows).ok_or_else(out_of_range)?;
    let end = start.checked_add(rows).ok_or_else(out_of_range)?;
    // exclusive end
    if end > i32::MAX as usize + 1 {
        return Err(out_of_range());
    }
    Ok((start..end).map(|value| value as i32).collect())
}

/// Batch with the given sort values and random payload.
///
/// `values` must already be ascending for the result to be a valid input.
pub fn sorted_batch_from(values: &[i32]) -> Result<RecordBatch> {
    let payload: Vec<f64> = values.iter().map(|_| fastrand::f64() * 10.0).collect();
    let columns: Vec<ArrayRef> = vec![
        Arc::new(Int32Array::from(values.to_vec())),
        Arc::new(Float64Array::from(payload)),
    ];
    Ok(RecordBatch::try_new(fixture_schema(), columns)?)
}

/// Write `batches` to `path`, one `write` call per batch.
pub fn write_batches(
    path: &Path,
    schema: SchemaRef,
    batches: &[RecordBatch],
    options: &SinkOptions,
) -> Result<()> {
    let file = File::create(path).map_err(MergeError::io(path))?;
    let mut writer = ArrowWriter::try_new(file, schema, Some(options.writer_properties()))
        .map_err(MergeError::write(path))?;
    for batch in batches {
        writer.write(batch).map_err(MergeError::write(path))?;
    }
    writer.close().map_err(MergeError::write(path))?;
    Ok(())
}

/// Write fixture file `sorted-file-<file_index>.parquet` under `dir`.
pub fn write_sorted_file(
    dir: impl AsRef<Path>,
    file_index: usize,
    rows: usize,
    options: &SinkOptions,
) -> Result<PathBuf> {
    let dir = dir.as_ref();
    let path = dir.join(format!("sorted-file-{file_index}.parquet"));
    let batch = sorted_batch_from(&sorted_values(file_index, rows)?)?;
    write_batches(&path, batch.schema(), &[batch], options)?;
    log_debug!(
        component = "fixture",
        event = "fixture_written",
        path = %path.display(),
        rows = rows,
    );
    Ok(path)
}

/// Write `count` fixture files of `rows` rows each; paths come back in index
/// order.
pub fn create_sorted_files(
    dir: impl AsRef<Path>,
    rows: usize,
    count: usize,
    options: &SinkOptions,
) -> Result<Vec<PathBuf>> {
    if rows < 1 {
        return Err(MergeError::InvalidConfig(
            "fixture files need at least one row".into(),
        ));
    }
    if count < 2 {
        return Err(MergeError::InvalidConfig(
            "at least two fixture files are required".into(),
        ));
    }
    let dir = dir.as_ref();
    fs::create_dir_all(dir).map_err(MergeError::io(dir))?;
    (0..count)
        .map(|index| write_sorted_file(dir, index, rows, options))
        .collect()
}
