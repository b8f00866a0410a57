//! Sort-column statistics read back from a closed file's footer.
//!
//! Values come from the per-row-group min/max the writer persisted; rows are
//! never rescanned. The decoder for a column is picked once from its
//! physical and logical type.

use std::{cmp::Ordering, fmt, fs::File, path::Path};

use parquet::{
    basic::{ConvertedType, LogicalType, Type as PhysicalType},
    errors::ParquetError,
    file::{
        metadata::{ParquetMetaData, RowGroupMetaData},
        reader::{FileReader, SerializedFileReader},
        statistics::Statistics,
    },
    schema::types::ColumnDescriptor,
};

use crate::{
    error::{MergeError, Result},
    observability::log_debug,
    option::StatisticsPolicy,
};

/// Scalar decoded from Parquet column statistics.
#[derive(Clone, Debug, PartialEq, PartialOrd)]
pub enum StatValue {
    Boolean(bool),
    Int(i64),
    UInt(u64),
    Float(f32),
    Double(f64),
    Utf8(String),
    Bytes(Vec<u8>),
}

impl fmt::Display for StatValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatValue::Boolean(v) => write!(f, "{v}"),
            StatValue::Int(v) => write!(f, "{v}"),
            StatValue::UInt(v) => write!(f, "{v}"),
            StatValue::Float(v) => write!(f, "{v}"),
            StatValue::Double(v) => write!(f, "{v}"),
            StatValue::Utf8(v) => write!(f, "{v}"),
            StatValue::Bytes(v) => {
                for byte in v {
                    write!(f, "{byte:02x}")?;
                }
                Ok(())
            }
        }
    }
}

/// Minimum and maximum of the sort column in one file.
#[derive(Clone, Debug, PartialEq)]
pub struct ColumnStatistics {
    pub min: StatValue,
    pub max: StatValue,
}

#[derive(Clone, Copy, Debug)]
enum Bound {
    Min,
    Max,
}

type Decoder = fn(&Statistics, Bound) -> Option<StatValue>;

macro_rules! pick {
    ($stats:expr, $bound:expr) => {
        match $bound {
            Bound::Min => $stats.min_opt(),
            Bound::Max => $stats.max_opt(),
        }
    };
}

fn decode_bool(stats: &Statistics, bound: Bound) -> Option<StatValue> {
    match stats {
        Statistics::Boolean(s) => pick!(s, bound).map(|v| StatValue::Boolean(*v)),
        _ => None,
    }
}

fn decode_i32(stats: &Statistics, bound: Bound) -> Option<StatValue> {
    match stats {
        Statistics::Int32(s) => pick!(s, bound).map(|v| StatValue::Int(i64::from(*v))),
        _ => None,
    }
}

fn decode_u32(stats: &Statistics, bound: Bound) -> Option<StatValue> {
    match stats {
        // unsigned values are stored as the bit pattern of the signed type
        Statistics::Int32(s) => pick!(s, bound).map(|v| StatValue::UInt(u64::from(*v as u32))),
        _ => None,
    }
}

fn decode_i64(stats: &Statistics, bound: Bound) -> Option<StatValue> {
    match stats {
        Statistics::Int64(s) => pick!(s, bound).map(|v| StatValue::Int(*v)),
        _ => None,
    }
}

fn decode_u64(stats: &Statistics, bound: Bound) -> Option<StatValue> {
    match stats {
        Statistics::Int64(s) => pick!(s, bound).map(|v| StatValue::UInt(*v as u64)),
        _ => None,
    }
}

fn decode_f32(stats: &Statistics, bound: Bound) -> Option<StatValue> {
    match stats {
        Statistics::Float(s) => pick!(s, bound).map(|v| StatValue::Float(*v)),
        _ => None,
    }
}

fn decode_f64(stats: &Statistics, bound: Bound) -> Option<StatValue> {
    match stats {
        Statistics::Double(s) => pick!(s, bound).map(|v| StatValue::Double(*v)),
        _ => None,
    }
}

fn decode_bytes(stats: &Statistics, bound: Bound) -> Option<StatValue> {
    match stats {
        Statistics::ByteArray(s) => pick!(s, bound).map(|v| StatValue::Bytes(v.data().to_vec())),
        Statistics::FixedLenByteArray(s) => {
            pick!(s, bound).map(|v| StatValue::Bytes(v.data().to_vec()))
        }
        _ => None,
    }
}

fn decode_utf8(stats: &Statistics, bound: Bound) -> Option<StatValue> {
    decode_bytes(stats, bound).map(|value| match value {
        StatValue::Bytes(bytes) => match String::from_utf8(bytes) {
            Ok(text) => StatValue::Utf8(text),
            Err(err) => StatValue::Bytes(err.into_bytes()),
        },
        other => other,
    })
}

fn is_unsigned(column: &ColumnDescriptor) -> bool {
    matches!(
        column.logical_type(),
        Some(LogicalType::Integer {
            is_signed: false,
            ..
        })
    ) || matches!(
        column.converted_type(),
        ConvertedType::UINT_8
            | ConvertedType::UINT_16
            | ConvertedType::UINT_32
            | ConvertedType::UINT_64
    )
}

fn is_utf8(column: &ColumnDescriptor) -> bool {
    matches!(column.logical_type(), Some(LogicalType::String))
        || column.converted_type() == ConvertedType::UTF8
}

fn decoder_for(column: &ColumnDescriptor) -> Option<Decoder> {
    let decoder: Decoder = match column.physical_type() {
        PhysicalType::BOOLEAN => decode_bool,
        PhysicalType::INT32 if is_unsigned(column) => decode_u32,
        PhysicalType::INT32 => decode_i32,
        PhysicalType::INT64 if is_unsigned(column) => decode_u64,
        PhysicalType::INT64 => decode_i64,
        PhysicalType::FLOAT => decode_f32,
        PhysicalType::DOUBLE => decode_f64,
        PhysicalType::BYTE_ARRAY | PhysicalType::FIXED_LEN_BYTE_ARRAY if is_utf8(column) => {
            decode_utf8
        }
        PhysicalType::BYTE_ARRAY | PhysicalType::FIXED_LEN_BYTE_ARRAY => decode_bytes,
        _ => return None,
    };
    Some(decoder)
}

/// Reads sort-column min/max from closed output files.
#[derive(Clone, Copy, Debug, Default)]
pub struct StatisticsExtractor {
    policy: StatisticsPolicy,
}

impl StatisticsExtractor {
    pub fn new(policy: StatisticsPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> StatisticsPolicy {
        self.policy
    }

    /// Min/max of leaf column `column` in the file at `path`.
    pub fn extract(&self, path: impl AsRef<Path>, column: usize) -> Result<ColumnStatistics> {
        let path = path.as_ref();
        let metadata = read_metadata(path)?;
        self.extract_from_metadata(path, &metadata, column)
    }

    /// Same as [`StatisticsExtractor::extract`], resolving the leaf column by name.
    pub fn extract_by_name(
        &self,
        path: impl AsRef<Path>,
        column: &str,
    ) -> Result<ColumnStatistics> {
        let path = path.as_ref();
        let metadata = read_metadata(path)?;
        let index = metadata
            .file_metadata()
            .schema_descr()
            .columns()
            .iter()
            .position(|descr| descr.name() == column)
            .ok_or_else(|| MergeError::MissingSortColumn {
                column: column.to_string(),
            })?;
        self.extract_from_metadata(path, &metadata, index)
    }

    fn extract_from_metadata(
        &self,
        path: &Path,
        metadata: &ParquetMetaData,
        column: usize,
    ) -> Result<ColumnStatistics> {
        let row_groups = metadata.row_groups();
        if row_groups.is_empty() {
            return Err(MergeError::EmptyFile {
                path: path.to_path_buf(),
            });
        }

        let schema = metadata.file_metadata().schema_descr();
        if column >= schema.num_columns() {
            return Err(MergeError::Format {
                path: path.to_path_buf(),
                source: ParquetError::General(format!(
                    "column index {column} out of range for {} leaf columns",
                    schema.num_columns()
                )),
            });
        }
        let descr = schema.column(column);
        let decoder = decoder_for(&descr).ok_or_else(|| MergeError::Format {
            path: path.to_path_buf(),
            source: ParquetError::General(format!(
                "no scalar statistics for physical type {:?}",
                descr.physical_type()
            )),
        })?;
        let bounds = BoundReader {
            path,
            column,
            name: descr.name(),
            decoder,
        };

        let stats = match self.policy {
            StatisticsPolicy::BoundaryRowGroups => {
                // nulls sort first: all-null row groups at either end carry no bounds
                let first = row_groups.iter().find(|rg| !bounds.is_all_null(rg));
                let last = row_groups.iter().rev().find(|rg| !bounds.is_all_null(rg));
                let (Some(first), Some(last)) = (first, last) else {
                    return Err(bounds.missing());
                };
                let stats = ColumnStatistics {
                    min: bounds.bound(first, Bound::Min)?,
                    max: bounds.bound(last, Bound::Max)?,
                };
                debug_assert!(
                    stats.min.partial_cmp(&stats.max) != Some(Ordering::Greater),
                    "boundary statistics require row groups written in sort order"
                );
                stats
            }
            StatisticsPolicy::FoldRowGroups => bounds.fold(row_groups)?,
        };

        log_debug!(
            component = "stats",
            event = "stats_extracted",
            path = %path.display(),
            column = bounds.name,
            row_groups = row_groups.len(),
            min = %stats.min,
            max = %stats.max,
        );
        Ok(stats)
    }
}

struct BoundReader<'a> {
    path: &'a Path,
    column: usize,
    name: &'a str,
    decoder: Decoder,
}

impl BoundReader<'_> {
    fn missing(&self) -> MergeError {
        MergeError::MissingStatistics {
            path: self.path.to_path_buf(),
            column: self.name.to_string(),
        }
    }

    fn is_all_null(&self, row_group: &RowGroupMetaData) -> bool {
        let nulls = row_group
            .column(self.column)
            .statistics()
            .and_then(Statistics::null_count_opt);
        nulls.is_some() && nulls == u64::try_from(row_group.num_rows()).ok()
    }

    fn bound(&self, row_group: &RowGroupMetaData, bound: Bound) -> Result<StatValue> {
        row_group
            .column(self.column)
            .statistics()
            .and_then(|stats| (self.decoder)(stats, bound))
            .ok_or_else(|| self.missing())
    }

    fn fold(&self, row_groups: &[RowGroupMetaData]) -> Result<ColumnStatistics> {
        let mut folded: Option<ColumnStatistics> = None;
        for row_group in row_groups {
            let Some(stats) = row_group.column(self.column).statistics() else {
                return Err(self.missing());
            };
            let (Some(min), Some(max)) = (
                (self.decoder)(stats, Bound::Min),
                (self.decoder)(stats, Bound::Max),
            ) else {
                if self.is_all_null(row_group) {
                    continue;
                }
                return Err(self.missing());
            };
            folded = Some(match folded {
                None => ColumnStatistics { min, max },
                Some(acc) => ColumnStatistics {
                    min: if min.partial_cmp(&acc.min) == Some(Ordering::Less) {
                        min
                    } else {
                        acc.min
                    },
                    max: if max.partial_cmp(&acc.max) == Some(Ordering::Greater) {
                        max
                    } else {
                        acc.max
                    },
                },
            });
        }
        folded.ok_or_else(|| self.missing())
    }
}

fn read_metadata(path: &Path) -> Result<ParquetMetaData> {
    let file = File::open(path).map_err(MergeError::io(path))?;
    let reader = SerializedFileReader::new(file).map_err(MergeError::format(path))?;
    Ok(reader.metadata().clone())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use arrow::{
        array::{ArrayRef, Int32Array, StringArray, UInt32Array},
        datatypes::{DataType, Field, Schema},
        record_batch::RecordBatch,
    };
    use parquet::arrow::ArrowWriter;
    use tempfile::tempdir;

    use super::*;
    use crate::{option::SinkOptions, test_util::write_values};

    fn stats_opts() -> SinkOptions {
        SinkOptions::default().collect_stats_for("A")
    }

    #[test]
    fn boundary_policy_reads_first_and_last_row_group() {
        let dir = tempdir().expect("temp dir");
        let path = write_values(
            dir.path(),
            "sorted.parquet",
            &[&[0, 1, 2], &[3, 4], &[5, 6, 7, 8]],
            &stats_opts(),
        );
        let extractor = StatisticsExtractor::new(StatisticsPolicy::BoundaryRowGroups);
        let stats = extractor.extract(&path, 0).expect("stats");
        assert_eq!(stats.min, StatValue::Int(0));
        assert_eq!(stats.max, StatValue::Int(8));
        assert_eq!(extractor.extract(&path, 0).expect("again"), stats);
    }

    #[test]
    fn boundary_policy_trusts_sort_order() {
        let dir = tempdir().expect("temp dir");
        // middle row group holds the true maximum
        let path = write_values(
            dir.path(),
            "unsorted.parquet",
            &[&[0, 9], &[20, 29], &[10, 14]],
            &stats_opts(),
        );
        let boundary = StatisticsExtractor::new(StatisticsPolicy::BoundaryRowGroups)
            .extract(&path, 0)
            .expect("boundary");
        assert_eq!(boundary.max, StatValue::Int(14));

        let folded = StatisticsExtractor::new(StatisticsPolicy::FoldRowGroups)
            .extract(&path, 0)
            .expect("fold");
        assert_eq!(folded.min, StatValue::Int(0));
        assert_eq!(folded.max, StatValue::Int(29));
    }

    #[test]
    fn zero_row_groups_is_empty_file() {
        let dir = tempdir().expect("temp dir");
        let path = write_values(dir.path(), "empty.parquet", &[], &stats_opts());
        let result = StatisticsExtractor::default().extract(&path, 0);
        assert!(matches!(result, Err(MergeError::EmptyFile { .. })));
    }

    #[test]
    fn disabled_statistics_are_missing() {
        let dir = tempdir().expect("temp dir");
        let path = write_values(
            dir.path(),
            "nostats.parquet",
            &[&[1, 2, 3]],
            &SinkOptions::default(),
        );
        for policy in [StatisticsPolicy::BoundaryRowGroups, StatisticsPolicy::FoldRowGroups] {
            let result = StatisticsExtractor::new(policy).extract(&path, 0);
            match result {
                Err(MergeError::MissingStatistics { column, .. }) => assert_eq!(column, "A"),
                other => panic!("expected missing statistics, got {other:?}"),
            }
        }
    }

    #[test]
    fn column_lookup_by_name() {
        let dir = tempdir().expect("temp dir");
        let options = SinkOptions::default().collect_stats_for("B");
        let path = write_values(dir.path(), "named.parquet", &[&[4, 5]], &options);
        let stats = StatisticsExtractor::default()
            .extract_by_name(&path, "B")
            .expect("stats");
        assert_eq!(stats.min, StatValue::Double(2.0));
        assert_eq!(stats.max, StatValue::Double(2.5));

        let missing = StatisticsExtractor::default().extract_by_name(&path, "nope");
        assert!(matches!(missing, Err(MergeError::MissingSortColumn { .. })));
        let out_of_range = StatisticsExtractor::default().extract(&path, 7);
        assert!(matches!(out_of_range, Err(MergeError::Format { .. })));
    }

    #[test]
    fn utf8_and_unsigned_columns_decode() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("typed.parquet");
        let schema = Arc::new(Schema::new(vec![
            Field::new("name", DataType::Utf8, false),
            Field::new("count", DataType::UInt32, false),
        ]));
        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![
                Arc::new(StringArray::from(vec!["apple", "kiwi", "pear"])) as ArrayRef,
                Arc::new(UInt32Array::from(vec![1, 7, u32::MAX])) as ArrayRef,
            ],
        )
        .expect("batch");
        let options = SinkOptions::default()
            .collect_stats_for("name")
            .collect_stats_for("count");
        let file = File::create(&path).expect("create");
        let mut writer =
            ArrowWriter::try_new(file, schema, Some(options.writer_properties())).expect("writer");
        writer.write(&batch).expect("write");
        writer.close().expect("close");

        let extractor = StatisticsExtractor::default();
        let names = extractor.extract_by_name(&path, "name").expect("name stats");
        assert_eq!(names.min, StatValue::Utf8("apple".into()));
        assert_eq!(names.max, StatValue::Utf8("pear".into()));

        let counts = extractor.extract_by_name(&path, "count").expect("count stats");
        assert_eq!(counts.min, StatValue::UInt(1));
        assert_eq!(counts.max, StatValue::UInt(u64::from(u32::MAX)));
    }

    fn write_nullable(dir: &Path, name: &str, row_groups: &[&[Option<i32>]]) -> std::path::PathBuf {
        let path = dir.join(name);
        let schema = Arc::new(Schema::new(vec![Field::new("A", DataType::Int32, true)]));
        let file = File::create(&path).expect("create");
        let mut writer =
            ArrowWriter::try_new(file, schema.clone(), Some(stats_opts().writer_properties()))
                .expect("writer");
        for values in row_groups {
            let column = Arc::new(Int32Array::from(values.to_vec())) as ArrayRef;
            let batch = RecordBatch::try_new(schema.clone(), vec![column]).expect("batch");
            writer.write(&batch).expect("write");
            writer.flush().expect("flush row group");
        }
        writer.close().expect("close");
        path
    }

    #[test]
    fn leading_null_row_groups_are_skipped() {
        let dir = tempdir().expect("temp dir");
        let path = write_nullable(
            dir.path(),
            "nulls.parquet",
            &[&[None, None], &[None, Some(1), Some(5)], &[Some(7), Some(9)]],
        );
        for policy in [StatisticsPolicy::BoundaryRowGroups, StatisticsPolicy::FoldRowGroups] {
            let stats = StatisticsExtractor::new(policy)
                .extract(&path, 0)
                .expect("stats");
            assert_eq!(stats.min, StatValue::Int(1));
            assert_eq!(stats.max, StatValue::Int(9));
        }
    }

    #[test]
    fn all_null_column_has_no_bounds() {
        let dir = tempdir().expect("temp dir");
        let path = write_nullable(dir.path(), "all-null.parquet", &[&[None], &[None, None]]);
        for policy in [StatisticsPolicy::BoundaryRowGroups, StatisticsPolicy::FoldRowGroups] {
            let result = StatisticsExtractor::new(policy).extract(&path, 0);
            assert!(matches!(result, Err(MergeError::MissingStatistics { .. })));
        }
    }

    #[test]
    fn stat_values_render() {
        assert_eq!(StatValue::Int(-3).to_string(), "-3");
        assert_eq!(StatValue::Utf8("x".into()).to_string(), "x");
        assert_eq!(StatValue::Bytes(vec![0x0a, 0xff]).to_string(), "0aff");
    }
}
