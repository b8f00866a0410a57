//! Merge coordinator.
//!
//! Drives one cursor per sorted input and forwards merged batches to the
//! [`RotatingSink`]. Rotation is decided here, between batches: when the sink
//! reports full, it is closed (the closed file recorded for the caller) before
//! the next batch is handed over.

use std::{cmp::Ordering, collections::BinaryHeap, fmt, sync::Arc};

use arrow::{
    array::{Array, ArrayRef},
    compute::interleave,
    datatypes::SchemaRef,
    error::ArrowError,
    record_batch::RecordBatch,
    row::{OwnedRow, RowConverter, Rows, SortField},
};
use tokio_util::sync::CancellationToken;

use super::{
    sink::{ClosedFile, RotatingSink},
    source::SortedFileSource,
};
use crate::{
    error::{MergeError, Result},
    observability::{log_debug, log_info, log_warn},
    option::{MergeMode, MergeOptions},
};

const DEFAULT_BATCH_SIZE: usize = 10 * 1024;

/// Counters reported by a finished merge.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MergeSummary {
    /// Rows forwarded to the sink.
    pub rows: usize,
    /// Batches forwarded to the sink.
    pub batches: usize,
}

#[derive(Debug)]
struct HeapEntry {
    key: OwnedRow,
    source_idx: usize,
    row_idx: usize,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapEntry {}

// Reversed so the max-heap pops the smallest key; equal keys pop the lowest
// input index first.
impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .key
            .cmp(&self.key)
            .then_with(|| other.source_idx.cmp(&self.source_idx))
    }
}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

struct SourceCursor {
    source_idx: usize,
    source: Option<SortedFileSource>,
    batch: Option<RecordBatch>,
    keys: Option<Rows>,
    slot: usize,
    row_idx: usize,
}

impl SourceCursor {
    fn new(source_idx: usize, source: SortedFileSource) -> Self {
        Self {
            source_idx,
            source: Some(source),
            batch: None,
            keys: None,
            slot: 0,
            row_idx: 0,
        }
    }

    fn ensure_batch(&mut self, keys: &SortKeys, builder: &mut BatchBuilder) -> Result<()> {
        while self.batch.is_none() {
            let Some(source) = self.source.as_mut() else {
                return Ok(());
            };
            let Some(batch) = source.next_batch()? else {
                log_debug!(
                    component = "merge",
                    event = "source_exhausted",
                    source = self.source_idx,
                    path = %source.path().display(),
                );
                // releases the file handle
                self.source = None;
                return Ok(());
            };
            if batch.num_rows() == 0 {
                continue;
            }
            self.keys = Some(keys.convert(&batch)?);
            self.slot = builder.push_batch(batch.clone());
            self.batch = Some(batch);
            self.row_idx = 0;
        }
        Ok(())
    }

    fn enqueue(
        &mut self,
        keys: &SortKeys,
        builder: &mut BatchBuilder,
        heap: &mut BinaryHeap<HeapEntry>,
    ) -> Result<()> {
        self.ensure_batch(keys, builder)?;
        if let Some(rows) = &self.keys {
            heap.push(HeapEntry {
                key: rows.row(self.row_idx).owned(),
                source_idx: self.source_idx,
                row_idx: self.row_idx,
            });
        }
        Ok(())
    }

    fn advance(&mut self) {
        self.row_idx += 1;
        let consumed = self
            .batch
            .as_ref()
            .map_or(true, |batch| self.row_idx >= batch.num_rows());
        if consumed {
            self.batch = None;
            self.keys = None;
            self.row_idx = 0;
        }
    }
}

/// Row-encoded sort keys; the converter is built once per run for the sort
/// column's data type.
struct SortKeys {
    converter: RowConverter,
    column: usize,
}

impl SortKeys {
    fn new(schema: &SchemaRef, column: usize) -> Result<Self> {
        let data_type = schema.field(column).data_type().clone();
        Ok(Self {
            converter: RowConverter::new(vec![SortField::new(data_type)])?,
            column,
        })
    }

    fn convert(&self, batch: &RecordBatch) -> Result<Rows> {
        Ok(self.converter.convert_columns(&[Arc::clone(batch.column(self.column))])?)
    }
}

/// Stages `(batch, row)` picks and materializes them with `interleave`.
struct BatchBuilder {
    schema: SchemaRef,
    batches: Vec<RecordBatch>,
    indices: Vec<(usize, usize)>,
}

impl BatchBuilder {
    fn new(schema: SchemaRef) -> Self {
        Self {
            schema,
            batches: Vec::new(),
            indices: Vec::new(),
        }
    }

    fn push_batch(&mut self, batch: RecordBatch) -> usize {
        self.batches.push(batch);
        self.batches.len() - 1
    }

    fn push_row(&mut self, slot: usize, row: usize) {
        self.indices.push((slot, row));
    }

    fn len(&self) -> usize {
        self.indices.len()
    }

    fn build(&mut self) -> Result<Option<RecordBatch>> {
        if self.indices.is_empty() {
            return Ok(None);
        }
        let columns = (0..self.schema.fields().len())
            .map(|col| {
                let arrays: Vec<&dyn Array> = self
                    .batches
                    .iter()
                    .map(|batch| batch.column(col).as_ref())
                    .collect();
                interleave(&arrays, &self.indices)
            })
            .collect::<std::result::Result<Vec<ArrayRef>, ArrowError>>()?;
        self.indices.clear();
        Ok(Some(RecordBatch::try_new(Arc::clone(&self.schema), columns)?))
    }

    /// Drop batches no cursor points at anymore and renumber the live ones.
    fn rebase(&mut self, cursors: &mut [SourceCursor]) {
        debug_assert!(self.indices.is_empty(), "rebase with staged rows");
        self.batches.clear();
        for cursor in cursors {
            if let Some(batch) = &cursor.batch {
                self.batches.push(batch.clone());
                cursor.slot = self.batches.len() - 1;
            }
        }
    }
}

/// Forwards batches to the sink, rotating and honoring cancellation between
/// batches.
pub(crate) struct Emitter<'a> {
    sink: &'a mut RotatingSink,
    written: &'a mut Vec<ClosedFile>,
    cancel: Option<&'a CancellationToken>,
    summary: MergeSummary,
}

impl<'a> Emitter<'a> {
    pub(crate) fn new(
        sink: &'a mut RotatingSink,
        written: &'a mut Vec<ClosedFile>,
        cancel: Option<&'a CancellationToken>,
    ) -> Self {
        Self {
            sink,
            written,
            cancel,
            summary: MergeSummary::default(),
        }
    }

    /// Largest batch that still lands on the ceiling of the file it goes to.
    fn capacity(&self, batch_size: usize) -> usize {
        let room = if self.sink.is_full() {
            self.sink.ceiling()
        } else {
            self.sink.remaining()
        };
        room.min(batch_size).max(1)
    }

    pub(crate) fn forward(&mut self, batch: RecordBatch) -> Result<()> {
        if batch.num_rows() == 0 {
            return Ok(());
        }
        self.check_cancelled()?;
        if self.sink.is_full() {
            self.rotate()?;
        }
        let rows = batch.num_rows();
        self.sink.accept(batch)?;
        self.summary.rows += rows;
        self.summary.batches += 1;
        Ok(())
    }

    fn rotate(&mut self) -> Result<()> {
        if let Some(closed) = self.sink.close()? {
            log_debug!(
                component = "merge",
                event = "sink_rotated",
                path = %closed.path().display(),
                rows = closed.rows(),
            );
            self.written.push(closed);
        }
        Ok(())
    }

    fn check_cancelled(&mut self) -> Result<()> {
        if self.cancel.is_some_and(CancellationToken::is_cancelled) {
            // no output may stay open past cancellation
            self.rotate()?;
            log_warn!(
                component = "merge",
                event = "merge_cancelled",
                rows = self.summary.rows,
                outputs = self.written.len(),
            );
            return Err(MergeError::Cancelled);
        }
        Ok(())
    }

    fn finish(mut self) -> Result<MergeSummary> {
        self.rotate()?;
        Ok(self.summary)
    }
}

/// Merges sorted sources into the rotating sink.
pub struct SortedMerger {
    mode: MergeMode,
    sort_column: String,
    batch_size: usize,
    cancel: Option<CancellationToken>,
}

impl SortedMerger {
    /// Create a merger ordering rows by `sort_column`.
    pub fn new(sort_column: impl Into<String>) -> Self {
        Self {
            mode: MergeMode::default(),
            sort_column: sort_column.into(),
            batch_size: DEFAULT_BATCH_SIZE,
            cancel: None,
        }
    }

    /// Merger configured from run options.
    pub fn from_options(option: &MergeOptions) -> Self {
        Self::new(option.sort_column.clone())
            .with_mode(option.mode)
            .with_batch_size(option.batch_size)
    }

    pub fn with_mode(mut self, mode: MergeMode) -> Self {
        self.mode = mode;
        self
    }

    /// Upper bound on rows per merged batch in [`MergeMode::TrueKWay`].
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Observe `token` between emitted batches.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn mode(&self) -> MergeMode {
        self.mode
    }

    /// Run the merge to completion.
    ///
    /// Every file the sink closes is appended to `written`, including on the
    /// error paths, so callers can clean up partial output. The final sink is
    /// closed unconditionally; one that never received a row produces no file.
    pub fn execute(
        &self,
        sources: Vec<SortedFileSource>,
        sink: &mut RotatingSink,
        written: &mut Vec<ClosedFile>,
    ) -> Result<MergeSummary> {
        let mut emitter = Emitter::new(sink, written, self.cancel.as_ref());
        emitter.check_cancelled()?;

        let Some(schema) = sources.first().map(|source| Arc::clone(source.schema())) else {
            return emitter.finish();
        };
        for source in &sources[1..] {
            if source.schema().fields() != schema.fields() {
                return Err(MergeError::SchemaMismatch {
                    expected: schema,
                    found: Arc::clone(source.schema()),
                });
            }
        }
        let sort_idx = schema
            .index_of(&self.sort_column)
            .map_err(|_| MergeError::MissingSortColumn {
                column: self.sort_column.clone(),
            })?;

        log_info!(
            component = "merge",
            event = "merge_started",
            mode = ?self.mode,
            inputs = sources.len(),
            sort_column = %self.sort_column,
            ceiling = emitter.sink.ceiling(),
        );

        match self.mode {
            MergeMode::TrueKWay => self.merge_kway(sources, schema, sort_idx, &mut emitter)?,
            MergeMode::PairwiseConcat => self.concat(sources, &mut emitter)?,
        }
        let outputs_before = emitter.written.len();
        let summary = emitter.finish()?;

        log_info!(
            component = "merge",
            event = "merge_finished",
            rows = summary.rows,
            batches = summary.batches,
            outputs = written.len(),
            closed_at_end = written.len() - outputs_before,
        );
        Ok(summary)
    }

    fn merge_kway(
        &self,
        sources: Vec<SortedFileSource>,
        schema: SchemaRef,
        sort_idx: usize,
        emitter: &mut Emitter<'_>,
    ) -> Result<()> {
        let keys = SortKeys::new(&schema, sort_idx)?;
        let mut builder = BatchBuilder::new(schema);
        let mut cursors: Vec<SourceCursor> = sources
            .into_iter()
            .enumerate()
            .map(|(idx, source)| SourceCursor::new(idx, source))
            .collect();

        let mut heap = BinaryHeap::with_capacity(cursors.len());
        for cursor in &mut cursors {
            cursor.enqueue(&keys, &mut builder, &mut heap)?;
        }

        let mut target = emitter.capacity(self.batch_size);
        while let Some(entry) = heap.pop() {
            let cursor = &mut cursors[entry.source_idx];
            builder.push_row(cursor.slot, entry.row_idx);
            cursor.advance();
            cursor.enqueue(&keys, &mut builder, &mut heap)?;

            if builder.len() >= target {
                if let Some(batch) = builder.build()? {
                    builder.rebase(&mut cursors);
                    emitter.forward(batch)?;
                }
                target = emitter.capacity(self.batch_size);
            }
        }
        if let Some(batch) = builder.build()? {
            emitter.forward(batch)?;
        }
        Ok(())
    }

    fn concat(&self, sources: Vec<SortedFileSource>, emitter: &mut Emitter<'_>) -> Result<()> {
        for (idx, mut source) in sources.into_iter().enumerate() {
            log_debug!(
                component = "merge",
                event = "source_draining",
                source = idx,
                path = %source.path().display(),
            );
            while let Some(batch) = source.next_batch()? {
                emitter.forward(batch)?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for SortedMerger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SortedMerger")
            .field("mode", &self.mode)
            .field("sort_column", &self.sort_column)
            .field("batch_size", &self.batch_size)
            .field("cancellable", &self.cancel.is_some())
            .finish()
    }
}
