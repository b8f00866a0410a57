//! Compaction driver.
//!
//! Sequences one merge run: opens the sorted inputs, lets the coordinator
//! stream them into the rotating sink, then reads the sort column statistics
//! back from every closed output. A failed or cancelled run removes every file
//! it produced before returning the error.

use std::{
    fmt, fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use tokio_util::sync::CancellationToken;

use crate::{
    error::{MergeError, Result},
    observability::{log_error, log_info, log_warn},
    ondisk::{
        merge::SortedMerger,
        sink::{ClosedFile, RotatingSink},
        source::SortedFileSource,
        stats::{ColumnStatistics, StatisticsExtractor},
    },
    option::MergeOptions,
};

/// One finalized output of a run.
#[derive(Clone, Debug, PartialEq)]
pub struct OutputFile {
    /// Location of the file.
    pub path: PathBuf,
    /// Creation order within the run.
    pub sequence: u64,
    /// Rows stored in the file.
    pub rows: usize,
    /// Row groups stored in the file.
    pub row_groups: usize,
    /// Min/max of the sort column.
    pub stats: ColumnStatistics,
}

/// Outputs of a finished run, in creation order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CompactionReport {
    outputs: Vec<OutputFile>,
}

impl CompactionReport {
    pub fn outputs(&self) -> &[OutputFile] {
        &self.outputs
    }

    /// Rows across every output.
    pub fn total_rows(&self) -> usize {
        self.outputs.iter().map(|output| output.rows).sum()
    }

    pub fn paths(&self) -> Vec<&Path> {
        self.outputs
            .iter()
            .map(|output| output.path.as_path())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }

    pub fn into_outputs(self) -> Vec<OutputFile> {
        self.outputs
    }
}

impl fmt::Display for CompactionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for output in &self.outputs {
            writeln!(
                f,
                "{}: rows={} row_groups={} min={} max={}",
                output.path.display(),
                output.rows,
                output.row_groups,
                output.stats.min,
                output.stats.max,
            )?;
        }
        Ok(())
    }
}

/// Runs merges with a fixed set of options.
#[derive(Debug, Clone)]
pub struct Compactor {
    option: Arc<MergeOptions>,
    cancel: CancellationToken,
}

impl Compactor {
    /// Validate `option` and build a driver.
    pub fn new(option: MergeOptions) -> Result<Self> {
        option.validate()?;
        Ok(Self {
            option: Arc::new(option),
            cancel: CancellationToken::new(),
        })
    }

    /// Observe `token`; cancelling it stops a run between batches.
    pub fn with_cancellation(self, cancel: CancellationToken) -> Self {
        Self { cancel, ..self }
    }

    /// Token observed by [`Compactor::run`].
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn options(&self) -> &MergeOptions {
        &self.option
    }

    /// Merge `inputs` into ceiling-bounded outputs and report their
    /// statistics.
    ///
    /// At least two inputs are required. The first error aborts the run and
    /// removes the outputs written so far.
    pub fn run<P: AsRef<Path>>(&self, inputs: &[P]) -> Result<CompactionReport> {
        if inputs.len() < 2 {
            return Err(MergeError::InvalidConfig(format!(
                "at least two input files are required, got {}",
                inputs.len()
            )));
        }

        let mut sink = RotatingSink::new(Arc::clone(&self.option));
        let mut written = Vec::new();
        match self.run_inner(inputs, &mut sink, &mut written) {
            Ok(report) => {
                log_info!(
                    component = "compaction",
                    event = "compaction_finished",
                    inputs = inputs.len(),
                    outputs = report.outputs.len(),
                    rows = report.total_rows(),
                );
                Ok(report)
            }
            Err(err) => {
                let partial = sink.abort();
                let removed = cleanup_outputs(&written, &partial);
                log_error!(
                    component = "compaction",
                    event = "compaction_failed",
                    error = %err,
                    removed = removed,
                );
                Err(err)
            }
        }
    }

    fn run_inner<P: AsRef<Path>>(
        &self,
        inputs: &[P],
        sink: &mut RotatingSink,
        written: &mut Vec<ClosedFile>,
    ) -> Result<CompactionReport> {
        let sources = inputs
            .iter()
            .map(|path| SortedFileSource::open(path, self.option.batch_size))
            .collect::<Result<Vec<_>>>()?;

        SortedMerger::from_options(&self.option)
            .with_cancellation(self.cancel.clone())
            .execute(sources, sink, written)?;

        let extractor = StatisticsExtractor::new(self.option.statistics_policy);
        let outputs = written
            .iter()
            .map(|closed| {
                let stats = extractor.extract_by_name(closed.path(), &self.option.sort_column)?;
                Ok(OutputFile {
                    path: closed.path().to_path_buf(),
                    sequence: closed.sequence(),
                    rows: closed.rows(),
                    row_groups: closed.row_groups(),
                    stats,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(CompactionReport { outputs })
    }
}

/// Merge `inputs` with `option` in one call.
pub fn merge_sorted_files<P: AsRef<Path>>(
    inputs: &[P],
    option: MergeOptions,
) -> Result<CompactionReport> {
    Compactor::new(option)?.run(inputs)
}

/// Best-effort removal of a failed run's files; returns how many went away.
fn cleanup_outputs(written: &[ClosedFile], partial: &[PathBuf]) -> usize {
    let mut removed = 0;
    let paths = written
        .iter()
        .map(ClosedFile::path)
        .chain(partial.iter().map(PathBuf::as_path));
    for path in paths {
        match fs::remove_file(path) {
            Ok(()) => removed += 1,
            Err(err) => log_warn!(
                component = "compaction",
                event = "output_cleanup_failed",
                path = %path.display(),
                error = %err,
            ),
        }
    }
    removed
}
