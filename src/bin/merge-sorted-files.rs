//! Demo CLI: generate sorted fixture files, merge them into ceiling-bounded
//! outputs and print each output's sort column range.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use sortmerge::{
    fixture::create_sorted_files, Compactor, MergeMode, MergeOptions, SinkOptions,
    StatisticsPolicy,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Merge generated sorted Parquet files")]
struct Args {
    /// Rows per generated input file.
    #[arg(long, default_value_t = 1_000)]
    rows: usize,
    /// Number of generated input files.
    #[arg(long, default_value_t = 3)]
    files: usize,
    /// Row ceiling per output file; defaults to twice `--rows`.
    #[arg(long)]
    ceiling: Option<usize>,
    /// How inputs are combined.
    #[arg(long, value_enum, default_value_t = Mode::Kway)]
    mode: Mode,
    /// Which row groups statistics are read from.
    #[arg(long, value_enum, default_value_t = Stats::Boundary)]
    stats: Stats,
    /// Write inputs and outputs under this directory instead of a temporary one.
    /// Existing outputs there are kept and fail the run.
    #[arg(long)]
    keep: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Mode {
    Kway,
    Concat,
}

impl From<Mode> for MergeMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Kway => MergeMode::TrueKWay,
            Mode::Concat => MergeMode::PairwiseConcat,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Stats {
    Boundary,
    Fold,
}

impl From<Stats> for StatisticsPolicy {
    fn from(stats: Stats) -> Self {
        match stats {
            Stats::Boundary => StatisticsPolicy::BoundaryRowGroups,
            Stats::Fold => StatisticsPolicy::FoldRowGroups,
        }
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    // removed on drop unless --keep was given
    let scratch = match &args.keep {
        Some(_) => None,
        None => Some(tempfile::tempdir().context("creating scratch directory")?),
    };
    let root = match (&args.keep, &scratch) {
        (Some(dir), _) => dir.clone(),
        (None, Some(tmp)) => tmp.path().to_path_buf(),
        (None, None) => anyhow::bail!("no working directory"),
    };

    let inputs = create_sorted_files(
        root.join("inputs"),
        args.rows,
        args.files,
        &SinkOptions::default().collect_stats_for("A"),
    )
    .context("generating sorted inputs")?;

    let ceiling = args.ceiling.unwrap_or(args.rows.saturating_mul(2));
    let option = MergeOptions::from(root.join("outputs"))
        .max_rows_per_file(ceiling)
        .mode(args.mode.into())
        .statistics_policy(args.stats.into());
    let report = Compactor::new(option)?
        .run(&inputs)
        .context("merging sorted inputs")?;

    print!("{report}");
    println!(
        "{} input files, {} output files, {} rows",
        inputs.len(),
        report.outputs().len(),
        report.total_rows()
    );
    Ok(())
}
