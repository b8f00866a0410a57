//! On-disk building blocks of a merge run: sorted input sources, the rotating
//! output sink, the merge coordinator and footer statistics extraction.

/// Forward-only batch streams over sorted input files.
pub mod source;

/// Output writer that rotates files at a row ceiling.
pub mod sink;

/// K-way merge coordinator.
pub mod merge;

/// Min/max extraction from closed output footers.
pub mod stats;
