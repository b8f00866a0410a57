//! Logging infrastructure for merge observability.
//!
//! The crate uses `tracing` for structured logging. All events use target
//! "sortmerge" and carry an `event` field for filtering plus a `component`
//! field naming the subsystem ("source", "sink", "merge", "stats",
//! "compaction", "fixture").
//!
//! The library never installs a global subscriber; binaries configure
//! tracing via `tracing_subscriber`.

/// Target for all merge log events.
pub(crate) const SORTMERGE_TARGET: &str = "sortmerge";

/// Macro for info-level log events.
///
/// # Example
/// ```ignore
/// log_info!(
///     component = "sink",
///     event = "sink_file_closed",
///     path = %path.display(),
///     rows = rows,
/// );
/// ```
macro_rules! log_info {
    ($($field:tt)*) => {
        ::tracing::info!(target: $crate::observability::SORTMERGE_TARGET, $($field)*)
    };
}

/// Macro for debug-level log events.
macro_rules! log_debug {
    ($($field:tt)*) => {
        ::tracing::debug!(target: $crate::observability::SORTMERGE_TARGET, $($field)*)
    };
}

/// Macro for warn-level log events.
macro_rules! log_warn {
    ($($field:tt)*) => {
        ::tracing::warn!(target: $crate::observability::SORTMERGE_TARGET, $($field)*)
    };
}

/// Macro for error-level log events.
macro_rules! log_error {
    ($($field:tt)*) => {
        ::tracing::error!(target: $crate::observability::SORTMERGE_TARGET, $($field)*)
    };
}

pub(crate) use log_debug;
pub(crate) use log_error;
pub(crate) use log_info;
pub(crate) use log_warn;
