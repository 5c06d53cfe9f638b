//! Foundational utilities shared across lifeline crates.
//!
//! Provides atomic file writes for pipeline artifacts, the NDJSON run log with
//! size-based rotation, time helpers, and calendar arithmetic over event date
//! strings.

pub mod atomic_io;
pub mod calendar;
pub mod run_log;
pub mod time_utils;

pub use atomic_io::{write_json_atomic, write_text_atomic};
pub use calendar::{bounding_span, covered_by_any, parse_date_specs, DateError, DateSpec};
pub use run_log::{LogRotationPolicy, RunLog, RUN_LOG_KEEP_ENV, RUN_LOG_MAX_BYTES_ENV};
pub use time_utils::{current_unix_timestamp, current_unix_timestamp_ms, elapsed_since_ms};
