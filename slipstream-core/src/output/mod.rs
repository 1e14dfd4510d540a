//! Output supervision: readiness detection, rolling-window retention and
//! advisory seek operations over a session's output directory.

pub mod retention;
pub mod seek;
pub mod supervisor;

pub use retention::{RetentionReport, enforce_budget, is_segment_file, segment_index};
pub use seek::{SeekInfo, SeekOutcome, SeekRequest, SegmentDescriptor};
pub use supervisor::OutputSupervisor;
