//! Container resource detection and transcoder tuning.
//!
//! The probe reads cgroup limits (v2, then v1) with an OS fallback and keeps
//! a cached reading fresh on a timer; the tuner derives transcoder
//! concurrency, thread caps and HLS segment duration from that reading and
//! the live session count.

pub mod probe;
pub mod tuning;

pub use probe::{ResourceLimits, ResourceWatcher};
pub use tuning::TuningPlan;
