//! Transcoder tuning derived from detected resources and live load.

use crate::config::{ResourceConfig, SegmentConfig};
use crate::resources::probe::ResourceLimits;

/// Memory headroom multiplier applied to the per-transcoder estimate.
const MEMORY_HEADROOM: f64 = 1.2;

/// Tuning plan for the transcoder pool.
///
/// Concurrency is the minimum of the memory-bound and CPU-bound estimates;
/// segment duration grows with the number of active sessions to reduce
/// per-session segment churn under load. Explicit configuration overrides
/// win over computed values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct TuningPlan {
    /// Estimated memory footprint of one transcoder process
    pub per_transcoder_mb: u64,
    /// Maximum concurrent transcoder subprocesses
    pub max_concurrent: usize,
    /// Thread cap passed to each transcoder
    pub threads_per_transcoder: usize,
    /// HLS segment duration for newly started sessions
    pub segment_duration_secs: u32,
}

impl TuningPlan {
    /// Derives a plan from detected limits and the active session count.
    pub fn derive(
        limits: ResourceLimits,
        active_sessions: usize,
        segments: &SegmentConfig,
        resources: &ResourceConfig,
    ) -> Self {
        let per_transcoder_mb = if limits.memory_mb < 700 {
            256
        } else if limits.memory_mb < 1500 {
            512
        } else {
            800
        };

        let memory_bound =
            (limits.memory_mb as f64 / (per_transcoder_mb as f64 * MEMORY_HEADROOM)) as usize;
        let cpu_bound = limits.cpu_count / 2;
        let computed_concurrent = memory_bound.min(cpu_bound).max(1);
        let max_concurrent = resources
            .max_concurrent_override
            .map(|n| n.max(1))
            .unwrap_or(computed_concurrent);

        let computed_threads = if limits.memory_mb < 1024 {
            1
        } else {
            (limits.cpu_count / 2).max(1)
        };
        let threads_per_transcoder = resources
            .threads_override
            .map(|n| n.max(1))
            .unwrap_or(computed_threads);

        let step = segments.target_streams_per_step.max(1);
        let scaled = (active_sessions as u32).div_ceil(step) * segments.min_duration_secs;
        let segment_duration_secs = scaled.clamp(segments.min_duration_secs, segments.max_duration_secs);

        Self {
            per_transcoder_mb,
            max_concurrent,
            threads_per_transcoder,
            segment_duration_secs,
        }
    }
}
