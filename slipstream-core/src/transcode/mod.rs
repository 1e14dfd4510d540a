//! Transcoder subprocess management: command building, lifecycle edges and
//! the bounded admission scheduler.

pub mod ffmpeg;
pub mod scheduler;

pub use ffmpeg::{
    FfprobeProber, MediaProber, ProbeReport, ProductionTranscoder, SimulationTranscoder,
    TranscodeHandle, TranscodeInput, TranscodeMode, TranscodeOptions, TranscodeOutcome, Transcoder,
};
pub use scheduler::{SchedulerStats, TranscodeJob, TranscodeScheduler};
