//! Per-job processing pipeline.

pub mod manifest;
pub mod processor;
pub mod result;
pub mod state;

pub use processor::{JobOutcome, JobProcessor, PipelineSettings};
pub use result::{ProcessingResult, VariantResult, VideoMetadata};
pub use state::{JobState, StateMachine};
