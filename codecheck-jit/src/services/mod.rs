//! Background services
//!
//! - [`coordinator`]: idempotent entry point and pipeline for code loads
//! - [`progress`]: stage-banded progress fan-out

pub mod coordinator;
pub mod progress;

pub use coordinator::{Coordinator, CoordinatorSettings, LoadOutcome, LoadRequest, LoadTicket};
pub use progress::{EventBusSink, JobRowSink, ProgressReporter, ProgressSink, ProgressUpdate, Stage, TracingSink};
