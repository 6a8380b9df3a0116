//! Workflow engine: the state machine that threads retrieval, council,
//! extraction, quality gates, human-review checkpoints, and revision
//! loops, with resumability and streaming progress events.

pub mod engine;
pub mod events;
pub mod state;

pub use engine::WorkflowEngine;
pub use events::{EventSink, ProgressEvent};
pub use state::AssessmentState;
