//! Dev session pipelines
//!
//! The orchestrator owns the session lifecycle; the worker runs the schema,
//! migration and seed pipelines one batch at a time.

pub mod dirty;
pub mod hooks;
pub mod orchestrator;
pub mod typegen;
pub mod worker;

// Re-export main types for convenient access
pub use dirty::SessionDirty;
pub use orchestrator::{DevOptions, DevSession};
pub use worker::{Job, PipelineWorker};
