//! Scheduled ingestion jobs

pub mod context;
pub mod handlers;
pub mod types;

pub use context::JobContext;
pub use types::{JobRecord, JobSpec, JobState, JobStatus};
