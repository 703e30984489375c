//! Core application primitives (scheduler, locking, readiness, HTTP, runtime)

pub mod http;
pub mod lock;
pub mod readiness;
pub mod runtime;
pub mod scheduler;

pub use http::{create_router, start_server, AppState};
pub use lock::{ExclusivityLock, LockPayload};
pub use readiness::{annotate_stalls, JobReadiness, ReadinessReport};
pub use runtime::{IngestRuntime, RunningRuntime};
pub use scheduler::{
    schedule_seconds_for, JobScheduler, SchedulerConfig, SchedulerHandle, SchedulerState,
    SchedulerStatus,
};
