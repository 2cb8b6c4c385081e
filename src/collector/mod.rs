//! Polling side of the engine: sync flags, per-application loops and the
//! [`Engine`] that wires them to the stores

pub mod cycle;
pub mod engine;
pub mod scheduler;
pub mod sync;

pub use cycle::{CycleReport, CycleRunner};
pub use engine::Engine;
pub use scheduler::PollScheduler;
pub use sync::{SyncController, ALL_APPLICATIONS};

use crate::store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum CollectError {
    #[error("unknown application: {0}")]
    UnknownApplication(String),
    #[error("no metrics collected for {application}: {}", .errors.join("; "))]
    AllTargetsFailed {
        application: String,
        errors: Vec<String>,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
}
