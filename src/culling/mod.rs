//! Visibility culling: pure per-instance classification, data-parallel dispatch and
//! latency-aware job scheduling.

pub mod culler;
pub mod dispatch;
pub mod scheduler;

pub use culler::{
    CullCamera, CullInput, CullOutcome, CullSettings, HiddenReason, LodSettings, VisibilityCuller,
    MAX_LOD_LEVELS,
};
#[cfg(feature = "parallel")]
pub use dispatch::ParallelDispatch;
pub use dispatch::{default_dispatch, CullDispatch, SequentialDispatch};
pub use scheduler::{CullLatency, CullResult, CullScheduler};
