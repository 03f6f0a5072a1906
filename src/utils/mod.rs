//! Utility helpers: generational handles, logging, profiling and frame scheduling.

pub mod allocator;
pub mod logging;
pub mod profiling;
pub mod scheduler;

pub use allocator::{Arena, InstanceId};
pub use profiling::FrameProfiler;
pub use scheduler::IntervalScheduler;
