//! Draw batch assembly.

pub mod assembler;
pub mod key;

pub use assembler::{AssembledFrame, Batch, BatchAssembler, InstanceData, VisibleInstance};
pub use key::{BatchKey, GroupingCriteria};
