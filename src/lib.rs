#![forbid(unsafe_code)]
#![doc = include_str!("../README.md")]

mod builder;
mod context;
mod descriptor;
mod engine;
mod error;
mod output;
mod phase;
mod provider;
mod task;
mod tree;
mod utils;

pub use crate::builder::{
    CommandOptions, CommandPriority, FileContents, FileOptions, TaskOutputBuilder,
};
pub use crate::context::{Hash32, TaskContext};
pub use crate::descriptor::{GeneratorRegistry, NodeDescriptor};
pub use crate::engine::{Diagnostics, ExecuteOptions, PhaseExecution, TaskExecution, execute};
pub use crate::error::*;
pub use crate::output::{ExecutionResult, GeneratedFile, PostWriteCommand};
pub use crate::phase::Phase;
pub use crate::provider::{
    DependencyRequest, ProviderExport, ProviderType, ProviderTypeId, Providers, Resolved, Scope,
};
pub use crate::task::{BuildFn, TaskBuilder, TaskDefinition, TaskRun};
pub use crate::tree::{GeneratorNode, GeneratorTree, NodeEntry, NodeIdx};
#[cfg(feature = "logging")]
pub use crate::utils::init_logging;
