//! actionpipe - named actions built from dependency-injected step pipelines

pub mod cli;
pub mod core;
pub mod execution;
pub mod persistence;

// Re-export commonly used types
pub use crate::core::{
    Actions, Args, CancelFlag, Command, DefinitionError, InvocationReport, InvocationStatus,
    InvokeOptions, Pipeline, PipelineBuilder, PipelineError, Value,
};
pub use crate::execution::{ExecutionEngine, Next, PipelineEvent, Setter};
pub use crate::persistence::{StateStore, Store};

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;
