//! Core domain models
//!
//! Values and stores, pipe descriptors, pipelines and their builders, the
//! per-invocation scratch store and the YAML configuration format.

pub mod action;
pub mod config;
pub mod context;
pub mod error;
pub mod pipe;
pub mod pipeline;
pub mod state;
pub mod value;

pub use action::Actions;
pub use context::ScratchStore;
pub use error::{DefinitionError, PipelineError};
pub use pipe::{Io, IoItem, PipeDescriptor, PipeKind, Specifier};
pub use pipeline::*;
pub use state::{InvocationReport, InvocationStatus};
pub use value::{Args, Command, Dependency, Map, Value};
