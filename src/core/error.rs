//! Error types for pipe definitions and pipeline execution

use crate::core::value::Value;
use thiserror::Error;

/// Errors raised while building pipe descriptors (definition time)
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DefinitionError {
    /// The specifier cannot be turned into a pipe
    #[error("Unsupported pipe function \"{0}\"")]
    UnsupportedSpecifier(String),

    /// A keyword pipe was declared without its required input
    #[error("'input' is required for {0} pipe.")]
    MissingInput(String),

    /// A keyword pipe only accepts names as input
    #[error("'{0}' pipe requires string or array of strings as input.")]
    ExpectedNames(String),

    /// A timed pipe needs a number of milliseconds
    #[error("'{0}' pipe requires a number of milliseconds as input.")]
    ExpectedMillis(String),

    /// Input shape was not a name, count, mapping or list of those
    #[error("`input` is malformed: {0}")]
    MalformedInput(String),

    /// Output shape was not a name or list of names
    #[error("`output` is malformed: {0}")]
    MalformedOutput(String),

    /// An action was defined without a name
    #[error("`name` is required for creating an action.")]
    MissingName,

    /// A second error handler was declared for the same pipeline
    #[error("Pipeline \"{0}\" already has an error handler.")]
    DuplicateErrorHandler(String),
}

/// Errors raised while a pipeline runs
///
/// Everything except `UnhandledFault` indicates a broken pipeline definition
/// rather than bad data.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Definition(#[from] DefinitionError),

    /// An injected dependency resolved to something that cannot be called
    #[error("Dependency `{name}` is not a function.")]
    NotCallable { name: String },

    /// A step wrote a name it never declared in its output
    #[error("Dependency \"{name}\" is not defined in output.")]
    UndeclaredOutput { name: String },

    /// A step wrote more distinct outputs than it declared
    #[error("Got more output than what it is required ({declared} declared).")]
    TooManyOutputs { declared: usize },

    /// A fault was raised and the pipeline has no error handler
    #[error(
        "Pipeline \"{pipeline}\" error in step \"{step}:{name}\": {fault}\n(register an error handler to handle this error inside your pipeline.)"
    )]
    UnhandledFault {
        pipeline: String,
        step: usize,
        name: String,
        fault: Value,
    },
}
