//! Pipeline domain model

use crate::core::error::{DefinitionError, PipelineError};
use crate::core::pipe::{
    Io, PipeDescriptor, PipeKind, Specifier, FN_INPUT, FN_OUTPUT, FN_THROTTLE, FN_WAIT,
};
use crate::core::state::{InvocationReport, InvocationStatus};
use crate::core::value::{Args, Command, Map, Value};
use crate::execution::{EventHandler, ExecutionEngine, PipelineEvent};
use crate::persistence::{StateStore, Store};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

/// Called once when an invocation ends, with the final fault if any
pub type CompletionHandler = Arc<dyn Fn(Option<&Value>) + Send + Sync>;

/// Cooperative cancellation, checked before each step
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Per-binding overrides for an invocation
#[derive(Clone, Default)]
pub struct InvokeOptions {
    /// Store OUTPUT steps publish to, instead of the pipeline's own
    pub store: Option<Arc<dyn StateStore>>,
    /// Initial scratch contents, instead of a snapshot of the store
    pub scratch: Option<Map>,
    pub on_complete: Option<CompletionHandler>,
    pub cancel: Option<CancelFlag>,
}

impl InvokeOptions {
    pub fn with_store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_scratch(mut self, scratch: Map) -> Self {
        self.scratch = Some(scratch);
        self
    }

    pub fn on_complete<F>(mut self, f: F) -> Self
    where
        F: Fn(Option<&Value>) + Send + Sync + 'static,
    {
        self.on_complete = Some(Arc::new(f));
        self
    }

    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

impl fmt::Debug for InvokeOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvokeOptions")
            .field("store", &self.store.is_some())
            .field("scratch", &self.scratch.as_ref().map(Map::len))
            .field("on_complete", &self.on_complete.is_some())
            .field("cancel", &self.cancel)
            .finish()
    }
}

/// A named, ordered list of pipes plus an optional error handler
///
/// Cloning is cheap; clones share descriptors, throttle state and event
/// handlers.
#[derive(Clone)]
pub struct Pipeline {
    name: String,
    pipes: Arc<[Arc<PipeDescriptor>]>,
    error_handler: Option<Arc<PipeDescriptor>>,
    store: Arc<dyn StateStore>,
    event_handlers: Arc<RwLock<Vec<EventHandler>>>,
}

impl Pipeline {
    pub fn builder(name: impl Into<String>) -> PipelineBuilder {
        PipelineBuilder::new(name)
    }

    /// Assemble a pipeline from prebuilt descriptors
    pub fn new(
        name: impl Into<String>,
        pipes: Vec<PipeDescriptor>,
        error_handler: Option<PipeDescriptor>,
        store: Arc<dyn StateStore>,
    ) -> Self {
        Self {
            name: name.into(),
            pipes: pipes.into_iter().map(Arc::new).collect(),
            error_handler: error_handler.map(Arc::new),
            store,
            event_handlers: Arc::new(RwLock::new(Vec::new())),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pipes(&self) -> &[Arc<PipeDescriptor>] {
        &self.pipes
    }

    pub fn len(&self) -> usize {
        self.pipes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pipes.is_empty()
    }

    pub fn error_handler(&self) -> Option<&Arc<PipeDescriptor>> {
        self.error_handler.as_ref()
    }

    /// Store used when a binding does not supply one
    pub fn store(&self) -> &Arc<dyn StateStore> {
        &self.store
    }

    /// Add an event handler
    pub fn add_event_handler<F>(&self, handler: F)
    where
        F: Fn(PipelineEvent) + Send + Sync + 'static,
    {
        self.event_handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(handler));
    }

    /// Emit an event to all handlers
    pub(crate) fn emit(&self, event: PipelineEvent) {
        let handlers = self
            .event_handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for handler in handlers {
            handler(event.clone());
        }
    }

    /// Bind invocation options, producing a reusable invoker
    pub fn bind(&self, options: InvokeOptions) -> Invoker {
        Invoker {
            pipeline: self.clone(),
            options,
        }
    }

    /// Wrap the pipeline as a command so other pipelines can inject it
    ///
    /// A completed invocation returns null. A fault still outstanding at the
    /// end comes back as an `error` mapping; any other ending returns `false`.
    pub fn as_command(&self) -> Command {
        let pipeline = self.clone();
        Command::named_async(self.name.clone(), move |args: Args| {
            let pipeline = pipeline.clone();
            async move {
                let values = args
                    .iter()
                    .map(|v| v.cloned().unwrap_or_else(Value::null))
                    .collect();
                let report = pipeline.invoke(values).await?;
                Ok(match (report.status, report.fault) {
                    (_, Some(fault)) => Value::fault(fault.to_json()),
                    (InvocationStatus::Completed, None) => Value::null(),
                    _ => Value::from(false),
                })
            }
        })
    }

    /// Invoke with default options
    pub async fn invoke(&self, args: Vec<Value>) -> Result<InvocationReport, PipelineError> {
        ExecutionEngine::new(self, &InvokeOptions::default())
            .execute(args)
            .await
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("name", &self.name)
            .field("pipes", &self.pipes)
            .field("error_handler", &self.error_handler)
            .finish()
    }
}

/// A pipeline bound to invocation options
#[derive(Clone, Debug)]
pub struct Invoker {
    pipeline: Pipeline,
    options: InvokeOptions,
}

impl Invoker {
    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Run one invocation; every call gets a fresh scratch store
    pub async fn invoke(&self, args: Vec<Value>) -> Result<InvocationReport, PipelineError> {
        ExecutionEngine::new(&self.pipeline, &self.options)
            .execute(args)
            .await
    }
}

/// Fluent pipeline definition
///
/// The first definition error is kept and reported by `build`.
pub struct PipelineBuilder {
    name: String,
    pipes: Vec<PipeDescriptor>,
    error_handler: Option<PipeDescriptor>,
    store: Option<Arc<dyn StateStore>>,
    error: Option<DefinitionError>,
}

impl PipelineBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            pipes: Vec::new(),
            error_handler: None,
            store: None,
            error: None,
        }
    }

    fn push(mut self, pipe: Result<PipeDescriptor, DefinitionError>) -> Self {
        if self.error.is_some() {
            return self;
        }
        match pipe {
            Ok(pipe) if pipe.kind() == PipeKind::ErrorHandler => self.designate(pipe),
            Ok(pipe) => {
                self.pipes.push(pipe);
                self
            }
            Err(err) => {
                self.error = Some(err);
                self
            }
        }
    }

    fn designate(mut self, handler: PipeDescriptor) -> Self {
        if self.error_handler.is_some() {
            self.error = Some(DefinitionError::DuplicateErrorHandler(self.name.clone()));
        } else {
            self.error_handler = Some(handler);
        }
        self
    }

    /// Copy positional arguments into named scratch slots
    pub fn input(self, names: impl Into<Io>) -> Self {
        let pipe = PipeDescriptor::build(FN_INPUT, names, ());
        self.push(pipe)
    }

    /// Add a step: a command, an injected name, a keyword or a throttle interval
    pub fn pipe(
        self,
        step: impl Into<Specifier>,
        input: impl Into<Io>,
        output: impl Into<Io>,
    ) -> Self {
        let pipe = PipeDescriptor::build(step, input, output);
        self.push(pipe)
    }

    pub fn wait(self, ms: u64) -> Self {
        let pipe = PipeDescriptor::build(FN_WAIT, ms, ());
        self.push(pipe)
    }

    /// Publish scratch values to the store
    pub fn output(self, names: impl Into<Io>) -> Self {
        let pipe = PipeDescriptor::build(FN_OUTPUT, names, ());
        self.push(pipe)
    }

    pub fn throttle(self, ms: u64) -> Self {
        let pipe = PipeDescriptor::build(FN_THROTTLE, ms, ());
        self.push(pipe)
    }

    /// Designate the error handler
    pub fn error(self, handler: impl Into<Specifier>, input: impl Into<Io>) -> Self {
        let pipe = PipeDescriptor::error_handler(handler, input);
        self.push(pipe)
    }

    /// Store used by invocations that do not bind their own
    pub fn store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn build(self) -> Result<Pipeline, DefinitionError> {
        if let Some(err) = self.error {
            return Err(err);
        }
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(Store::new()) as Arc<dyn StateStore>);
        Ok(Pipeline::new(self.name, self.pipes, self.error_handler, store))
    }
}
