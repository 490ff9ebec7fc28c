//! Registry of named actions
//!
//! An action is a pipeline registered under a name. Registering also
//! stores the pipeline as a command in the shared store, so other
//! pipelines can inject it by that name.

use crate::core::error::DefinitionError;
use crate::core::pipe::Io;
use crate::core::pipeline::{Pipeline, PipelineBuilder};
use crate::core::value::{Command, Value};
use crate::persistence::StateStore;
use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::debug;

pub struct Actions {
    store: Arc<dyn StateStore>,
    actions: RwLock<BTreeMap<String, Pipeline>>,
}

impl Actions {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self {
            store,
            actions: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<dyn StateStore> {
        &self.store
    }

    /// Define an action, or return the existing one with that name
    pub fn define<F>(&self, name: &str, define: F) -> Result<Pipeline, DefinitionError>
    where
        F: FnOnce(PipelineBuilder) -> PipelineBuilder,
    {
        if name.is_empty() {
            return Err(DefinitionError::MissingName);
        }
        if let Some(existing) = self.get(name) {
            return Ok(existing);
        }

        let pipeline = define(PipelineBuilder::new(name).store(self.store.clone())).build()?;
        Ok(self.register(pipeline))
    }

    /// One-step action; a non-empty `output` is also published to the store
    pub fn single(
        &self,
        name: &str,
        command: Command,
        input: impl Into<Io>,
        output: impl Into<Io>,
    ) -> Result<Pipeline, DefinitionError> {
        let input = input.into();
        let output = output.into();

        self.define(name, |builder| {
            let builder = builder.pipe(command, input, output.clone());
            if output.is_empty() {
                builder
            } else {
                builder.output(output)
            }
        })
    }

    pub fn get(&self, name: &str) -> Option<Pipeline> {
        self.actions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Registered action names, sorted
    pub fn names(&self) -> Vec<String> {
        self.actions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.actions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn register(&self, pipeline: Pipeline) -> Pipeline {
        let registered = {
            let mut actions = self
                .actions
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            // Another caller may have defined the same name meanwhile
            if let Some(existing) = actions.get(pipeline.name()) {
                return existing.clone();
            }
            actions.insert(pipeline.name().to_string(), pipeline.clone());
            pipeline
        };

        debug!("Registered action: {}", registered.name());
        self.store
            .set(registered.name(), Value::Command(registered.as_command()));
        registered
    }
}
