//! Step executor - runs a single pipe against the scratch store

use crate::core::context::ScratchStore;
use crate::core::error::PipelineError;
use crate::core::pipe::{Behavior, Handler, InputSlot, PipeDescriptor, DEP_ERROR, DEP_NEXT, DEP_SET};
use crate::core::state::PipeRun;
use crate::core::value::{Args, Dependency, Map, Value};
use crate::execution::engine::{Next, Signal};
use crate::execution::lock;
use crate::persistence::StateStore;
use serde_json::Value as Json;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, error, info, warn};

/// Result of a write through a `Setter`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fulfillment {
    /// Written; the step is still waiting for declared outputs
    Pending,
    /// Every declared output has been written
    Complete,
    /// The reserved `error` output was written and the fault was raised
    Fault,
}

/// Scratch-store setter handed to a pipe that asks for `set`
///
/// When the pipe declares outputs, every write is checked against them and
/// the setter fires the continuation once all of them are fulfilled.
#[derive(Clone)]
pub struct Setter {
    scratch: Arc<Mutex<ScratchStore>>,
    tracking: Option<Tracking>,
}

#[derive(Clone)]
struct Tracking {
    run: Arc<Mutex<PipeRun>>,
    tx: UnboundedSender<Signal>,
}

impl Tracking {
    fn signal(&self, seq: u64) {
        let _ = self.tx.send(Signal::advance(seq));
    }
}

impl Setter {
    pub(crate) fn raw(scratch: Arc<Mutex<ScratchStore>>) -> Self {
        Self {
            scratch,
            tracking: None,
        }
    }

    pub(crate) fn tracked(
        scratch: Arc<Mutex<ScratchStore>>,
        run: Arc<Mutex<PipeRun>>,
        tx: UnboundedSender<Signal>,
    ) -> Self {
        Self {
            scratch,
            tracking: Some(Tracking { run, tx }),
        }
    }

    /// Whether writes are checked against declared outputs
    pub fn is_tracked(&self) -> bool {
        self.tracking.is_some()
    }

    pub fn set(
        &self,
        key: impl Into<String>,
        value: impl Into<Value>,
    ) -> Result<Fulfillment, PipelineError> {
        self.write(vec![(key.into(), value.into())])
    }

    pub fn set_many(&self, values: Map) -> Result<Fulfillment, PipelineError> {
        self.write(values.into_iter().collect())
    }

    fn write(&self, entries: Vec<(String, Value)>) -> Result<Fulfillment, PipelineError> {
        let Some(tracking) = &self.tracking else {
            let mut scratch = lock(&self.scratch);
            for (key, value) in entries {
                scratch.set(key, value);
            }
            return Ok(Fulfillment::Pending);
        };

        let mut run = lock(&tracking.run);

        // The continuation already fired for this fault
        if run.has_error {
            return Ok(Fulfillment::Fault);
        }

        let pipe = run.pipe.clone();
        {
            let mut scratch = lock(&self.scratch);
            for (key, value) in entries {
                let (check, target) = match pipe.output_for(&key) {
                    Some(output) => (output.declared.clone(), scratch.target_for(output)),
                    None => (key.clone(), key),
                };

                if check == DEP_ERROR {
                    run.has_error = true;
                } else if !pipe.outputs().iter().any(|o| o.declared == check) {
                    warn!("Step {} wrote undeclared output `{}`", pipe.name(), check);
                    return Err(PipelineError::UndeclaredOutput { name: check });
                }

                if let Some(fulfilled) = run.fulfilled.as_mut() {
                    if !fulfilled.contains(&check) {
                        fulfilled.push(check);
                    }
                }

                scratch.set(target, value);
            }
        }

        if run.has_error {
            run.auto_advance = false;
            tracking.signal(run.seq);
            return Ok(Fulfillment::Fault);
        }

        let declared = pipe.outputs().len();
        let Some(count) = run.fulfilled.as_ref().map(Vec::len) else {
            return Ok(Fulfillment::Pending);
        };

        // Unreachable: undeclared names are rejected above and `fulfilled`
        // never repeats a name
        if count > declared {
            return Err(PipelineError::TooManyOutputs { declared });
        }

        if count < declared {
            return Ok(Fulfillment::Pending);
        }

        if run.has_returned && run.result_allows_advance() {
            tracking.signal(run.seq);
        } else {
            // Not returned yet: let the executor decide once it has the result
            run.auto_advance = true;
        }
        Ok(Fulfillment::Complete)
    }
}

impl fmt::Debug for Setter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Setter")
            .field("tracked", &self.is_tracked())
            .finish()
    }
}

/// Whether a step ran or was skipped as optional
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Ran,
    Skipped,
}

/// Executes one pipe for one invocation
pub(crate) struct StepExecutor<'a> {
    /// Outstanding fault; only set when running the error handler
    pub fault: Option<Value>,
    pub args: &'a Args,
    pub store: &'a dyn StateStore,
    pub scratch: &'a Arc<Mutex<ScratchStore>>,
    pub tx: &'a UnboundedSender<Signal>,
}

impl<'a> StepExecutor<'a> {
    /// Resolve inputs, invoke the pipe and interpret its result
    ///
    /// Continuations are never taken here directly: they are posted to the
    /// invocation mailbox, tagged with the run's sequence number.
    pub async fn execute(&self, run: Arc<Mutex<PipeRun>>) -> Result<StepOutcome, PipelineError> {
        let (pipe, seq) = {
            let run = lock(&run);
            (run.pipe.clone(), run.seq)
        };

        let mut inputs = self.resolve_inputs(&pipe, &run, seq);

        let dependency = if pipe.is_injected() {
            Some(lock(self.scratch).dependency(pipe.name()))
        } else {
            None
        };

        if pipe.optional() {
            let missing = matches!(dependency, Some(Dependency::Missing));
            if missing || inputs.iter().any(Option::is_none) {
                info!("Skipping optional step: {}", pipe.name());
                self.advance(seq);
                return Ok(StepOutcome::Skipped);
            }
        }

        let tracked = if pipe.outputs().is_empty() {
            None
        } else {
            {
                let mut run = lock(&run);
                if run.auto_advance {
                    run.fulfilled = Some(Vec::new());
                    run.auto_advance = false;
                }
            }

            let setter = Setter::tracked(self.scratch.clone(), run.clone(), self.tx.clone());
            for (slot, input) in pipe.inputs().iter().zip(inputs.iter_mut()) {
                if slot.name() == Some(DEP_SET) {
                    *input = Some(Value::Set(setter.clone()));
                }
            }
            Some(setter)
        };

        let result = self.invoke(&pipe, inputs, dependency).await?;

        {
            let mut run = lock(&run);
            run.result = Some(result.clone());
            run.has_returned = true;
        }

        if let Some(map) = result.to_map() {
            match &tracked {
                Some(setter) => {
                    setter.set_many(map)?;
                }
                None => lock(self.scratch).merge(map),
            }
        }

        let advance = {
            let run = lock(&run);
            !run.has_error
                && (result.is_exactly(true)
                    || (run.auto_advance && self.fault.is_none() && !result.is_exactly(false)))
        };

        if advance {
            self.advance(seq);
        }

        Ok(StepOutcome::Ran)
    }

    fn advance(&self, seq: u64) {
        let _ = self.tx.send(Signal::advance(seq));
    }

    fn resolve_inputs(
        &self,
        pipe: &PipeDescriptor,
        run: &Arc<Mutex<PipeRun>>,
        seq: u64,
    ) -> Vec<Option<Value>> {
        if pipe.inputs().is_empty() {
            return self.args.iter().map(|v| v.cloned()).collect();
        }

        let scratch = lock(self.scratch);
        pipe.inputs()
            .iter()
            .enumerate()
            .map(|(idx, slot)| match slot {
                InputSlot::Positional => self.args.get(idx).cloned(),
                InputSlot::Named(name) if name == DEP_NEXT => Some(Value::Next(Next::new(
                    self.tx.clone(),
                    seq,
                    run.clone(),
                ))),
                InputSlot::Named(name) if name == DEP_SET => {
                    Some(Value::Set(Setter::raw(self.scratch.clone())))
                }
                InputSlot::Named(name) => scratch.get(name).cloned(),
                InputSlot::Remap(map) => Some(self.remap(map)),
            })
            .collect()
    }

    /// Assemble a data object from positional arguments
    fn remap(&self, map: &BTreeMap<String, usize>) -> Value {
        let object = map
            .iter()
            .filter_map(|(key, idx)| {
                self.args
                    .get(*idx)
                    .map(|value| (key.clone(), value.to_json()))
            })
            .collect::<serde_json::Map<_, _>>();
        Value::Data(Json::Object(object))
    }

    async fn invoke(
        &self,
        pipe: &PipeDescriptor,
        inputs: Vec<Option<Value>>,
        dependency: Option<Dependency>,
    ) -> Result<Value, PipelineError> {
        match &pipe.behavior {
            Behavior::Call(cmd) => cmd.call(Args::new(inputs)).await,

            Behavior::Injected => match dependency.unwrap_or(Dependency::Missing) {
                Dependency::Callable(cmd) => {
                    let result = cmd.call(Args::new(inputs)).await?;
                    Ok(negated(result, pipe.negate()))
                }
                Dependency::Flag(flag) => Ok(Value::from(flag != pipe.negate())),
                Dependency::Missing | Dependency::Invalid => {
                    error!("Dependency `{}` is not a function", pipe.name());
                    Err(PipelineError::NotCallable {
                        name: pipe.name().to_string(),
                    })
                }
            },

            Behavior::Input(names) => {
                let mut scratch = lock(self.scratch);
                // A blank name still takes up its argument position
                for (idx, name) in names.iter().enumerate() {
                    if name.is_empty() {
                        continue;
                    }
                    match self.args.get(idx) {
                        Some(value) => scratch.set(name.clone(), value.clone()),
                        None => {
                            scratch.remove(name);
                        }
                    }
                }
                Ok(Value::from(true))
            }

            Behavior::Output(mappings) => {
                let writes: Vec<(String, Option<Value>)> = {
                    let scratch = lock(self.scratch);
                    mappings
                        .iter()
                        .map(|m| (scratch.target_for(m), scratch.get(&m.key).cloned()))
                        .collect()
                };

                // Subscribers run inside `set`, so the scratch lock is released first
                for (key, value) in writes {
                    match value {
                        Some(value) => {
                            debug!("Publishing `{}`", key);
                            self.store.set(&key, value);
                        }
                        None => {
                            debug!("Publishing `{}` as undefined", key);
                            self.store.remove(&key);
                        }
                    }
                }
                Ok(Value::from(true))
            }

            Behavior::Wait(delay) => {
                if let Some(next) = Args::new(inputs).next() {
                    let delay = *delay;
                    debug!("Waiting {:?} before continuing", delay);
                    tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        next.proceed();
                    });
                }
                Ok(Value::null())
            }

            Behavior::Throttle(gate) => {
                if gate.permit() {
                    Ok(Value::from(true))
                } else {
                    debug!("Throttled: less than {:?} since last pass", gate.interval());
                    Ok(Value::from(false))
                }
            }

            Behavior::ErrorHandler(handler) => {
                let snapshot = lock(self.scratch).snapshot();
                let args = Args::new(inputs).with_scratch(snapshot);
                match handler {
                    Handler::Call(cmd) => cmd.call(args).await,
                    Handler::Named(name) => {
                        let dependency = lock(self.scratch).dependency(name);
                        match dependency {
                            Dependency::Callable(cmd) => cmd.call(args).await,
                            Dependency::Flag(flag) => Ok(Value::from(flag)),
                            Dependency::Missing | Dependency::Invalid => {
                                error!("Error handler `{}` is not a function", name);
                                Err(PipelineError::NotCallable { name: name.clone() })
                            }
                        }
                    }
                }
            }
        }
    }
}

/// Flip a boolean result for `!` pipes; other values pass through
fn negated(value: Value, negate: bool) -> Value {
    match value.as_bool() {
        Some(b) if negate => Value::from(!b),
        _ => value,
    }
}
