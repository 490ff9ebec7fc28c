//! Invocation driver - threads continuations between steps

use crate::core::context::ScratchStore;
use crate::core::error::PipelineError;
use crate::core::pipe::{PipeDescriptor, PipeKind};
use crate::core::pipeline::{InvokeOptions, Pipeline};
use crate::core::state::{InvocationReport, InvocationStatus, PipeRun};
use crate::core::value::{Args, Map, Value};
use crate::execution::executor::{StepExecutor, StepOutcome};
use crate::execution::lock;
use crate::execution::scheduler::StepCursor;
use crate::persistence::StateStore;
use chrono::Utc;
use std::fmt;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender, WeakUnboundedSender};
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Events that can occur during an invocation
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    Started {
        invocation_id: Uuid,
        pipeline: String,
    },
    /// `index` is `None` for the error handler
    StepStarted {
        invocation_id: Uuid,
        index: Option<usize>,
        name: String,
        kind: PipeKind,
    },
    StepSkipped {
        invocation_id: Uuid,
        index: usize,
        name: String,
    },
    FaultRouted {
        invocation_id: Uuid,
        step: usize,
        handler: String,
        fault: Value,
    },
    Finished {
        invocation_id: Uuid,
        status: InvocationStatus,
    },
}

/// Type for event handlers
pub type EventHandler = Arc<dyn Fn(PipelineEvent) + Send + Sync>;

/// A request to move the invocation forward
#[derive(Debug)]
pub(crate) struct Signal {
    /// Sequence number of the run that sent it
    run: u64,
    fault: Option<Value>,
    output: Option<Map>,
}

impl Signal {
    pub(crate) fn advance(run: u64) -> Self {
        Self {
            run,
            fault: None,
            output: None,
        }
    }
}

/// Continuation handle of a running invocation
///
/// Handed to pipes that ask for `next`. Only the first continuation of a
/// given step moves the invocation; later ones are ignored.
#[derive(Clone)]
pub struct Next {
    tx: UnboundedSender<Signal>,
    seq: u64,
    run: Arc<Mutex<PipeRun>>,
}

impl Next {
    pub(crate) fn new(tx: UnboundedSender<Signal>, seq: u64, run: Arc<Mutex<PipeRun>>) -> Self {
        Self { tx, seq, run }
    }

    /// Continue with the next step
    pub fn proceed(&self) {
        self.send(None, None);
    }

    /// Raise a fault; a falsy value is ignored and behaves like `proceed`
    pub fn fail(&self, fault: impl Into<Value>) {
        self.send(Some(fault.into()), None);
    }

    /// Write one value to the scratch store, then continue
    pub fn emit(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.emit_many(Map::from([(key.into(), value.into())]));
    }

    /// Write several values to the scratch store, then continue
    pub fn emit_many(&self, output: Map) {
        lock(&self.run).auto_advance = false;
        self.send(None, Some(output));
    }

    fn send(&self, fault: Option<Value>, output: Option<Map>) {
        let signal = Signal {
            run: self.seq,
            fault,
            output,
        };
        if self.tx.send(signal).is_err() {
            debug!("Continuation after the invocation ended");
        }
    }
}

impl fmt::Debug for Next {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Next").field("run", &self.seq).finish()
    }
}

/// Receiving end of the continuation channel
///
/// The driver only keeps a weak sender, so the channel closes once every
/// handle that could continue the chain is gone.
struct Mailbox {
    rx: UnboundedReceiver<Signal>,
    weak: WeakUnboundedSender<Signal>,
}

impl Mailbox {
    fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            weak: tx.downgrade(),
            rx,
        }
    }

    /// Sender for the next run
    ///
    /// A closed channel only holds signals from finished runs, so it is
    /// replaced rather than reopened.
    fn sender(&mut self) -> UnboundedSender<Signal> {
        match self.weak.upgrade() {
            Some(tx) => tx,
            None => {
                let (tx, rx) = mpsc::unbounded_channel();
                self.rx = rx;
                self.weak = tx.downgrade();
                tx
            }
        }
    }

    async fn recv(&mut self) -> Option<Signal> {
        self.rx.recv().await
    }
}

/// Runs one invocation of a pipeline
pub struct ExecutionEngine<'p> {
    pipeline: &'p Pipeline,
    options: &'p InvokeOptions,
}

impl<'p> ExecutionEngine<'p> {
    pub fn new(pipeline: &'p Pipeline, options: &'p InvokeOptions) -> Self {
        Self { pipeline, options }
    }

    /// Run the chain until it ends, halts or fails
    pub async fn execute(&self, args: Vec<Value>) -> Result<InvocationReport, PipelineError> {
        let invocation_id = Uuid::new_v4();
        let span = info_span!(
            "invocation",
            id = %invocation_id,
            pipeline = %self.pipeline.name()
        );
        self.drive(invocation_id, Args::from(args))
            .instrument(span)
            .await
    }

    async fn drive(
        &self,
        invocation_id: Uuid,
        args: Args,
    ) -> Result<InvocationReport, PipelineError> {
        let pipeline_name = self.pipeline.name();
        let pipes = self.pipeline.pipes();
        let store = self
            .options
            .store
            .clone()
            .unwrap_or_else(|| self.pipeline.store().clone());
        let seed = match &self.options.scratch {
            Some(seed) => seed.clone(),
            None => store.snapshot(),
        };
        let scratch = Arc::new(Mutex::new(ScratchStore::new(seed)));
        let started_at = Utc::now();

        info!("Starting pipeline invocation: {} ({})", pipeline_name, invocation_id);
        self.pipeline.emit(PipelineEvent::Started {
            invocation_id,
            pipeline: pipeline_name.to_string(),
        });

        let mut mailbox = Mailbox::new();
        let mut cursor = StepCursor::new(pipes.len());
        let mut current_run = 0u64;
        let mut steps_run = 0usize;
        let mut pending = Some(Signal::advance(current_run));

        let status = loop {
            let signal = match pending.take() {
                Some(signal) => signal,
                None => match mailbox.recv().await {
                    Some(signal) => signal,
                    None if cursor.is_error_routed() => break InvocationStatus::Faulted,
                    None => {
                        let step = cursor.last_step().unwrap_or(0);
                        warn!("Step {} stopped without continuing", step);
                        break InvocationStatus::Halted { step };
                    }
                },
            };

            if signal.run != current_run {
                debug!("Ignoring continuation from a finished step");
                continue;
            }

            let fault = {
                let mut scratch = lock(&scratch);
                if let Some(output) = signal.output {
                    scratch.merge(output);
                }
                if let Some(fault) = signal.fault.filter(Value::is_truthy) {
                    scratch.set_fault(fault);
                }
                scratch.fault().cloned()
            };

            let (pipe, index, step_fault) = match fault {
                Some(_) if cursor.is_error_routed() => break InvocationStatus::Faulted,
                Some(fault) => {
                    let failed = cursor.last_step().unwrap_or(0);
                    let failed_name = pipes.get(failed).map_or(pipeline_name, |p| p.name());
                    let Some(handler) = self.pipeline.error_handler() else {
                        error!(
                            "Unhandled fault in step {}:{}: {}",
                            failed, failed_name, fault
                        );
                        return Err(PipelineError::UnhandledFault {
                            pipeline: pipeline_name.to_string(),
                            step: failed,
                            name: failed_name.to_string(),
                            fault,
                        });
                    };

                    warn!(
                        "Routing fault from step {}:{} to error handler {}",
                        failed,
                        failed_name,
                        handler.name()
                    );
                    cursor.route_error();
                    self.pipeline.emit(PipelineEvent::FaultRouted {
                        invocation_id,
                        step: failed,
                        handler: handler.name().to_string(),
                        fault: fault.clone(),
                    });
                    (handler.clone(), None, Some(fault))
                }
                None => match cursor.advance() {
                    Some(idx) => (pipes[idx].clone(), Some(idx), None),
                    None => break InvocationStatus::Completed,
                },
            };

            if self.options.cancel.as_ref().is_some_and(|c| c.is_cancelled()) {
                info!("Invocation cancelled before step {}", pipe.name());
                break InvocationStatus::Cancelled;
            }

            current_run += 1;
            steps_run += 1;
            let outcome = self
                .run_step(
                    invocation_id,
                    &pipe,
                    index,
                    current_run,
                    step_fault,
                    &args,
                    &store,
                    &scratch,
                    &mut mailbox,
                )
                .await?;

            if let (StepOutcome::Skipped, Some(index)) = (outcome, index) {
                self.pipeline.emit(PipelineEvent::StepSkipped {
                    invocation_id,
                    index,
                    name: pipe.name().to_string(),
                });
            }
        };

        let (fault, scratch) = {
            let scratch = lock(&scratch);
            (scratch.fault().cloned(), scratch.snapshot())
        };

        info!("Pipeline invocation finished: {} - {:?}", pipeline_name, status);
        self.pipeline.emit(PipelineEvent::Finished {
            invocation_id,
            status,
        });

        if let Some(on_complete) = &self.options.on_complete {
            on_complete(fault.as_ref());
        }

        Ok(InvocationReport {
            invocation_id,
            pipeline: pipeline_name.to_string(),
            status,
            fault,
            steps_run,
            started_at,
            finished_at: Utc::now(),
            scratch,
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_step(
        &self,
        invocation_id: Uuid,
        pipe: &Arc<PipeDescriptor>,
        index: Option<usize>,
        seq: u64,
        fault: Option<Value>,
        args: &Args,
        store: &Arc<dyn StateStore>,
        scratch: &Arc<Mutex<ScratchStore>>,
        mailbox: &mut Mailbox,
    ) -> Result<StepOutcome, PipelineError> {
        match index {
            Some(idx) => info!("Executing step {}: {}", idx, pipe.name()),
            None => info!("Executing error handler: {}", pipe.name()),
        }
        self.pipeline.emit(PipelineEvent::StepStarted {
            invocation_id,
            index,
            name: pipe.name().to_string(),
            kind: pipe.kind(),
        });

        let run = Arc::new(Mutex::new(PipeRun::new(pipe.clone(), seq)));
        let tx = mailbox.sender();
        let executor = StepExecutor {
            fault,
            args,
            store: store.as_ref(),
            scratch,
            tx: &tx,
        };

        let outcome = executor.execute(run).await;
        drop(tx);

        outcome.map_err(|err| {
            error!("Step {} failed: {}", pipe.name(), err);
            err
        })
    }
}
