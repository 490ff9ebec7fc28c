//! Execution state models

use crate::core::pipe::PipeDescriptor;
use crate::core::value::{Map, Value};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

/// How an invocation ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum InvocationStatus {
    /// Every step ran and no fault is outstanding
    Completed,
    /// A fault was routed to the error handler and never cleared
    Faulted,
    /// The step at `step` neither advanced nor kept a way to advance later
    Halted { step: usize },
    /// The cancel flag was raised before a step started
    Cancelled,
}

impl InvocationStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, InvocationStatus::Completed)
    }
}

/// State of one pipe for one invocation
///
/// Shared between the executor, the `set` handle given to the step and
/// the `next` handle, so it lives behind a mutex.
#[derive(Debug)]
pub struct PipeRun {
    pub(crate) pipe: Arc<PipeDescriptor>,
    /// Sequence number of this run inside its invocation
    pub(crate) seq: u64,
    pub result: Option<Value>,
    pub has_returned: bool,
    /// Distinct declared outputs written so far; `None` when not tracking
    pub fulfilled: Option<Vec<String>>,
    pub has_error: bool,
    pub auto_advance: bool,
    pub started_at: DateTime<Utc>,
}

impl PipeRun {
    pub(crate) fn new(pipe: Arc<PipeDescriptor>, seq: u64) -> Self {
        Self {
            auto_advance: pipe.auto_advance(),
            pipe,
            seq,
            result: None,
            has_returned: false,
            fulfilled: None,
            has_error: false,
            started_at: Utc::now(),
        }
    }

    pub fn pipe(&self) -> &PipeDescriptor {
        &self.pipe
    }

    /// A result of exactly `false` vetoes any advance
    pub fn result_allows_advance(&self) -> bool {
        self.result.as_ref().map_or(true, |r| !r.is_exactly(false))
    }
}

/// Outcome of one invocation
#[derive(Debug, Clone, Serialize)]
pub struct InvocationReport {
    pub invocation_id: Uuid,
    pub pipeline: String,
    #[serde(flatten)]
    pub status: InvocationStatus,
    /// Final value of the fault slot, if truthy
    pub fault: Option<Value>,
    pub steps_run: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Scratch store as it was when the chain ended
    pub scratch: Map,
}

impl InvocationReport {
    pub fn duration(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}
