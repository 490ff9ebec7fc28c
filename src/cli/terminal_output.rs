//! Live progress for `run`
//!
//! Turns `PipelineEvent`s into terminal lines as they arrive:
//!
//! - step headers with progress, like `[2/4] double`
//! - skipped optional steps
//! - faults routed to the error handler
//!
//! Output is flushed after every event so async steps show up in order.

use crate::cli::output::{CROSS, INFO, ROCKET, SPINNER, WARN};
use crate::execution::PipelineEvent;
use console::style;
use std::io::{self, Write};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Prints invocation events to stdout
#[derive(Debug)]
pub struct TerminalProgress {
    total_steps: usize,
    steps_seen: AtomicUsize,
}

impl TerminalProgress {
    pub fn new(total_steps: usize) -> Self {
        Self {
            total_steps,
            steps_seen: AtomicUsize::new(0),
        }
    }

    pub fn steps_seen(&self) -> usize {
        self.steps_seen.load(Ordering::SeqCst)
    }

    pub fn on_event(&self, event: &PipelineEvent) {
        if let Some(line) = self.render(event) {
            println!("{}", line);
            let _ = io::stdout().flush();
        }
    }

    /// Line for an event; `None` for events the summary already covers
    pub fn render(&self, event: &PipelineEvent) -> Option<String> {
        match event {
            PipelineEvent::Started {
                invocation_id,
                pipeline,
            } => Some(format!(
                "{} Starting {} ({})",
                ROCKET,
                style(pipeline).bold(),
                style(&invocation_id.to_string()[..8]).dim()
            )),
            PipelineEvent::StepStarted {
                index: Some(index),
                name,
                ..
            } => {
                self.steps_seen.fetch_add(1, Ordering::SeqCst);
                Some(self.step_header(*index, name))
            }
            PipelineEvent::StepStarted {
                index: None, name, ..
            } => Some(format!("{} {} {}", WARN, style("handler").yellow(), name)),
            PipelineEvent::StepSkipped { index, name, .. } => Some(format!(
                "{} {} {}",
                INFO,
                style(format!("[{}/{}]", index + 1, self.total_steps)).dim(),
                style(format!("{} (skipped)", name)).dim()
            )),
            PipelineEvent::FaultRouted {
                step,
                handler,
                fault,
                ..
            } => Some(format!(
                "{} step {} faulted: {} -> {}",
                CROSS,
                step,
                style(fault).red(),
                style(handler).yellow()
            )),
            PipelineEvent::Finished { .. } => None,
        }
    }

    fn step_header(&self, index: usize, name: &str) -> String {
        format!(
            "{} {} {}",
            SPINNER,
            style(format!("[{}/{}]", index + 1, self.total_steps)).cyan(),
            style(name).bold()
        )
    }
}
