//! Test utility functions for actionpipe scenarios

#![allow(dead_code)]

use actionpipe::core::{InvocationReport, InvocationStatus, Map};
use actionpipe::{Args, Command, StateStore, Store, Value};

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Store that records every `set` it receives, in order
#[derive(Debug, Default)]
pub struct RecordingStore {
    inner: Store,
    writes: Mutex<Vec<(String, Value)>>,
}

impl RecordingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_values(values: Map) -> Self {
        Self {
            inner: Store::with_values(values),
            writes: Mutex::new(Vec::new()),
        }
    }

    pub fn writes(&self) -> Vec<(String, Value)> {
        self.writes.lock().unwrap().clone()
    }

    pub fn written_keys(&self) -> Vec<String> {
        self.writes().into_iter().map(|(key, _)| key).collect()
    }
}

impl StateStore for RecordingStore {
    fn get(&self, key: &str) -> Option<Value> {
        self.inner.get(key)
    }

    fn set(&self, key: &str, value: Value) {
        self.writes
            .lock()
            .unwrap()
            .push((key.to_string(), value.clone()));
        self.inner.set(key, value);
    }

    fn remove(&self, key: &str) -> Option<Value> {
        self.inner.remove(key)
    }

    fn snapshot(&self) -> Map {
        self.inner.snapshot()
    }
}

/// Shared, ordered log of step names
#[derive(Debug, Clone, Default)]
pub struct StepLog(Arc<Mutex<Vec<String>>>);

impl StepLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    /// A step that appends its name and auto-advances
    pub fn step(&self, name: &str) -> Command {
        let log = self.clone();
        let entry = name.to_string();
        Command::named(name, move |_| {
            log.push(entry.clone());
            Ok(Value::null())
        })
    }
}

/// Command that counts its calls and returns null
pub fn counter(name: &str, hits: Arc<AtomicUsize>) -> Command {
    Command::named(name, move |_| {
        hits.fetch_add(1, Ordering::SeqCst);
        Ok(Value::null())
    })
}

/// Command that returns a fixed value
pub fn returning(name: &str, value: Value) -> Command {
    Command::named(name, move |_: Args| Ok(value.clone()))
}

/// Store seeded from `(key, value)` pairs
pub fn seeded(pairs: &[(&str, Value)]) -> Arc<Store> {
    let values = pairs
        .iter()
        .map(|(key, value)| (key.to_string(), value.clone()))
        .collect();
    Arc::new(Store::with_values(values))
}

pub fn hits(counter: &AtomicUsize) -> usize {
    counter.load(Ordering::SeqCst)
}

pub fn assert_completed(report: &InvocationReport) {
    assert_eq!(
        report.status,
        InvocationStatus::Completed,
        "pipeline {} ended with {:?} (fault: {:?})",
        report.pipeline,
        report.status,
        report.fault
    );
}

pub fn assert_halted_at(report: &InvocationReport, step: usize) {
    assert_eq!(report.status, InvocationStatus::Halted { step });
}
