//! Per-invocation scratch store

use crate::core::pipe::{OutputName, OutputTarget, DEP_ERROR};
use crate::core::value::{Dependency, Map, Value};

/// Working copy of the persistent store for one invocation
///
/// Writes here never reach the persistent store or its subscribers; only
/// OUTPUT steps publish values back.
#[derive(Debug, Clone, Default)]
pub struct ScratchStore {
    values: Map,
}

impl ScratchStore {
    pub fn new(seed: Map) -> Self {
        Self { values: seed }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.values.insert(key.into(), value);
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.values.remove(key)
    }

    pub fn merge(&mut self, values: Map) {
        self.values.extend(values);
    }

    /// Outstanding fault; a falsy value in the slot counts as none
    pub fn fault(&self) -> Option<&Value> {
        self.values.get(DEP_ERROR).filter(|v| v.is_truthy())
    }

    pub fn set_fault(&mut self, fault: Value) {
        self.values.insert(DEP_ERROR.to_string(), fault);
    }

    /// Resolve a name for injection
    pub fn dependency(&self, name: &str) -> Dependency {
        Dependency::from_slot(self.values.get(name))
    }

    /// Key an output is written under
    ///
    /// A dynamic target reads its key from this store. When that slot is
    /// not a non-empty string the declared `$slot` text itself is the key.
    pub fn target_for(&self, output: &OutputName) -> String {
        match &output.target {
            OutputTarget::Same => output.key.clone(),
            OutputTarget::Renamed(name) => name.clone(),
            OutputTarget::Dynamic(slot) => self
                .get(slot)
                .and_then(Value::as_str)
                .filter(|key| !key.is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| format!("${}", slot)),
        }
    }

    pub fn snapshot(&self) -> Map {
        self.values.clone()
    }
}
