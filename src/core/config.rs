//! Pipeline configuration from YAML

use crate::core::pipe::{Io, PipeDescriptor, Specifier};
use crate::core::pipeline::{Pipeline, PipelineBuilder};
use crate::core::value::{Map, Value};
use crate::persistence::Store;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// Top-level pipeline configuration loaded from YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Pipeline name
    pub name: String,

    /// Pipeline version (optional)
    #[serde(default)]
    pub version: Option<String>,

    #[serde(default)]
    pub description: Option<String>,

    /// Initial contents of the persistent store
    #[serde(default)]
    pub store: BTreeMap<String, serde_json::Value>,

    /// Pipeline steps, in order
    pub steps: Vec<StepConfig>,

    /// Designated error handler
    #[serde(default)]
    pub error: Option<ErrorConfig>,
}

/// Step configuration as defined in YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepConfig {
    /// Keyword, injected name or throttle interval
    pub step: StepRef,

    #[serde(default, skip_serializing_if = "Io::is_empty")]
    pub input: Io,

    #[serde(default, skip_serializing_if = "Io::is_empty")]
    pub output: Io,
}

/// What a configured step refers to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StepRef {
    Millis(u64),
    Name(String),
}

impl From<&StepRef> for Specifier {
    fn from(step: &StepRef) -> Self {
        match step {
            StepRef::Millis(ms) => Specifier::Throttle(*ms),
            StepRef::Name(name) => Specifier::Named(name.clone()),
        }
    }
}

impl fmt::Display for StepRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepRef::Millis(ms) => write!(f, "{}ms", ms),
            StepRef::Name(name) => write!(f, "{}", name),
        }
    }
}

/// Error handler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorConfig {
    /// Name of the injected handler
    pub handler: String,

    #[serde(default, skip_serializing_if = "Io::is_empty")]
    pub input: Io,
}

impl PipelineConfig {
    /// Load pipeline configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read pipeline file {}", path.display()))?;
        Self::from_yaml(&content)
    }

    /// Parse pipeline configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: PipelineConfig =
            serde_yaml::from_str(yaml).context("Failed to parse pipeline YAML")?;
        config.validate()?;
        Ok(config)
    }

    /// Build every descriptor so definition errors surface at load time
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            anyhow::bail!("Pipeline name must not be empty");
        }

        for (idx, step) in self.steps.iter().enumerate() {
            PipeDescriptor::build(&step.step, step.input.clone(), step.output.clone())
                .with_context(|| format!("Invalid step {} ({})", idx, step.step))?;
        }

        if let Some(error) = &self.error {
            PipeDescriptor::error_handler(error.handler.as_str(), error.input.clone())
                .with_context(|| format!("Invalid error handler ({})", error.handler))?;
        }

        // Catches a second handler, declared either inline or in `error`
        self.builder().build()?;
        Ok(())
    }

    /// Initial store contents as values
    pub fn initial_store(&self) -> Map {
        self.store
            .iter()
            .map(|(key, value)| (key.clone(), Value::Data(value.clone())))
            .collect()
    }

    /// Convert config to a Pipeline domain model backed by a fresh store
    pub fn to_pipeline(&self) -> Result<Pipeline> {
        let pipeline = self
            .builder()
            .build()
            .with_context(|| format!("Failed to build pipeline {}", self.name))?;
        Ok(pipeline)
    }

    fn builder(&self) -> PipelineBuilder {
        let store = Arc::new(Store::with_values(self.initial_store()));
        let mut builder = PipelineBuilder::new(self.name.clone()).store(store);

        for step in &self.steps {
            builder = builder.pipe(&step.step, step.input.clone(), step.output.clone());
        }

        if let Some(error) = &self.error {
            builder = builder.error(error.handler.as_str(), error.input.clone());
        }

        builder
    }
}
