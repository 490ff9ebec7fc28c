//! Test: YAML pipelines - flags and data only

use crate::helpers::*;
use actionpipe::core::config::PipelineConfig;
use actionpipe::{InvokeOptions, StateStore, Store, Value};
use std::sync::Arc;

const GATED: &str = r#"
name: "Gated publish"
description: "Publish the first argument when enabled"

store:
  enabled: true
  paused: false

steps:
  - step: input
    input: [x]
  - step: enabled
  - step: "!paused"
  - step: "audit?"
  - step: output
    input: ["x:result"]
"#;

#[tokio::test]
async fn test_yaml_pipeline_runs_against_its_store() {
    let pipeline = PipelineConfig::from_yaml(GATED)
        .unwrap()
        .to_pipeline()
        .unwrap();

    let report = pipeline.invoke(vec![Value::from(7)]).await.unwrap();

    assert_completed(&report);
    assert_eq!(report.steps_run, 5);
    assert_eq!(pipeline.store().get("result"), Some(Value::from(7)));
}

#[tokio::test]
async fn test_store_override_changes_flow() {
    let config = PipelineConfig::from_yaml(GATED).unwrap();
    let mut values = config.initial_store();
    values.insert("paused".to_string(), Value::from(true));
    let store = Arc::new(Store::with_values(values));

    let report = config
        .to_pipeline()
        .unwrap()
        .bind(InvokeOptions::default().with_store(store.clone()))
        .invoke(vec![Value::from(7)])
        .await
        .unwrap();

    assert_halted_at(&report, 2);
    assert_eq!(store.get("result"), None);
}

#[tokio::test]
async fn test_yaml_error_handler_flag() {
    let yaml = r#"
name: "Guarded"
store:
  failing: false
  handled: true
steps:
  - step: failing
error:
  handler: handled
"#;

    let pipeline = PipelineConfig::from_yaml(yaml)
        .unwrap()
        .to_pipeline()
        .unwrap();

    // A false flag halts; it is not a fault
    let report = pipeline.invoke(vec![]).await.unwrap();
    assert_halted_at(&report, 0);
    assert!(report.fault.is_none());
}

#[test]
fn test_validation_reports_step_index() {
    let yaml = r#"
name: "Broken"
steps:
  - step: input
    input: [x]
  - step: throttle
"#;

    let err = PipelineConfig::from_yaml(yaml).unwrap_err();
    let message = format!("{:#}", err);
    assert!(message.contains("Invalid step 1 (throttle)"));
    assert!(message.contains("'input' is required for throttle pipe."));
}

#[test]
fn test_config_round_trips_through_yaml() {
    let config = PipelineConfig::from_yaml(GATED).unwrap();
    let yaml = serde_yaml::to_string(&config).unwrap();
    let reparsed = PipelineConfig::from_yaml(&yaml).unwrap();

    assert_eq!(reparsed.name, config.name);
    assert_eq!(reparsed.steps.len(), config.steps.len());
}
