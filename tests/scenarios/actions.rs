//! Test: Actions - named pipelines composed through the store

use crate::helpers::*;
use actionpipe::{
    Actions, Args, Command, DefinitionError, InvocationStatus, PipelineError, StateStore, Value,
};
use serde_json::json;
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;

fn registry() -> (Actions, Arc<RecordingStore>) {
    let store = Arc::new(RecordingStore::new());
    (Actions::new(store.clone()), store)
}

#[tokio::test]
async fn test_single_action_publishes_output() {
    let (actions, store) = registry();
    let save = actions
        .single(
            "normalize",
            Command::named("normalize", |args: Args| {
                let text = args.get(0).map(|v| v.to_string()).unwrap_or_default();
                Ok(Value::from(json!({ "normalized": text.to_lowercase() })))
            }),
            1u64,
            "normalized",
        )
        .unwrap();

    let report = save.invoke(vec![Value::from("HeLLo")]).await.unwrap();

    assert_completed(&report);
    assert_eq!(store.get("normalized"), Some(Value::from("hello")));
    assert_eq!(store.written_keys(), vec!["normalize", "normalized"]);
}

#[tokio::test]
async fn test_outer_action_injects_inner_by_name() {
    let (actions, store) = registry();
    let inner_runs = Arc::new(AtomicUsize::new(0));
    actions
        .define("audit", |b| b.pipe(counter("audit", inner_runs.clone()), (), ()))
        .unwrap();
    let outer = actions
        .define("checkout", |b| b.pipe("audit", (), ()).output("audited"))
        .unwrap();

    let report = outer.invoke(vec![]).await.unwrap();

    assert_completed(&report);
    assert_eq!(hits(&inner_runs), 1);
    assert!(store.written_keys().contains(&"audited".to_string()));
    assert_eq!(actions.names(), vec!["audit", "checkout"]);
}

#[tokio::test]
async fn test_inner_fault_surfaces_in_outer() {
    let (actions, _store) = registry();
    actions
        .define("charge", |b| {
            b.pipe(returning("decline", Value::fault("declined")), (), ())
                .error("onChargeError", ())
        })
        .unwrap();
    actions.store().set("onChargeError", Value::from(true));
    let outer = actions
        .define("checkout", |b| b.pipe("charge", (), ()))
        .unwrap();

    let err = outer.invoke(vec![]).await.unwrap_err();

    match err {
        PipelineError::UnhandledFault { pipeline, step, fault, .. } => {
            assert_eq!(pipeline, "checkout");
            assert_eq!(step, 0);
            assert_eq!(fault, Value::from("declined"));
        }
        other => panic!("unexpected error: {}", other),
    }
}

#[tokio::test]
async fn test_redefinition_keeps_first_action() {
    let (actions, _store) = registry();
    let first = actions.define("load", |b| b.wait(1)).unwrap();
    let again = actions
        .define("load", |b| b.wait(1).wait(1))
        .unwrap();

    assert_eq!(first.len(), again.len());
    assert_eq!(actions.len(), 1);

    let report = again.invoke(vec![]).await.unwrap();
    assert_eq!(report.status, InvocationStatus::Completed);
}

#[test]
fn test_unnamed_action_is_rejected() {
    let (actions, _store) = registry();
    let err = actions.define("", |b| b).unwrap_err();

    assert_eq!(err, DefinitionError::MissingName);
    assert_eq!(err.to_string(), "`name` is required for creating an action.");
    assert!(actions.is_empty());
}
