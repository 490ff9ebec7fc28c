//! Test: End-to-end - input, compute, publish

use crate::helpers::*;
use actionpipe::core::PipeKind;
use actionpipe::{Args, Command, PipelineBuilder, PipelineEvent, StateStore, Store, Value};
use serde_json::json;
use std::sync::{Arc, Mutex};

fn double() -> Command {
    Command::named("double", |args: Args| {
        let x = args.data(0).and_then(|v| v.as_i64()).unwrap_or(0);
        Ok(Value::from(json!({ "y": x * 2 })))
    })
}

#[tokio::test]
async fn test_doubling_publishes_only_at_output() {
    let store = Arc::new(Store::new());
    let notified = Arc::new(Mutex::new(Vec::new()));
    let listener = notified.clone();
    store.subscribe(&["y"], move |key, value| {
        listener
            .lock()
            .unwrap()
            .push((key.to_string(), value.clone()));
    });

    let pipeline = PipelineBuilder::new("double")
        .input("x")
        .pipe(double(), ["x"], ["y"])
        .output("y")
        .store(store.clone())
        .build()
        .unwrap();

    // Snapshot of notifications at the moment OUTPUT starts
    let before_output = Arc::new(Mutex::new(None));
    let (seen, snapshot) = (notified.clone(), before_output.clone());
    pipeline.add_event_handler(move |event| {
        if let PipelineEvent::StepStarted {
            kind: PipeKind::Output,
            ..
        } = event
        {
            *snapshot.lock().unwrap() = Some(seen.lock().unwrap().len());
        }
    });

    let report = pipeline.invoke(vec![Value::from(5)]).await.unwrap();

    assert_completed(&report);
    assert_eq!(store.get("y"), Some(Value::from(10)));
    assert_eq!(*before_output.lock().unwrap(), Some(0));
    assert_eq!(
        *notified.lock().unwrap(),
        vec![("y".to_string(), Value::from(10))]
    );
}

#[tokio::test]
async fn test_unsubscribed_listener_is_silent() {
    let store = Arc::new(Store::new());
    let notified = Arc::new(Mutex::new(0usize));
    let listener = notified.clone();
    let id = store.subscribe(&["y"], move |_, _| {
        *listener.lock().unwrap() += 1;
    });
    assert!(store.unsubscribe(id));

    let pipeline = PipelineBuilder::new("double")
        .input("x")
        .pipe(double(), ["x"], ["y"])
        .output("y")
        .store(store.clone())
        .build()
        .unwrap();

    pipeline.invoke(vec![Value::from(4)]).await.unwrap();

    assert_eq!(store.get("y"), Some(Value::from(8)));
    assert_eq!(*notified.lock().unwrap(), 0);
}

#[tokio::test]
async fn test_remapped_arguments_build_one_object() {
    let seen = Arc::new(Mutex::new(None));
    let recorded = seen.clone();
    let pipeline = PipelineBuilder::new("remap")
        .pipe(
            Command::new(move |args: Args| {
                *recorded.lock().unwrap() = args.data(0).cloned();
                Ok(Value::null())
            }),
            actionpipe::core::Io::Map(
                [("id".to_string(), 1), ("name".to_string(), 0)]
                    .into_iter()
                    .collect(),
            ),
            (),
        )
        .build()
        .unwrap();

    pipeline
        .invoke(vec![Value::from("widget"), Value::from(42)])
        .await
        .unwrap();

    assert_eq!(
        *seen.lock().unwrap(),
        Some(json!({ "id": 42, "name": "widget" }))
    );
}

#[tokio::test]
async fn test_subscriber_may_write_back() {
    let store = Arc::new(Store::new());
    let echo = store.clone();
    store.subscribe(&["y"], move |_, value| {
        echo.set("y_copy", value.clone());
    });

    let pipeline = PipelineBuilder::new("double")
        .input("x")
        .pipe(double(), ["x"], ["y"])
        .output("y")
        .store(store.clone())
        .build()
        .unwrap();

    pipeline.invoke(vec![Value::from(1)]).await.unwrap();

    assert_eq!(store.get("y_copy"), Some(Value::from(2)));
}
