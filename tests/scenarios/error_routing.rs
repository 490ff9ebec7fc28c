//! Test: Error routing - faults go to the handler or escape to the caller

use crate::helpers::*;
use actionpipe::{
    Args, Command, InvocationStatus, InvokeOptions, PipelineBuilder, PipelineError,
    PipelineEvent, Value,
};
use std::sync::atomic::AtomicUsize;
use std::sync::{Arc, Mutex};

fn failing(name: &str, message: &'static str) -> Command {
    Command::named(name, move |_| Ok(Value::fault(message)))
}

/// Handler that records the fault it was given
fn recording_handler(seen: Arc<Mutex<Vec<Value>>>) -> Command {
    Command::named("report", move |args: Args| {
        if let Some(fault) = args.get(0) {
            seen.lock().unwrap().push(fault.clone());
        }
        Ok(Value::null())
    })
}

#[tokio::test]
async fn test_fault_reaches_handler() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let after = Arc::new(AtomicUsize::new(0));
    let pipeline = PipelineBuilder::new("checkout")
        .pipe(failing("charge", "card declined"), (), ())
        .pipe(counter("ship", after.clone()), (), ())
        .error(recording_handler(seen.clone()), ())
        .build()
        .unwrap();

    let report = pipeline.invoke(vec![]).await.unwrap();

    assert_eq!(report.status, InvocationStatus::Faulted);
    assert_eq!(report.fault, Some(Value::from("card declined")));
    assert_eq!(*seen.lock().unwrap(), vec![Value::from("card declined")]);
    assert_eq!(hits(&after), 0);
}

#[tokio::test]
async fn test_unhandled_fault_names_pipeline_and_step() {
    let pipeline = PipelineBuilder::new("checkout")
        .pipe(returning("validate", Value::null()), (), ())
        .pipe(failing("charge", "card declined"), (), ())
        .build()
        .unwrap();

    let err = pipeline.invoke(vec![]).await.unwrap_err();

    match &err {
        PipelineError::UnhandledFault {
            pipeline,
            step,
            name,
            fault,
        } => {
            assert_eq!(pipeline, "checkout");
            assert_eq!(*step, 1);
            assert_eq!(name, "charge");
            assert_eq!(fault, &Value::from("card declined"));
        }
        other => panic!("unexpected error: {}", other),
    }
    let message = err.to_string();
    assert!(message.contains("\"checkout\""));
    assert!(message.contains("1:charge"));
}

#[tokio::test]
async fn test_handler_clearing_fault_resumes_after_failed_step() {
    let log = StepLog::new();
    let pipeline = PipelineBuilder::new("recovering")
        .pipe(failing("flaky", "timeout"), (), ())
        .pipe(log.step("after"), (), ())
        .error(
            Command::named("recover", |args: Args| {
                let next = args.next().expect("next is injected");
                next.emit("error", Value::null());
                Ok(Value::null())
            }),
            ["error", "next"],
        )
        .build()
        .unwrap();

    let report = pipeline.invoke(vec![]).await.unwrap();

    assert_completed(&report);
    assert_eq!(report.fault, None);
    assert_eq!(log.entries(), vec!["after"]);
}

#[tokio::test]
async fn test_handler_gets_inputs_and_scratch() {
    let seen = Arc::new(Mutex::new(None));
    let recorded = seen.clone();
    let pipeline = PipelineBuilder::new("context")
        .input("order")
        .pipe(failing("charge", "declined"), (), ())
        .error(
            Command::named("report", move |args: Args| {
                let order = args.get(1).cloned();
                let scratch_order = args.scratch().and_then(|s| s.get("order").cloned());
                *recorded.lock().unwrap() = Some((order, scratch_order));
                Ok(Value::null())
            }),
            ["error", "order"],
        )
        .build()
        .unwrap();

    pipeline.invoke(vec![Value::from("A-17")]).await.unwrap();

    let (order, scratch_order) = seen.lock().unwrap().clone().unwrap();
    assert_eq!(order, Some(Value::from("A-17")));
    assert_eq!(scratch_order, Some(Value::from("A-17")));
}

#[tokio::test]
async fn test_fault_through_setter_and_next() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let pipeline = PipelineBuilder::new("raised")
        .pipe(
            Command::new(|args: Args| {
                args.setter().expect("set is injected").set("error", "via set")?;
                Ok(Value::null())
            }),
            ["set"],
            ["result"],
        )
        .error(recording_handler(seen.clone()), ())
        .build()
        .unwrap();

    pipeline.invoke(vec![]).await.unwrap();

    let other = PipelineBuilder::new("raised by next")
        .pipe(
            Command::new(|args: Args| {
                args.next().expect("next is injected").fail("via next");
                Ok(Value::null())
            }),
            ["next"],
            (),
        )
        .error(recording_handler(seen.clone()), ())
        .build()
        .unwrap();

    other.invoke(vec![]).await.unwrap();

    assert_eq!(
        *seen.lock().unwrap(),
        vec![Value::from("via set"), Value::from("via next")]
    );
}

#[tokio::test]
async fn test_falsy_fault_is_ignored() {
    let log = StepLog::new();
    let pipeline = PipelineBuilder::new("falsy")
        .pipe(
            Command::new(|args: Args| {
                args.next().expect("next is injected").fail(Value::from(""));
                Ok(Value::null())
            }),
            ["next"],
            (),
        )
        .pipe(log.step("after"), (), ())
        .build()
        .unwrap();

    let report = pipeline.invoke(vec![]).await.unwrap();

    assert_completed(&report);
    assert_eq!(log.entries(), vec!["after"]);
}

#[tokio::test]
async fn test_completion_and_events_report_fault() {
    let completed = Arc::new(Mutex::new(Vec::new()));
    let routed = Arc::new(Mutex::new(Vec::new()));
    let (done, events) = (completed.clone(), routed.clone());
    let pipeline = PipelineBuilder::new("observed")
        .pipe(returning("first", Value::null()), (), ())
        .pipe(failing("second", "boom"), (), ())
        .error("onError", ())
        .store(seeded(&[("onError", Value::from(true))]))
        .build()
        .unwrap();
    pipeline.add_event_handler(move |event| {
        if let PipelineEvent::FaultRouted { step, handler, .. } = event {
            events.lock().unwrap().push((step, handler));
        }
    });

    let report = pipeline
        .bind(InvokeOptions::default().on_complete(move |fault| {
            done.lock().unwrap().push(fault.cloned());
        }))
        .invoke(vec![])
        .await
        .unwrap();

    assert_eq!(report.status, InvocationStatus::Faulted);
    assert_eq!(*routed.lock().unwrap(), vec![(1, "onError".to_string())]);
    assert_eq!(*completed.lock().unwrap(), vec![Some(Value::from("boom"))]);
}
