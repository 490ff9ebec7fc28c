//! Test: Sequencing - ordinary steps run once each, in order

use crate::helpers::*;
use actionpipe::core::PipeKind;
use actionpipe::{Command, InvokeOptions, PipelineBuilder, PipelineEvent, Value};
use std::sync::{Arc, Mutex};

#[tokio::test]
async fn test_steps_run_once_in_order() {
    let log = StepLog::new();
    let pipeline = PipelineBuilder::new("ordered")
        .pipe(log.step("plan"), (), ())
        .pipe(log.step("build"), (), ())
        .pipe(log.step("ship"), (), ())
        .build()
        .unwrap();

    let report = pipeline.invoke(vec![]).await.unwrap();

    assert_completed(&report);
    assert_eq!(report.steps_run, 3);
    assert_eq!(log.entries(), vec!["plan", "build", "ship"]);
}

#[tokio::test]
async fn test_completion_handler_runs_once_without_fault() {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let seen = calls.clone();
    let log = StepLog::new();
    let pipeline = PipelineBuilder::new("done")
        .pipe(log.step("only"), (), ())
        .build()
        .unwrap();

    let invoker = pipeline.bind(InvokeOptions::default().on_complete(move |fault| {
        seen.lock().unwrap().push(fault.cloned());
    }));
    invoker.invoke(vec![]).await.unwrap();

    assert_eq!(*calls.lock().unwrap(), vec![None]);
}

#[tokio::test]
async fn test_events_follow_step_order() {
    let events = Arc::new(Mutex::new(Vec::new()));
    let recorded = events.clone();
    let log = StepLog::new();
    let pipeline = PipelineBuilder::new("evented")
        .input("x")
        .pipe(log.step("work"), ["x"], ())
        .build()
        .unwrap();
    pipeline.add_event_handler(move |event| {
        let label = match event {
            PipelineEvent::Started { .. } => "started".to_string(),
            PipelineEvent::StepStarted { index, kind, .. } => {
                format!("step {:?} {:?}", index, kind)
            }
            PipelineEvent::Finished { status, .. } => format!("finished {:?}", status),
            other => format!("{:?}", other),
        };
        recorded.lock().unwrap().push(label);
    });

    pipeline.invoke(vec![Value::from(1)]).await.unwrap();

    assert_eq!(
        *events.lock().unwrap(),
        vec![
            "started".to_string(),
            format!("step Some(0) {:?}", PipeKind::Input),
            format!("step Some(1) {:?}", PipeKind::Step),
            "finished Completed".to_string(),
        ]
    );
}

#[tokio::test]
async fn test_positional_args_pass_through_without_inputs() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let record = seen.clone();
    let pipeline = PipelineBuilder::new("passthrough")
        .pipe(
            Command::new(move |args| {
                let values = args.iter().map(|v| v.cloned()).collect::<Vec<_>>();
                record.lock().unwrap().extend(values);
                Ok(Value::null())
            }),
            (),
            (),
        )
        .build()
        .unwrap();

    pipeline.invoke(vec![Value::from(1), Value::from("two")]).await.unwrap();

    assert_eq!(
        *seen.lock().unwrap(),
        vec![Some(Value::from(1)), Some(Value::from("two"))]
    );
}

#[tokio::test]
async fn test_empty_pipeline_completes() {
    let pipeline = PipelineBuilder::new("empty").build().unwrap();
    let report = pipeline.invoke(vec![]).await.unwrap();

    assert_completed(&report);
    assert_eq!(report.steps_run, 0);
}
