mod common;

use common::{init_tracing, wait_for_flag, Trace};
use graphcore::{FlowError, Framework, GraphBuilder, NodeError};
use graphruntime::GraphRuntime;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

fn record(trace: &Trace, entry: &'static str) -> impl Fn() -> Result<(), NodeError> + Send + Sync + 'static {
    let trace = trace.clone();
    move || {
        trace.push(entry);
        Ok(())
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_joined_subflow_finishes_before_successors() {
    init_tracing();

    let trace = Trace::default();
    let mut framework = Framework::named("joined");

    let parent = {
        let trace = trace.clone();
        framework.emplace_subflow(move |subflow| {
            trace.push("parent");
            let first = subflow.emplace(record(&trace, "child1"));
            let second = subflow.emplace(record(&trace, "child2"));
            let third = subflow.emplace(record(&trace, "child3"));
            subflow.precede(first, second);
            subflow.precede(first, third);
            subflow.join();
            Ok(())
        })
    };
    let after = framework.emplace(record(&trace, "after"));
    framework.precede(parent, after);

    let runtime = GraphRuntime::new();
    let report = runtime.run(&framework).wait().await.unwrap();

    assert_eq!(report.nodes_executed, 5);
    let after_pos = trace.position("after");
    for child in ["child1", "child2", "child3"] {
        assert!(trace.position("parent") < trace.position(child));
        assert!(trace.position(child) < after_pos, "{} ran after the successor", child);
    }
    assert!(trace.position("child1") < trace.position("child2"));
    assert!(trace.position("child1") < trace.position("child3"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_detached_subflow_does_not_block_successors() {
    init_tracing();

    let trace = Trace::default();
    let successor_ran = Arc::new(AtomicBool::new(false));
    let mut framework = Framework::named("detached");

    let parent = {
        let trace = trace.clone();
        let successor_ran = Arc::clone(&successor_ran);
        framework.emplace_subflow(move |subflow| {
            let trace = trace.clone();
            let successor_ran = Arc::clone(&successor_ran);
            subflow.emplace(move || {
                // only finishes once the parent's successor has run
                wait_for_flag(&successor_ran)?;
                trace.push("detached");
                Ok(())
            });
            subflow.detach();
            Ok(())
        })
    };
    let successor = {
        let trace = trace.clone();
        let successor_ran = Arc::clone(&successor_ran);
        framework.emplace(move || {
            trace.push("successor");
            successor_ran.store(true, Ordering::Release);
            Ok(())
        })
    };
    framework.precede(parent, successor);

    let runtime = GraphRuntime::new();
    let report = runtime.run(&framework).wait().await.unwrap();

    // the topology still waited for the detached task
    assert_eq!(report.nodes_executed, 3);
    assert_eq!(trace.snapshot(), vec!["successor".to_string(), "detached".to_string()]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_nested_subflows() {
    let trace = Trace::default();
    let mut framework = Framework::named("nested");

    let outer = {
        let trace = trace.clone();
        framework.emplace_subflow(move |subflow| {
            let inner_trace = trace.clone();
            let inner = subflow.emplace_subflow(move |nested| {
                let left = nested.emplace(record(&inner_trace, "leaf-left"));
                let right = nested.emplace(record(&inner_trace, "leaf-right"));
                nested.precede(left, right);
                Ok(())
            });
            let tail = subflow.emplace(record(&trace, "tail"));
            subflow.precede(inner, tail);
            Ok(())
        })
    };
    let end = framework.emplace(record(&trace, "end"));
    framework.precede(outer, end);

    let runtime = GraphRuntime::new();
    let report = runtime.run(&framework).wait().await.unwrap();

    assert_eq!(
        trace.snapshot(),
        vec![
            "leaf-left".to_string(),
            "leaf-right".to_string(),
            "tail".to_string(),
            "end".to_string(),
        ]
    );
    // outer, inner, two leaves, tail, end
    assert_eq!(report.nodes_executed, 6);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_empty_subflow_completes_immediately() {
    let trace = Trace::default();
    let mut framework = Framework::new();
    let parent = framework.emplace_subflow(|_| Ok(()));
    let next = framework.emplace(record(&trace, "next"));
    framework.precede(parent, next);

    let runtime = GraphRuntime::new();
    let report = runtime.run(&framework).wait().await.unwrap();

    assert_eq!(report.nodes_executed, 2);
    assert_eq!(trace.snapshot(), vec!["next".to_string()]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_subflow_body_failure_names_the_parent() {
    let mut framework = Framework::new();
    let parent = framework.emplace_subflow(|subflow| {
        subflow.emplace(|| Ok(()));
        Err(NodeError::failed("cannot spawn"))
    });
    framework.task(parent).name("spawner");

    let runtime = GraphRuntime::new();
    let error = runtime.run(&framework).wait().await.unwrap_err();

    assert_eq!(
        error,
        FlowError::Task {
            task: "spawner".to_string(),
            source: NodeError::failed("cannot spawn"),
        }
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_detached_failure_surfaces_on_topology() {
    init_tracing();

    let mut framework = Framework::named("detached-failure");
    framework.emplace_subflow(|subflow| {
        let task = subflow.emplace(|| Err(NodeError::failed("late failure")));
        subflow.task(task).name("straggler");
        subflow.detach();
        Ok(())
    });

    let runtime = GraphRuntime::new();
    let error = runtime.run(&framework).wait().await.unwrap_err();

    match error {
        FlowError::Task { task, source } => {
            assert_eq!(task, "straggler");
            assert_eq!(source, NodeError::ExecutionFailed("late failure".to_string()));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(framework.num_topologies(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_subflow_spawns_fresh_tasks_each_run() {
    let trace = Trace::default();
    let mut framework = Framework::new();
    {
        let trace = trace.clone();
        framework.emplace_subflow(move |subflow| {
            subflow.emplace(record(&trace, "spawned"));
            Ok(())
        });
    }

    let runtime = GraphRuntime::new();
    for _ in 0..3 {
        runtime.run(&framework).wait().await.unwrap();
    }

    assert_eq!(trace.snapshot().len(), 3);
    assert_eq!(framework.num_nodes(), 1);
}
