//! Test: Service Readiness - service ports accept connections before steps start

use crate::helpers::*;
use covpipe::execution::ExecutionEvent;
use std::time::Duration;

fn workflow(port: u16) -> String {
    format!(
        r#"
name: "Test: Readiness"
on: {{ push: {{ branches: [master] }} }}
readiness_timeout_secs: 10
services:
  redis:
    image: redis:5.0
    ports: ["{port}:6379"]
steps:
  - name: Collect
    uses: probe@v1
"#
    )
}

/// Test that a slow service is waited for before the collector runs
#[tokio::test]
async fn test_port_reachable_before_collector() {
    let port = free_port();
    let builder = HarnessBuilder::new(&workflow(port));
    let log = builder.log().clone();
    let harness = builder
        .action(MockAction::new("probe", Script::ProbePort(port), &log))
        .runtime(MockRuntime::new(log.clone()).with_startup_delay(Duration::from_millis(300)))
        .build();

    let outcome = harness.push("master", "abc").await;

    assert_run_succeeded(&outcome);
    assert!(log.contains(&format!("probe:{}:open", port)));

    let events = harness.events();
    let provisioned = events
        .iter()
        .position(|e| matches!(e, ExecutionEvent::Provisioned { .. }))
        .expect("provisioned event");
    let collect = events
        .iter()
        .position(|e| matches!(e, ExecutionEvent::StepStarted { step, .. } if step == "Collect"))
        .expect("collector started");
    assert!(provisioned < collect);
}

/// Test that the service is gone once the run is over
#[tokio::test]
async fn test_service_stopped_after_run() {
    let port = free_port();
    let builder = HarnessBuilder::new(&workflow(port));
    let log = builder.log().clone();
    let harness = builder
        .action(MockAction::new("probe", Script::ProbePort(port), &log))
        .build();

    assert_run_succeeded(&harness.push("master", "abc").await);
    assert!(log.contains("stop:redis"));
    assert!(std::net::TcpStream::connect(("127.0.0.1", port)).is_err());
}
