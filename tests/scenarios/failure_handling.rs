//! Test: Failure Handling - fail-fast, best-effort steps and provisioning failures

use crate::helpers::*;
use covpipe::execution::{ExecutionEvent, RunError};
use std::time::Duration;

/// Test that a failing step halts the run and later steps never execute
#[tokio::test]
async fn test_failing_step_halts_run() {
    let yaml = r#"
name: "Test: Fail Fast"
on: { push: { branches: [master] } }
steps:
  - name: First
    uses: mark@v1
    with: { label: first }
  - name: Broken
    run: echo about to fail && exit 3
  - name: Third
    uses: mark@v1
    with: { label: third }
"#;

    let builder = HarnessBuilder::new(yaml);
    let log = builder.log().clone();
    let harness = builder
        .action(MockAction::new("mark", Script::Succeed("marked\n".to_string()), &log))
        .build();

    let outcome = harness.push("master", "abc").await;

    assert_run_failed(&outcome);
    assert_execution_order(&outcome, &["First", "Broken"]);
    assert_step_skipped(&outcome, "Third");
    assert!(log.contains("mark:first"));
    assert!(!log.contains("mark:third"), "Third step must never execute");

    assert!(matches!(
        &outcome.result,
        Err(RunError::StepFailed { step, .. }) if step == "Broken"
    ));
    assert!(step_error(&outcome, "Broken").contains('3'));
    assert_eq!(outcome.summary.failed_steps, 1);
    assert!(outcome.summary.error.is_some());
}

/// Test that no report is published or archived after the collector fails
#[tokio::test]
async fn test_collector_failure_publishes_nothing() {
    let yaml = r#"
name: "Test: Collector Failure"
on: { push: { branches: [master] } }
steps:
  - name: Collect
    uses: coverage@v1
    with: { label: collect }
  - name: Publish
    uses: upload@v1
    with: { token: abc, label: publish }
  - name: Archive
    uses: archive@v1
    with: { name: code-coverage-report, path: cobertura.xml }
"#;

    let builder = HarnessBuilder::new(yaml);
    let log = builder.log().clone();
    let harness = builder
        .action(MockAction::new("coverage", Script::Fail("tests failed".to_string()), &log))
        .action(mock_upload(&log))
        .build();

    let outcome = harness.push("master", "abc").await;

    assert_run_failed(&outcome);
    assert_step_skipped(&outcome, "Publish");
    assert_step_skipped(&outcome, "Archive");
    assert!(!log.contains("upload:publish"));
    assert!(harness.artifacts_named("code-coverage-report").await.is_empty());
}

/// Test that a best-effort step failure is recorded but does not halt the run
#[tokio::test]
async fn test_best_effort_step_keeps_going() {
    let yaml = r#"
name: "Test: Best Effort"
on: { push: { branches: [master] } }
steps:
  - name: Collect
    uses: coverage@v1
  - name: Publish
    uses: upload@v1
    continue-on-error: true
    with: { token: abc, label: publish }
  - name: Archive
    uses: archive@v1
    with: { name: code-coverage-report, path: cobertura.xml }
"#;

    let builder = HarnessBuilder::new(yaml);
    let log = builder.log().clone();
    let harness = builder
        .action(mock_coverage(&log))
        .action(MockAction::new("upload", Script::Fail("service unavailable".to_string()), &log))
        .build();

    let outcome = harness.push("master", "abc").await;

    assert_run_succeeded(&outcome);
    assert!(step_error(&outcome, "Publish").contains("service unavailable"));
    assert_eq!(harness.artifacts_named("code-coverage-report").await.len(), 1);

    assert!(harness.events().iter().any(|e| matches!(
        e,
        ExecutionEvent::StepFailed { step, continue_on_error: true, .. } if step == "Publish"
    )));
}

/// Test that archiving a file that was never produced fails the run
#[tokio::test]
async fn test_missing_report_fails_archive() {
    let yaml = r#"
name: "Test: Missing Report"
on: { push: { branches: [master] } }
steps:
  - name: Archive
    uses: archive@v1
    with: { name: code-coverage-report, path: cobertura.xml }
"#;

    let harness = HarnessBuilder::new(yaml).build();
    let outcome = harness.push("master", "abc").await;

    assert_run_failed(&outcome);
    assert!(matches!(
        &outcome.result,
        Err(RunError::MissingArtifact(path)) if path.ends_with("cobertura.xml")
    ));
    assert!(harness.artifacts_named("code-coverage-report").await.is_empty());
}

/// Test that a service that never becomes ready fails the run before any step
#[tokio::test]
async fn test_service_not_ready_fails_run() {
    let yaml = format!(
        r#"
name: "Test: Service Timeout"
on: {{ push: {{ branches: [master] }} }}
readiness_timeout_secs: 1
services:
  redis:
    image: redis:5.0
    ports: ["{}:6379"]
steps:
  - name: Collect
    uses: coverage@v1
    with: {{ label: collect }}
"#,
        free_port()
    );

    let builder = HarnessBuilder::new(&yaml);
    let log = builder.log().clone();
    let harness = builder
        .action(mock_coverage(&log))
        .runtime(MockRuntime::new(log.clone()).unresponsive())
        .build();

    let started = std::time::Instant::now();
    let outcome = harness.push("master", "abc").await;

    assert_run_failed(&outcome);
    assert!(matches!(outcome.result, Err(RunError::Provisioning(_))));
    assert_step_skipped(&outcome, "Collect");
    assert!(!log.contains("coverage:collect"));
    assert!(log.contains("stop:redis"), "started containers are stopped again");
    assert!(started.elapsed() < Duration::from_secs(10));
}

/// Test that a timed-out command fails its step
#[tokio::test]
async fn test_step_timeout() {
    let yaml = r#"
name: "Test: Timeout"
on: { push: { branches: [master] } }
steps:
  - name: Slow
    run: sleep 5
    timeout_secs: 1
  - name: After
    run: echo after
"#;

    let harness = HarnessBuilder::new(yaml).build();
    let outcome = harness.push("master", "abc").await;

    assert_run_failed(&outcome);
    assert!(step_error(&outcome, "Slow").contains("timed out"));
    assert_step_skipped(&outcome, "After");
}
