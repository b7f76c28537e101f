//! Test: Success Chain - every step passes and the report is archived

use crate::helpers::*;
use covpipe::artifacts::ArtifactStore;
use covpipe::core::RunStatus;
use covpipe::execution::ExecutionEvent;
use covpipe::persistence::PersistenceBackend;

fn coverage_workflow(port: u16) -> String {
    format!(
        r#"
name: "Code Coverage"
on:
  push:
    branches: [master]
services:
  redis:
    image: redis:5.0
    ports: ["{port}:6379"]
    entrypoint: redis-server
secrets: [COVPIPE_TEST_SUCCESS_TOKEN]
toolchains:
  - name: protoc
    version: "3.x"
    install: "true"
steps:
  - name: Build
    run: echo building
  - name: Run cargo-tarpaulin
    uses: coverage@v1
    with: {{ version: "0.22.0", label: collect }}
  - name: Upload to codecov.io
    uses: upload@v1
    with: {{ token: "${{{{ secrets.COVPIPE_TEST_SUCCESS_TOKEN }}}}", label: publish }}
  - name: Archive code coverage results
    uses: archive@v1
    with: {{ name: code-coverage-report, path: cobertura.xml }}
"#
    )
}

/// Test that all steps run in order and exactly one artifact is retained
#[tokio::test]
async fn test_success_chain() {
    std::env::set_var("COVPIPE_TEST_SUCCESS_TOKEN", "success-token-5f1c");

    let builder = HarnessBuilder::new(&coverage_workflow(free_port()));
    let log = builder.log().clone();
    let harness = builder
        .action(mock_coverage(&log))
        .action(mock_upload(&log))
        .build();

    let outcome = harness.push("master", "0123456789abcdef").await;

    assert_run_succeeded(&outcome);
    assert_execution_order(
        &outcome,
        &[
            "Build",
            "Run cargo-tarpaulin",
            "Upload to codecov.io",
            "Archive code coverage results",
        ],
    );
    assert!(step_output(&outcome, "Build").contains("building"));

    // Exactly one artifact, holding the report
    let artifacts = harness.artifacts_named("code-coverage-report").await;
    assert_eq!(artifacts.len(), 1);
    let artifact = &artifacts[0];
    assert_eq!(artifact.files, vec!["cobertura.xml".to_string()]);
    assert_eq!(artifact.run_id, outcome.run.state.run_id);
    assert_eq!(artifact.commit, "0123456789abcdef");

    let report = std::fs::read_to_string(harness.artifacts.file_path(artifact, "cobertura.xml")).unwrap();
    assert_eq!(report, COBERTURA_REPORT);
}

/// Test that services and toolchains are provisioned before steps and torn down after
#[tokio::test]
async fn test_environment_lifecycle() {
    std::env::set_var("COVPIPE_TEST_SUCCESS_TOKEN", "success-token-5f1c");

    let builder = HarnessBuilder::new(&coverage_workflow(free_port()));
    let log = builder.log().clone();
    let harness = builder
        .action(mock_coverage(&log))
        .action(mock_upload(&log))
        .build();

    let outcome = harness.push("master", "abc").await;
    assert_run_succeeded(&outcome);

    let start = log.position("start:redis").expect("redis started");
    let install = log.position("install:protoc").expect("protoc installed");
    let collect = log.position("coverage:collect").expect("coverage ran");
    let publish = log.position("upload:publish").expect("upload ran");
    let stop = log.position("stop:redis").expect("redis stopped");

    assert!(start < install);
    assert!(install < collect);
    assert!(collect < publish);
    assert!(publish < stop);

    let events = harness.events();
    assert!(matches!(
        events.first(),
        Some(ExecutionEvent::RunStarted { total_steps: 4, .. })
    ));
    assert!(events.iter().any(|e| matches!(
        e,
        ExecutionEvent::Provisioned { services, .. } if services == &vec!["redis".to_string()]
    )));
    assert!(matches!(
        events.last(),
        Some(ExecutionEvent::RunCompleted { status: RunStatus::Succeeded, .. })
    ));
}

/// Test that the finished run is recorded in history
#[tokio::test]
async fn test_run_saved_to_history() {
    std::env::set_var("COVPIPE_TEST_SUCCESS_TOKEN", "success-token-5f1c");

    let builder = HarnessBuilder::new(&coverage_workflow(free_port()));
    let log = builder.log().clone();
    let harness = builder
        .action(mock_coverage(&log))
        .action(mock_upload(&log))
        .build();

    let outcome = harness.push("refs/heads/master", "feedbeef").await;

    let summary = harness
        .history
        .load_run(outcome.run.state.run_id)
        .await
        .unwrap()
        .expect("run should be in history");
    assert_eq!(summary.status, RunStatus::Succeeded);
    assert_eq!(summary.branch, "master");
    assert_eq!(summary.commit, "feedbeef");
    assert_eq!(summary.succeeded_steps, 4);
    assert_eq!(summary.total_steps, 4);
    assert!(summary.completed_at.is_some());
}
