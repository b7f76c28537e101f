//! Test: Idempotence - pushing the same commit twice gives two independent runs

use crate::helpers::*;

const YAML: &str = r#"
name: "Test: Twice"
on: { push: { branches: [master] } }
steps:
  - name: Collect
    uses: coverage@v1
  - name: Archive
    uses: archive@v1
    with: { name: code-coverage-report, path: cobertura.xml }
"#;

/// Test that each run archives its own artifact without a duplicate error
#[tokio::test]
async fn test_same_commit_twice() {
    let builder = HarnessBuilder::new(YAML);
    let log = builder.log().clone();
    let harness = builder.action(mock_coverage(&log)).build();

    let first = harness.push("master", "abc123").await;
    let second = harness.push("master", "abc123").await;

    assert_run_succeeded(&first);
    assert_run_succeeded(&second);
    assert_ne!(first.run.state.run_id, second.run.state.run_id);

    let artifacts = harness.artifacts_named("code-coverage-report").await;
    assert_eq!(artifacts.len(), 2);
    assert_ne!(artifacts[0].id, artifacts[1].id);
    assert!(artifacts.iter().all(|a| a.commit == "abc123"));

    let mut run_ids: Vec<_> = artifacts.iter().map(|a| a.run_id).collect();
    run_ids.sort();
    let mut expected = vec![first.run.state.run_id, second.run.state.run_id];
    expected.sort();
    assert_eq!(run_ids, expected);
}

/// Test that runs never share a workspace
#[tokio::test]
async fn test_fresh_workspace_per_run() {
    let yaml = r#"
name: "Test: Fresh Workspace"
on: { push: { branches: [master] } }
steps:
  - name: Check
    run: test ! -e marker && touch marker
"#;

    let harness = HarnessBuilder::new(yaml).build();
    assert_run_succeeded(&harness.push("master", "abc").await);
    assert_run_succeeded(&harness.push("master", "abc").await);
}
