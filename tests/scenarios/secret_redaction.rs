//! Test: Secret Redaction - secret values never reach output, errors or history

use crate::helpers::*;
use covpipe::execution::ExecutionEvent;
use covpipe::persistence::PersistenceBackend;

const SECRET: &str = "tok-8c1f2e9d77aa";

const YAML: &str = r#"
name: "Test: Secrets"
on: { push: { branches: [master] } }
secrets: [COVPIPE_TEST_REDACTION_TOKEN]
steps:
  - name: Print
    run: echo "token=${{ secrets.COVPIPE_TEST_REDACTION_TOKEN }}"
  - name: Upload
    uses: upload@v1
    with: { token: "${{ secrets.COVPIPE_TEST_REDACTION_TOKEN }}" }
  - name: Leak via env
    run: echo "leaking $TOKEN" && exit 1
    env:
      TOKEN: "${{ secrets.COVPIPE_TEST_REDACTION_TOKEN }}"
"#;

/// Test that the token value is masked everywhere it could surface
#[tokio::test]
async fn test_secret_never_in_output() {
    std::env::set_var("COVPIPE_TEST_REDACTION_TOKEN", SECRET);

    let builder = HarnessBuilder::new(YAML);
    let log = builder.log().clone();
    let harness = builder.action(mock_upload(&log)).build();

    let outcome = harness.push("master", "abc").await;
    assert_run_failed(&outcome);

    let printed = step_output(&outcome, "Print");
    assert!(printed.contains("token=***"), "got {:?}", printed);
    assert_eq!(step_output(&outcome, "Upload"), "***");

    // Step states, events, run error and history all stay clean
    for step in &outcome.run.steps {
        assert!(!format!("{:?}", step.state).contains(SECRET), "{} leaked", step.name);
    }
    for event in harness.events() {
        assert!(!format!("{:?}", event).contains(SECRET), "event leaked: {:?}", event);
    }
    assert!(harness
        .events()
        .iter()
        .any(|e| matches!(e, ExecutionEvent::StepOutput { output, .. } if output.contains("***"))));

    let summary = harness
        .history
        .load_run(outcome.run.state.run_id)
        .await
        .unwrap()
        .unwrap();
    assert!(!format!("{:?}", summary).contains(SECRET));
}
