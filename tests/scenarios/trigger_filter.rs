//! Test: Trigger Filter - only pushes to configured branches start a run

use crate::helpers::*;
use covpipe::core::PushEvent;
use covpipe::persistence::PersistenceBackend;

const YAML: &str = r#"
name: "Test: Trigger"
on: { push: { branches: [master, release] } }
steps:
  - name: Mark
    uses: mark@v1
    with: { label: "${{ run.branch }}" }
"#;

fn harness() -> Harness {
    let builder = HarnessBuilder::new(YAML);
    let log = builder.log().clone();
    builder
        .action(MockAction::new("mark", Script::Succeed(String::new()), &log))
        .build()
}

/// Test that a push to another branch produces no run at all
#[tokio::test]
async fn test_non_matching_branch_is_ignored() {
    let harness = harness();

    for git_ref in ["feature/login", "refs/heads/develop", "Master", "refs/tags/master"] {
        let outcome = harness
            .runner
            .handle_push(&PushEvent::new(git_ref, "abc"))
            .await
            .unwrap();
        assert!(outcome.is_none(), "{} must not trigger a run", git_ref);
    }

    assert!(harness.log.entries().is_empty());
    assert!(harness.events().is_empty());
    assert!(harness.history.recent_runs(10).await.unwrap().is_empty());
}

/// Test that every configured branch triggers, with or without the refs/heads/ prefix
#[tokio::test]
async fn test_matching_branches_trigger() {
    let harness = harness();

    let outcome = harness.push("refs/heads/release", "abc").await;
    assert_run_succeeded(&outcome);
    assert_eq!(outcome.run.branch, "release");

    harness.push("master", "def").await;

    assert_eq!(harness.log.entries(), vec!["mark:release", "mark:master"]);
    assert_eq!(harness.history.recent_runs(10).await.unwrap().len(), 2);
}

/// Test that a GitHub-style push payload is understood
#[tokio::test]
async fn test_push_payload() {
    let harness = harness();
    let event = PushEvent::from_json(
        r#"{"ref": "refs/heads/master", "after": "9fceb02d0ae598e95dc970b74767f19372d61af8", "pusher": {"name": "dev"}}"#,
    )
    .unwrap();

    let outcome = harness.runner.handle_push(&event).await.unwrap().expect("run");
    assert_run_succeeded(&outcome);
    assert_eq!(outcome.run.commit, "9fceb02d0ae598e95dc970b74767f19372d61af8");
}
