//! Test utilities for covpipe: mock runtime, installer and actions plus a runner harness

#![allow(dead_code)]

use covpipe::actions::{Action, ActionInputs, ActionRegistry, ActionSettings};
use covpipe::artifacts::{ArtifactRecord, ArtifactStore, LocalArtifactStore};
use covpipe::core::{config::WorkflowConfig, PushEvent, RunContext, RunStatus, ServiceContainer, StepState, Toolchain, TriggerListener};
use covpipe::execution::{ExecutionEngine, ExecutionEvent, RunOptions, RunOutcome, Runner, StepError, StepExecutor};
use covpipe::persistence::InMemoryPersistence;
use covpipe::provision::{container_name, ContainerHandle, ContainerRuntime, Provisioner, ToolInstaller};

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::TcpListener;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Ordered record of everything the mocks were asked to do
#[derive(Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<String>>>);

impl EventLog {
    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().clone()
    }

    pub fn contains(&self, entry: &str) -> bool {
        self.0.lock().iter().any(|e| e == entry)
    }

    pub fn position(&self, entry: &str) -> Option<usize> {
        self.0.lock().iter().position(|e| e == entry)
    }
}

/// Container runtime that "starts" a service by listening on its host ports
pub struct MockRuntime {
    log: EventLog,
    startup_delay: Duration,
    unresponsive: bool,
    listeners: Arc<Mutex<HashMap<String, Vec<TcpListener>>>>,
}

impl MockRuntime {
    pub fn new(log: EventLog) -> Self {
        Self {
            log,
            startup_delay: Duration::ZERO,
            unresponsive: false,
            listeners: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Ports open only after `delay`
    pub fn with_startup_delay(mut self, delay: Duration) -> Self {
        self.startup_delay = delay;
        self
    }

    /// Containers start but never open their ports
    pub fn unresponsive(mut self) -> Self {
        self.unresponsive = true;
        self
    }
}

#[async_trait]
impl ContainerRuntime for MockRuntime {
    async fn start(&self, service: &ServiceContainer, context: &RunContext) -> anyhow::Result<ContainerHandle> {
        self.log.push(format!("start:{}", service.name));
        let name = container_name(context.run_id, &service.name);

        if !self.unresponsive {
            let ports: Vec<u16> = service.ports.iter().map(|p| p.host).collect();
            let listeners = self.listeners.clone();
            let key = name.clone();
            let delay = self.startup_delay;
            let bind = move || -> std::io::Result<()> {
                let bound = ports
                    .iter()
                    .map(|port| TcpListener::bind(("127.0.0.1", *port)))
                    .collect::<std::io::Result<Vec<_>>>()?;
                listeners.lock().insert(key, bound);
                Ok(())
            };

            if delay.is_zero() {
                bind()?;
            } else {
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = bind();
                });
            }
        }

        Ok(ContainerHandle {
            id: format!("mock-{}", service.name),
            name,
            service: service.name.clone(),
        })
    }

    async fn stop(&self, handle: &ContainerHandle, _context: &RunContext) -> anyhow::Result<()> {
        self.log.push(format!("stop:{}", handle.service));
        self.listeners.lock().remove(&handle.name);
        Ok(())
    }
}

/// Installer that records installs and treats every toolchain as missing until installed
pub struct MockInstaller {
    log: EventLog,
    installed: Mutex<Vec<String>>,
}

impl MockInstaller {
    pub fn new(log: EventLog) -> Self {
        Self {
            log,
            installed: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl ToolInstaller for MockInstaller {
    async fn install(&self, toolchain: &Toolchain, _context: &RunContext) -> anyhow::Result<()> {
        self.log.push(format!("install:{}", toolchain.name));
        self.installed.lock().push(toolchain.name.clone());
        Ok(())
    }

    async fn verify(&self, toolchain: &Toolchain, _context: &RunContext) -> anyhow::Result<()> {
        if self.installed.lock().contains(&toolchain.name) {
            Ok(())
        } else {
            anyhow::bail!("{} is not installed", toolchain.name)
        }
    }
}

/// What a [`MockAction`] does when invoked
#[derive(Clone)]
pub enum Script {
    Succeed(String),
    Fail(String),
    /// Write a file into the workspace
    WriteFile { path: String, contents: String },
    /// Return the value of an input as output
    EchoInput(String),
    /// Fail unless a TCP port on localhost accepts connections
    ProbePort(u16),
}

/// Scripted action that records each invocation as `<name>:<label input>`
pub struct MockAction {
    name: String,
    script: Script,
    log: EventLog,
}

impl MockAction {
    pub fn new(name: &str, script: Script, log: &EventLog) -> Self {
        Self {
            name: name.to_string(),
            script,
            log: log.clone(),
        }
    }
}

#[async_trait]
impl Action for MockAction {
    fn name(&self) -> &str {
        &self.name
    }

    fn versions(&self) -> &[&str] {
        &["v1", "v2", "v3", "v4"]
    }

    async fn run(&self, inputs: &ActionInputs, context: &mut RunContext) -> Result<String, StepError> {
        self.log.push(format!("{}:{}", self.name, inputs.get_or("label", "")));

        match &self.script {
            Script::Succeed(output) => Ok(output.clone()),
            Script::Fail(reason) => Err(StepError::Action(reason.clone())),
            Script::WriteFile { path, contents } => {
                let path = context.resolve(path);
                tokio::fs::write(&path, contents)
                    .await
                    .map_err(|e| StepError::Action(e.to_string()))?;
                Ok(format!("wrote {}\n", path.display()))
            }
            Script::EchoInput(key) => Ok(inputs.get_or(key, "").to_string()),
            Script::ProbePort(port) => {
                let open = tokio::net::TcpStream::connect(("127.0.0.1", *port)).await.is_ok();
                self.log
                    .push(format!("probe:{}:{}", port, if open { "open" } else { "closed" }));
                if open {
                    Ok(format!("port {} is reachable\n", port))
                } else {
                    Err(StepError::Action(format!("port {} is not reachable", port)))
                }
            }
        }
    }
}

pub const COBERTURA_REPORT: &str = r#"<?xml version="1.0"?>
<coverage lines-covered="8" lines-valid="10" line-rate="0.8" version="1.9" timestamp="0">
  <packages/>
</coverage>
"#;

/// Mock coverage collector writing a fixed Cobertura report
pub fn mock_coverage(log: &EventLog) -> MockAction {
    MockAction::new(
        "coverage",
        Script::WriteFile {
            path: "cobertura.xml".to_string(),
            contents: COBERTURA_REPORT.to_string(),
        },
        log,
    )
}

/// Mock upload answering with the token it was given
pub fn mock_upload(log: &EventLog) -> MockAction {
    MockAction::new("upload", Script::EchoInput("token".to_string()), log)
}

/// A runner wired to mocks, temp directories and in-memory history
pub struct Harness {
    pub runner: Runner,
    pub artifacts: Arc<LocalArtifactStore>,
    pub history: Arc<InMemoryPersistence>,
    pub log: EventLog,
    pub events: Arc<Mutex<Vec<ExecutionEvent>>>,
    _data_dir: TempDir,
}

pub struct HarnessBuilder {
    yaml: String,
    log: EventLog,
    actions: Vec<MockAction>,
    runtime: Option<MockRuntime>,
}

impl HarnessBuilder {
    pub fn new(yaml: &str) -> Self {
        Self {
            yaml: yaml.to_string(),
            log: EventLog::default(),
            actions: Vec::new(),
            runtime: None,
        }
    }

    pub fn log(&self) -> &EventLog {
        &self.log
    }

    /// Register a mock, replacing any built-in action of the same name
    pub fn action(mut self, action: MockAction) -> Self {
        self.actions.push(action);
        self
    }

    pub fn runtime(mut self, runtime: MockRuntime) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn build(self) -> Harness {
        let config = WorkflowConfig::from_yaml(&self.yaml).expect("workflow should parse");
        let data_dir = tempfile::tempdir().expect("temp data dir");

        let artifacts = Arc::new(LocalArtifactStore::new(data_dir.path().join("artifacts")));
        let settings = ActionSettings {
            artifact_store: artifacts.clone(),
            cache_dir: data_dir.path().join("cache"),
            upload_url: "http://127.0.0.1:9/upload".to_string(),
        };

        let mut registry = ActionRegistry::with_builtins(&settings);
        for action in self.actions {
            registry.register(Arc::new(action));
        }

        let runtime = self
            .runtime
            .unwrap_or_else(|| MockRuntime::new(self.log.clone()));
        let provisioner = Provisioner::new(Arc::new(runtime), Arc::new(MockInstaller::new(self.log.clone())))
            .with_poll_interval(Duration::from_millis(25));

        let engine = ExecutionEngine::new(StepExecutor::new(registry), provisioner);
        let events = Arc::new(Mutex::new(Vec::new()));
        let recorded = events.clone();
        engine.add_event_handler(move |event| recorded.lock().push(event));

        let history = Arc::new(InMemoryPersistence::new());
        let runner = Runner::new(
            TriggerListener::new(config),
            Arc::new(engine),
            history.clone(),
            RunOptions::default(),
        );

        Harness {
            runner,
            artifacts,
            history,
            log: self.log,
            events,
            _data_dir: data_dir,
        }
    }
}

impl Harness {
    /// Push `branch` at `commit` and expect a run
    pub async fn push(&self, branch: &str, commit: &str) -> RunOutcome {
        self.runner
            .handle_push(&PushEvent::new(branch, commit))
            .await
            .expect("handle_push should not error")
            .expect("branch should trigger a run")
    }

    pub async fn artifacts_named(&self, name: &str) -> Vec<ArtifactRecord> {
        self.artifacts.list(Some(name)).await.expect("artifacts should list")
    }

    pub fn events(&self) -> Vec<ExecutionEvent> {
        self.events.lock().clone()
    }
}

/// A port nobody listens on right now
pub fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .and_then(|l| l.local_addr())
        .map(|a| a.port())
        .expect("free port")
}

/// Assert a run succeeded
pub fn assert_run_succeeded(outcome: &RunOutcome) {
    assert_eq!(
        outcome.run.status(),
        RunStatus::Succeeded,
        "Run should have succeeded, got {:?}",
        outcome.result
    );
    assert!(outcome.succeeded());
}

/// Assert a run failed
pub fn assert_run_failed(outcome: &RunOutcome) {
    assert_eq!(outcome.run.status(), RunStatus::Failed, "Run should have failed");
    assert!(!outcome.succeeded());
}

/// Assert the steps that ran, in order
pub fn assert_execution_order(outcome: &RunOutcome, expected: &[&str]) {
    assert_eq!(
        outcome.run.executed_steps(),
        expected,
        "Execution order mismatch"
    );
}

pub fn assert_step_skipped(outcome: &RunOutcome, step: &str) {
    let state = &outcome.run.step(step).unwrap_or_else(|| panic!("Step '{}' not found", step)).state;
    assert!(
        matches!(state, StepState::Skipped { .. }),
        "Step '{}' should be skipped, got {:?}",
        step,
        state
    );
}

/// Output of a step that succeeded
pub fn step_output(outcome: &RunOutcome, step: &str) -> String {
    match &outcome.run.step(step).unwrap_or_else(|| panic!("Step '{}' not found", step)).state {
        StepState::Succeeded { output, .. } => output.clone(),
        other => panic!("Step '{}' should have succeeded, got {:?}", step, other),
    }
}

/// Error of a step that failed
pub fn step_error(outcome: &RunOutcome, step: &str) -> String {
    match &outcome.run.step(step).unwrap_or_else(|| panic!("Step '{}' not found", step)).state {
        StepState::Failed { error, .. } => error.clone(),
        other => panic!("Step '{}' should have failed, got {:?}", step, other),
    }
}
