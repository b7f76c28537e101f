use anyhow::{Context, Result};
use covpipe::{
    actions::{ActionRegistry, ActionSettings, DEFAULT_UPLOAD_URL},
    artifacts::{ArtifactStore, LocalArtifactStore},
    cli::{
        commands::{ArtifactsCommand, ExecutionArgs, HistoryCommand, ListenCommand, RunCommand, ValidateCommand},
        output::*,
        Cli, Command, EXIT_CONFIG, EXIT_FAILURE, EXIT_SUCCESS,
    },
    core::{config::WorkflowConfig, PushEvent, TriggerListener},
    execution::{ExecutionEngine, RunOptions, RunOutcome, Runner, StepExecutor},
    persistence::{InMemoryPersistence, PersistenceBackend},
    provision::Provisioner,
};
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use uuid::Uuid;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::from_args();

    // Initialize logging; RUST_LOG wins over --verbose
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set logging subscriber")?;

    let code = match &cli.command {
        Command::Run(cmd) => run_workflow(cmd, &cli).await?,
        Command::Listen(cmd) => listen(cmd, &cli).await?,
        Command::Validate(cmd) => validate_workflow(cmd)?,
        Command::History(cmd) => show_history(cmd, &cli).await?,
        Command::Artifacts(cmd) => list_artifacts(cmd, &cli).await?,
    };

    std::process::exit(code);
}

/// Load and validate the workflow, reporting problems on the console
fn load_workflow(path: &Path) -> Option<WorkflowConfig> {
    match WorkflowConfig::from_file(path) {
        Ok(config) => {
            println!("{} Loaded workflow: {}", INFO, style(&config.name).bold());
            Some(config)
        }
        Err(e) => {
            println!("{} Invalid workflow {}:", CROSS, path.display());
            println!("  {}", style(format!("{:#}", e)).red());
            None
        }
    }
}

async fn open_history(cli: &Cli, no_history: bool) -> Result<Arc<dyn PersistenceBackend>> {
    if no_history {
        return Ok(Arc::new(InMemoryPersistence::new()));
    }

    #[cfg(feature = "sqlite")]
    {
        let store = covpipe::persistence::SqliteRunStore::in_dir(&cli.data_dir())
            .await
            .context("Failed to open run history")?;
        Ok(Arc::new(store))
    }

    #[cfg(not(feature = "sqlite"))]
    {
        let _ = cli;
        Ok(Arc::new(InMemoryPersistence::new()))
    }
}

/// Wire the built-in actions, provisioner, console output and history into a runner
async fn build_runner(config: WorkflowConfig, args: &ExecutionArgs, cli: &Cli) -> Result<Runner> {
    let settings = ActionSettings {
        artifact_store: Arc::new(LocalArtifactStore::new(cli.artifacts_dir())),
        cache_dir: cli.cache_dir(),
        upload_url: args
            .upload_url
            .clone()
            .unwrap_or_else(|| DEFAULT_UPLOAD_URL.to_string()),
    };

    let executor = StepExecutor::new(ActionRegistry::with_builtins(&settings));
    let engine = ExecutionEngine::new(executor, Provisioner::docker());

    let reporter = Arc::new(ConsoleReporter::new(cli.stream));
    engine.add_event_handler(move |event| reporter.handle(&event));

    let history = open_history(cli, args.no_history).await?;

    let repository = match &args.repo {
        Some(repo) => Some(repo.clone()),
        None => Some(
            std::env::current_dir()
                .context("Failed to read current directory")?
                .display()
                .to_string(),
        ),
    };

    let runner = Runner::new(
        TriggerListener::new(config),
        Arc::new(engine),
        history,
        RunOptions {
            repository,
            keep_workspace: args.keep_workspace,
        },
    );

    // Ctrl-C cancels the active run; containers are still torn down
    let cancel = runner.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling run");
            cancel.cancel();
        }
    });

    Ok(runner)
}

async fn run_workflow(cmd: &RunCommand, cli: &Cli) -> Result<i32> {
    let Some(config) = load_workflow(&cmd.file) else {
        return Ok(EXIT_CONFIG);
    };

    let event = match (&cmd.event, &cmd.branch, &cmd.commit) {
        (Some(path), _, _) => {
            let payload = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read push event {}", path.display()))?;
            match PushEvent::from_json(&payload) {
                Ok(event) => event,
                Err(e) => {
                    println!("{} Invalid push event {}: {}", CROSS, path.display(), style(e).red());
                    return Ok(EXIT_CONFIG);
                }
            }
        }
        (None, Some(branch), Some(commit)) => PushEvent::new(branch.as_str(), commit.as_str()),
        _ => anyhow::bail!("Either --event or --branch with --commit is required"),
    };

    let runner = build_runner(config, &cmd.options, cli).await?;

    println!();
    match runner.handle_push(&event).await? {
        None => {
            println!(
                "{} Branch {} is not a trigger branch, nothing to run",
                INFO,
                style(event.branch()).bold()
            );
            Ok(EXIT_SUCCESS)
        }
        Some(outcome) => {
            print_outcome(&outcome, cli).await;
            Ok(if outcome.succeeded() { EXIT_SUCCESS } else { EXIT_FAILURE })
        }
    }
}

async fn listen(cmd: &ListenCommand, cli: &Cli) -> Result<i32> {
    let Some(config) = load_workflow(&cmd.file) else {
        return Ok(EXIT_CONFIG);
    };

    let runner = build_runner(config, &cmd.options, cli).await?;
    println!("{} Waiting for push events on stdin", INFO);

    let cancel = runner.cancellation_token();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut any_failed = false;

    loop {
        let line = tokio::select! {
            _ = cancel.cancelled() => break,
            line = lines.next_line() => line.context("Failed to read stdin")?,
        };
        let Some(line) = line else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let event = match PushEvent::from_json(line) {
            Ok(event) => event,
            Err(e) => {
                warn!("Ignoring invalid push event: {}", e);
                continue;
            }
        };

        if let Some(outcome) = runner.handle_push(&event).await? {
            print_outcome(&outcome, cli).await;
            any_failed |= !outcome.succeeded();
        }
    }

    Ok(if any_failed { EXIT_FAILURE } else { EXIT_SUCCESS })
}

async fn print_outcome(outcome: &RunOutcome, cli: &Cli) {
    println!();
    for step in &outcome.run.steps {
        println!("  {:<40} {}", step.name, format_step_state(&step.state));
    }

    let store = LocalArtifactStore::new(cli.artifacts_dir());
    match store.list_for_run(outcome.summary.run_id).await {
        Ok(artifacts) => {
            for artifact in &artifacts {
                println!("{}", format_artifact(artifact));
            }
        }
        Err(e) => warn!("Failed to list artifacts: {:#}", e),
    }

    match &outcome.result {
        Ok(()) => println!(
            "\n{} {} completed {}",
            CHECK,
            style(&outcome.run.workflow).bold(),
            style("successfully").green()
        ),
        Err(_) => {
            println!(
                "\n{} {} {}",
                CROSS,
                style(&outcome.run.workflow).bold(),
                style("failed").red()
            );
            // The summary carries the masked message
            if let Some(message) = &outcome.summary.error {
                error!("{}", message);
            }
        }
    }
}

fn validate_workflow(cmd: &ValidateCommand) -> Result<i32> {
    println!("{} Validating workflow...", INFO);

    let config = match WorkflowConfig::from_file(&cmd.file) {
        Ok(config) => config,
        Err(e) => {
            println!("{} Validation failed:", CROSS);
            println!("  {}", style(format!("{:#}", e)).red());
            return Ok(EXIT_CONFIG);
        }
    };

    if cmd.json {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(EXIT_SUCCESS);
    }

    println!("{} Workflow configuration is valid!", CHECK);
    println!("  Name: {}", style(&config.name).bold());
    println!("  Branches: {}", style(config.branches().join(", ")).cyan());
    println!("  Services: {}", style(config.services.len()).cyan());
    for (name, service) in &config.services {
        println!("    {} ({})", name, style(&service.image).dim());
    }
    println!("  Toolchains: {}", style(config.toolchains.len()).cyan());
    for toolchain in &config.toolchains {
        println!("    {} {}", toolchain.name, style(&toolchain.version).dim());
    }
    println!("  Steps: {}", style(config.steps.len()).cyan());
    for (i, step) in config.steps.iter().enumerate() {
        let what = step.uses.as_deref().or(step.run.as_deref()).unwrap_or_default();
        println!("    {}. {} {}", i + 1, step.name, style(what.lines().next().unwrap_or_default()).dim());
    }

    Ok(EXIT_SUCCESS)
}

async fn show_history(cmd: &HistoryCommand, cli: &Cli) -> Result<i32> {
    let store = open_history(cli, false).await?;

    if let Some(run_id) = &cmd.run_id {
        let id = Uuid::parse_str(run_id).context("Invalid run id")?;
        let Some(summary) = store.load_run(id).await? else {
            println!("{} Run {} not found", WARN, style(run_id).bold());
            return Ok(EXIT_FAILURE);
        };

        if cmd.json {
            println!("{}", serde_json::to_string_pretty(&summary)?);
        } else {
            println!("{}", format_run_summary(&summary));
            if let Some(error) = &summary.error {
                println!("  {}", style(error).red());
            }
        }
        return Ok(EXIT_SUCCESS);
    }

    if cmd.workflows {
        let workflows = store.list_workflows().await?;
        if cmd.json {
            println!("{}", serde_json::to_string_pretty(&workflows)?);
        } else if workflows.is_empty() {
            println!("{} No runs found in history", INFO);
        } else {
            println!("{} Workflows with history:", INFO);
            for workflow in &workflows {
                println!("  {}", style(workflow).bold());
            }
        }
        return Ok(EXIT_SUCCESS);
    }

    let runs = match &cmd.workflow {
        Some(workflow) => {
            let mut runs = store.list_runs(workflow).await?;
            runs.truncate(cmd.limit);
            runs
        }
        None => store.recent_runs(cmd.limit).await?,
    };

    if cmd.json {
        println!("{}", serde_json::to_string_pretty(&runs)?);
        return Ok(EXIT_SUCCESS);
    }

    if runs.is_empty() {
        println!("{} No runs found in history", INFO);
        return Ok(EXIT_SUCCESS);
    }

    println!("{} Recent runs:", INFO);
    for summary in &runs {
        println!("{}", format_run_summary(summary));
    }

    Ok(EXIT_SUCCESS)
}

async fn list_artifacts(cmd: &ArtifactsCommand, cli: &Cli) -> Result<i32> {
    let store = LocalArtifactStore::new(cli.artifacts_dir());

    let artifacts = match &cmd.run_id {
        Some(run_id) => {
            let id = Uuid::parse_str(run_id).context("Invalid run id")?;
            let mut artifacts = store.list_for_run(id).await?;
            if let Some(name) = &cmd.name {
                artifacts.retain(|a| &a.name == name);
            }
            artifacts
        }
        None => store.list(cmd.name.as_deref()).await?,
    };

    if cmd.json {
        println!("{}", serde_json::to_string_pretty(&artifacts)?);
        return Ok(EXIT_SUCCESS);
    }

    if artifacts.is_empty() {
        println!("{} No artifacts found in {}", INFO, store.root().display());
        return Ok(EXIT_SUCCESS);
    }

    for artifact in &artifacts {
        println!("{}", format_artifact(artifact));
        for file in &artifact.files {
            println!("    {}", style(store.file_path(artifact, file).display()).dim());
        }
    }

    Ok(EXIT_SUCCESS)
}
