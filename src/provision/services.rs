//! Service containers and their readiness probe

use crate::core::{RunContext, ServiceContainer};
use crate::execution::process::run_program;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

const DOCKER_TIMEOUT_SECS: u64 = 600;

/// A started service container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerHandle {
    /// Container id reported by the runtime
    pub id: String,

    /// Container name
    pub name: String,

    /// Service name from the workflow
    pub service: String,
}

/// Starts and stops service containers
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn start(&self, service: &ServiceContainer, context: &RunContext) -> Result<ContainerHandle>;

    async fn stop(&self, handle: &ContainerHandle, context: &RunContext) -> Result<()>;
}

/// Container name unique to a run: `covpipe-<service>-<run id prefix>`
pub fn container_name(run_id: Uuid, service: &str) -> String {
    let id = run_id.simple().to_string();
    format!("covpipe-{}-{}", service, &id[..8])
}

/// Arguments of `docker run` for a service container
pub fn docker_run_args(service: &ServiceContainer, name: &str) -> Vec<String> {
    let mut args = vec![
        "run".to_string(),
        "-d".to_string(),
        "--rm".to_string(),
        "--name".to_string(),
        name.to_string(),
    ];

    if let Some(ref entrypoint) = service.entrypoint {
        args.push("--entrypoint".to_string());
        args.push(entrypoint.clone());
    }

    for port in &service.ports {
        args.push("-p".to_string());
        args.push(port.to_string());
    }

    for (key, value) in &service.env {
        args.push("-e".to_string());
        args.push(format!("{}={}", key, value));
    }

    args.extend(service.options.iter().cloned());
    args.push(service.image.clone());
    args
}

/// Runtime driving the `docker` CLI
pub struct DockerCli {
    docker: String,
}

impl Default for DockerCli {
    fn default() -> Self {
        Self::new("docker")
    }
}

impl DockerCli {
    pub fn new(docker: impl Into<String>) -> Self {
        Self { docker: docker.into() }
    }
}

#[async_trait]
impl ContainerRuntime for DockerCli {
    async fn start(&self, service: &ServiceContainer, context: &RunContext) -> Result<ContainerHandle> {
        let name = container_name(context.run_id, &service.name);
        let args = docker_run_args(service, &name);
        debug!(target: "docker", "{} {}", self.docker, args.join(" "));

        let output = run_program(&self.docker, &args, context, Some(DOCKER_TIMEOUT_SECS))
            .await
            .with_context(|| format!("Failed to run {}", self.docker))?;
        if !output.success() {
            bail!(
                "docker run exited with {}: {}",
                output.exit_code,
                output.tail(5)
            );
        }

        // `docker run -d` prints pull progress first and the container id last
        let id = output
            .output
            .lines()
            .map(str::trim)
            .rfind(|l| !l.is_empty())
            .unwrap_or(name.as_str())
            .to_string();

        info!(target: "docker", "Started service {} ({}) as {}", service.name, service.image, name);
        Ok(ContainerHandle {
            id,
            name,
            service: service.name.clone(),
        })
    }

    async fn stop(&self, handle: &ContainerHandle, context: &RunContext) -> Result<()> {
        // Teardown must still work once the run is cancelled
        let mut detached = context.clone();
        detached.cancel = CancellationToken::new();

        let output = run_program(&self.docker, ["stop", handle.name.as_str()], &detached, Some(60))
            .await
            .with_context(|| format!("Failed to stop {}", handle.name))?;
        if !output.success() {
            bail!("docker stop {} failed: {}", handle.name, output.tail(3));
        }
        debug!(target: "docker", "Stopped {}", handle.name);
        Ok(())
    }
}

/// Why a port never became reachable
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ReadinessError {
    #[error("{host}:{port} not reachable after {timeout_secs}s")]
    Timeout { host: String, port: u16, timeout_secs: u64 },

    #[error("cancelled while waiting for {host}:{port}")]
    Cancelled { host: String, port: u16 },
}

/// Poll a TCP port until it accepts a connection
pub async fn wait_for_port(
    host: &str,
    port: u16,
    timeout: Duration,
    poll: Duration,
    cancel: &CancellationToken,
) -> Result<(), ReadinessError> {
    let deadline = tokio::time::Instant::now() + timeout;
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        let connect = tokio::time::timeout(remaining.max(poll), TcpStream::connect((host, port)));

        tokio::select! {
            result = connect => {
                if let Ok(Ok(_)) = result {
                    debug!("{}:{} reachable after {} attempt(s)", host, port, attempts);
                    return Ok(());
                }
            }
            _ = cancel.cancelled() => {
                return Err(ReadinessError::Cancelled { host: host.to_string(), port });
            }
        }

        if tokio::time::Instant::now() >= deadline {
            warn!("{}:{} still unreachable after {} attempt(s)", host, port, attempts);
            return Err(ReadinessError::Timeout {
                host: host.to_string(),
                port,
                timeout_secs: timeout.as_secs(),
            });
        }

        tokio::select! {
            _ = tokio::time::sleep(poll) => {}
            _ = cancel.cancelled() => {
                return Err(ReadinessError::Cancelled { host: host.to_string(), port });
            }
        }
    }
}
