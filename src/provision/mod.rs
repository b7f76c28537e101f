//! Environment provisioning
//!
//! Before the first step of a run, service containers are started and probed
//! until their published ports accept connections, and every pinned
//! toolchain is installed (or found already installed) and verified. Any
//! failure here fails the run without retry; containers already started are
//! stopped again.

pub mod services;
pub mod toolchain;
pub mod workspace;

pub use services::{
    container_name, docker_run_args, wait_for_port, ContainerHandle, ContainerRuntime, DockerCli, ReadinessError,
};
pub use toolchain::{check_command, install_command, CommandInstaller, ToolInstaller};
pub use workspace::Workspace;

use crate::core::{Run, RunContext, Toolchain};
use crate::execution::RunError;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("service '{service}' failed to start: {reason}")]
    Service { service: String, reason: String },

    #[error("service '{service}' is not ready: {source}")]
    NotReady {
        service: String,
        #[source]
        source: ReadinessError,
    },

    #[error("toolchain {name}@{version}: {reason}")]
    Toolchain {
        name: String,
        version: String,
        reason: String,
    },

    #[error("provisioning was cancelled")]
    Cancelled,
}

impl From<ProvisionError> for RunError {
    fn from(error: ProvisionError) -> Self {
        match error {
            ProvisionError::Cancelled
            | ProvisionError::NotReady {
                source: ReadinessError::Cancelled { .. },
                ..
            } => RunError::Cancelled,
            other => RunError::Provisioning(other.to_string()),
        }
    }
}

/// What was provisioned for a run and must be torn down
#[derive(Debug, Default)]
pub struct Environment {
    pub containers: Vec<ContainerHandle>,

    /// `name@version` of every verified toolchain
    pub toolchains: Vec<String>,
}

/// Starts services and installs toolchains for a run
#[derive(Clone)]
pub struct Provisioner {
    runtime: Arc<dyn ContainerRuntime>,
    installer: Arc<dyn ToolInstaller>,

    /// Host probed for published service ports
    readiness_host: String,

    poll_interval: Duration,
}

impl Provisioner {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, installer: Arc<dyn ToolInstaller>) -> Self {
        Self {
            runtime,
            installer,
            readiness_host: "127.0.0.1".to_string(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Docker CLI for services, shell recipes for toolchains
    pub fn docker() -> Self {
        Self::new(Arc::new(DockerCli::default()), Arc::new(CommandInstaller::default()))
    }

    pub fn with_readiness_host(mut self, host: impl Into<String>) -> Self {
        self.readiness_host = host.into();
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Provision everything the run declares
    ///
    /// On error, containers started so far have already been stopped.
    pub async fn provision(&self, run: &Run, context: &mut RunContext) -> Result<Environment, ProvisionError> {
        let mut environment = Environment::default();

        if let Err(e) = self.provision_into(run, context, &mut environment).await {
            self.teardown(&environment, context).await;
            return Err(e);
        }

        Ok(environment)
    }

    async fn provision_into(
        &self,
        run: &Run,
        context: &mut RunContext,
        environment: &mut Environment,
    ) -> Result<(), ProvisionError> {
        let timeout = Duration::from_secs(run.readiness_timeout_secs);

        for service in &run.services {
            if context.cancel.is_cancelled() {
                return Err(ProvisionError::Cancelled);
            }

            let handle = self
                .runtime
                .start(service, context)
                .await
                .map_err(|e| ProvisionError::Service {
                    service: service.name.clone(),
                    reason: format!("{:#}", e),
                })?;
            environment.containers.push(handle);

            for port in &service.ports {
                wait_for_port(
                    &self.readiness_host,
                    port.host,
                    timeout,
                    self.poll_interval,
                    &context.cancel,
                )
                .await
                .map_err(|source| ProvisionError::NotReady {
                    service: service.name.clone(),
                    source,
                })?;
            }
            info!("Service {} is ready", service.name);
        }

        for toolchain in &run.toolchains {
            if context.cancel.is_cancelled() {
                return Err(ProvisionError::Cancelled);
            }
            self.provision_toolchain(toolchain, context).await?;
            environment.toolchains.push(pin(toolchain));
        }

        context.toolchain_pins = environment.toolchains.clone();
        Ok(())
    }

    async fn provision_toolchain(&self, toolchain: &Toolchain, context: &mut RunContext) -> Result<(), ProvisionError> {
        let failed = |reason: anyhow::Error| ProvisionError::Toolchain {
            name: toolchain.name.clone(),
            version: toolchain.version.clone(),
            reason: format!("{:#}", reason),
        };

        if let Some(ref dir) = toolchain.bin_dir {
            context.add_path_dir(expand_home(dir));
        }
        if toolchain.name == "rust" {
            context.set_env("RUSTUP_TOOLCHAIN", toolchain.version.clone());
        }

        if self.installer.verify(toolchain, context).await.is_ok() {
            info!("{} already installed", pin(toolchain));
            return Ok(());
        }

        self.installer.install(toolchain, context).await.map_err(failed)?;
        self.installer.verify(toolchain, context).await.map_err(failed)?;
        info!("Installed {}", pin(toolchain));
        Ok(())
    }

    /// Stop every started container; failures are logged, not returned
    pub async fn teardown(&self, environment: &Environment, context: &RunContext) {
        for handle in environment.containers.iter().rev() {
            if let Err(e) = self.runtime.stop(handle, context).await {
                warn!("Failed to stop service {}: {:#}", handle.service, e);
            }
        }
    }
}

fn pin(toolchain: &Toolchain) -> String {
    format!("{}@{}", toolchain.name, toolchain.version)
}

fn expand_home(dir: &str) -> PathBuf {
    match (dir.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(dir),
    }
}
