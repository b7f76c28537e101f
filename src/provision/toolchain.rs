//! Pinned toolchain installation and verification

use crate::core::{RunContext, Toolchain};
use crate::execution::process::{run_program, run_shell};
use anyhow::{bail, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use tracing::{debug, info};

const INSTALL_TIMEOUT_SECS: u64 = 1800;
const CHECK_TIMEOUT_SECS: u64 = 60;

/// Installs toolchains and checks the pinned version is active
#[async_trait]
pub trait ToolInstaller: Send + Sync {
    async fn install(&self, toolchain: &Toolchain, context: &RunContext) -> Result<()>;

    async fn verify(&self, toolchain: &Toolchain, context: &RunContext) -> Result<()>;
}

/// Shell command installing `toolchain` with `rustup` as the rustup binary, if a recipe is known
pub fn install_command(toolchain: &Toolchain, rustup: &str) -> Option<String> {
    if let Some(ref install) = toolchain.install {
        return Some(install.clone());
    }

    if toolchain.name == "rust" {
        let mut command = format!(
            "{} toolchain install {} --profile minimal",
            rustup, toolchain.version
        );
        for component in &toolchain.components {
            command.push_str(" --component ");
            command.push_str(component);
        }
        return Some(command);
    }

    if toolchain.name.starts_with("cargo-") {
        return Some(format!(
            "cargo install {} --version {} --locked",
            toolchain.name, toolchain.version
        ));
    }

    None
}

/// Shell command whose output reports the installed version
pub fn check_command(toolchain: &Toolchain) -> String {
    if let Some(ref check) = toolchain.check {
        return check.clone();
    }

    if toolchain.name == "rust" {
        return format!("rustc +{} --version", toolchain.version);
    }

    match toolchain.name.strip_prefix("cargo-") {
        Some(sub) => format!("cargo {} --version", sub),
        None => format!("{} --version", toolchain.name),
    }
}

/// Whether `component` appears in `rustup component list --installed` output
///
/// Installed components carry a target suffix, and `-preview` names are
/// listed without it (`llvm-tools-preview` shows up as `llvm-tools-<target>`).
fn component_installed(listing: &str, component: &str) -> bool {
    let base = component.strip_suffix("-preview").unwrap_or(component);
    listing.lines().map(str::trim).any(|line| {
        [component, base]
            .iter()
            .any(|name| line == *name || line.starts_with(&format!("{}-", name)))
    })
}

/// Installer running recipe commands through `sh -c`
#[derive(Debug, Clone)]
pub struct CommandInstaller {
    rustup: String,
}

impl Default for CommandInstaller {
    fn default() -> Self {
        Self::new("rustup")
    }
}

impl CommandInstaller {
    pub fn new(rustup: impl Into<String>) -> Self {
        Self { rustup: rustup.into() }
    }

    /// Components pinned for a rust toolchain that are not installed yet
    async fn missing_components(&self, toolchain: &Toolchain, context: &RunContext) -> Result<Vec<String>> {
        if toolchain.name != "rust" || toolchain.components.is_empty() {
            return Ok(Vec::new());
        }

        let output = run_program(
            &self.rustup,
            ["component", "list", "--installed", "--toolchain", toolchain.version.as_str()],
            context,
            Some(CHECK_TIMEOUT_SECS),
        )
        .await?;
        if !output.success() {
            bail!("listing components of {} exited with {}", toolchain.version, output.exit_code);
        }

        Ok(toolchain
            .components
            .iter()
            .filter(|c| !component_installed(&output.output, c))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ToolInstaller for CommandInstaller {
    async fn install(&self, toolchain: &Toolchain, context: &RunContext) -> Result<()> {
        let Some(command) = install_command(toolchain, &self.rustup) else {
            bail!(
                "no install recipe for '{}'; set `install` in the workflow",
                toolchain.name
            );
        };

        info!("Installing {}@{}: {}", toolchain.name, toolchain.version, command);
        let output = run_shell(&command, context, &BTreeMap::new(), Some(INSTALL_TIMEOUT_SECS)).await?;
        if !output.success() {
            bail!(
                "install of {}@{} exited with {}: {}",
                toolchain.name,
                toolchain.version,
                output.exit_code,
                output.tail(5)
            );
        }
        Ok(())
    }

    async fn verify(&self, toolchain: &Toolchain, context: &RunContext) -> Result<()> {
        let command = check_command(toolchain);
        let output = run_shell(&command, context, &BTreeMap::new(), Some(CHECK_TIMEOUT_SECS)).await?;
        if !output.success() {
            bail!("`{}` exited with {}", command, output.exit_code);
        }

        if !toolchain.is_channel() && !output.output.contains(toolchain.expected_version()) {
            bail!(
                "expected {} {}, `{}` reported: {}",
                toolchain.name,
                toolchain.version,
                command,
                output.output.trim()
            );
        }

        let missing = self.missing_components(toolchain, context).await?;
        if !missing.is_empty() {
            bail!("{} is missing components: {}", toolchain.version, missing.join(", "));
        }

        debug!("{}@{} verified: {}", toolchain.name, toolchain.version, output.output.trim());
        Ok(())
    }
}
