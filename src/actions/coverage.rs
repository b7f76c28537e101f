//! `coverage` - run cargo-tarpaulin and check the Cobertura report

use crate::actions::{Action, ActionInputs};
use crate::core::RunContext;
use crate::execution::{
    process::{run_program, run_shell},
    StepError,
};
use async_trait::async_trait;
use regex::Regex;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tracing::{info, warn};

/// File name tarpaulin writes for `--out Xml`
pub const REPORT_FILE: &str = "cobertura.xml";

/// Summary attributes of a Cobertura `<coverage>` element
#[derive(Debug, Clone, PartialEq)]
pub struct CoverageSummary {
    /// Fraction of lines covered, 0.0 to 1.0
    pub line_rate: f64,
    pub lines_covered: Option<u64>,
    pub lines_valid: Option<u64>,
}

impl CoverageSummary {
    pub fn parse(xml: &str) -> Result<Self, String> {
        let element = Regex::new(r"<coverage\b([^>]*)>").map_err(|e| e.to_string())?;
        let attribute = Regex::new(r#"([A-Za-z_:-]+)\s*=\s*"([^"]*)""#).map_err(|e| e.to_string())?;

        let attrs = element
            .captures(xml)
            .map(|c| c[1].to_string())
            .ok_or_else(|| "no <coverage> element found".to_string())?;

        let values: HashMap<String, String> = attribute
            .captures_iter(&attrs)
            .map(|c| (c[1].to_string(), c[2].to_string()))
            .collect();

        let line_rate = values
            .get("line-rate")
            .ok_or_else(|| "<coverage> has no line-rate".to_string())?
            .parse::<f64>()
            .map_err(|e| format!("invalid line-rate: {}", e))?;

        if !(0.0..=1.0).contains(&line_rate) {
            return Err(format!("line-rate {} is out of range", line_rate));
        }

        Ok(CoverageSummary {
            line_rate,
            lines_covered: values.get("lines-covered").and_then(|v| v.parse().ok()),
            lines_valid: values.get("lines-valid").and_then(|v| v.parse().ok()),
        })
    }

    pub fn from_file(path: &Path) -> Result<Self, String> {
        let xml = std::fs::read_to_string(path).map_err(|e| format!("{}: {}", path.display(), e))?;
        Self::parse(&xml)
    }

    pub fn percent(&self) -> f64 {
        self.line_rate * 100.0
    }
}

impl std::fmt::Display for CoverageSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.2}% coverage", self.percent())?;
        if let (Some(covered), Some(valid)) = (self.lines_covered, self.lines_valid) {
            write!(f, ", {}/{} lines covered", covered, valid)?;
        }
        Ok(())
    }
}

/// Coverage collector
pub struct CoverageAction {
    /// Cargo executable used to invoke tarpaulin
    cargo: String,
}

impl Default for CoverageAction {
    fn default() -> Self {
        Self::new("cargo")
    }
}

impl CoverageAction {
    pub fn new(cargo: impl Into<String>) -> Self {
        Self { cargo: cargo.into() }
    }

    async fn check_version(&self, version: &str, context: &RunContext) -> Result<(), StepError> {
        let output = run_program(&self.cargo, ["tarpaulin", "--version"], context, Some(60)).await?;
        if !output.success() {
            return Err(StepError::Action(format!(
                "cargo-tarpaulin is not available: {}",
                output.tail(3)
            )));
        }
        if !output.output.contains(version) {
            return Err(StepError::Action(format!(
                "expected cargo-tarpaulin {}, found: {}",
                version,
                output.output.trim()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl Action for CoverageAction {
    fn name(&self) -> &str {
        "coverage"
    }

    fn versions(&self) -> &[&str] {
        &["v1"]
    }

    async fn run(&self, inputs: &ActionInputs, context: &mut RunContext) -> Result<String, StepError> {
        let version = inputs.require("version")?;
        let extra_args = inputs.get_or("args", "");
        let out = inputs.get_or("out", REPORT_FILE);
        let timeout = inputs.get_u64("timeout")?;

        self.check_version(version, context).await?;

        let produced = context.resolve(REPORT_FILE);
        let report = context.resolve(out);
        for stale in [&produced, &report] {
            if stale.exists() {
                warn!("Removing stale report {}", stale.display());
                let _ = std::fs::remove_file(stale);
            }
        }

        let script = format!("{} tarpaulin --out Xml {}", self.cargo, extra_args);
        info!("Collecting coverage: {}", script.trim());
        let result = run_shell(script.trim(), context, &BTreeMap::new(), timeout).await?;
        if !result.success() {
            return Err(StepError::NonZeroExit {
                code: result.exit_code,
                output: result.output,
            });
        }

        if report != produced && produced.exists() {
            std::fs::rename(&produced, &report)
                .map_err(|e| StepError::Action(format!("failed to move report: {}", e)))?;
        }
        if !report.is_file() {
            return Err(StepError::MissingArtifact(report));
        }

        let summary = CoverageSummary::from_file(&report)
            .map_err(|e| StepError::Action(format!("invalid coverage report: {}", e)))?;
        info!("{}", summary);

        context.set_env("COVPIPE_COVERAGE_REPORT", report.display().to_string());
        Ok(format!("{}{}\n", result.output, summary))
    }
}
