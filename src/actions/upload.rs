//! `upload` - send coverage reports to a coverage-analytics service

use crate::actions::{coverage::REPORT_FILE, Action, ActionInputs};
use crate::core::RunContext;
use crate::execution::{process::ProcessError, StepError};
use async_trait::async_trait;
use std::time::Duration;
use tracing::info;

pub const DEFAULT_UPLOAD_URL: &str = "https://codecov.io/upload/v2";

const DEFAULT_TIMEOUT_SECS: u64 = 120;

pub struct UploadAction {
    client: reqwest::Client,
    default_url: String,
}

impl UploadAction {
    pub fn new(default_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            default_url: default_url.into(),
        }
    }
}

#[async_trait]
impl Action for UploadAction {
    fn name(&self) -> &str {
        "upload"
    }

    fn versions(&self) -> &[&str] {
        &["v1"]
    }

    async fn run(&self, inputs: &ActionInputs, context: &mut RunContext) -> Result<String, StepError> {
        let token = inputs.require("token")?;
        // Interpolated tokens are already registered; literal ones are not
        context.masker.add_value(token);

        let url = inputs.get_or("url", &self.default_url).to_string();
        let mut files = inputs.list("files");
        if files.is_empty() {
            files.push(REPORT_FILE.to_string());
        }
        let timeout = inputs.get_u64("timeout")?.unwrap_or(DEFAULT_TIMEOUT_SECS);

        let mut query: Vec<(&str, String)> = vec![
            ("commit", context.commit.clone()),
            ("branch", context.branch.clone()),
            ("build", context.run_id.to_string()),
            ("service", "covpipe".to_string()),
        ];
        if let Some(flags) = inputs.get("flags") {
            query.push(("flags", flags.to_string()));
        }
        if let Some(name) = inputs.get("name") {
            query.push(("name", name.to_string()));
        }

        let mut output = String::new();
        for file in &files {
            let path = context.resolve(file);
            if !path.is_file() {
                return Err(StepError::MissingArtifact(path));
            }
            let body = tokio::fs::read(&path)
                .await
                .map_err(|e| StepError::Action(format!("failed to read {}: {}", path.display(), e)))?;
            let size = body.len();

            let request = self
                .client
                .post(&url)
                .query(&query)
                .header("Authorization", format!("token {}", token))
                .header("Content-Type", "text/plain")
                .timeout(Duration::from_secs(timeout))
                .body(body);

            let sent = tokio::select! {
                response = request.send() => response,
                _ = context.cancel.cancelled() => {
                    return Err(StepError::Process(ProcessError::Cancelled));
                }
            };
            let response = sent.map_err(|e| {
                StepError::Action(context.masker.mask(&format!("upload of {} failed: {}", file, e)))
            })?;

            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            if !status.is_success() {
                return Err(StepError::Action(context.masker.mask(&format!(
                    "upload of {} rejected with {}: {}",
                    file,
                    status,
                    text.trim()
                ))));
            }

            info!("Uploaded {} ({} bytes)", file, size);
            output.push_str(&context.masker.mask(&format!("Uploaded {} ({} bytes) {}\n", file, size, text.trim())));
        }

        Ok(output)
    }
}
