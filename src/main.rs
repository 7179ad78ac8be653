mod config;
mod constructor;
mod errors;
mod feedback;
mod metrics;
mod runner;
mod sandbox;
mod status;

use anyhow::{Context, Result};
use tokio::io::AsyncReadExt;
use tracing::info;

use crate::config::{ExecutionRequest, RunnerSettings};
use crate::errors::default_identifiers;
use crate::runner::SubmissionRunner;
use crate::sandbox::DockerSandbox;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("submission_runner=info".parse()?),
        )
        .init();

    dotenvy::dotenv().ok();

    let settings = RunnerSettings::load()?;

    let request = read_request().await?;
    info!(
        "Received submission: language={}, time_limit={}s, memory_limit={}B",
        request.programming_language, request.time_limit, request.memory_limit
    );

    let sandbox = DockerSandbox::new(settings, default_identifiers());
    let runner = SubmissionRunner::new(sandbox);
    let evaluation = runner.run(&request).await;

    let serialized =
        serde_json::to_string(&evaluation).context("Failed to serialize evaluation")?;
    println!("{}", serialized);

    Ok(())
}

/// Read one execution request: from the file named on the command line,
/// or from stdin when no argument is given.
async fn read_request() -> Result<ExecutionRequest> {
    let payload = match std::env::args().nth(1) {
        Some(path) => tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read submission request from {}", path))?,
        None => {
            let mut buf = String::new();
            tokio::io::stdin()
                .read_to_string(&mut buf)
                .await
                .context("Failed to read submission request from stdin")?;
            buf
        }
    };
    serde_json::from_str(&payload).context("Submission request is not valid JSON")
}
