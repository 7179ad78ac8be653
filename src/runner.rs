//! Orchestration of one submission: stage, execute, build the result,
//! clean up.
//!
//! One invocation is one blocking unit of work. Whatever happens inside
//! the pipeline, the caller always gets an evaluation back: every error
//! is converted into an `internal error` result at this boundary, with
//! the raw error text attached as a staff-only message.

use serde::Serialize;
use std::backtrace::Backtrace;
use tracing::{debug, error, info, warn};

use crate::config::ExecutionRequest;
use crate::constructor::ResultConstructor;
use crate::errors::{error_result, ErrorBuilder, ErrorKind, JudgeError};
use crate::feedback::JudgeResult;
use crate::metrics;
use crate::sandbox::{Sandbox, Workspace};
use crate::status::{Locale, Status};

/// Pipeline phase of one submission run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Pending,
    Preparing,
    Executing,
    Parsing,
    Erroring,
    Finalized,
}

fn advance(phase: &mut Phase, next: Phase) {
    debug!("Pipeline phase {:?} -> {:?}", phase, next);
    *phase = next;
}

/// The finished evaluation: the serialized result plus the three scalar
/// projections the caller stores alongside it.
#[derive(Debug, Serialize)]
pub struct Evaluation {
    pub accepted: bool,
    pub status: Status,
    pub summary: String,
    pub result: serde_json::Value,
}

impl Evaluation {
    fn from_result(result: JudgeResult) -> Self {
        let summary = result.summary();
        let accepted = result.accepted;
        let status = result.status;
        let result = serde_json::to_value(&result).unwrap_or(serde_json::Value::Null);
        Self { accepted, status, summary, result }
    }
}

/// Runs one submission from staged files to finished evaluation.
pub struct SubmissionRunner<S: Sandbox> {
    sandbox: S,
}

impl<S: Sandbox> SubmissionRunner<S> {
    pub fn new(sandbox: S) -> Self {
        Self { sandbox }
    }

    /// Execute the full pipeline. Never fails: failure paths produce an
    /// error result instead.
    pub async fn run(&self, request: &ExecutionRequest) -> Evaluation {
        let locale = request.natural_language;
        let mut phase = Phase::Pending;
        advance(&mut phase, Phase::Preparing);

        let result = match self.sandbox.prepare(request).await {
            Ok(workspace) => {
                let result = match self.judge(request, &workspace, &mut phase).await {
                    Ok(result) => result,
                    Err(e) => {
                        advance(&mut phase, Phase::Erroring);
                        error!("Submission pipeline failed: {}", e);
                        internal_error_result(&e, locale)
                    }
                };
                // Cleanup runs no matter how the stages above went.
                self.sandbox.finalize(workspace).await;
                result
            }
            Err(e) => {
                advance(&mut phase, Phase::Erroring);
                error!("Failed to stage submission: {}", e);
                internal_error_result(&e, locale)
            }
        };

        advance(&mut phase, Phase::Finalized);
        info!(
            "Submission evaluated: status={}, accepted={}",
            result.status, result.accepted
        );
        Evaluation::from_result(result)
    }

    async fn judge(
        &self,
        request: &ExecutionRequest,
        workspace: &Workspace,
        phase: &mut Phase,
    ) -> Result<JudgeResult, JudgeError> {
        let locale = request.natural_language;
        advance(phase, Phase::Executing);
        let outcome = self.sandbox.execute(request, workspace).await?;
        debug!(
            "Sandbox finished: exit_code={}, timed_out={}, wall_time={:?}",
            outcome.exit_code, outcome.timed_out, outcome.wall_time
        );

        if outcome.is_success() && !outcome.stdout.trim().is_empty() {
            advance(phase, Phase::Parsing);
            let mut result = parse_output(&outcome.stdout, locale, false)?;
            if result.runtime_metrics.is_none() {
                let collected = metrics::collect(&workspace.resources_dir()).await;
                if !collected.is_empty() {
                    result.runtime_metrics = Some(collected);
                }
            }
            return Ok(result);
        }

        advance(phase, Phase::Erroring);
        let kind = self.sandbox.classify(&outcome);
        warn!(
            "Sandbox run failed: exit_code={}, classified as {:?}",
            outcome.exit_code, kind
        );

        // A timed-out judge may have streamed part of its protocol
        // before the watchdog killed it; keep that partial tree under a
        // synthesized timeout root when possible.
        if kind == ErrorKind::TimeLimit && !outcome.stdout.trim().is_empty() {
            match parse_output(&outcome.stdout, locale, true) {
                Ok(result) => return Ok(result),
                Err(e) => debug!("Partial output unusable after timeout: {}", e),
            }
        }

        Ok(error_result(kind, &outcome.stderr, locale))
    }
}

fn parse_output(stdout: &str, locale: Locale, timeout: bool) -> Result<JudgeResult, JudgeError> {
    let mut constructor = ResultConstructor::new(locale);
    constructor.feed(stdout)?;
    constructor.result(timeout)
}

/// Fallback result for errors caught at the orchestrator boundary. The
/// raw error chain and backtrace are only visible to course staff.
fn internal_error_result(error: &JudgeError, locale: Locale) -> JudgeResult {
    let mut message = error.to_string();
    let mut source = std::error::Error::source(error);
    while let Some(cause) = source {
        message.push_str(&format!("\ncaused by: {}", cause));
        source = cause.source();
    }
    message.push_str(&format!("\n{}", Backtrace::force_capture()));

    ErrorBuilder::new()
        .status(Status::InternalError)
        .description(Status::InternalError.human(locale))
        .message_description(message)
        .build()
}
