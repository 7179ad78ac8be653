//! Worker settings and the per-submission execution request.
//!
//! The multi-layer config merge (defaults, judge, exercise, submission)
//! happens upstream; the request arriving here is the already-merged,
//! immutable input for one execution attempt.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::{debug, info};

use crate::status::Locale;

const DEFAULT_TIME_LIMIT_SECS: u64 = 30;
const DEFAULT_MEMORY_LIMIT_BYTES: u64 = 256 * 1024 * 1024;

/// Worker-level settings loaded from a TOML file.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RunnerSettings {
    /// Default wall-clock limit in seconds when the request omits one.
    pub time_limit: u64,
    /// Default memory limit in bytes when the request omits one.
    pub memory_limit: u64,
    /// Staged source file name per programming language.
    pub source_names: HashMap<String, String>,
    /// Sandboxes run without network access unless this is set.
    pub allow_network: bool,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        let source_names = [
            ("python", "source.py"),
            ("javascript", "source.js"),
            ("java", "Source.java"),
            ("c", "source.c"),
            ("cpp", "source.cpp"),
            ("haskell", "source.hs"),
            ("bash", "source.sh"),
        ]
        .iter()
        .map(|(lang, name)| (lang.to_string(), name.to_string()))
        .collect();

        Self {
            time_limit: DEFAULT_TIME_LIMIT_SECS,
            memory_limit: DEFAULT_MEMORY_LIMIT_BYTES,
            source_names,
            allow_network: false,
        }
    }
}

impl RunnerSettings {
    /// Load settings from the path in `RUNNER_CONFIG`, falling back to
    /// compiled-in defaults when no file is present.
    pub fn load() -> Result<Self> {
        let path = std::env::var("RUNNER_CONFIG").unwrap_or_else(|_| "./files/runner.toml".into());
        match std::fs::read_to_string(&path) {
            Ok(content) => {
                let settings = toml::from_str(&content)
                    .with_context(|| format!("Failed to parse runner settings at {}", path))?;
                info!("Loaded runner settings from {}", path);
                Ok(settings)
            }
            Err(e) => {
                debug!("No runner settings at {} ({}), using defaults", path, e);
                Ok(Self::default())
            }
        }
    }

    /// File name under which the submission source is staged.
    pub fn source_name(&self, programming_language: &str) -> String {
        self.source_names
            .get(programming_language)
            .cloned()
            .unwrap_or_else(|| "source".to_string())
    }
}

/// Everything needed to execute one submission. Immutable once the
/// execution starts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRequest {
    /// The submitted source code.
    pub source: String,
    pub programming_language: String,
    #[serde(default)]
    pub natural_language: Locale,
    /// Wall-clock limit in seconds.
    #[serde(default = "default_time_limit")]
    pub time_limit: u64,
    /// Memory limit in bytes.
    #[serde(default = "default_memory_limit")]
    pub memory_limit: u64,
    /// Judge definition directory (mounted read-only).
    pub judge_path: PathBuf,
    /// Exercise directory with evaluation resources (mounted read-only).
    pub exercise_path: PathBuf,
    /// Container image the judge runs in.
    pub judge_image: String,
}

fn default_time_limit() -> u64 {
    DEFAULT_TIME_LIMIT_SECS
}

fn default_memory_limit() -> u64 {
    DEFAULT_MEMORY_LIMIT_BYTES
}

/// The JSON object written to the sandbox's stdin.
#[derive(Debug, Serialize, Deserialize)]
pub struct SandboxInput {
    pub memory_limit: u64,
    pub time_limit: u64,
    pub programming_language: String,
    pub natural_language: Locale,
    /// Judge resources inside the sandbox's mount namespace.
    pub home: String,
    /// Submission source inside the sandbox's mount namespace.
    pub source: String,
}

impl SandboxInput {
    pub fn compose(request: &ExecutionRequest, hidden_path: &str, source_name: &str) -> Self {
        Self {
            memory_limit: request.memory_limit,
            time_limit: request.time_limit,
            programming_language: request.programming_language.clone(),
            natural_language: request.natural_language,
            home: format!("{}/resources/judge", hidden_path),
            source: format!("{}/submission/{}", hidden_path, source_name),
        }
    }
}
